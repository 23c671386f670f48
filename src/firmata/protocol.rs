//! Firmata message bytes used by the gateway

/// Version request, and the first byte of the version reply
pub const REPORT_VERSION: u8 = 0xF9;
pub const SET_PIN_MODE: u8 = 0xF4;
pub const SET_DIGITAL_PIN_VALUE: u8 = 0xF5;

/// Pin modes understood by SET_PIN_MODE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PinMode {
    Input = 0x00,
    Output = 0x01,
    Analog = 0x02,
    Pwm = 0x03,
    Servo = 0x04,
    InputPullup = 0x0B,
}

pub fn set_pin_mode(pin: u8, mode: PinMode) -> [u8; 3] {
    [SET_PIN_MODE, pin & 0x7F, mode as u8]
}

pub fn digital_write(pin: u8, high: bool) -> [u8; 3] {
    [SET_DIGITAL_PIN_VALUE, pin & 0x7F, u8::from(high)]
}

/// Find a `REPORT_VERSION major minor` reply anywhere in `buf`
pub fn find_version(buf: &[u8]) -> Option<(u8, u8)> {
    buf.windows(3)
        .find(|w| w[0] == REPORT_VERSION && w[1] < 0x80 && w[2] < 0x80)
        .map(|w| (w[1], w[2]))
}
