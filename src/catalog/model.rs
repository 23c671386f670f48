//! Board model pin tables
//!
//! Maps the pin names used in the config file to the pin indices the
//! protocol speaks.

use std::collections::HashMap;

use crate::types::{NexusError, Result};

/// GPIO ports and pins per port on the STM32F407VET6 (LQFP100)
const STM32F407VET6_PORTS: &[char] = &['A', 'B', 'C', 'D', 'E'];
const PINS_PER_PORT: usize = 16;

#[derive(Debug, Clone)]
pub struct BoardModel {
    name: String,
    pin_end: usize,
    pins: HashMap<String, u8>,
}

impl BoardModel {
    /// Build the pin table for a known model
    pub fn new(model: &str) -> Result<Self> {
        let names: Vec<String> = match model {
            "stm32f407vet6" => STM32F407VET6_PORTS
                .iter()
                .flat_map(|port| (0..PINS_PER_PORT).map(move |bit| format!("P{}{}", port, bit)))
                .collect(),
            _ => return Err(NexusError::Config(format!("Board model not found: {}", model))),
        };

        let pins = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as u8))
            .collect();

        Ok(Self {
            name: model.to_string(),
            pin_end: names.len(),
            pins,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of addressable pins
    pub fn pin_end(&self) -> usize {
        self.pin_end
    }

    /// Protocol index for a pin name
    pub fn pin(&self, id: &str) -> Option<u8> {
        self.pins.get(id).copied()
    }
}
