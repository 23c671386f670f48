//! End-to-end HTTP tests against a fake Firmata board on loopback

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use nexus::catalog::Catalog;
use nexus::firmata::{Firmata, FirmataConnector};
use nexus::server::{serve, AppState};
use nexus::{Args, Boards, Config};

/// Accepts one connection and answers the version request
async fn fake_board() -> (String, JoinHandle<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut req = [0u8; 1];
        socket.read_exact(&mut req).await.unwrap();
        assert_eq!(req[0], 0xF9);
        socket.write_all(&[0xF9, 2, 5]).await.unwrap();
        socket
    });
    (addr, handle)
}

struct Gateway {
    addr: SocketAddr,
    boards: Boards<Firmata>,
    board: TcpStream,
}

async fn gateway() -> Gateway {
    let (board_addr, board) = fake_board().await;
    let config = Config::from_json(&format!(
        r#"{{
            "BoardInfos": [{{"Model": "stm32f407vet6", "Addr": "{}", "Name": "bench"}}],
            "GroupInfos": [{{"Name": "leds", "Pins": [{{"Board": "bench", "ID": "PA1", "Name": "green"}}]}}]
        }}"#,
        board_addr
    ))
    .unwrap();
    let catalog = Catalog::from_config(&config).unwrap();

    let args = Args::try_parse_from(["nexus", "--listen", "127.0.0.1:0"]).unwrap();
    let boards = Boards::start(
        FirmataConnector::new(),
        catalog.targets(),
        args.board_settings(),
    );
    let state = Arc::new(AppState::new(args, catalog, boards.clone()).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state, boards.closed()));

    let board = tokio::time::timeout(Duration::from_secs(5), board)
        .await
        .expect("board dialed")
        .unwrap();
    Gateway {
        addr,
        boards,
        board,
    }
}

/// Read until the end of the response head
async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// One request on its own connection, returns the whole response
async fn request(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("response")
        .unwrap();
    String::from_utf8(response).unwrap()
}

#[tokio::test]
async fn test_connect_tunnels_bytes_to_board() {
    let Gateway {
        addr, mut board, ..
    } = gateway().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"CONNECT 0.nc:80 HTTP/1.1\r\nHost: 0.nc:80\r\n\r\n")
        .await
        .unwrap();
    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{}", head);

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), board.read_exact(&mut buf))
        .await
        .expect("bytes reached board")
        .unwrap();
    assert_eq!(&buf, b"ping");

    board.write_all(b"pong").await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .expect("bytes reached client")
        .unwrap();
    assert_eq!(&buf, b"pong");
}

#[tokio::test]
async fn test_connect_rejects_unknown_board() {
    let gw = gateway().await;
    let response = request(
        gw.addr,
        "CONNECT 7.nc:80 HTTP/1.1\r\nHost: 7.nc:80\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404"), "{}", response);
}

#[tokio::test]
async fn test_groups_listing() {
    let gw = gateway().await;
    let response = request(
        gw.addr,
        "GET /groups HTTP/1.1\r\nHost: nexus\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["groups"][0]["name"], "leds");
    assert_eq!(json["groups"][0]["pins"][0]["board"], 0);
    assert_eq!(json["groups"][0]["pins"][0]["id"], 1);
    assert_eq!(json["groups"][0]["pins"][0]["name"], "green");
}

#[tokio::test]
async fn test_pin_write_sends_firmata_commands() {
    let Gateway {
        addr, mut board, ..
    } = gateway().await;

    let response = request(
        addr,
        "PUT /boards/0/pins/PA1 HTTP/1.1\r\nHost: nexus\r\nContent-Length: 1\r\nConnection: close\r\n\r\n1",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

    let mut cmds = [0u8; 6];
    tokio::time::timeout(Duration::from_secs(5), board.read_exact(&mut cmds))
        .await
        .expect("commands reached board")
        .unwrap();
    assert_eq!(cmds, [0xF4, 1, 1, 0xF5, 1, 1]);
}

#[tokio::test]
async fn test_pin_write_rejects_bad_body_and_pin() {
    let gw = gateway().await;

    let bad_body = request(
        gw.addr,
        "PUT /boards/0/pins/PA1 HTTP/1.1\r\nHost: nexus\r\nContent-Length: 2\r\nConnection: close\r\n\r\non",
    )
    .await;
    assert!(bad_body.starts_with("HTTP/1.1 400"), "{}", bad_body);

    let bad_pin = request(
        gw.addr,
        "PUT /boards/0/pins/PZ9 HTTP/1.1\r\nHost: nexus\r\nContent-Length: 1\r\nConnection: close\r\n\r\n1",
    )
    .await;
    assert!(bad_pin.starts_with("HTTP/1.1 404"), "{}", bad_pin);
}

#[tokio::test]
async fn test_shutdown_stops_serving() {
    let gw = gateway().await;
    let health = request(
        gw.addr,
        "GET /health HTTP/1.1\r\nHost: nexus\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(health.starts_with("HTTP/1.1 200"), "{}", health);

    gw.boards.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(TcpStream::connect(gw.addr).await.is_err());
}
