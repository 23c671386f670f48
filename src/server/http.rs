//! HTTP server implementation
//!
//! hyper http1 with upgrades. `CONNECT <board>.nc:80` tunnels the upgraded
//! connection onto a board as a proxy pipe; a few plain routes expose the
//! group listing and single pin writes.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::board::Boards;
use crate::catalog::Catalog;
use crate::config::Args;
use crate::firmata::{Firmata, PinMode};
use crate::proxy::ProxyStream;
use crate::shutdown::Shutdown;
use crate::types::{NexusError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Host suffix for CONNECT requests; the board index comes before it
pub const CONNECT_HOST_SUFFIX: &str = ".nc:80";

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub catalog: Catalog,
    pub boards: Boards<Firmata>,
    /// `/groups` body, rendered once
    groups: Bytes,
}

impl AppState {
    pub fn new(args: Args, catalog: Catalog, boards: Boards<Firmata>) -> Result<Self> {
        let groups = Bytes::from(catalog.groups_json()?);
        Ok(Self {
            args,
            catalog,
            boards,
            groups,
        })
    }
}

/// Bind `args.listen` and serve until the boards shut down
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    let shutdown = state.boards.closed();
    serve(listener, state, shutdown).await
}

/// Serve connections from `listener` until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: Shutdown,
) -> Result<()> {
    info!(
        "Nexus listening on {} with {} board(s)",
        listener.local_addr()?,
        state.boards.len()
    );

    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }

    info!("HTTP server stopped");
    Ok(())
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, req.uri());

    if method == Method::CONNECT {
        return Ok(to_boxed(handle_connect(&state, req)));
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => {
            json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
        }

        (&Method::GET, ["groups"]) => {
            let mut response = Response::new(Full::new(state.groups.clone()));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }

        (&Method::PUT, ["boards", board, "pins", pin]) => {
            let (board, pin) = (board.to_string(), pin.to_string());
            handle_pin_write(&state, &board, &pin, req).await
        }

        _ => error_response(NexusError::NotFound(path.clone())),
    };

    Ok(to_boxed(response))
}

/// Parse `<index>.nc:80` into a board index
pub fn parse_connect_host(host: &str) -> Result<usize> {
    let id = host
        .strip_suffix(CONNECT_HOST_SUFFIX)
        .ok_or_else(|| NexusError::NotFound(host.to_string()))?;
    id.parse::<u32>()
        .map(|id| id as usize)
        .map_err(|_| NexusError::BadRequest(format!("invalid board id: {}", id)))
}

/// Answer 200, then attach the upgraded connection to the board
fn handle_connect(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let host = req
        .uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .or_else(|| {
            req.headers()
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(|h| h.to_string())
        })
        .unwrap_or_default();

    let board = match parse_connect_host(&host) {
        Ok(board) => board,
        Err(e) => return error_response(e),
    };
    if board >= state.boards.len() {
        return error_response(NexusError::InvalidBoard {
            board,
            count: state.boards.len(),
        });
    }

    let boards = state.boards.clone();
    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                error!("CONNECT upgrade for board {} failed: {:?}", board, e);
                return;
            }
        };

        let pipe = ProxyStream::duplex(TokioIo::new(upgraded));
        let attached = boards
            .add_proxy_pipe(board, pipe, None, move |link: &Firmata| {
                info!("Proxy pipe attached to board {} at {}", board, link.address());
            })
            .await;
        if let Err(e) = attached {
            warn!("Proxy to board {} failed: {}", board, e);
        }
    });

    Response::new(Full::new(Bytes::new()))
}

/// `PUT /boards/{board}/pins/{pin}` with body `0` or `1`
async fn handle_pin_write(
    state: &AppState,
    board: &str,
    pin_id: &str,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let board: usize = match board.parse() {
        Ok(board) => board,
        Err(_) => return error_response(NexusError::BadRequest(format!("invalid board: {}", board))),
    };
    let Some(entry) = state.catalog.board(board) else {
        return error_response(NexusError::InvalidBoard {
            board,
            count: state.boards.len(),
        });
    };
    let Some(pin) = entry.model.pin(pin_id) else {
        return error_response(NexusError::NotFound(format!(
            "pin {} on {}",
            pin_id,
            entry.model.name()
        )));
    };

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return error_response(NexusError::BadRequest(e.to_string())),
    };
    let high = match std::str::from_utf8(&body).map(str::trim) {
        Ok("1") => true,
        Ok("0") => false,
        _ => return error_response(NexusError::BadRequest("body must be 0 or 1".into())),
    };

    let written = state
        .boards
        .dispatch(board, move |link: &Firmata| {
            link.set_pin_mode(pin, PinMode::Output)?;
            link.digital_write(pin, high)
        })
        .await
        .and_then(|result| result);

    match written {
        Ok(()) => json_response(
            StatusCode::OK,
            serde_json::json!({ "board": board, "pin": pin_id, "value": u8::from(high) }),
        ),
        Err(e) => error_response(e),
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(err: NexusError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    json_response(status, serde_json::json!({ "error": message }))
}

fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}
