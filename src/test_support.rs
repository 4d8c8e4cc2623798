//! In-process HTTP server for exercising range downloads in tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;

/// A failure injected for requests starting at a given offset.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Reply with this status and no data.
    Status(u16),
    /// Ignore the `Range` header and reply `200` with the whole file.
    IgnoreRange,
    /// Reply `206` but send only the first half of the requested bytes.
    Short,
}

struct ServerState {
    data: Bytes,
    faults: Mutex<HashMap<u64, (Fault, usize)>>,
    requests: Mutex<Vec<(u64, u64)>>,
}

/// Serves one in-memory file at `/file.bin` with byte-range support.
///
/// `/nohead.bin` serves the same ranges but answers 404 to HEAD.
/// `/nolength.bin` never reports a size: HEAD answers 404 and GET answers
/// 200 without `Content-Range`.
pub struct RangeServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl RangeServer {
    pub async fn start(data: Vec<u8>) -> Self {
        let state = Arc::new(ServerState {
            data: Bytes::from(data),
            faults: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/file.bin", get(serve_range).head(serve_head))
            .route("/nohead.bin", get(serve_range).head(missing))
            .route("/nolength.bin", get(serve_unsized).head(missing))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/file.bin", self.addr)
    }

    pub fn no_head_url(&self) -> String {
        format!("http://{}/nohead.bin", self.addr)
    }

    pub fn unsized_url(&self) -> String {
        format!("http://{}/nolength.bin", self.addr)
    }

    /// Injects `fault` for the next `times` requests whose range starts at `start`.
    pub fn fail(&self, start: u64, fault: Fault, times: usize) {
        self.state
            .faults
            .lock()
            .unwrap()
            .insert(start, (fault, times));
    }

    /// Every ranged GET served so far, as `(start, end)`.
    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Number of ranged GETs whose range started at `start`.
    pub fn requests_at(&self, start: u64) -> usize {
        self.requests().iter().filter(|(s, _)| *s == start).count()
    }
}

/// Deterministic, non-repeating-looking test content.
pub fn sample_data(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 9)) as u8)
        .collect()
}

fn parse_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let value = headers.get(RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn serve_head(State(state): State<Arc<ServerState>>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_LENGTH, state.data.len())
        .header(ACCEPT_RANGES, "bytes")
        .body(Body::empty())
        .unwrap()
}

async fn serve_range(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let total = state.data.len() as u64;
    let Some((start, end)) = parse_range(&headers) else {
        return (StatusCode::OK, state.data.clone()).into_response();
    };
    if total == 0 || start >= total {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    }
    let end = end.min(total - 1);
    state.requests.lock().unwrap().push((start, end));

    let fault = {
        let mut faults = state.faults.lock().unwrap();
        match faults.get_mut(&start) {
            Some((fault, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*fault)
            }
            _ => None,
        }
    };

    let send_end = match fault {
        Some(Fault::Status(code)) => {
            return StatusCode::from_u16(code).unwrap().into_response();
        }
        Some(Fault::IgnoreRange) => {
            return (StatusCode::OK, state.data.clone()).into_response();
        }
        Some(Fault::Short) => start + (end - start) / 2,
        None => end,
    };

    #[allow(clippy::cast_possible_truncation)]
    let body = state.data.slice(start as usize..=send_end as usize);
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(CONTENT_RANGE, format!("bytes {start}-{send_end}/{total}"))
        .body(Body::from(body))
        .unwrap()
}

async fn serve_unsized() -> Response {
    (StatusCode::OK, Body::from("no length here")).into_response()
}

async fn missing() -> StatusCode {
    StatusCode::NOT_FOUND
}
