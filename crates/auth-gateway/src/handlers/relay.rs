//! In-memory streaming relay.
//!
//! A sender (`POST`/`PUT /<path>`) and a receiver (`GET /<path>`) rendezvous
//! on the same path; whichever arrives first waits for the other. The
//! sender's request body is streamed into the receiver's response body
//! without buffering, and the sender's response completes once the receiver
//! has read the whole body.
//!
//! One sender and one receiver per path at a time. Nothing is persisted.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::instrument;

/// Paths that serve pages instead of relaying.
pub const RESERVED_PATHS: &[&str] = &["/", "/version", "/help"];

/// Methods accepted on reserved paths.
const RESERVED_ALLOW: &str = "GET, HEAD, OPTIONS";

/// Methods accepted on relay paths. `HEAD` is not: a receiver consumes the
/// transfer, and a bodiless response cannot.
const RELAY_ALLOW: &str = "GET, POST, PUT, OPTIONS";

/// A sender's body on its way to a receiver.
struct Transfer {
    body: Body,
    headers: HeaderMap,
    /// Fired once the receiver has read the body to the end.
    done: oneshot::Sender<()>,
}

enum Pending {
    Sender { id: u64, transfer: Transfer },
    Receiver { id: u64, ready: oneshot::Sender<Transfer> },
}

impl Pending {
    fn id(&self) -> u64 {
        match self {
            Pending::Sender { id, .. } | Pending::Receiver { id, .. } => *id,
        }
    }
}

/// Rendezvous table shared by all relay requests.
#[derive(Default)]
pub struct RelayState {
    pending: Mutex<HashMap<String, Pending>>,
    next_id: AtomicU64,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths with a waiting sender or receiver.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Removes a waiting party's entry if its request goes away first.
struct PendingGuard<'a> {
    state: &'a RelayState,
    path: String,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.state.lock();
        if pending.get(&self.path).map(Pending::id) == Some(self.id) {
            pending.remove(&self.path);
            tracing::debug!(target: "gateway.relay", path = %self.path, "Waiting party left");
        }
    }
}

/// Router serving the relay on every path.
pub fn relay_router(state: Arc<RelayState>) -> Router {
    Router::new().fallback(relay).with_state(state)
}

/// Relay entry point for every method and path.
#[instrument(skip_all, name = "gateway.relay", fields(method = %req.method(), path = %req.uri().path()))]
pub async fn relay(State(state): State<Arc<RelayState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    if RESERVED_PATHS.contains(&path.as_str()) {
        return match method {
            Method::GET | Method::HEAD => service_page(&path),
            Method::POST | Method::PUT => text(
                StatusCode::BAD_REQUEST,
                format!("[ERROR] Cannot send to the reserved path '{}'.\n", path),
            ),
            _ => method_not_allowed(RESERVED_ALLOW),
        };
    }

    match method {
        Method::POST | Method::PUT => send(&state, path, req).await,
        Method::GET => receive(&state, path).await,
        _ => method_not_allowed(RELAY_ALLOW),
    }
}

async fn send(state: &RelayState, path: String, req: Request) -> Response {
    let headers = forwarded_headers(req.headers());
    let (done_tx, done_rx) = oneshot::channel();
    let transfer = Transfer {
        body: req.into_body(),
        headers,
        done: done_tx,
    };

    let guard = {
        let mut pending = state.lock();

        match pending.remove(&path) {
            Some(Pending::Receiver { ready, .. }) => match ready.send(transfer) {
                Ok(()) => {
                    tracing::debug!(target: "gateway.relay", path = %path, "Sender joined waiting receiver");
                    None
                }
                // The receiver left without cleaning up yet; wait for the next one.
                Err(returned) => Some(wait_as_sender(state, &mut pending, &path, returned)),
            },
            Some(existing @ Pending::Sender { .. }) => {
                pending.insert(path.clone(), existing);
                tracing::debug!(target: "gateway.relay", path = %path, "Rejected second sender");
                return text(
                    StatusCode::BAD_REQUEST,
                    format!("[ERROR] Another sender has been connected on '{}'.\n", path),
                );
            }
            None => Some(wait_as_sender(state, &mut pending, &path, transfer)),
        }
    };

    let result = done_rx.await;
    drop(guard);

    match result {
        Ok(()) => {
            tracing::debug!(target: "gateway.relay", path = %path, "Transfer complete");
            text(StatusCode::OK, "[INFO] Sent successfully!\n".to_string())
        }
        Err(_) => {
            tracing::warn!(target: "gateway.relay", path = %path, "Transfer aborted by receiver");
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "[ERROR] Transfer was aborted.\n".to_string(),
            )
        }
    }
}

fn wait_as_sender<'a>(
    state: &'a RelayState,
    pending: &mut HashMap<String, Pending>,
    path: &str,
    transfer: Transfer,
) -> PendingGuard<'a> {
    let id = state.next_id();
    pending.insert(path.to_string(), Pending::Sender { id, transfer });
    tracing::debug!(target: "gateway.relay", path = %path, "Sender waiting for receiver");
    PendingGuard {
        state,
        path: path.to_string(),
        id,
    }
}

async fn receive(state: &RelayState, path: String) -> Response {
    let waiting = {
        let mut pending = state.lock();

        match pending.remove(&path) {
            Some(Pending::Sender { transfer, .. }) => {
                tracing::debug!(target: "gateway.relay", path = %path, "Receiver joined waiting sender");
                return stream_transfer(transfer);
            }
            Some(existing @ Pending::Receiver { .. }) => {
                pending.insert(path.clone(), existing);
                tracing::debug!(target: "gateway.relay", path = %path, "Rejected second receiver");
                return text(
                    StatusCode::BAD_REQUEST,
                    format!("[ERROR] Another receiver has been connected on '{}'.\n", path),
                );
            }
            None => {
                let id = state.next_id();
                let (ready_tx, ready_rx) = oneshot::channel();
                pending.insert(path.clone(), Pending::Receiver { id, ready: ready_tx });
                tracing::debug!(target: "gateway.relay", path = %path, "Receiver waiting for sender");
                (
                    PendingGuard {
                        state,
                        path: path.clone(),
                        id,
                    },
                    ready_rx,
                )
            }
        }
    };

    let (guard, ready_rx) = waiting;
    let result = ready_rx.await;
    drop(guard);

    match result {
        Ok(transfer) => stream_transfer(transfer),
        Err(_) => text(
            StatusCode::INTERNAL_SERVER_ERROR,
            "[ERROR] Sender is gone.\n".to_string(),
        ),
    }
}

/// Build the receiver's response around the sender's body.
///
/// `done` fires once the body is exhausted, or once the declared
/// `Content-Length` has been yielded, since hyper stops polling a sized body
/// after its last byte.
fn stream_transfer(transfer: Transfer) -> Response {
    let Transfer {
        body,
        headers,
        done,
    } = transfer;

    let mut done = Some(done);
    let remaining = declared_length(&headers);
    if remaining == Some(0) {
        finish(&mut done);
    }

    let stream = futures::stream::unfold(
        (body.into_data_stream(), remaining, done),
        |(mut data, mut remaining, mut done)| async move {
            match data.next().await {
                Some(chunk) => {
                    if let (Ok(bytes), Some(left)) = (&chunk, remaining.as_mut()) {
                        *left = left.saturating_sub(bytes.len() as u64);
                        if *left == 0 {
                            finish(&mut done);
                        }
                    }
                    Some((chunk, (data, remaining, done)))
                }
                None => {
                    finish(&mut done);
                    None
                }
            }
        },
    );

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().extend(headers);
    response
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn finish(done: &mut Option<oneshot::Sender<()>>) {
    if let Some(done) = done.take() {
        // The sender may already have gone away.
        let _ = done.send(());
    }
}

/// Request headers that travel from sender to receiver.
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_DISPOSITION,
        header::CONTENT_LENGTH,
    ] {
        if let Some(value) = headers.get(&name) {
            forwarded.insert(name, value.clone());
        }
    }
    forwarded
}

fn service_page(path: &str) -> Response {
    let body = match path {
        "/version" => format!("{}\n", env!("CARGO_PKG_VERSION")),
        "/help" => concat!(
            "Send:    curl -T <file> -H \"Authorization: Bearer <token>\" <gateway>/<path>\n",
            "Receive: curl -H \"Authorization: Bearer <token>\" <gateway>/<path>\n",
        )
        .to_string(),
        _ => "Authenticated relay. GET /help for usage.\n".to_string(),
    };
    text(StatusCode::OK, body)
}

fn method_not_allowed(allow: &'static str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, HeaderValue::from_static(allow))],
        "[ERROR] Unsupported method.\n",
    )
        .into_response()
}

fn text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
        body,
    )
        .into_response()
}
