//! Axum service that parks requests for the bridge.
//!
//! # Responsibilities
//! - Turn each HTTP request into a parked store entry
//! - Notify the bridge with an `HttpEvent`
//! - Wait for the response (bounded by the response timeout)
//! - Write the response back to the client

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, request::Parts, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::sync::mpsc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::net::store::{BodySource, IncomingRequest, OutgoingResponse, PendingTracker, RequestStore};
use crate::net::{HttpEvent, RequestId, ServerId};

/// State shared by every request of one server.
#[derive(Clone)]
pub struct ServiceState {
    pub server_id: ServerId,
    pub store: Arc<RequestStore>,
    pub events: mpsc::UnboundedSender<HttpEvent>,
    pub pending: PendingTracker,
    pub is_tls: bool,
    pub response_timeout: Duration,
}

/// Build the router serving one listener.
pub fn router(state: ServiceState, max_body_bytes: usize) -> Router {
    Router::new()
        .fallback(park_request)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn park_request(State(state): State<ServiceState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let peer_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let incoming = IncomingRequest {
        server_id: state.server_id,
        method: parts.method.as_str().to_string(),
        url: absolute_url(state.is_tls, &parts),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body: BodySource::Stream(body),
        peer_addr,
    };

    let (request_id, reply) = state.store.park(incoming, &state.pending);
    let _parked = ParkedGuard {
        store: Arc::clone(&state.store),
        id: request_id,
    };

    if let Err(e) = state.events.send(HttpEvent {
        server_id: state.server_id,
        request_id,
    }) {
        tracing::error!(
            server_id = %state.server_id,
            request_id = %request_id,
            error = %e,
            "Failed to hand request to the bridge"
        );
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }

    match tokio::time::timeout(state.response_timeout, reply).await {
        Ok(Ok(response)) => into_http(response),
        Ok(Err(_)) => {
            tracing::warn!(
                server_id = %state.server_id,
                request_id = %request_id,
                "Request dropped without a response"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Handler did not respond").into_response()
        }
        Err(_) => {
            tracing::warn!(
                server_id = %state.server_id,
                request_id = %request_id,
                timeout = ?state.response_timeout,
                "Request timed out waiting for a response"
            );
            (StatusCode::GATEWAY_TIMEOUT, "Request timeout").into_response()
        }
    }
}

/// Drops the parked entry when the waiting future ends, however it ends.
/// Answered requests are already gone from the store, so this is a no-op for them.
struct ParkedGuard {
    store: Arc<RequestStore>,
    id: RequestId,
}

impl Drop for ParkedGuard {
    fn drop(&mut self) {
        if self.store.discard(self.id) {
            tracing::debug!(request_id = %self.id, "Discarded unanswered request");
        }
    }
}

/// Absolute URL from scheme, Host header and request target.
fn absolute_url(is_tls: bool, parts: &Parts) -> String {
    let target = parts.uri.to_string();
    if target.starts_with("http://") || target.starts_with("https://") {
        return target;
    }

    let scheme = if is_tls { "https" } else { "http" };
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}{}", scheme, host, target)
}

/// Convert a bridge response into an HTTP response, skipping unrepresentable headers.
fn into_http(response: OutgoingResponse) -> Response {
    let status = match StatusCode::from_u16(response.status) {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(status = response.status, "Handler returned an invalid status, answering 500");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let mut http = Response::new(Body::from(response.body));
    *http.status_mut() = status;

    let headers = http.headers_mut();
    for (name, value) in response.headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid response header"),
        }
    }
    http
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tower::ServiceExt;

    fn state() -> (ServiceState, mpsc::UnboundedReceiver<HttpEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let state = ServiceState {
            server_id: ServerId::new(7),
            store: Arc::new(RequestStore::new()),
            events,
            pending: PendingTracker::new(),
            is_tls: false,
            response_timeout: Duration::from_secs(5),
        };
        (state, rx)
    }

    #[tokio::test]
    async fn parks_and_answers() {
        let (state, mut events) = state();
        let store = state.store.clone();
        let app = router(state, 1024);

        let responder = tokio::spawn(async move {
            let event = events.recv().await.unwrap();
            assert_eq!(event.server_id, ServerId::new(7));
            let info = store.basic_info(event.request_id).unwrap();
            assert_eq!(info.method, "GET");
            assert_eq!(info.url, "http://example.com/ping?x=1");
            store
                .respond(
                    event.request_id,
                    OutgoingResponse {
                        status: 201,
                        headers: vec![("x-bridge".into(), "yes".into())],
                        body: Bytes::from_static(b"pong"),
                    },
                )
                .unwrap();
        });

        let request = Request::builder()
            .uri("/ping?x=1")
            .header("host", "example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        responder.await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-bridge"], "yes");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"pong");
    }

    #[tokio::test]
    async fn times_out_with_504() {
        let (mut state, _events) = state();
        state.response_timeout = Duration::from_millis(20);
        let store = state.store.clone();
        let app = router(state, 1024);

        let request = Request::builder().uri("/slow").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn closed_event_channel_yields_500() {
        let (state, events) = state();
        drop(events);
        let store = state.store.clone();
        let app = router(state, 1024);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn client_disconnect_releases_parked_request() {
        let (state, _events) = state();
        let store = state.store.clone();
        let pending = state.pending.clone();
        let app = router(state, 1024);

        let request = Request::builder().uri("/hang").body(Body::empty()).unwrap();
        let gave_up = tokio::time::timeout(Duration::from_millis(50), app.oneshot(request)).await;
        assert!(gave_up.is_err());

        assert!(store.is_empty());
        assert_eq!(pending.count(), 0);
    }

    #[test]
    fn invalid_status_becomes_500() {
        let response = into_http(OutgoingResponse {
            status: 42,
            headers: Vec::new(),
            body: Bytes::from_static(b"oops"),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn url_uses_scheme_and_host() {
        let (parts, _) = Request::builder()
            .uri("/a/b")
            .header("host", "api.local:8443")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(absolute_url(true, &parts), "https://api.local:8443/a/b");

        let (bare, _) = Request::builder().uri("/x").body(()).unwrap().into_parts();
        assert_eq!(absolute_url(false, &bare), "http://localhost/x");
    }
}
