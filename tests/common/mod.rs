//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use serve_bridge::http::{Bridge, Dispatch, ErrorHandler, Handler, ServeOptions, ServerHandle};
use serve_bridge::lifecycle::Shutdown;
use serve_bridge::net::{ListenerSettings, LoopbackListener, OutgoingResponse, SyntheticRequest};

/// A bridge over an in-memory listener.
pub fn loopback_bridge() -> (LoopbackListener, Bridge) {
    let listener = LoopbackListener::new();
    let bridge = Bridge::new(Arc::new(listener.clone()));
    (listener, bridge)
}

/// Serve on an ephemeral loopback port.
pub async fn serve(bridge: &Bridge, handler: Handler, error_handler: Option<ErrorHandler>) -> ServerHandle {
    let mut options = ServeOptions::new().hostname("localhost").port(0).handler(handler);
    if let Some(error_handler) = error_handler {
        options = options.error_handler(error_handler);
    }
    bridge.serve(options).await.unwrap()
}

/// Inject a request and dispatch it without waiting for the answer.
pub fn start(
    listener: &LoopbackListener,
    bridge: &Bridge,
    server: &ServerHandle,
    request: SyntheticRequest,
) -> (Dispatch, oneshot::Receiver<OutgoingResponse>) {
    let (id, rx) = listener.inject(server.id(), request);
    (bridge.dispatcher().dispatch(server.id(), id), rx)
}

/// Inject, dispatch and wait for the response.
pub async fn exchange(
    listener: &LoopbackListener,
    bridge: &Bridge,
    server: &ServerHandle,
    request: SyntheticRequest,
) -> OutgoingResponse {
    let (_, rx) = start(listener, bridge, server, request);
    receive(rx).await
}

pub async fn receive(rx: oneshot::Receiver<OutgoingResponse>) -> OutgoingResponse {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("response timed out")
        .expect("responder dropped")
}

/// A bridge over a real TCP listener on 127.0.0.1 with its event loop running.
pub struct TcpBridge {
    pub bridge: Bridge,
    pub shutdown: Shutdown,
    pub event_loop: JoinHandle<()>,
}

impl TcpBridge {
    pub fn start(settings: ListenerSettings) -> Self {
        let shutdown = Shutdown::new();
        let (bridge, events) = Bridge::with_axum(settings);
        let event_loop = tokio::spawn(bridge.clone().run(events, shutdown.subscribe()));
        Self {
            bridge,
            shutdown,
            event_loop,
        }
    }

    pub async fn serve(&self, handler: Handler, error_handler: Option<ErrorHandler>) -> ServerHandle {
        let mut options = ServeOptions::new().hostname("127.0.0.1").port(0).handler(handler);
        if let Some(error_handler) = error_handler {
            options = options.error_handler(error_handler);
        }
        self.bridge.serve(options).await.unwrap()
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.event_loop)
            .await
            .expect("event loop did not stop")
            .unwrap();
    }
}

/// Base URL for reqwest, always on 127.0.0.1.
pub fn base_url(server: &ServerHandle) -> String {
    format!("http://127.0.0.1:{}", server.port())
}
