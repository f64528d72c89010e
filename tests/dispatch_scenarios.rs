//! Dispatch behaviour through the in-memory listener.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Notify;

use serve_bridge::http::{
    async_handler, error_handler_fn, handler_fn, BridgeError, Completion, Dispatch, HandlerError, ReloadOptions,
    Reply, Response, ServeOptions, Tier,
};
use serve_bridge::net::{ListenError, RequestId, SyntheticRequest};

mod common;

#[tokio::test]
async fn ping_returns_pong() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(&bridge, handler_fn(|_| Ok("pong")), None).await;

    let response = common::exchange(&listener, &bridge, &server, SyntheticRequest::get("/ping")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_ref(), b"pong");
    assert_eq!(response.header("content-type"), Some("text/plain;charset=utf-8"));
}

#[tokio::test]
async fn json_reply_round_trips() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        handler_fn(|_| Ok(Reply::json(&json!({ "ok": true, "count": 3 }))?)),
        None,
    )
    .await;

    let response = common::exchange(&listener, &bridge, &server, SyntheticRequest::get("/")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, json!({ "ok": true, "count": 3 }));
}

#[tokio::test]
async fn binary_body_survives_transfer() {
    let payload: Vec<u8> = vec![0x00, 0xff, 0x10, 0x80, 0x7f, 0xfe];
    let expected = payload.clone();
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        handler_fn(move |_| Ok(Response::bytes(200, payload.clone()).with_header("content-type", "application/octet-stream"))),
        None,
    )
    .await;

    let (dispatch, rx) = common::start(&listener, &bridge, &server, SyntheticRequest::get("/blob"));
    assert!(matches!(dispatch, Dispatch::Responded(Tier::General)));
    let response = common::receive(rx).await;
    assert_eq!(response.body.as_ref(), expected.as_slice());
    assert_eq!(response.header("content-type"), Some("application/octet-stream"));
}

#[tokio::test]
async fn body_cannot_be_read_twice() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        async_handler(|req| async move {
            let clone = req.clone();
            let first = req.text().await?;
            let second = matches!(req.bytes().await, Err(BridgeError::BodyConsumed));
            let through_clone = matches!(clone.text().await, Err(BridgeError::BodyConsumed));
            Ok::<_, HandlerError>(format!("{}|{}|{}", first, second, through_clone))
        }),
        None,
    )
    .await;

    let response = common::exchange(&listener, &bridge, &server, SyntheticRequest::post("/", "hello")).await;
    assert_eq!(response.body.as_ref(), b"hello|true|true");
}

#[tokio::test]
async fn stopped_server_answers_503_without_calling_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        handler_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("should not run")
        }),
        None,
    )
    .await;

    assert!(server.stop());
    let (dispatch, rx) = common::start(&listener, &bridge, &server, SyntheticRequest::get("/"));
    assert!(matches!(dispatch, Dispatch::Unavailable));

    let response = common::receive(rx).await;
    assert_eq!(response.status, 503);
    assert_eq!(response.body.as_ref(), b"Service Unavailable");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(&bridge, handler_fn(|_| Ok("x")), None).await;

    assert!(server.stop());
    assert!(!server.stop());
    assert!(!listener.is_running(server.id()));
}

#[tokio::test]
async fn sync_error_uses_error_handler_response() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        handler_fn(|_| -> Result<Reply, HandlerError> { Err(HandlerError::msg("database offline")) }),
        Some(error_handler_fn(|err| Ok(Response::text(503, format!("degraded: {}", err))))),
    )
    .await;

    let (dispatch, rx) = common::start(&listener, &bridge, &server, SyntheticRequest::get("/"));
    assert!(matches!(dispatch, Dispatch::Errored));
    let response = common::receive(rx).await;
    assert_eq!(response.status, 503);
    assert_eq!(response.body.as_ref(), b"degraded: database offline");
}

#[tokio::test]
async fn error_without_error_handler_is_500() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        handler_fn(|_| -> Result<Reply, HandlerError> { Err(HandlerError::msg("boom")) }),
        None,
    )
    .await;

    let response = common::exchange(&listener, &bridge, &server, SyntheticRequest::get("/")).await;
    assert_eq!(response.status, 500);
    assert_eq!(response.body.as_ref(), b"Internal Server Error");
}

#[tokio::test]
async fn async_failure_and_panic_reach_error_handler() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        async_handler(|req| async move {
            if req.path() == "/panic" {
                panic!("async panic");
            }
            Err::<Reply, _>(HandlerError::msg("rejected"))
        }),
        Some(error_handler_fn(|err| {
            let status = if err.is_panic() { 599 } else { 422 };
            Ok(Response::text(status, err.to_string()))
        })),
    )
    .await;

    let (dispatch, rx) = common::start(&listener, &bridge, &server, SyntheticRequest::get("/reject"));
    let Dispatch::Pending(task) = dispatch else {
        panic!("expected pending dispatch");
    };
    assert_eq!(task.await.unwrap(), Completion::Errored);
    let rejected = common::receive(rx).await;
    assert_eq!(rejected.status, 422);
    assert_eq!(rejected.body.as_ref(), b"rejected");

    let panicked = common::exchange(&listener, &bridge, &server, SyntheticRequest::get("/panic")).await;
    assert_eq!(panicked.status, 599);
    assert_eq!(panicked.body.as_ref(), b"handler panicked: async panic");
}

#[tokio::test]
async fn reload_only_affects_later_dispatches() {
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        async_handler(move |req| {
            let gate = gate.clone();
            async move {
                if req.path() == "/slow" {
                    gate.notified().await;
                }
                Err::<Reply, _>(HandlerError::msg("fail"))
            }
        }),
        Some(error_handler_fn(|_| Ok(Response::text(500, "first")))),
    )
    .await;

    // Past the lookup with the first error handler, parked on the gate.
    let (dispatch, in_flight) = common::start(&listener, &bridge, &server, SyntheticRequest::get("/slow"));
    let Dispatch::Pending(task) = dispatch else {
        panic!("expected pending dispatch");
    };

    server
        .reload(ReloadOptions::new().error_handler(error_handler_fn(|_| Ok(Response::text(500, "second")))))
        .unwrap();

    let later = common::exchange(&listener, &bridge, &server, SyntheticRequest::get("/fast")).await;
    assert_eq!(later.body.as_ref(), b"second");

    release.notify_one();
    task.await.unwrap();
    let earlier = common::receive(in_flight).await;
    assert_eq!(earlier.body.as_ref(), b"first");
}

#[tokio::test]
async fn in_flight_request_is_answered_after_stop() {
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        async_handler(move |_| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok::<_, HandlerError>("late but answered")
            }
        }),
        None,
    )
    .await;

    let (dispatch, rx) = common::start(&listener, &bridge, &server, SyntheticRequest::get("/"));
    let Dispatch::Pending(task) = dispatch else {
        panic!("expected pending dispatch");
    };

    assert!(server.stop());
    assert!(!listener.is_running(server.id()));

    release.notify_one();
    assert_eq!(task.await.unwrap(), Completion::Responded(Tier::Text));
    let response = common::receive(rx).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_ref(), b"late but answered");
}

#[tokio::test]
async fn reload_swaps_handler() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(&bridge, handler_fn(|_| Ok("v1")), None).await;

    server
        .reload(ReloadOptions::new().handler(handler_fn(|_| Ok("v2"))))
        .unwrap();
    let response = common::exchange(&listener, &bridge, &server, SyntheticRequest::get("/")).await;
    assert_eq!(response.body.as_ref(), b"v2");
}

#[tokio::test]
async fn reload_after_stop_fails() {
    let (_listener, bridge) = common::loopback_bridge();
    let server = common::serve(&bridge, handler_fn(|_| Ok("x")), None).await;
    server.stop();

    let result = server.reload(ReloadOptions::new().handler(handler_fn(|_| Ok("y"))));
    assert!(matches!(result, Err(BridgeError::ServerStopped(id)) if id == server.id()));
}

#[tokio::test]
async fn serve_requires_handler() {
    let (_listener, bridge) = common::loopback_bridge();
    let result = bridge.serve(ServeOptions::new().port(0)).await;
    assert!(matches!(result, Err(BridgeError::InvalidHandler)));
}

#[tokio::test]
async fn port_conflict_surfaces_listen_error() {
    let (_listener, bridge) = common::loopback_bridge();
    let first = bridge
        .serve(ServeOptions::new().port(4100).handler(handler_fn(|_| Ok("a"))))
        .await
        .unwrap();
    assert_eq!(first.port(), 4100);
    assert_eq!(first.url().as_str(), "http://localhost:4100/");

    let second = bridge
        .serve(ServeOptions::new().port(4100).handler(handler_fn(|_| Ok("b"))))
        .await;
    assert!(matches!(second, Err(BridgeError::Listen(ListenError::Bind(_)))));
}

#[tokio::test]
async fn headers_are_fetched_once() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        handler_fn(|req| {
            let clone = req.clone();
            let agent = req.header("user-agent")?.unwrap_or_default();
            let count = req.headers()?.len();
            let again = clone.header("USER-AGENT")?.unwrap_or_default();
            Ok(format!("{} {} {}", agent, count, again))
        }),
        None,
    )
    .await;

    let response = common::exchange(
        &listener,
        &bridge,
        &server,
        SyntheticRequest::get("/").header("User-Agent", "bridge-test/1.0").header("Accept", "*/*"),
    )
    .await;
    assert_eq!(response.body.as_ref(), b"bridge-test/1.0 2 bridge-test/1.0");
    assert_eq!(listener.header_fetches(), 1);
}

#[tokio::test]
async fn form_fields_are_parsed() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        async_handler(|req| async move {
            let fields = req.form().await?;
            Ok::<_, HandlerError>(Reply::json(&fields)?)
        }),
        None,
    )
    .await;

    let response = common::exchange(
        &listener,
        &bridge,
        &server,
        SyntheticRequest::post("/signup", "user=ada&lang=rust%20lang")
            .header("content-type", "application/x-www-form-urlencoded"),
    )
    .await;
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, json!([["user", "ada"], ["lang", "rust lang"]]));
}

#[tokio::test]
async fn invalid_utf8_falls_back_to_general_path() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(&bridge, handler_fn(|_| Ok(Response::bytes(207, vec![0xc3, 0x28]))), None).await;

    let (dispatch, rx) = common::start(&listener, &bridge, &server, SyntheticRequest::get("/"));
    assert!(matches!(dispatch, Dispatch::Responded(Tier::General)));
    let response = common::receive(rx).await;
    assert_eq!(response.status, 207);
    assert_eq!(response.body.as_ref(), &[0xc3, 0x28]);
}

#[tokio::test]
async fn empty_reply_is_ok() {
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(&bridge, handler_fn(|_| Ok(())), None).await;

    let response = common::exchange(&listener, &bridge, &server, SyntheticRequest::get("/")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_ref(), b"OK");
}

#[tokio::test]
async fn pending_requests_track_in_flight_work() {
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let (listener, bridge) = common::loopback_bridge();
    let server = common::serve(
        &bridge,
        async_handler(move |_| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok::<_, HandlerError>("done")
            }
        }),
        None,
    )
    .await;

    let (dispatch, rx) = common::start(&listener, &bridge, &server, SyntheticRequest::get("/"));
    assert_eq!(server.pending_requests(), 1);

    release.notify_one();
    if let Dispatch::Pending(task) = dispatch {
        task.await.unwrap();
    }
    assert_eq!(common::receive(rx).await.body.as_ref(), b"done");
    assert_eq!(server.pending_requests(), 0);
}

#[tokio::test]
async fn unknown_request_is_abandoned() {
    let (_listener, bridge) = common::loopback_bridge();
    let server = common::serve(&bridge, handler_fn(|_| Ok("x")), None).await;
    let dispatch = bridge.dispatcher().dispatch(server.id(), RequestId::new(987_654));
    assert!(matches!(dispatch, Dispatch::Abandoned));
}
