//! Subscription lifecycle tests against a fake host speaking WebSocket on a
//! Unix socket.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use guestapi_core::error::{DecodeError, GuestError};
use guestapi_core::{ClientConfig, Event, EventPayload, EventType};
use guestapi_ws::{CancellationToken, EventStream, EventStreamConfig};

// ─── Fake host ────────────────────────────────────────────────────────────────

struct FakeHost {
    _dir: TempDir,
    socket: PathBuf,
    targets: mpsc::UnboundedReceiver<String>,
}

impl FakeHost {
    fn stream(&self, config: EventStreamConfig) -> EventStream {
        EventStream::from_config(&ClientConfig::with_socket_path(&self.socket), config)
    }
}

/// Accept one subscription and hand the server side of the WebSocket to `script`.
fn spawn_host<S, Fut>(script: S) -> FakeHost
where
    S: FnOnce(WebSocketStream<UnixStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("incus.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let (tx, targets) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
            let _ = tx.send(req.uri().to_string());
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .unwrap();
        script(ws).await;
    });

    FakeHost {
        _dir: dir,
        socket,
        targets,
    }
}

fn config_frame(i: usize) -> Message {
    Message::text(
        serde_json::json!({
            "timestamp": format!("2024-05-01T10:00:0{i}Z"),
            "type": "config",
            "metadata": {"key": format!("user.k{i}"), "old_value": "", "value": i.to_string()}
        })
        .to_string(),
    )
}

fn device_frame() -> Message {
    Message::text(
        r#"{"timestamp":"t-dev","type":"device","metadata":{"name":"kvm","action":"added","config":{"type":"unix-char","path":"/dev/kvm"}}}"#,
    )
}

/// Handler that records invocations in order and does nothing else.
fn recorder() -> (
    impl Fn(Event) -> std::future::Ready<()> + Send + Sync,
    mpsc::UnboundedReceiver<Event>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |event: Event| {
        let _ = tx.send(event);
        std::future::ready(())
    };
    (handler, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_after_n_events_returns_ok() {
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    let mut host = spawn_host(|mut ws| async move {
        for i in 0..5 {
            ws.send(config_frame(i)).await.unwrap();
        }
        let next = ws.next().await;
        let _ = closed_tx.send(matches!(next, Some(Ok(Message::Close(_)))));
    });

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let token = cancel.clone();
    let count = std::sync::atomic::AtomicUsize::new(0);
    let handler = move |event: Event| {
        let _ = tx.send(event);
        // Raised during the third invocation, i.e. between read 3 and read 4.
        if count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1 == 3 {
            token.cancel();
        }
        std::future::ready(())
    };

    let result = host
        .stream(EventStreamConfig::default())
        .subscribe(cancel, handler, [EventType::Config])
        .await;
    assert!(result.is_ok(), "got {result:?}");

    let events = drain(&mut rx);
    let values: Vec<_> = events
        .iter()
        .map(|e| e.as_config().unwrap().value.clone())
        .collect();
    assert_eq!(values, vec!["0", "1", "2"]);

    assert_eq!(host.targets.recv().await.unwrap(), "/1.0/events?type=config");
    assert!(closed_rx.await.unwrap(), "host should see a close frame");
}

#[tokio::test]
async fn connection_drop_after_k_events_is_stream_error() {
    let host = spawn_host(|mut ws| async move {
        ws.send(config_frame(0)).await.unwrap();
        ws.send(device_frame()).await.unwrap();
        ws.flush().await.unwrap();
        drop(ws);
    });

    let (handler, mut rx) = recorder();
    let err = host
        .stream(EventStreamConfig::default())
        .subscribe(CancellationToken::new(), handler, Vec::<String>::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GuestError::Stream(_)), "got {err}");

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type(), EventType::Config);
    assert_eq!(events[1].as_device().unwrap().config.path, "/dev/kvm");
}

#[tokio::test]
async fn host_close_frame_is_stream_error() {
    let host = spawn_host(|mut ws| async move {
        ws.send(config_frame(1)).await.unwrap();
        let _ = ws.close(None).await;
    });

    let (handler, mut rx) = recorder();
    let err = host
        .stream(EventStreamConfig::default())
        .subscribe(CancellationToken::new(), handler, EventType::ALL)
        .await
        .unwrap_err();
    assert!(matches!(err, GuestError::Stream(_)), "got {err}");
    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn filter_drops_invalid_and_empty_omits_query() {
    let mut host = spawn_host(|ws| async move { drop(ws) });
    let (handler, _rx) = recorder();
    let _ = host
        .stream(EventStreamConfig::default())
        .subscribe(CancellationToken::new(), handler, ["config", "invalid"])
        .await;
    assert_eq!(host.targets.recv().await.unwrap(), "/1.0/events?type=config");

    let mut host = spawn_host(|ws| async move { drop(ws) });
    let (handler, _rx) = recorder();
    let _ = host
        .stream(EventStreamConfig::default())
        .subscribe(CancellationToken::new(), handler, ["nope"])
        .await;
    assert_eq!(host.targets.recv().await.unwrap(), "/1.0/events");
}

#[tokio::test]
async fn unknown_type_aborts_by_default() {
    let host = spawn_host(|mut ws| async move {
        ws.send(config_frame(0)).await.unwrap();
        ws.send(Message::text(r#"{"timestamp":"t","type":"bogus"}"#)).await.unwrap();
        ws.send(config_frame(2)).await.unwrap();
        let _ = ws.next().await;
    });

    let (handler, mut rx) = recorder();
    let err = host
        .stream(EventStreamConfig::default())
        .subscribe(CancellationToken::new(), handler, Vec::<String>::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, GuestError::Decode(DecodeError::UnknownEventType { ref value }) if value == "bogus"),
        "got {err}"
    );
    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn missing_metadata_is_delivered_with_empty_payload() {
    let host = spawn_host(|mut ws| async move {
        ws.send(Message::text(r#"{"timestamp":"t","type":"config"}"#)).await.unwrap();
        drop(ws);
    });

    let (handler, mut rx) = recorder();
    let _ = host
        .stream(EventStreamConfig::default())
        .subscribe(CancellationToken::new(), handler, Vec::<String>::new())
        .await;
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, EventPayload::Config(None));
}

#[tokio::test]
async fn lenient_policy_skips_bad_frames() {
    let host = spawn_host(|mut ws| async move {
        ws.send(config_frame(0)).await.unwrap();
        ws.send(Message::text(r#"{"timestamp":"t","type":"lifecycle","metadata":{}}"#))
            .await
            .unwrap();
        ws.send(Message::text(r#"{"timestamp":"t","type":"config","metadata":[1,2]}"#))
            .await
            .unwrap();
        ws.send(device_frame()).await.unwrap();
        let _ = ws.close(None).await;
    });

    let (handler, mut rx) = recorder();
    let err = host
        .stream(EventStreamConfig::lenient())
        .subscribe(CancellationToken::new(), handler, Vec::<String>::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GuestError::Stream(_)));

    let types: Vec<_> = drain(&mut rx).iter().map(Event::event_type).collect();
    assert_eq!(types, vec![EventType::Config, EventType::Device]);
}

#[tokio::test]
async fn missing_type_is_fatal_even_when_lenient() {
    let host = spawn_host(|mut ws| async move {
        ws.send(Message::text(r#"{"timestamp":"t"}"#)).await.unwrap();
        let _ = ws.next().await;
    });

    let (handler, _rx) = recorder();
    let err = host
        .stream(EventStreamConfig::lenient())
        .subscribe(CancellationToken::new(), handler, Vec::<String>::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GuestError::Decode(DecodeError::MissingField { field: "type" })
    ));
}

#[tokio::test]
async fn slow_handlers_do_not_stall_the_read_loop() {
    let host = spawn_host(|mut ws| async move {
        for i in 0..4 {
            ws.send(config_frame(i)).await.unwrap();
        }
        drop(ws);
    });

    let invoked = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);
    let handler = move |_event: Event| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        futures::future::pending::<()>()
    };

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        host.stream(EventStreamConfig::default())
            .subscribe(CancellationToken::new(), handler, Vec::<String>::new()),
    )
    .await
    .expect("subscription must not block on handlers")
    .unwrap_err();
    assert!(matches!(err, GuestError::Stream(_)));
    assert_eq!(invoked.load(std::sync::atomic::Ordering::SeqCst), 4);
}

#[tokio::test]
async fn read_timeout_lets_idle_subscription_observe_cancel() {
    let host = spawn_host(|mut ws| async move {
        // Never sends anything; waits for the client's close.
        let _ = ws.next().await;
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let (handler, _rx) = recorder();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        host.stream(EventStreamConfig::default().read_timeout(Duration::from_millis(20)))
            .subscribe(cancel, handler, Vec::<String>::new()),
    )
    .await
    .expect("cancellation should be observed between idle reads");
    assert!(result.is_ok());
}

#[tokio::test]
async fn missing_socket_is_socket_error() {
    let dir = tempfile::tempdir().unwrap();
    let stream = EventStream::from_config(
        &ClientConfig::with_socket_path(dir.path().join("absent.sock")),
        EventStreamConfig::default(),
    );
    let (handler, _rx) = recorder();
    let err = stream
        .subscribe(CancellationToken::new(), handler, Vec::<String>::new())
        .await
        .unwrap_err();
    assert!(err.is_socket_error());
}

#[tokio::test]
async fn spawned_subscription_feeds_channel() {
    let host = spawn_host(|mut ws| async move {
        ws.send(config_frame(7)).await.unwrap();
        ws.send(device_frame()).await.unwrap();
        let _ = ws.next().await;
    });

    let cancel = CancellationToken::new();
    let (handle, mut rx) = host
        .stream(EventStreamConfig::default().read_timeout(Duration::from_millis(20)))
        .spawn(cancel.clone(), ["config", "device"]);

    let first = rx.recv().await.unwrap();
    assert_eq!(first.as_config().unwrap().key, "user.k7");
    let second = rx.recv().await.unwrap();
    assert_eq!(second.event_type(), EventType::Device);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("subscription task should stop after cancel")
        .unwrap();
    assert!(result.is_ok());
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn dropping_the_receiver_ends_spawned_subscription() {
    let (resume, resumed) = tokio::sync::oneshot::channel::<()>();
    let (saw_close, closed) = tokio::sync::oneshot::channel::<bool>();
    let host = spawn_host(|mut ws| async move {
        ws.send(config_frame(1)).await.unwrap();
        let _ = resumed.await;
        ws.send(config_frame(2)).await.unwrap();
        ws.send(config_frame(3)).await.unwrap();
        let frame = ws.next().await;
        let _ = saw_close.send(matches!(frame, Some(Ok(Message::Close(_))) | None));
    });

    let cancel = CancellationToken::new();
    let (handle, mut rx) = host
        .stream(EventStreamConfig::default())
        .spawn(cancel.clone(), Vec::<String>::new());

    let first = rx.recv().await.unwrap();
    assert_eq!(first.as_config().unwrap().key, "user.k1");
    drop(rx);
    resume.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("subscription task should stop once nobody receives its events")
        .unwrap();
    assert!(result.is_ok());
    assert!(cancel.is_cancelled());
    assert!(closed.await.unwrap());
}
