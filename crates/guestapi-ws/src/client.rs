//! Event stream client: a WebSocket subscription to `/1.0/events` over the
//! guest socket.
//!
//! [`EventStream::subscribe`] runs the whole subscription on the calling task:
//!
//! ```text
//! loop {
//!     cancelled?            → close, Ok(())
//!     next frame            → closed / read error → Err(Stream)
//!     envelope decode       → error → Err(Decode) (unless a skip policy applies)
//!     handler(event)        → invoked in arrival order, future spawned
//! }
//! ```
//!
//! Handlers are invoked in arrival order but their futures run as independent
//! tasks, so completion order is not guaranteed and a slow handler never
//! stalls the read loop (unless `max_in_flight` is set).

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use guestapi_core::config::ClientConfig;
use guestapi_core::envelope::{decode_event, decode_event_str};
use guestapi_core::error::{DecodeError, GuestError};
use guestapi_core::event::Event;
use guestapi_core::paths::{self, SOCKET_AUTHORITY};
use guestapi_core::transport::{Connector, UnixConnector};

use crate::config::EventStreamConfig;

/// Client for the guest events stream.
#[derive(Debug, Clone)]
pub struct EventStream<C = UnixConnector> {
    connector: C,
    config: EventStreamConfig,
}

impl EventStream<UnixConnector> {
    /// Stream from the default socket, `/dev/incus/sock`, with strict policies.
    pub fn new() -> Self {
        Self::from_config(&ClientConfig::default(), EventStreamConfig::default())
    }

    pub fn from_config(client: &ClientConfig, config: EventStreamConfig) -> Self {
        Self::with_connector(UnixConnector::new(&client.socket_path), config)
    }
}

impl Default for EventStream<UnixConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> EventStream<C> {
    pub fn with_connector(connector: C, config: EventStreamConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &EventStreamConfig {
        &self.config
    }

    /// WebSocket URI a subscription to `types` connects to.
    ///
    /// Unknown type names are dropped; with none left the query is omitted
    /// and the host sends every event type.
    pub fn events_endpoint<I, T>(types: I) -> String
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        format!("ws://{SOCKET_AUTHORITY}{}", paths::events_path(types))
    }

    /// Subscribe to host events, invoking `handler` for each one until
    /// `cancel` fires (`Ok(())`) or the stream fails (`Err`).
    ///
    /// Cancellation is checked before every read; a read already in progress
    /// is not interrupted unless `read_timeout` is configured. Nothing is
    /// retried: reconnecting is up to the caller.
    pub async fn subscribe<F, Fut, I, T>(
        &self,
        cancel: CancellationToken,
        handler: F,
        types: I,
    ) -> Result<(), GuestError>
    where
        F: Fn(Event) -> Fut + Send + Sync,
        Fut: Future<Output = ()> + Send + 'static,
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let endpoint = Self::events_endpoint(types);
        let io = self.connector.connect().await?;

        let (mut ws, _) = tokio_tungstenite::client_async(endpoint.as_str(), io)
            .await
            .map_err(|e| GuestError::Stream(format!("handshake with {endpoint} failed: {e}")))?;

        tracing::info!(
            endpoint = %endpoint,
            via = %self.connector.endpoint(),
            "subscribed to guest events"
        );

        let mut dispatcher = Dispatcher::new(self.config.max_in_flight);
        let result = self.read_loop(&mut ws, &cancel, &handler, &mut dispatcher).await;

        match &result {
            Ok(()) => tracing::info!(dispatched = dispatcher.dispatched, "guest event subscription cancelled"),
            Err(e) => tracing::warn!(error = %e, dispatched = dispatcher.dispatched, "guest event subscription ended"),
        }
        result
    }

    /// Run a subscription on a background task, forwarding events to a channel.
    ///
    /// The channel closes when the subscription ends; the task's result says why.
    /// Dropping the receiver cancels `cancel`, so the task closes the connection
    /// and returns `Ok(())` at its next cancellation check.
    pub fn spawn<I, T>(
        self,
        cancel: CancellationToken,
        types: I,
    ) -> (JoinHandle<Result<(), GuestError>>, mpsc::UnboundedReceiver<Event>)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let types: Vec<String> = types.into_iter().map(|t| t.as_ref().to_string()).collect();

        let handle = tokio::spawn(async move {
            let on_closed = cancel.clone();
            self.subscribe(
                cancel,
                move |event| {
                    if tx.send(event).is_err() && !on_closed.is_cancelled() {
                        tracing::info!("event receiver dropped, cancelling subscription");
                        on_closed.cancel();
                    }
                    std::future::ready(())
                },
                types,
            )
            .await
        });
        (handle, rx)
    }

    async fn read_loop<F, Fut>(
        &self,
        ws: &mut WebSocketStream<C::Io>,
        cancel: &CancellationToken,
        handler: &F,
        dispatcher: &mut Dispatcher,
    ) -> Result<(), GuestError>
    where
        F: Fn(Event) -> Fut + Send + Sync,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            if cancel.is_cancelled() {
                if let Err(e) = ws.close(None).await {
                    tracing::debug!(error = %e, "close handshake failed");
                }
                return Ok(());
            }

            let next = match self.config.read_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, ws.next()).await {
                    Ok(next) => next,
                    // Idle: go back and look at the token again.
                    Err(_) => continue,
                },
                None => ws.next().await,
            };

            let decoded = match next {
                None => return Err(GuestError::Stream("connection closed by host".into())),
                Some(Err(e)) => return Err(GuestError::Stream(format!("read failed: {e}"))),
                Some(Ok(Message::Text(text))) => decode_event_str(text.as_str()),
                Some(Ok(Message::Binary(data))) => decode_event(&data),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!(" ({}: {})", u16::from(f.code), f.reason))
                        .unwrap_or_default();
                    return Err(GuestError::Stream(format!("connection closed by host{reason}")));
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
            };

            match decoded {
                Ok(event) => {
                    tracing::debug!(
                        event_type = %event.event_type(),
                        timestamp = %event.timestamp,
                        "guest event"
                    );
                    dispatcher.dispatch(handler, event).await;
                }
                Err(err) if self.should_skip(&err) => {
                    if err.is_unknown_type() {
                        tracing::debug!(error = %err, "skipping unknown guest event type");
                    } else {
                        tracing::warn!(error = %err, "skipping guest event with malformed metadata");
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn should_skip(&self, err: &DecodeError) -> bool {
        (self.config.skip_unknown_types && err.is_unknown_type())
            || (self.config.skip_malformed_metadata && err.is_malformed_metadata())
    }
}

/// Hands decoded events to the handler and spawns the resulting futures.
struct Dispatcher {
    limit: Option<Arc<Semaphore>>,
    dispatched: u64,
}

impl Dispatcher {
    fn new(max_in_flight: Option<usize>) -> Self {
        Self {
            limit: max_in_flight.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            dispatched: 0,
        }
    }

    async fn dispatch<F, Fut>(&mut self, handler: &F, event: Event)
    where
        F: Fn(Event) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permit: Option<OwnedSemaphorePermit> = match &self.limit {
            Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
            None => None,
        };

        let fut = handler(event);
        self.dispatched += 1;
        tokio::spawn(async move {
            fut.await;
            drop(permit);
        });
    }
}
