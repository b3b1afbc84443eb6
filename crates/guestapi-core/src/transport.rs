//! The `Connector` trait: how clients reach the host's guest socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;

use crate::error::GuestError;
use crate::paths::DEFAULT_SOCKET_PATH;

/// Opens a fresh duplex byte stream to the host for every call.
///
/// One-shot requests run one HTTP exchange over the stream; subscriptions
/// upgrade it to a WebSocket and keep it for their whole lifetime.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The stream type produced by [`Connector::connect`].
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Io, GuestError>;

    /// Human-readable identifier of the endpoint (for logs and errors).
    fn endpoint(&self) -> String;
}

/// Connects to a Unix domain socket at a fixed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for UnixConnector {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

#[async_trait]
impl Connector for UnixConnector {
    type Io = UnixStream;

    async fn connect(&self) -> Result<UnixStream, GuestError> {
        tracing::trace!(path = %self.path.display(), "dialing guest socket");
        UnixStream::connect(&self.path)
            .await
            .map_err(|source| GuestError::Socket {
                path: self.path.clone(),
                source,
            })
    }

    fn endpoint(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

/// Returns `true` if a connection to the socket at `path` can be opened and
/// closed. No protocol exchange takes place.
pub fn probe(path: impl AsRef<Path>) -> bool {
    match std::os::unix::net::UnixStream::connect(path.as_ref()) {
        Ok(stream) => {
            drop(stream);
            true
        }
        Err(err) => {
            tracing::debug!(path = %path.as_ref().display(), error = %err, "guest socket unreachable");
            false
        }
    }
}

/// Returns `true` when running inside an instance whose host exposes the
/// guest API at the default socket.
pub fn is_inside_instance() -> bool {
    probe(DEFAULT_SOCKET_PATH)
}
