//! Receiver server: listener, accept loop, shutdown.
//!
//! One server per configured receiver. The acceptor spawns an
//! independent handler task per connection; shutdown cancels the
//! acceptor first, then gives open connections a bounded grace period
//! to flush before aborting them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::media::MediaSink;
use crate::mode::ModeHandle;
use crate::receiver::ReceiverKind;

/// Grace period for in-flight connections at shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// A bound, not-yet-serving receiver.
pub struct ReceiverServer {
    kind: ReceiverKind,
    listener: TcpListener,
    port: u16,
    dialect: Arc<dyn Dialect>,
    mode: ModeHandle,
    media: MediaSink,
}

impl ReceiverServer {
    /// Bind `0.0.0.0:<port>` for a receiver. Port 0 picks an ephemeral
    /// port (tests).
    pub async fn bind(
        kind: ReceiverKind,
        port: u16,
        mode: ModeHandle,
        media: MediaSink,
    ) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let port = listener.local_addr()?.port();
        info!("({kind}) starting server on port {port}");
        Ok(Self {
            kind,
            listener,
            port,
            dialect: Arc::from(kind.dialect()),
            mode,
            media,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown, then drain with a grace
    /// period. Unfinished handlers are aborted and logged.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        info!("({}) serving on {}", self.kind, self.listener.local_addr()?);
        let mut handlers = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("({}) accept failed: {e}", self.kind);
                    continue;
                }
            };

            let conn = Connection::new(
                stream,
                peer.ip().to_string(),
                self.kind,
                self.port,
                Arc::clone(&self.dialect),
                self.mode.clone(),
                self.media.clone(),
            );
            handlers.spawn(conn.run(cancel.clone()));
        }

        // Acceptor is gone (listener drops with self at return); give
        // open connections a bounded chance to flush.
        drop(self.listener);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "({}) {} connection(s) did not drain in {SHUTDOWN_GRACE:?}; \
                 discarding unflushed writes",
                self.kind,
                handlers.len()
            );
            handlers.abort_all();
        }
        info!("({}) server shut down", self.kind);
        Ok(())
    }
}
