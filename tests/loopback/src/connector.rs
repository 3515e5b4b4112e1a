use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

use gridlink_connection::{BoxedStream, ConnectionError, Connector};
use gridlink_pool::BoxFuture;
use gridlink_protocol::AccountIdentity;

use crate::server::LoopbackServer;

/// Capacity of each in-memory pipe.
const PIPE_CAPACITY: usize = 256 * 1024;

/// Connects sessions to a [`LoopbackServer`] over in-memory pipes.
///
/// `secure` returns the stream unchanged: the pipe never leaves the
/// process.
pub struct LoopbackConnector {
    server: LoopbackServer,
    unreachable: AtomicBool,
    connects: AtomicUsize,
}

impl LoopbackConnector {
    pub fn new(server: LoopbackServer) -> Self {
        Self {
            server,
            unreachable: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }

    /// While set, connection attempts are refused.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Connections opened so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for LoopbackConnector {
    fn connect<'a>(
        &'a self,
        account: &'a AccountIdentity,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<BoxedStream, ConnectionError>> {
        Box::pin(async move {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{} is unreachable", account.endpoint()),
                )
                .into());
            }

            let (client, server_end) = tokio::io::duplex(PIPE_CAPACITY);
            let server = self.server.clone();
            tokio::spawn(async move { server.serve(server_end).await });
            self.connects.fetch_add(1, Ordering::SeqCst);
            debug!(%account, "loopback session opened");
            Ok(Box::new(client) as BoxedStream)
        })
    }

    fn secure<'a>(
        &'a self,
        stream: BoxedStream,
        _account: &'a AccountIdentity,
    ) -> BoxFuture<'a, Result<BoxedStream, ConnectionError>> {
        Box::pin(async move { Ok(stream) })
    }
}

/// Serves `server` on an ephemeral localhost TCP port until the returned
/// task is aborted.
pub async fn spawn_tcp(server: LoopbackServer) -> io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!(error = %e, "accept failed");
                    continue;
                }
            };
            debug!(%peer, "tcp session accepted");
            let server = server.clone();
            tokio::spawn(async move { server.serve(socket).await });
        }
    });
    Ok((addr, task))
}
