use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use gridlink_crypto::CryptoError;
use gridlink_pool::BoxFuture;
use gridlink_protocol::AccountIdentity;

use crate::error::ConnectionError;

/// Any bidirectional byte stream a session can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for S {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens transport streams to a server and upgrades them when SSL is
/// negotiated.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        account: &'a AccountIdentity,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<BoxedStream, ConnectionError>>;

    /// Wraps an established stream in the secure transport.
    fn secure<'a>(
        &'a self,
        stream: BoxedStream,
        account: &'a AccountIdentity,
    ) -> BoxFuture<'a, Result<BoxedStream, ConnectionError>>;
}

/// Plain TCP connector.
///
/// Has no TLS layer, so any session that negotiates SSL fails with a
/// configuration error at the upgrade step.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(
        &'a self,
        account: &'a AccountIdentity,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<BoxedStream, ConnectionError>> {
        Box::pin(async move {
            let endpoint = account.endpoint();
            let stream = tokio::time::timeout(timeout, TcpStream::connect(&endpoint))
                .await
                .map_err(|_| ConnectionError::Timeout(timeout))??;
            stream.set_nodelay(true)?;
            debug!(%endpoint, "TCP connected");
            Ok(Box::new(stream) as BoxedStream)
        })
    }

    fn secure<'a>(
        &'a self,
        _stream: BoxedStream,
        account: &'a AccountIdentity,
    ) -> BoxFuture<'a, Result<BoxedStream, ConnectionError>> {
        Box::pin(async move {
            Err(ConnectionError::Crypto(CryptoError::Configuration(format!(
                "no TLS transport available for {account}"
            ))))
        })
    }
}
