use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gridlink_connection::{ConnectionError, ConnectionManager, PooledConnection, ServerConnection};
use gridlink_crypto::{EncryptionCodec, EncryptionWrapperFactory};
use gridlink_data_channel::{DataChannelError, MAX_DATA_FRAME, receive_range, send_range};
use gridlink_pool::BoxFuture;
use gridlink_protocol::{
    AccountIdentity, ControlMessage, StreamOutcome, StreamResult, TransferOperation,
};

use crate::error::TransferError;
use crate::plan::ByteRange;

/// What to move, between which local file and which server object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub account: AccountIdentity,
    pub logical_path: String,
    pub local_path: PathBuf,
    pub operation: TransferOperation,
}

impl TransferRequest {
    pub fn put(
        account: AccountIdentity,
        local_path: impl Into<PathBuf>,
        logical_path: impl Into<String>,
    ) -> Self {
        Self {
            account,
            logical_path: logical_path.into(),
            local_path: local_path.into(),
            operation: TransferOperation::Put,
        }
    }

    pub fn get(
        account: AccountIdentity,
        logical_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            account,
            logical_path: logical_path.into(),
            local_path: local_path.into(),
            operation: TransferOperation::Get,
        }
    }
}

/// Server acceptance of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferGrant {
    pub token: String,
    pub total_bytes: u64,
    pub max_streams: u32,
}

/// Server-facing half of a transfer.
///
/// `transfer_range` is called concurrently, once per planned range.
pub trait TransferBackend: Send + Sync {
    /// Announces the transfer and obtains the grant.
    fn begin<'a>(
        &'a self,
        request: &'a TransferRequest,
        total_bytes: Option<u64>,
        requested_streams: u32,
    ) -> BoxFuture<'a, Result<TransferGrant, TransferError>>;

    /// Moves one range. Stops at the next buffer boundary once `cancel`
    /// fires and reports [`StreamOutcome::Cancelled`].
    fn transfer_range<'a>(
        &'a self,
        request: &'a TransferRequest,
        grant: &'a TransferGrant,
        range: ByteRange,
        cancel: &'a CancellationToken,
        progress: &'a AtomicU64,
    ) -> BoxFuture<'a, Result<StreamResult, TransferError>>;

    /// Commits or abandons the transfer. Returns the server's checksum of
    /// the object when it has one.
    fn finish<'a>(
        &'a self,
        request: &'a TransferRequest,
        grant: &'a TransferGrant,
        commit: bool,
    ) -> BoxFuture<'a, Result<Option<String>, TransferError>>;
}

/// Backend running every step on connections from a [`ConnectionManager`].
///
/// Control steps borrow a connection only for their own exchange, so stream
/// workers of an account limited to one session take turns instead of
/// waiting on a connection the coordinator holds.
#[derive(Clone)]
pub struct PooledBackend {
    manager: Arc<ConnectionManager>,
}

impl PooledBackend {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }
}

impl TransferBackend for PooledBackend {
    fn begin<'a>(
        &'a self,
        request: &'a TransferRequest,
        total_bytes: Option<u64>,
        requested_streams: u32,
    ) -> BoxFuture<'a, Result<TransferGrant, TransferError>> {
        Box::pin(async move {
            let mut conn = self.manager.borrow(&request.account).await?;
            let reply = conn
                .request(&ControlMessage::BeginTransfer {
                    logical_path: request.logical_path.clone(),
                    operation: request.operation,
                    total_bytes,
                    requested_streams,
                })
                .await;

            let grant = match reply {
                Ok(ControlMessage::TransferGrant {
                    token,
                    total_bytes,
                    max_streams,
                }) => Ok(TransferGrant {
                    token,
                    total_bytes,
                    max_streams,
                }),
                Ok(other) => Err(unexpected(&mut conn, "transfer_grant", &other)),
                Err(e) => Err(e.into()),
            };
            give_back(conn).await;
            grant
        })
    }

    fn transfer_range<'a>(
        &'a self,
        request: &'a TransferRequest,
        grant: &'a TransferGrant,
        range: ByteRange,
        cancel: &'a CancellationToken,
        progress: &'a AtomicU64,
    ) -> BoxFuture<'a, Result<StreamResult, TransferError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Ok(stream_result(range, 0, true));
            }
            let mut conn = self.manager.borrow(&request.account).await?;
            debug!(id = conn.id(), %range, "stream connection borrowed");

            let result = match request.operation {
                TransferOperation::Put => {
                    put_range(&mut conn, request, grant, range, cancel, progress).await
                }
                TransferOperation::Get => {
                    get_range(&mut conn, request, grant, range, cancel, progress).await
                }
            };
            give_back(conn).await;
            result.map_err(|e| stream_failure(range, e))
        })
    }

    fn finish<'a>(
        &'a self,
        request: &'a TransferRequest,
        grant: &'a TransferGrant,
        commit: bool,
    ) -> BoxFuture<'a, Result<Option<String>, TransferError>> {
        Box::pin(async move {
            let mut conn = self.manager.borrow(&request.account).await?;
            let reply = conn
                .request(&ControlMessage::EndTransfer {
                    token: grant.token.clone(),
                    commit,
                })
                .await;

            let checksum = match reply {
                Ok(ControlMessage::TransferCommitted { checksum }) => Ok(checksum),
                Ok(other) => Err(unexpected(&mut conn, "transfer_committed", &other)),
                Err(e) => Err(e.into()),
            };
            give_back(conn).await;
            checksum
        })
    }
}

async fn put_range(
    conn: &mut ServerConnection,
    request: &TransferRequest,
    grant: &TransferGrant,
    range: ByteRange,
    cancel: &CancellationToken,
    progress: &AtomicU64,
) -> Result<StreamResult, TransferError> {
    let mut file = tokio::fs::File::open(&request.local_path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let mut source = file.take(range.len());

    let mut encryptor = if conn.is_ssl() {
        let mut encryptor =
            EncryptionWrapperFactory::encryptor(conn.config(), Arc::clone(conn.session()))?;
        encryptor.init()?;
        Some(encryptor)
    } else {
        None
    };
    let buffer_size = conn.config().stream_buffer_size;

    if cancel.is_cancelled() {
        return Ok(stream_result(range, 0, true));
    }
    open_range(conn, grant, range).await?;
    let sent = send_range(
        &mut source,
        conn.stream_mut(),
        range.len(),
        buffer_size,
        encryptor.as_mut(),
        cancel,
        progress,
    )
    .await
    .map_err(|e| data_failure(conn, e))?;

    // The end marker was written even when cancelled, so the ack still
    // arrives and the connection stays usable.
    let acked = read_ack(conn).await?;
    if acked != sent.bytes {
        return Err(TransferError::Stream(format!(
            "server acknowledged {acked} of {} bytes for {range}",
            sent.bytes
        )));
    }

    Ok(stream_result(range, sent.bytes, sent.cancelled))
}

async fn get_range(
    conn: &mut ServerConnection,
    request: &TransferRequest,
    grant: &TransferGrant,
    range: ByteRange,
    cancel: &CancellationToken,
    progress: &AtomicU64,
) -> Result<StreamResult, TransferError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&request.local_path)
        .await?;
    file.seek(SeekFrom::Start(range.start)).await?;

    let decryptor = if conn.is_ssl() {
        let mut decryptor =
            EncryptionWrapperFactory::decryptor(conn.config(), Arc::clone(conn.session()))?;
        decryptor.init()?;
        Some(decryptor)
    } else {
        None
    };

    if cancel.is_cancelled() {
        return Ok(stream_result(range, 0, true));
    }
    open_range(conn, grant, range).await?;
    let received = receive_range(
        conn.stream_mut(),
        &mut file,
        range.len(),
        MAX_DATA_FRAME,
        decryptor.as_ref(),
        cancel,
        progress,
    )
    .await
    .map_err(|e| data_failure(conn, e))?;

    // A cancelled receive drained the range, so the ack is next either way.
    // It counts what the server sent, not what was kept.
    let acked = read_ack(conn).await?;
    if received.cancelled {
        return Ok(stream_result(range, received.bytes, true));
    }
    if acked != received.bytes {
        return Err(TransferError::Stream(format!(
            "server reported {acked} bytes but {} arrived for {range}",
            received.bytes
        )));
    }
    file.sync_data().await?;

    Ok(stream_result(range, received.bytes, false))
}

async fn open_range(
    conn: &mut ServerConnection,
    grant: &TransferGrant,
    range: ByteRange,
) -> Result<(), TransferError> {
    let reply = conn
        .request(&ControlMessage::StreamRange {
            token: grant.token.clone(),
            offset: range.start,
            length: range.len(),
        })
        .await?;
    match reply {
        ControlMessage::Ok => Ok(()),
        other => Err(unexpected(conn, "ok", &other)),
    }
}

async fn read_ack(conn: &mut ServerConnection) -> Result<u64, TransferError> {
    match conn.receive().await? {
        ControlMessage::RangeAck { bytes } => Ok(bytes),
        ControlMessage::Error { code, message } => {
            Err(ConnectionError::Server { code, message }.into())
        }
        other => Err(unexpected(conn, "range_ack", &other)),
    }
}

fn stream_result(range: ByteRange, bytes: u64, cancelled: bool) -> StreamResult {
    StreamResult {
        range_start: range.start,
        range_end: range.end,
        bytes_transferred: bytes,
        outcome: if cancelled {
            StreamOutcome::Cancelled
        } else {
            StreamOutcome::Ok
        },
    }
}

/// Failures after a stream's connection was borrowed abort the attempt as a
/// stream failure. Cipher errors keep their own kind.
fn stream_failure(range: ByteRange, err: TransferError) -> TransferError {
    match err {
        TransferError::Connection(e) => TransferError::Stream(format!("{range}: {e}")),
        TransferError::Io(e) => TransferError::Stream(format!("{range}: {e}")),
        other => other,
    }
}

fn data_failure(conn: &mut ServerConnection, err: DataChannelError) -> TransferError {
    conn.poison();
    err.into()
}

fn unexpected(conn: &mut ServerConnection, wanted: &str, got: &ControlMessage) -> TransferError {
    conn.poison();
    ConnectionError::Protocol(format!("expected {wanted}, got {}", got.kind())).into()
}

/// Returns a healthy connection to the pool and discards a poisoned one.
async fn give_back(conn: PooledConnection) {
    if conn.is_poisoned() {
        conn.invalidate().await;
    } else {
        conn.release().await;
    }
}
