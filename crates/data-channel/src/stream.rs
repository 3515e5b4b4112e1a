//! Range streaming with cooperative cancellation.
//!
//! Both directions check the cancellation token once per frame, and both keep
//! the connection usable. A cancelled sender closes the range early with an
//! end marker. A cancelled receiver keeps reading frames up to the peer's end
//! marker but stops writing them to the sink, so the control reply that
//! follows the range is next on the socket.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gridlink_crypto::{Decryptor, Encryptor};

use crate::error::DataChannelError;
use crate::wire::{
    read_data_frame, read_encrypted_frame, write_data_frame, write_encrypted_frame,
    write_end_marker,
};

/// How far a range got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeTransfer {
    pub bytes: u64,
    pub cancelled: bool,
}

/// Streams `length` bytes from `source` to `sink` in frames of at most
/// `buffer_size` bytes, then writes the end marker.
///
/// `progress` is incremented after every frame.
pub async fn send_range<R, W>(
    source: &mut R,
    sink: &mut W,
    length: u64,
    buffer_size: usize,
    mut encryptor: Option<&mut Encryptor>,
    cancel: &CancellationToken,
    progress: &AtomicU64,
) -> Result<RangeTransfer, DataChannelError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut sent = 0u64;

    while sent < length {
        if cancel.is_cancelled() {
            write_end_marker(sink).await?;
            sink.flush().await?;
            debug!(sent, length, "range send cancelled");
            return Ok(RangeTransfer {
                bytes: sent,
                cancelled: true,
            });
        }

        let to_read = (length - sent).min(buf.len() as u64) as usize;
        let n = source.read(&mut buf[..to_read]).await?;
        if n == 0 {
            return Err(DataChannelError::Protocol(format!(
                "source ended after {sent} of {length} bytes"
            )));
        }

        match encryptor.as_deref_mut() {
            Some(encryptor) => {
                let encrypted = encryptor.encrypt(&buf[..n])?;
                write_encrypted_frame(sink, &encrypted).await?;
            }
            None => write_data_frame(sink, &buf[..n]).await?,
        }

        sent += n as u64;
        progress.fetch_add(n as u64, Ordering::Relaxed);
    }

    write_end_marker(sink).await?;
    sink.flush().await?;
    Ok(RangeTransfer {
        bytes: sent,
        cancelled: false,
    })
}

/// Reads frames until the end marker, writing the payloads to `sink`.
///
/// The peer must deliver exactly `expected` bytes; fewer or more is a
/// protocol error. Once `cancel` fires the remaining frames are read and
/// discarded, and the result reports only the bytes written before that.
pub async fn receive_range<R, W>(
    source: &mut R,
    sink: &mut W,
    expected: u64,
    max_frame: usize,
    decryptor: Option<&Decryptor>,
    cancel: &CancellationToken,
    progress: &AtomicU64,
) -> Result<RangeTransfer, DataChannelError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut received = 0u64;
    let mut seen = 0u64;
    let mut cancelled = false;

    // A frame read is never abandoned halfway, so the token is only polled
    // between frames.
    while let Some(payload) = next_payload(source, max_frame, decryptor).await? {
        seen += payload.len() as u64;
        if seen > expected {
            return Err(DataChannelError::Protocol(format!(
                "peer sent more than the {expected} bytes requested"
            )));
        }

        if !cancelled && cancel.is_cancelled() {
            cancelled = true;
            debug!(received, expected, "range receive cancelled, draining");
        }
        if cancelled {
            continue;
        }

        sink.write_all(&payload).await?;
        received = seen;
        progress.fetch_add(payload.len() as u64, Ordering::Relaxed);
    }

    sink.flush().await?;
    if cancelled || cancel.is_cancelled() {
        return Ok(RangeTransfer {
            bytes: received,
            cancelled: true,
        });
    }
    if received != expected {
        return Err(DataChannelError::Protocol(format!(
            "range ended after {received} of {expected} bytes"
        )));
    }

    Ok(RangeTransfer {
        bytes: received,
        cancelled: false,
    })
}

async fn next_payload<R: AsyncRead + Unpin>(
    source: &mut R,
    max_frame: usize,
    decryptor: Option<&Decryptor>,
) -> Result<Option<Vec<u8>>, DataChannelError> {
    match decryptor {
        Some(decryptor) => match read_encrypted_frame(source, max_frame).await? {
            Some(buffer) => Ok(Some(decryptor.decrypt(&buffer)?)),
            None => Ok(None),
        },
        None => read_data_frame(source, max_frame).await,
    }
}
