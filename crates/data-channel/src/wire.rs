//! Data frames.
//!
//! ```text
//! PLAIN:      [4 bytes BE: len][len bytes: payload]
//! ENCRYPTED:  [4 bytes BE: len][1 byte: iv_len][iv_len bytes: IV][len - 1 - iv_len bytes: ciphertext]
//! END MARKER: [4 bytes: 0]
//! ```
//!
//! A frame length of zero always ends the current range, so payloads are
//! never empty.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use gridlink_crypto::EncryptedBuffer;

use crate::error::DataChannelError;

/// Writes a plain data frame.
pub async fn write_data_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), DataChannelError> {
    if payload.is_empty() {
        return Err(DataChannelError::Protocol("empty data frame".into()));
    }
    let len = frame_len(payload.len())?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Writes an encrypted data frame.
pub async fn write_encrypted_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    buffer: &EncryptedBuffer,
) -> Result<(), DataChannelError> {
    let iv_len = buffer.initialization_vector.len();
    if iv_len == 0 || iv_len > u8::MAX as usize {
        return Err(DataChannelError::Protocol(format!(
            "invalid IV length: {iv_len}"
        )));
    }
    let len = frame_len(1 + iv_len + buffer.ciphertext.len())?;

    writer.write_u32(len).await?;
    writer.write_u8(iv_len as u8).await?;
    writer.write_all(&buffer.initialization_vector).await?;
    writer.write_all(&buffer.ciphertext).await?;
    Ok(())
}

/// Writes the end-of-range marker.
pub async fn write_end_marker<W: AsyncWrite + Unpin>(
    writer: &mut W,
) -> Result<(), DataChannelError> {
    writer.write_u32(0).await?;
    Ok(())
}

/// Reads a plain data frame. Returns `None` at the end marker.
pub async fn read_data_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Vec<u8>>, DataChannelError> {
    let len = reader.read_u32().await? as usize;
    if len == 0 {
        return Ok(None);
    }
    check_len(len, max_len)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Reads an encrypted data frame. Returns `None` at the end marker.
pub async fn read_encrypted_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<EncryptedBuffer>, DataChannelError> {
    let len = reader.read_u32().await? as usize;
    if len == 0 {
        return Ok(None);
    }
    check_len(len, max_len)?;

    let iv_len = reader.read_u8().await? as usize;
    if iv_len == 0 || 1 + iv_len > len {
        return Err(DataChannelError::Protocol(format!(
            "IV length {iv_len} does not fit a {len}-byte frame"
        )));
    }

    let mut initialization_vector = vec![0u8; iv_len];
    reader.read_exact(&mut initialization_vector).await?;
    let mut ciphertext = vec![0u8; len - 1 - iv_len];
    reader.read_exact(&mut ciphertext).await?;

    Ok(Some(EncryptedBuffer {
        initialization_vector,
        ciphertext,
    }))
}

fn frame_len(len: usize) -> Result<u32, DataChannelError> {
    u32::try_from(len)
        .map_err(|_| DataChannelError::Protocol(format!("frame too large: {len} bytes")))
}

fn check_len(len: usize, max_len: usize) -> Result<(), DataChannelError> {
    if len > max_len {
        return Err(DataChannelError::Protocol(format!(
            "data frame too large: {len} bytes (max {max_len})"
        )));
    }
    Ok(())
}
