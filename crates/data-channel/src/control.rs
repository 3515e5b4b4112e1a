use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use gridlink_protocol::ControlMessage;

use crate::MAX_CONTROL_FRAME;
use crate::error::DataChannelError;

/// Writes one control frame and flushes.
pub async fn write_control<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ControlMessage,
) -> Result<(), DataChannelError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_CONTROL_FRAME {
        return Err(DataChannelError::Protocol(format!(
            "control message too large: {} bytes (max {MAX_CONTROL_FRAME})",
            body.len()
        )));
    }

    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    trace!(kind = message.kind(), len = body.len(), "control frame sent");
    Ok(())
}

/// Reads one control frame.
pub async fn read_control<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<ControlMessage, DataChannelError> {
    let len = reader.read_u32().await? as usize;
    if len == 0 {
        return Err(DataChannelError::Protocol("empty control frame".into()));
    }
    if len > MAX_CONTROL_FRAME {
        return Err(DataChannelError::Protocol(format!(
            "control frame too large: {len} bytes (max {MAX_CONTROL_FRAME})"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let message: ControlMessage = serde_json::from_slice(&body)?;
    trace!(kind = message.kind(), len, "control frame received");
    Ok(message)
}
