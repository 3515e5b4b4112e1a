//! Framing for gridlink server sessions.
//!
//! A session socket carries two kinds of frames:
//!
//! ```text
//! CONTROL:         [4 bytes BE: len][len bytes: JSON ControlMessage]
//! DATA (plain):    [4 bytes BE: len][len bytes: payload]
//! DATA (SSL):      [4 bytes BE: len][1 byte: iv_len][iv_len bytes: IV][ciphertext]
//! END OF RANGE:    [4 bytes: 0x00000000]
//! ```
//!
//! Control frames are exchanged strictly request/response. Data frames only
//! appear between a `StreamRange` request and its `RangeAck`.

pub mod control;
pub mod error;
pub mod stream;
pub mod wire;

pub use control::{read_control, write_control};
pub use error::DataChannelError;
pub use stream::{RangeTransfer, receive_range, send_range};

use gridlink_protocol::config::MAX_STREAM_BUFFER_SIZE;

/// Largest accepted control frame (8 MiB).
pub const MAX_CONTROL_FRAME: usize = 8 * 1024 * 1024;

/// Largest accepted data frame: one full buffer plus IV and padding.
pub const MAX_DATA_FRAME: usize = MAX_STREAM_BUFFER_SIZE + 64;
