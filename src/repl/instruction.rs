//! Replication instructions and their wire frames.
//!
//! A replication stream opens with a 4-byte magic (so the shared
//! listener can tell it apart from RESP traffic) followed by
//! length-prefixed bincode frames. Ordering is per-connection; there
//! is no cross-peer ordering and no replay after reconnect.

use crate::engine::value::ValueRepr;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Stream preamble distinguishing replication from RESP connections.
pub const REPL_MAGIC: [u8; 4] = *b"STRP";

/// Largest accepted instruction frame (64 MB).
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// One replicated mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Full new state of a key (covers set, increment, list and
    /// sorted-set updates alike).
    KeyAdd {
        space: String,
        key: Vec<u8>,
        value: ValueRepr,
        expires_at: Option<u64>,
    },
    /// Key removal.
    KeyRemove { space: String, key: Vec<u8> },
}

impl Instruction {
    pub fn space(&self) -> &str {
        match self {
            Self::KeyAdd { space, .. } | Self::KeyRemove { space, .. } => space,
        }
    }

    /// Encode as a length-prefixed frame.
    pub fn encode_frame(&self) -> Result<Vec<u8>, bincode::Error> {
        let payload = bincode::serialize(self)?;
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

/// Read one frame. Returns `None` on clean end-of-stream, the decoded
/// instruction and its total frame size otherwise.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<(Instruction, usize)>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf);
    if len == 0 || len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid frame length: {}", len),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    let instruction = bincode::deserialize(&payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(Some((instruction, 4 + len as usize)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let add = Instruction::KeyAdd {
            space: "default".to_string(),
            key: b"k".to_vec(),
            value: ValueRepr::Scalar(b"v".to_vec()),
            expires_at: Some(12345),
        };
        let rem = Instruction::KeyRemove {
            space: "other".to_string(),
            key: b"gone".to_vec(),
        };

        let mut stream = Vec::new();
        stream.extend_from_slice(&add.encode_frame().unwrap());
        stream.extend_from_slice(&rem.encode_frame().unwrap());

        let mut cursor = std::io::Cursor::new(stream);
        let (first, size) = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(first, add);
        assert!(size > 4);
        let (second, _) = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(second, rem);
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut bad = Vec::new();
        bad.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_le_bytes());
        let mut cursor = std::io::Cursor::new(bad);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}
