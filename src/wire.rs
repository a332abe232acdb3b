//! Wire format for exchanging whole chains with a peer
//!
//! A frame is a 4-byte big-endian payload length followed by the payload. The
//! payload is a bincode-encoded [`ChainMessage`] (fixed-width integers,
//! little-endian, no trailing bytes):
//!
//! ```text
//! ChainMessage { version: u16, blocks: Vec<WireBlock> }
//! WireBlock    { index: u64, timestamp_unix_nanos: i64, data: String,
//!                previous_hash: Option<String>, hash: String,
//!                difficulty: u32, nonce: u64 }
//! ```

use crate::block::Block;
use crate::error::{ChainError, Result};
use bincode::Options;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const WIRE_VERSION: u16 = 1;

/// Default upper bound on a single frame payload.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBlock {
    pub index: u64,
    pub timestamp_unix_nanos: i64,
    pub data: String,
    pub previous_hash: Option<String>,
    pub hash: String,
    pub difficulty: u32,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMessage {
    pub version: u16,
    pub blocks: Vec<WireBlock>,
}

impl TryFrom<&Block> for WireBlock {
    type Error = ChainError;

    fn try_from(block: &Block) -> Result<Self> {
        let timestamp_unix_nanos = block.timestamp.timestamp_nanos_opt().ok_or_else(|| {
            ChainError::SerializationError(format!(
                "block {} timestamp is outside the nanosecond range",
                block.index
            ))
        })?;
        Ok(WireBlock {
            index: block.index,
            timestamp_unix_nanos,
            data: block.data.clone(),
            previous_hash: block.previous_hash.clone(),
            hash: block.hash.clone(),
            difficulty: block.difficulty,
            nonce: block.nonce,
        })
    }
}

impl From<WireBlock> for Block {
    fn from(wire: WireBlock) -> Self {
        Block {
            index: wire.index,
            timestamp: DateTime::from_timestamp_nanos(wire.timestamp_unix_nanos),
            data: wire.data,
            previous_hash: wire.previous_hash,
            hash: wire.hash,
            difficulty: wire.difficulty,
            nonce: wire.nonce,
        }
    }
}

fn codec(limit: u32) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
        .with_limit(u64::from(limit))
}

/// Serialize a chain into a frame payload.
pub fn encode_chain(blocks: &[Block]) -> Result<Vec<u8>> {
    let message = ChainMessage {
        version: WIRE_VERSION,
        blocks: blocks
            .iter()
            .map(WireBlock::try_from)
            .collect::<Result<Vec<_>>>()?,
    };
    Ok(codec(u32::MAX).serialize(&message)?)
}

/// Parse a frame payload back into blocks.
pub fn decode_chain(payload: &[u8]) -> Result<Vec<Block>> {
    let limit = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let message: ChainMessage = codec(limit).deserialize(payload)?;
    if message.version != WIRE_VERSION {
        return Err(ChainError::UnsupportedWireVersion(message.version));
    }
    Ok(message.blocks.into_iter().map(Block::from).collect())
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame_bytes: u32) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if size > max_frame_bytes {
        return Err(ChainError::FrameTooLarge {
            size,
            limit: max_frame_bytes,
        });
    }
    writer.write_u32(size).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: u32) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let size = reader.read_u32().await?;
    if size > max_frame_bytes {
        return Err(ChainError::FrameTooLarge {
            size,
            limit: max_frame_bytes,
        });
    }
    let mut payload = vec![0u8; size as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Blockchain;
    use std::time::Duration;

    fn sample_chain() -> Vec<Block> {
        let mut chain = Blockchain::new();
        let block = chain.mine().unwrap();
        assert!(chain.append(block));
        chain.blocks().to_vec()
    }

    #[test]
    fn test_chain_survives_encoding() {
        let blocks = sample_chain();
        let decoded = decode_chain(&encode_chain(&blocks).unwrap()).unwrap();
        assert_eq!(decoded, blocks);
        assert!(decoded[0].previous_hash.is_none());
        assert!(Blockchain::validate_chain(&decoded));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_chain(b"definitely not a chain").is_err());
        assert!(decode_chain(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let payload = encode_chain(&sample_chain()).unwrap();
        assert!(decode_chain(&payload[..payload.len() - 3]).is_err());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut payload = encode_chain(&sample_chain()).unwrap();
        payload.push(0);
        assert!(decode_chain(&payload).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let message = ChainMessage {
            version: WIRE_VERSION + 1,
            blocks: Vec::new(),
        };
        let payload = codec(u32::MAX).serialize(&message).unwrap();
        match decode_chain(&payload) {
            Err(ChainError::UnsupportedWireVersion(v)) => assert_eq!(v, WIRE_VERSION + 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frames_keep_message_boundaries() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let (mut a, mut b) = tokio::io::duplex(1024);
            write_frame(&mut a, b"first", 64).await.unwrap();
            write_frame(&mut a, b"second", 64).await.unwrap();

            assert_eq!(read_frame(&mut b, 64).await.unwrap(), b"first");
            assert_eq!(read_frame(&mut b, 64).await.unwrap(), b"second");
        })
        .await
        .expect("test_frames_keep_message_boundaries timed out");
    }

    #[tokio::test]
    async fn test_oversized_frames_are_refused() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let (mut a, mut b) = tokio::io::duplex(1024);
            let err = write_frame(&mut a, &[0u8; 32], 16).await.unwrap_err();
            assert!(matches!(err, ChainError::FrameTooLarge { size: 32, limit: 16 }));

            write_frame(&mut a, &[0u8; 32], 64).await.unwrap();
            let err = read_frame(&mut b, 16).await.unwrap_err();
            assert!(err.is_link_failure());
        })
        .await
        .expect("test_oversized_frames_are_refused timed out");
    }

    #[tokio::test]
    async fn test_closed_stream_is_io_error() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let (a, mut b) = tokio::io::duplex(64);
            drop(a);
            let err = read_frame(&mut b, 64).await.unwrap_err();
            assert!(matches!(err, ChainError::IoError(_)));
        })
        .await
        .expect("test_closed_stream_is_io_error timed out");
    }
}
