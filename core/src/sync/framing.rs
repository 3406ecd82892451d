//! Length-prefixed message framing for TCP transport
//!
//! Each frame is a 4-byte big-endian length followed by exactly that many
//! payload bytes. A frame is either delivered whole or not at all: a peer
//! that closes mid-frame yields [`Error::EndOfStream`] and the partial bytes
//! are dropped.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::constants::{LENGTH_PREFIX_SIZE, READ_CHUNK_SIZE};
use crate::{Error, Result};

/// Build the on-wire bytes for one frame.
///
/// Returns [`Error::FrameTooLarge`] if the payload exceeds `max_size` or
/// cannot be described by a u32 length.
pub fn encode_frame(payload: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if payload.len() > max_size || payload.len() > u32::MAX as usize {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
            max: max_size,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read one length-prefixed frame from an async reader.
///
/// The payload is accumulated through bounded reads of at most
/// `READ_CHUNK_SIZE` bytes, so arbitrary fragmentation on the wire is
/// transparent. A length above `max_size` is rejected before any payload
/// is buffered.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_size: usize) -> Result<Vec<u8>> {
    // Read 4-byte length prefix
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return Err(Error::EndOfStream);
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(Error::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    // Read payload
    let mut payload = Vec::with_capacity(len.min(READ_CHUNK_SIZE * 16));
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    while payload.len() < len {
        let want = (len - payload.len()).min(READ_CHUNK_SIZE);
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            tracing::debug!(
                "peer closed after {} of {} payload bytes, discarding partial frame",
                payload.len(),
                len
            );
            return Err(Error::EndOfStream);
        }
        payload.extend_from_slice(&chunk[..n]);
    }

    Ok(payload)
}

/// Write a length-prefixed frame to an async writer.
///
/// Prefix and payload go out as a single buffer followed by a flush. On
/// error the stream may hold a partial frame and must be discarded.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    max_size: usize,
) -> Result<()> {
    let frame = encode_frame(payload, max_size)?;
    write_encoded_frame(writer, &frame).await
}

/// Write bytes previously produced by [`encode_frame`].
pub async fn write_encoded_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
