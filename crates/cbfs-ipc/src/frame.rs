//! Length-prefixed frame codec.
//!
//! ```text
//! offset  field    size
//! ------  -------  ----
//!  0      magic    4    ("CBFS", little-endian)
//!  4      length   4    (payload bytes)
//!  8      payload  N    (bincode)
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Invalid frame magic: {0:#010x}")]
    BadMagic(u32),

    #[error("Frame too large: {0} bytes")]
    TooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub length: u32,
}

impl FrameHeader {
    pub const MAGIC: u32 = u32::from_le_bytes(*b"CBFS");
    pub const SIZE: usize = 8;
    /// 16 MiB
    pub const MAX_LENGTH: usize = 16 * 1024 * 1024;

    pub fn new(length: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            length,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == Self::MAGIC
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Serialize `msg` into a complete frame (header + payload)
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameError> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > FrameHeader::MAX_LENGTH {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let header = FrameHeader::new(payload.len() as u32);
    let mut buf = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

#[cfg(feature = "tokio")]
pub use io::{read_frame, write_frame};

#[cfg(feature = "tokio")]
mod io {
    use super::*;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// Write one frame and flush it
    pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let buf = encode(msg)?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame. Returns `Ok(None)` when the peer closed the stream
    /// before a new header began; EOF inside a header is an I/O error.
    pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let mut header_buf = [0u8; FrameHeader::SIZE];
        let mut filled = 0;
        while filled < FrameHeader::SIZE {
            let n = reader.read(&mut header_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FrameError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream closed after {filled} header bytes"),
                )));
            }
            filled += n;
        }

        let header = FrameHeader::from_bytes(&header_buf);
        if !header.is_valid() {
            return Err(FrameError::BadMagic(header.magic));
        }
        if header.length as usize > FrameHeader::MAX_LENGTH {
            return Err(FrameError::TooLarge(header.length as usize));
        }

        let mut payload = vec![0u8; header.length as usize];
        reader.read_exact(&mut payload).await?;
        Ok(Some(bincode::deserialize(&payload)?))
    }
}
