//! Length-prefixed frame IO.
//!
//! Handshake messages and transport records share the same outer framing:
//! a `u16` big-endian length followed by the body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

/// Largest body representable under the 16-bit length prefix.
pub const MAX_FRAME_LEN: usize = 65535;

/// A bidirectional byte stream the secure channel runs over.
///
/// Blanket-implemented for anything tokio can read and write; the channel
/// never needs more than that from its transport.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// Reads one frame, or `None` on clean end-of-stream at a frame boundary.
/// End-of-stream inside a frame is a malformed (truncated) frame.
pub(crate) async fn try_read_frame<T>(io: &mut T) -> Result<Option<Vec<u8>>, Error>
where
    T: AsyncRead + Unpin,
{
    let mut first = [0u8; 1];
    if io.read(&mut first).await? == 0 {
        return Ok(None);
    }

    let mut second = [0u8; 1];
    io.read_exact(&mut second)
        .await
        .map_err(truncated)?;
    let len = u16::from_be_bytes([first[0], second[0]]) as usize;

    let mut body = vec![0u8; len];
    io.read_exact(&mut body).await.map_err(truncated)?;
    Ok(Some(body))
}

/// Reads one frame; end-of-stream at the boundary is an I/O error here.
pub(crate) async fn read_frame<T>(io: &mut T) -> Result<Vec<u8>, Error>
where
    T: AsyncRead + Unpin,
{
    match try_read_frame(io).await? {
        Some(frame) => Ok(frame),
        None => Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into())),
    }
}

/// Writes one length-prefixed frame and flushes it.
pub(crate) async fn write_frame<T>(io: &mut T, body: &[u8]) -> Result<(), Error>
where
    T: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::ProtocolViolation("frame exceeds 16-bit length"));
    }

    io.write_all(&(body.len() as u16).to_be_bytes()).await?;
    io.write_all(body).await?;
    io.flush().await?;
    Ok(())
}

fn truncated(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::MalformedMessage("truncated frame")
    } else {
        Error::Io(err)
    }
}
