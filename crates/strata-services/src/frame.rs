//! Length-prefixed message I/O over async byte streams.
//!
//! One frame per message: the fixed header is read whole, validated, and
//! the body read is sized from it. EOF at a frame boundary is a clean
//! close; EOF inside a frame is a lost connection.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use zerocopy::FromBytes;

use strata_core::error::{Error, Result};
use strata_core::message::Message;
use strata_core::wire::{FrameHeader, HEADER_LEN};

/// Write one message as one frame and flush it.
/// An over-cap body is refused before any bytes are written.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = msg.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// frames. A close mid-frame is `ConnectionLost`.
pub async fn read_message<R>(reader: &mut R, peer: &str) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = FrameHeader::read_from(&header_buf[..])
        .ok_or_else(|| Error::protocol("frame header short read"))?;
    header.validate()?;

    let mut body = vec![0u8; header.length.get() as usize];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::connection_lost(peer));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Some(Message::decode(header.kind, &body)?))
}

/// Connect to a peer with bounded retries and backoff.
/// Exhausting the attempts yields `ConnectionLost`, never an abort.
pub async fn connect_with_retries(
    addr: &str,
    attempts: u32,
    backoff: Duration,
) -> Result<TcpStream> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(peer = %addr, attempt, error = %e, "connect failed");
                last_err = Some(e);
                if attempt + 1 < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    if let Some(e) = last_err {
        tracing::warn!(peer = %addr, attempts, error = %e, "giving up on peer");
    }
    Err(Error::connection_lost(addr))
}
