//! Framed JSON codec
//!
//! Messages are bare JSON objects on a TCP stream with no length prefix,
//! so the receiver scans for the smallest prefix of the buffered bytes
//! that parses as one JSON value. Bytes past that prefix stay in the
//! buffer (tracker connections carry several messages back to back), or,
//! for a chunk reply, are the first bytes of the raw payload.

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::proto::ChunkHeader;

/// A chunk reply header larger than this is treated as garbage.
pub const MAX_HEADER_BYTES: usize = 2048;

/// Serialize one message onto the stream.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Read the next JSON message, appending to `buf` in `buffer_size` reads
/// until a complete value parses. Consumes exactly the parsed bytes from
/// `buf`; anything after them is left for the next call.
///
/// Returns `Ok(None)` when the connection closes cleanly between
/// messages.
pub async fn read_message<R, T>(
    reader: &mut R,
    buf: &mut BytesMut,
    buffer_size: usize,
) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    loop {
        if let Some(consumed) = try_parse::<T>(buf)? {
            let (message, used) = consumed;
            let _ = buf.split_to(used);
            return Ok(Some(message));
        }

        buf.reserve(buffer_size);
        let n = reader.read_buf(buf).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(Error::Protocol(
                "connection closed mid-message".to_string(),
            ));
        }
    }
}

/// Read a chunk reply header. The TCP stream may arbitrarily combine
/// header and payload bytes, so whatever was read past the header is
/// returned alongside it as the start of the payload.
pub async fn read_chunk_header<R>(
    reader: &mut R,
    buffer_size: usize,
) -> Result<(ChunkHeader, BytesMut)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(buffer_size.min(MAX_HEADER_BYTES));

    loop {
        match try_parse::<ChunkHeader>(&buf) {
            Ok(Some((header, used))) => {
                let payload = buf.split_off(used);
                return Ok((header, payload));
            }
            Ok(None) => {}
            Err(_) => return Err(Error::InvalidHeader),
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(Error::InvalidHeader);
        }

        buf.reserve(buffer_size);
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::Protocol(
                "connection closed before reply header".to_string(),
            ));
        }
    }
}

/// Attempt to parse one `T` from the front of the buffer. `Ok(None)`
/// means the buffer holds only a prefix of a value and more bytes are
/// needed.
fn try_parse<T: DeserializeOwned>(buf: &[u8]) -> Result<Option<(T, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<T>();
    match stream.next() {
        Some(Ok(value)) => {
            let used = stream.byte_offset();
            Ok(Some((value, used)))
        }
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}
