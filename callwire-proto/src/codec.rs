//! Length-prefixed frame codec over blocking and async streams.
//!
//! Each frame is: `[u32 big-endian length][payload]`. Handshake messages use
//! a [`postcard`] payload; envelopes use their own record encoding.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Envelope;

/// Maximum allowed frame payload (16 MiB).
const MAX_FRAME: u32 = 16 * 1024 * 1024;

/// Serializes a handshake message with postcard.
fn to_payload(msg: &impl Serialize) -> io::Result<Vec<u8>> {
    postcard::to_allocvec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Deserializes a handshake message with postcard.
fn from_payload<T: DeserializeOwned>(payload: &[u8]) -> io::Result<T> {
    postcard::from_bytes(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Computes the frame header for `payload`.
fn header(payload: &[u8]) -> io::Result<[u8; 4]> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "frame exceeds 16 MiB limit"))?;
    Ok(len.to_be_bytes())
}

/// Validates a received frame header.
fn check_len(buf: [u8; 4]) -> io::Result<usize> {
    let len = u32::from_be_bytes(buf);
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds 16 MiB limit",
        ));
    }
    Ok(len as usize)
}

/// Writes one raw frame to `w` and flushes.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    w.write_all(&header(payload)?)?;
    w.write_all(payload)?;
    w.flush()
}

/// Reads one raw frame from `r`.
pub fn read_frame(r: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    let mut payload = vec![0u8; check_len(buf)?];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

/// Encodes `msg` as a length-prefixed postcard frame and writes it to `w`.
pub fn encode<W: Write>(w: &mut W, msg: &impl Serialize) -> io::Result<()> {
    write_frame(w, &to_payload(msg)?)
}

/// Reads a length-prefixed postcard frame from `r` and decodes it.
pub fn decode<T: DeserializeOwned>(r: &mut impl Read) -> io::Result<T> {
    from_payload(&read_frame(r)?)
}

/// Writes one raw frame to an async stream. Does not flush.
pub async fn send_frame(w: &mut (impl AsyncWrite + Unpin), payload: &[u8]) -> io::Result<()> {
    w.write_all(&header(payload)?).await?;
    w.write_all(payload).await
}

/// Reads one raw frame from an async stream.
pub async fn recv_frame(r: &mut (impl AsyncRead + Unpin)) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await?;
    let mut payload = vec![0u8; check_len(buf)?];
    r.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Sends a postcard-encoded message frame. Does not flush.
pub async fn send(w: &mut (impl AsyncWrite + Unpin), msg: &impl Serialize) -> io::Result<()> {
    send_frame(w, &to_payload(msg)?).await
}

/// Receives a postcard-encoded message frame.
pub async fn recv<T: DeserializeOwned>(r: &mut (impl AsyncRead + Unpin)) -> io::Result<T> {
    from_payload(&recv_frame(r).await?)
}

/// Sends an envelope frame. Does not flush.
pub async fn send_envelope(w: &mut (impl AsyncWrite + Unpin), env: &Envelope) -> io::Result<()> {
    send_frame(w, &env.encode()).await
}

/// Receives an envelope frame.
pub async fn recv_envelope(r: &mut (impl AsyncRead + Unpin)) -> io::Result<Envelope> {
    let payload = recv_frame(r).await?;
    Ok(Envelope::decode(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Hello, HelloAck};

    #[test]
    fn roundtrip_hello() {
        let mut buf = Vec::new();
        encode(&mut buf, &Hello::OutputPipe { request_id: 9 }).unwrap();

        let mut cursor = io::Cursor::new(&buf);
        let decoded: Hello = decode(&mut cursor).unwrap();
        assert_eq!(decoded, Hello::OutputPipe { request_id: 9 });
    }

    #[test]
    fn consecutive_frames_stay_aligned() {
        let mut buf = Vec::new();
        encode(
            &mut buf,
            &Hello::Execute {
                request_id: None,
                has_input: true,
            },
        )
        .unwrap();
        write_frame(&mut buf, b"raw").unwrap();
        encode(&mut buf, &HelloAck::Error("boom".into())).unwrap();

        let mut cursor = io::Cursor::new(&buf);
        let _: Hello = decode(&mut cursor).unwrap();
        assert_eq!(read_frame(&mut cursor).unwrap(), b"raw");
        let ack: HelloAck = decode(&mut cursor).unwrap();
        assert_eq!(ack, HelloAck::Error("boom".into()));
    }

    #[test]
    fn rejects_oversized_frame() {
        // Craft a frame header claiming 32 MiB
        let header = (32u32 * 1024 * 1024).to_be_bytes();
        let mut cursor = io::Cursor::new(&header[..]);
        let result: io::Result<Hello> = decode(&mut cursor);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn async_envelope_roundtrip() {
        let env = Envelope::new("act").with("body", "hi");
        let mut buf = Vec::new();
        send_envelope(&mut buf, &env).await.unwrap();
        let mut slice = &buf[..];
        assert_eq!(recv_envelope(&mut slice).await.unwrap(), env);
    }

    #[tokio::test]
    async fn corrupt_envelope_is_invalid_data() {
        let mut buf = Vec::new();
        send_frame(&mut buf, &[0, 0, 0, 1, 0, 0, 0, 9, 1]).await.unwrap();
        let mut slice = &buf[..];
        let err = recv_envelope(&mut slice).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
