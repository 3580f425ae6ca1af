use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{NetronError, Packet, Result};

/// Maximum framed message size (100 MB). Prevents a hostile or broken peer
/// from forcing an unbounded allocation with a forged length prefix.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// JSON codec for packet envelopes.
///
/// The value model is self-describing (every `Value` carries a type tag), so
/// JSON is sufficient as the carrier; a binary codec could replace this
/// without touching the engine.
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(packet)?)
    }

    pub fn decode_packet(data: &[u8]) -> Result<Packet> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Writes one length-prefixed frame.
    ///
    /// Wire format: `[4-byte length as u32 big-endian] + [data]`.
    pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(NetronError::Codec(format!(
                "message too large: {} bytes (max {} bytes)",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        let len = data.len() as u32;
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads one length-prefixed frame.
    pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(NetronError::Codec(format!(
                "message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
