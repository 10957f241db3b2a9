//! Node-state wire protocol
//!
//! Every message is a frame: an 8-byte big-endian header followed by the
//! payload.
//!
//! ```text
//! bytes 0-1  protocol version (u16)
//! bytes 2-3  frame kind (u16)
//! bytes 4-7  payload length (u32)
//! ```
//!
//! A `StateRequest` carries no payload. A `StateReply` carries six `f64`
//! values in the order cpu%, mem%, net-in, net-out, io-read, io-write.

use crate::error::ProtocolError;
use crate::models::{NodeStateVector, NODE_FIELDS};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 8;

/// Current protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Oldest version this build still understands
pub const MIN_SUPPORTED_VERSION: u16 = 1;

/// Size of a state reply payload
pub const STATE_PAYLOAD_SIZE: usize = NODE_FIELDS * 8;

/// Upper bound on any payload; node messages are tiny
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// Frame kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameKind {
    StateRequest = 0x01,
    StateReply = 0x02,
}

impl FrameKind {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(Self::StateRequest),
            0x02 => Some(Self::StateReply),
            _ => None,
        }
    }

    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::StateRequest => "state_request",
            Self::StateReply => "state_reply",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub kind: FrameKind,
    pub payload_len: u32,
}

impl FrameHeader {
    pub const fn new(kind: FrameKind, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            payload_len,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.version.to_be_bytes());
        buf[2..4].copy_from_slice(&self.kind.as_u16().to_be_bytes());
        buf[4..8].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Decode and validate a header
    pub fn decode(bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let version = u16::from_be_bytes([bytes[0], bytes[1]]);
        if !(MIN_SUPPORTED_VERSION..=PROTOCOL_VERSION).contains(&version) {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let kind_raw = u16::from_be_bytes([bytes[2], bytes[3]]);
        let kind = FrameKind::from_u16(kind_raw).ok_or(ProtocolError::UnknownKind(kind_raw))?;

        let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            version,
            kind,
            payload_len,
        })
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }
}

/// Bytes of a state request frame
pub fn encode_request() -> [u8; FRAME_HEADER_SIZE] {
    FrameHeader::new(FrameKind::StateRequest, 0).encode()
}

/// Bytes of a state reply frame
pub fn encode_state_reply(state: &NodeStateVector) -> Vec<u8> {
    let header = FrameHeader::new(FrameKind::StateReply, STATE_PAYLOAD_SIZE as u32);
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + STATE_PAYLOAD_SIZE);
    buf.extend_from_slice(&header.encode());
    for value in state.to_array() {
        buf.extend_from_slice(&value.to_be_bytes());
    }
    buf
}

/// Decode the node state carried by a reply frame
pub fn decode_state_reply(frame: &Frame) -> Result<NodeStateVector, ProtocolError> {
    if frame.kind() != FrameKind::StateReply {
        return Err(ProtocolError::UnexpectedKind {
            expected: FrameKind::StateReply.name(),
            got: frame.kind().name(),
        });
    }
    if frame.payload.len() != STATE_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadLength {
            expected: STATE_PAYLOAD_SIZE,
            got: frame.payload.len(),
        });
    }

    let mut values = [0.0; NODE_FIELDS];
    for (i, chunk) in frame.payload.chunks_exact(8).enumerate() {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        let value = f64::from_be_bytes(raw);
        if !value.is_finite() {
            return Err(ProtocolError::NonFinite(i));
        }
        values[i] = value;
    }
    Ok(NodeStateVector::from_array(values))
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before
/// sending anything, and `ProtocolError::Truncated` when it closed mid-frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < FRAME_HEADER_SIZE {
        let n = reader.read(&mut header_buf[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(ProtocolError::Truncated)
            };
        }
        filled += n;
    }

    let header = FrameHeader::decode(&header_buf)?;
    let mut payload = vec![0u8; header.payload_len as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Truncated)
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Some(Frame { header, payload }))
}

pub async fn write_request<W>(writer: &mut W) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_request()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_state_reply<W>(writer: &mut W, state: &NodeStateVector) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_state_reply(state)).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> NodeStateVector {
        NodeStateVector::from_array([12.5, 40.0, 3.2, 1.1, 512.0, 2048.0])
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let bytes = FrameHeader::new(FrameKind::StateReply, 48).encode();
        assert_eq!(bytes, [0, 1, 0, 2, 0, 0, 0, 48]);
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut bytes = encode_request();
        bytes[1] = 9;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(ProtocolError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut bytes = encode_request();
        bytes[3] = 0x7f;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(ProtocolError::UnknownKind(0x7f))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_payload() {
        let bytes = [0, 1, 0, 2, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_state_reply_over_stream() {
        let bytes = encode_state_reply(&sample_state());
        let mut reader = bytes.as_slice();
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.kind(), FrameKind::StateReply);
        assert_eq!(decode_state_reply(&frame).unwrap(), sample_state());
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let bytes = encode_state_reply(&sample_state());
        let mut reader = tokio_test::io::Builder::new()
            .read(&bytes[..3])
            .read(&bytes[3..20])
            .read(&bytes[20..])
            .build();
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(decode_state_reply(&frame).unwrap(), sample_state());
    }

    #[tokio::test]
    async fn test_write_request_bytes() {
        let mut writer = tokio_test::io::Builder::new()
            .write(&[0, 1, 0, 1, 0, 0, 0, 0])
            .build();
        write_request(&mut writer).await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_close_is_not_an_error() {
        let mut reader: &[u8] = &[];
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_reply_is_truncated() {
        let bytes = encode_state_reply(&sample_state());
        let mut reader = &bytes[..30];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ProtocolError::Truncated)
        ));

        let mut reader = &bytes[..5];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn test_reply_with_wrong_payload_length() {
        let frame = Frame {
            header: FrameHeader::new(FrameKind::StateReply, 40),
            payload: vec![0; 40],
        };
        assert!(matches!(
            decode_state_reply(&frame),
            Err(ProtocolError::PayloadLength { expected: 48, got: 40 })
        ));
    }

    #[test]
    fn test_reply_with_nan_is_rejected() {
        let mut state = sample_state();
        state.net_out_kbps = f64::NAN;
        let bytes = encode_state_reply(&state);
        let frame = Frame {
            header: FrameHeader::new(FrameKind::StateReply, STATE_PAYLOAD_SIZE as u32),
            payload: bytes[FRAME_HEADER_SIZE..].to_vec(),
        };
        assert!(matches!(
            decode_state_reply(&frame),
            Err(ProtocolError::NonFinite(3))
        ));
    }

    #[test]
    fn test_request_is_not_a_reply() {
        let frame = Frame {
            header: FrameHeader::new(FrameKind::StateRequest, 0),
            payload: Vec::new(),
        };
        assert!(matches!(
            decode_state_reply(&frame),
            Err(ProtocolError::UnexpectedKind { .. })
        ));
    }
}
