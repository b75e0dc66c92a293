//! Wire protocol for remctl client <-> server communication.
//!
//! All packets are framed as: [flags: u8] [length: u32 BE] [payload: &[u8]]
//! Once the GSS-API context is established, the payload of a DATA frame is a
//! wrapped message token: [version: u8] [type: u8] [body...]

mod error;
mod token;

pub use error::{ErrorCode, ProtocolError};
pub use token::{Stream, Token};

/// Frame flag bits.
pub mod flags {
    /// First-packet marker from the client
    pub const NOOP: u8 = 0x01;

    /// Payload is a GSS-API context establishment token
    pub const CONTEXT: u8 = 0x02;

    /// Payload is a wrapped message token
    pub const DATA: u8 = 0x04;

    /// Protocol v1 only
    pub const MIC: u8 = 0x08;

    /// First-packet marker, paired with NOOP
    pub const CONTEXT_NEXT: u8 = 0x10;

    /// Protocol v1 only
    pub const SEND_MIC: u8 = 0x20;

    /// Set on every protocol v2 frame
    pub const PROTOCOL: u8 = 0x40;
}

/// Message token types.
pub mod message {
    /// Client → Server: run a command
    /// Body: [keepalive: u8] [continue: u8] [argc: u32] ([len: u32] [bytes])*
    pub const COMMAND: u8 = 1;

    /// Client → Server: close the connection (no body)
    pub const QUIT: u8 = 2;

    /// Server → Client: command output
    /// Body: [stream: u8] [len: u32] [bytes]
    pub const OUTPUT: u8 = 3;

    /// Server → Client: command exit status
    /// Body: [exit: u8]
    pub const STATUS: u8 = 4;

    /// Server → Client: command or protocol failure
    /// Body: [code: u32] [len: u32] [message]
    pub const ERROR: u8 = 5;

    /// Server → Client: highest supported protocol version
    /// Body: [version: u8]
    pub const VERSION: u8 = 6;

    /// Either direction: keep-alive probe (protocol v3, no body)
    pub const NOOP: u8 = 7;
}

/// Header size: 1 byte flags + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Largest payload accepted in a single frame.
pub const MAX_FRAME_PAYLOAD: usize = 1024 * 1024 - HEADER_SIZE;

/// Protocol version carried by every token this client sends except NOOP.
pub const PROTOCOL_VERSION: u8 = 2;

/// Protocol version that introduced NOOP.
pub const NOOP_VERSION: u8 = 3;

/// Highest protocol version understood when decoding.
pub const MAX_SUPPORTED_VERSION: u8 = 3;

/// Standard remctl port.
pub const DEFAULT_PORT: u16 = 4373;

/// Port used by early remctl servers.
pub const LEGACY_PORT: u16 = 4444;

/// Encode a frame into a Vec<u8>.
pub fn encode(flags: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::TooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(flags);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Parse a frame header. Returns (flags, payload_length).
///
/// Rejects v1 frames and lengths above [`MAX_FRAME_PAYLOAD`].
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(u8, usize), ProtocolError> {
    let flags = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::TooLarge(len));
    }
    if flags & flags::PROTOCOL == 0 {
        return Err(ProtocolError::V1Unsupported);
    }
    Ok((flags, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_big_endian() {
        let encoded = encode(flags::DATA | flags::PROTOCOL, &[0xaa; 258]).unwrap();
        assert_eq!(&encoded[..HEADER_SIZE], &[0x44, 0, 0, 1, 2]);
        assert_eq!(encoded.len(), HEADER_SIZE + 258);
    }

    #[test]
    fn roundtrip_header() {
        let encoded = encode(flags::CONTEXT | flags::PROTOCOL, b"krb5 token").unwrap();
        let header: [u8; HEADER_SIZE] = encoded[..HEADER_SIZE].try_into().unwrap();
        let (flags, len) = decode_header(&header).unwrap();
        assert_eq!(flags, flags::CONTEXT | flags::PROTOCOL);
        assert_eq!(len, 10);
    }

    #[test]
    fn empty_sentinel_frame() {
        let encoded = encode(flags::NOOP | flags::CONTEXT_NEXT | flags::PROTOCOL, &[]).unwrap();
        assert_eq!(encoded, vec![0x51, 0, 0, 0, 0]);
    }

    #[test]
    fn oversize_payload_rejected_on_encode() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD + 1];
        assert_eq!(
            encode(flags::DATA | flags::PROTOCOL, &payload),
            Err(ProtocolError::TooLarge(MAX_FRAME_PAYLOAD + 1))
        );
        assert!(encode(flags::DATA | flags::PROTOCOL, &payload[1..]).is_ok());
    }

    #[test]
    fn oversize_length_rejected_as_bad_token() {
        let len = (MAX_FRAME_PAYLOAD as u32 + 1).to_be_bytes();
        let header = [flags::DATA | flags::PROTOCOL, len[0], len[1], len[2], len[3]];
        let err = decode_header(&header).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadToken);
    }

    #[test]
    fn v1_frame_rejected() {
        let header = [flags::DATA, 0, 0, 0, 4];
        assert_eq!(decode_header(&header), Err(ProtocolError::V1Unsupported));
    }
}
