//! Wire codec for protocol datagrams
//!
//! Pure byte-level framing; no I/O happens here. A datagram is a 24-byte
//! big-endian header followed by `bodyLen` body bytes. Doubles travel as
//! the big-endian representation of their IEEE-754 bit pattern.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::{Message, HEADER_SIZE, MAGIC};

/// Longest encodable string field (2-byte length prefix)
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Width of the fixed password field
pub const PASSWORD_LEN: usize = 16;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Datagram shorter than the 24-byte header: {0} bytes")]
    TooShort(usize),

    #[error("Invalid magic")]
    InvalidMagic,

    #[error("Body length field says {declared} bytes but only {actual} follow the header")]
    BodyLengthMismatch { declared: usize, actual: usize },

    #[error("Truncated body field")]
    Truncated,

    #[error("String field too long: {0} bytes (max: 65535)")]
    StringTooLong(usize),

    #[error("Password length must be 1..=16 bytes, got {0}")]
    PasswordLength(usize),

    #[error("Unknown currency code: {0}")]
    UnknownCurrency(u16),

    #[error("Invalid UTF-8 in string field")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encode a message into a standalone datagram.
pub fn encode(m: &Message) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + m.body.len());
    buf.put_u32(MAGIC);
    buf.put_u8(m.version);
    buf.put_u8(m.msg_type);
    buf.put_u16(m.op_code);
    buf.put_u16(m.flags);
    buf.put_u16(m.status);
    buf.put_u64(m.request_id);
    buf.put_u32(m.body.len() as u32);
    buf.put_slice(&m.body);
    buf.to_vec()
}

/// Decode one datagram into a [`Message`].
///
/// Fails on a short buffer, a foreign magic tag, or a body-length field
/// exceeding the bytes actually present; any bytes trailing past the
/// declared body length are discarded. Version, message type and opcode
/// travel raw and are judged by the receiver, not here. Callers decide
/// what a failure means: the server silently drops the datagram, the
/// client keeps waiting for its timeout.
pub fn decode(raw: &[u8]) -> Result<Message, CodecError> {
    if raw.len() < HEADER_SIZE {
        return Err(CodecError::TooShort(raw.len()));
    }

    let mut buf = raw;
    if buf.get_u32() != MAGIC {
        return Err(CodecError::InvalidMagic);
    }
    let version = buf.get_u8();
    let msg_type = buf.get_u8();
    let op_code = buf.get_u16();
    let flags = buf.get_u16();
    let status = buf.get_u16();
    let request_id = buf.get_u64();
    let body_len = buf.get_u32() as usize;

    if body_len > buf.remaining() {
        return Err(CodecError::BodyLengthMismatch {
            declared: body_len,
            actual: buf.remaining(),
        });
    }

    Ok(Message {
        version,
        msg_type,
        op_code,
        flags,
        status,
        request_id,
        body: buf[..body_len].to_vec(),
    })
}

// ==================== Body-level primitives ====================

/// Write a variable-length string: 2-byte length prefix + UTF-8 bytes.
pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    if s.len() > MAX_STRING_LEN {
        return Err(CodecError::StringTooLong(s.len()));
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Read a variable-length string written by [`put_string`].
pub fn get_string(buf: &mut impl Buf) -> Result<String, CodecError> {
    let len = try_get_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(String::from_utf8(bytes)?)
}

/// Write the fixed 16-byte password field, padded with trailing zero bytes.
///
/// Rejects empty and over-long passwords; zero bytes inside a password
/// would be indistinguishable from padding.
pub fn put_password16(buf: &mut BytesMut, password: &str) -> Result<(), CodecError> {
    let bytes = password.as_bytes();
    if bytes.is_empty() || bytes.len() > PASSWORD_LEN {
        return Err(CodecError::PasswordLength(bytes.len()));
    }
    let mut fixed = [0u8; PASSWORD_LEN];
    fixed[..bytes.len()].copy_from_slice(bytes);
    buf.put_slice(&fixed);
    Ok(())
}

/// Read the fixed 16-byte password field, trimming trailing zero bytes.
pub fn get_password16(buf: &mut impl Buf) -> Result<String, CodecError> {
    if buf.remaining() < PASSWORD_LEN {
        return Err(CodecError::Truncated);
    }
    let mut fixed = [0u8; PASSWORD_LEN];
    buf.copy_to_slice(&mut fixed);
    let len = fixed.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    Ok(String::from_utf8(fixed[..len].to_vec())?)
}

pub fn try_get_u16(buf: &mut impl Buf) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u16())
}

pub fn try_get_i32(buf: &mut impl Buf) -> Result<i32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_i32())
}

pub fn try_get_f64(buf: &mut impl Buf) -> Result<f64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_f64())
}
