//! Protocol module - the wire format shared by clients and the server
//!
//! Every datagram is a fixed 24-byte header followed by an opaque body.
//! All multi-byte integers are big-endian:
//! - magic:4 + version:1 + msgType:1 + opCode:2 + flags:2
//!   + status:2 + requestId:8 + bodyLen:4
//!
//! The body layout is determined by the opcode and message type; see
//! [`message`] for the typed request/reply/callback bodies.

mod codec;
mod message;

pub use codec::*;
pub use message::*;

/// Protocol version carried in every header
pub const PROTOCOL_VERSION: u8 = 1;

/// Default port for the banking server
pub const DEFAULT_PORT: u16 = 9000;

/// Magic tag identifying protocol datagrams ("BANK" in ASCII)
pub const MAGIC: u32 = 0x4241_4E4B;

/// Header size: magic(4) + version(1) + msgType(1) + opCode(2) + flags(2)
/// + status(2) + requestId(8) + bodyLen(4) = 24 bytes
pub const HEADER_SIZE: usize = 24;

/// Flag bit 0: the client requests at-most-once invocation semantics.
/// All other bits are reserved and must be zero.
pub const FLAG_AT_MOST_ONCE: u16 = 0x0001;
