//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (fixed header, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Parsing a raw byte slice back into a [`Packet`], returning errors for
//!   malformed or truncated input.
//! - Computing and verifying the CRC-32 checksum.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All fields are **big-endian** `u32`.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |             Type (0=START, 1=END, 2=DATA, 3=ACK)              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Checksum                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The checksum is CRC-32 (IEEE, as used by zlib) over the 16 header bytes
//! with the checksum field zeroed, followed by the payload bytes.

use crc::{Crc, CRC_32_ISO_HDLC};
use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 16;

/// Largest datagram either engine will emit.
pub const MAX_DATAGRAM: usize = 1472;

/// Largest payload that fits in one [`MAX_DATAGRAM`].
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 4;
const OFF_LENGTH: usize = 8;
const OFF_CHECKSUM: usize = 12;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Packet type tag carried in the first header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    /// Connection request; always `seq = 0`.
    Start = 0,
    /// Teardown request; `seq = N + 1` for an `N`-chunk stream.
    End = 1,
    /// One chunk of the byte stream.
    Data = 2,
    /// Cumulative acknowledgement (next expected sequence number).
    Ack = 3,
}

impl TryFrom<u32> for PacketType {
    type Error = PacketError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Start),
            1 => Ok(Self::End),
            2 => Ok(Self::Data),
            3 => Ok(Self::Ack),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::End => "END",
            Self::Data => "DATA",
            Self::Ack => "ACK",
        };
        f.write_str(name)
    }
}

/// Fixed-size protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketType,
    pub seq: u32,
    /// Payload byte count; `0` for control packets.
    pub length: u32,
    pub checksum: u32,
}

impl Header {
    /// Serialise the header exactly as it appears on the wire.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_TYPE..OFF_TYPE + 4].copy_from_slice(&(self.kind as u32).to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_LENGTH..OFF_LENGTH + 4].copy_from_slice(&self.length.to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet with a truthful `length` and a freshly computed checksum.
    pub fn new(kind: PacketType, seq: u32, payload: Vec<u8>) -> Self {
        let mut header = Header {
            kind,
            seq,
            length: payload.len() as u32,
            checksum: 0,
        };
        header.checksum = compute_checksum(&header, &payload);
        Self { header, payload }
    }

    pub fn start() -> Self {
        Self::new(PacketType::Start, 0, Vec::new())
    }

    pub fn end(seq: u32) -> Self {
        Self::new(PacketType::End, seq, Vec::new())
    }

    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self::new(PacketType::Data, seq, payload)
    }

    pub fn ack(seq: u32) -> Self {
        Self::new(PacketType::Ack, seq, Vec::new())
    }

    /// Serialise header fields then payload.
    ///
    /// The stored `checksum` is written as-is; packets built with
    /// [`Packet::new`] already carry the correct value.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the `length` field claims more bytes than `buf` holds, or
    /// - the type tag is not one of the four known values.
    ///
    /// Bytes past `HEADER_LEN + length` are ignored.  The checksum is **not**
    /// checked here; call [`Packet::verify`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TooShort { len: buf.len() });
        }

        let kind = read_u32(buf, OFF_TYPE);
        let seq = read_u32(buf, OFF_SEQ);
        let length = read_u32(buf, OFF_LENGTH);
        let checksum = read_u32(buf, OFF_CHECKSUM);

        let available = buf.len() - HEADER_LEN;
        if length as usize > available {
            return Err(PacketError::LengthMismatch {
                declared: length,
                available,
            });
        }

        Ok(Packet {
            header: Header {
                kind: PacketType::try_from(kind)?,
                seq,
                length,
                checksum,
            },
            payload: buf[HEADER_LEN..HEADER_LEN + length as usize].to_vec(),
        })
    }

    /// Recompute the checksum with the stored one zeroed and compare.
    pub fn verify(&self) -> bool {
        compute_checksum(&self.header, &self.payload) == self.header.checksum
    }

    /// `true` for a checksum-valid packet of type `kind` carrying `seq`.
    pub fn is(&self, kind: PacketType, seq: u32) -> bool {
        self.header.kind == kind && self.header.seq == seq && self.verify()
    }
}

/// CRC-32 over `header` (with its checksum field treated as zero) followed by
/// `payload`.
pub fn compute_checksum(header: &Header, payload: &[u8]) -> u32 {
    let zeroed = Header {
        checksum: 0,
        ..*header
    };
    let mut digest = CRC32.digest();
    digest.update(&zeroed.to_bytes());
    digest.update(payload);
    digest.finalize()
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("datagram of {len} bytes is shorter than the 16-byte header")]
    TooShort { len: usize },
    #[error("length field claims {declared} payload bytes but only {available} are present")]
    LengthMismatch { declared: u32, available: usize },
    #[error("unknown packet type {0}")]
    UnknownType(u32),
}
