//! # Message
//!
//! The wire unit exchanged between two endpoints: a fixed 28-byte header
//! followed by a body of exactly `header.size` bytes. Everything above this
//! layer (calls, replies, events, directory RPCs) is just an opinion about
//! what goes in the body.

use byteorder::{ByteOrder, LittleEndian};

use crate::buffer::Buffer;
use crate::error::{Error, Result};

/// Magic value every header must start with. Chosen to be unlikely to occur
/// by chance at the start of unrelated data, so framing recovery can scan for it.
pub const MAGIC: u32 = 0x42dead42;

/// Size of the on-wire header in bytes.
pub const HEADER_SIZE: usize = 28;

/// Only protocol version this implementation speaks.
pub const VERSION: u16 = 0;

/// The directory is always reachable as service id 1.
pub const SERVICE_DIRECTORY: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    None = 0,
    Call = 1,
    Reply = 2,
    Event = 3,
    Error = 4,
}

impl MessageType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageType::None),
            1 => Some(MessageType::Call),
            2 => Some(MessageType::Reply),
            3 => Some(MessageType::Event),
            4 => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// Fixed 28-byte header, little-endian on the wire.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub magic: u32,
    pub id: u32,
    pub size: u32,
    pub version: u16,
    pub kind: MessageType,
    pub service: u32,
    pub path: u32,
    pub function: u32,
}

impl MessageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut out[0..4], self.magic);
        LittleEndian::write_u32(&mut out[4..8], self.id);
        LittleEndian::write_u32(&mut out[8..12], self.size);
        LittleEndian::write_u16(&mut out[12..14], self.version);
        out[14] = self.kind as u8;
        out[15] = 0; // reserved
        LittleEndian::write_u32(&mut out[16..20], self.service);
        LittleEndian::write_u32(&mut out[20..24], self.path);
        LittleEndian::write_u32(&mut out[24..28], self.function);
        out
    }

    /// Parse a header out of exactly `HEADER_SIZE` bytes. The caller is
    /// responsible for having already located the magic at `bytes[0..4]`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::ProtocolCorrupt);
        }
        let magic = LittleEndian::read_u32(&bytes[0..4]);
        if magic != MAGIC {
            return Err(Error::ProtocolCorrupt);
        }
        let id = LittleEndian::read_u32(&bytes[4..8]);
        let size = LittleEndian::read_u32(&bytes[8..12]);
        let version = LittleEndian::read_u16(&bytes[12..14]);
        let kind = MessageType::from_u8(bytes[14]).ok_or(Error::ProtocolCorrupt)?;
        let service = LittleEndian::read_u32(&bytes[16..20]);
        let path = LittleEndian::read_u32(&bytes[20..24]);
        let function = LittleEndian::read_u32(&bytes[24..28]);
        let header = Self {
            magic,
            id,
            size,
            version,
            kind,
            service,
            path,
            function,
        };
        if header.version != VERSION {
            return Err(Error::ProtocolCorrupt);
        }
        if header.kind == MessageType::Event && header.id != 0 {
            return Err(Error::ProtocolCorrupt);
        }
        Ok(header)
    }
}

/// A complete message: header plus a body whose length matches `header.size`.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: MessageHeader,
    pub body: Buffer,
}

impl Message {
    pub fn call(id: u32, service: u32, path: u32, function: u32, body: Buffer) -> Self {
        Self::new(MessageType::Call, id, service, path, function, body)
    }

    pub fn reply(id: u32, service: u32, path: u32, function: u32, body: Buffer) -> Self {
        Self::new(MessageType::Reply, id, service, path, function, body)
    }

    pub fn error(id: u32, service: u32, path: u32, function: u32, body: Buffer) -> Self {
        Self::new(MessageType::Error, id, service, path, function, body)
    }

    /// Events never carry a correlation id: they are not replied to.
    pub fn event(service: u32, path: u32, function: u32, body: Buffer) -> Self {
        Self::new(MessageType::Event, 0, service, path, function, body)
    }

    fn new(kind: MessageType, id: u32, service: u32, path: u32, function: u32, body: Buffer) -> Self {
        Self {
            header: MessageHeader {
                magic: MAGIC,
                id,
                size: body.len() as u32,
                version: VERSION,
                kind,
                service,
                path,
                function,
            },
            body,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.header.magic == MAGIC
            && self.header.size as usize == self.body.len()
            && self.header.version == VERSION
            && !(self.header.kind == MessageType::Event && self.header.id != 0)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(self.body.as_slice());
        out
    }
}
