//! # Codec
//!
//! Primitive read/write of typed values into and out of a [`Buffer`], little-endian
//! on the wire. This is the surface the rest of the core needs to encode
//! `ServiceInfo` and directory RPC arguments; walking arbitrary user-defined
//! aggregate types by signature string is an external collaborator and is not
//! implemented here.

use std::collections::HashMap;
use std::hash::Hash;

use byteorder::{ByteOrder, LittleEndian};

use crate::buffer::Buffer;
use crate::error::{Error, Result};

/// Sequential writer over a growing [`Buffer`].
pub struct Writer<'a> {
    buf: &'a mut Buffer,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut Buffer) -> Self {
        Self { buf }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.append(&[value as u8]);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.append(&[value as u8]);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.append(&[value]);
    }

    pub fn write_i16(&mut self, value: i16) {
        let mut tmp = [0u8; 2];
        LittleEndian::write_i16(&mut tmp, value);
        self.buf.append(&tmp);
    }

    pub fn write_u16(&mut self, value: u16) {
        let mut tmp = [0u8; 2];
        LittleEndian::write_u16(&mut tmp, value);
        self.buf.append(&tmp);
    }

    pub fn write_i32(&mut self, value: i32) {
        let mut tmp = [0u8; 4];
        LittleEndian::write_i32(&mut tmp, value);
        self.buf.append(&tmp);
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut tmp = [0u8; 4];
        LittleEndian::write_u32(&mut tmp, value);
        self.buf.append(&tmp);
    }

    pub fn write_i64(&mut self, value: i64) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_i64(&mut tmp, value);
        self.buf.append(&tmp);
    }

    pub fn write_u64(&mut self, value: u64) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_u64(&mut tmp, value);
        self.buf.append(&tmp);
    }

    pub fn write_f32(&mut self, value: f32) {
        let mut tmp = [0u8; 4];
        LittleEndian::write_f32(&mut tmp, value);
        self.buf.append(&tmp);
    }

    pub fn write_f64(&mut self, value: f64) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_f64(&mut tmp, value);
        self.buf.append(&tmp);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.append(value.as_bytes());
    }

    /// Write a sequence of elements, each encoded by `write_elem`.
    pub fn write_seq<T>(&mut self, items: &[T], mut write_elem: impl FnMut(&mut Self, &T)) {
        self.write_u32(items.len() as u32);
        for item in items {
            write_elem(self, item);
        }
    }

    /// Write a K→V mapping as a count followed by key/value pairs, each
    /// encoded by `write_entry`.
    pub fn write_map<K, V>(&mut self, items: &HashMap<K, V>, mut write_entry: impl FnMut(&mut Self, &K, &V)) {
        self.write_u32(items.len() as u32);
        for (key, value) in items {
            write_entry(self, key, value);
        }
    }
}

/// Sequential reader over a byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(Error::ProtocolCorrupt);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::ProtocolCorrupt)
    }

    /// Read a sequence of elements, each decoded by `read_elem`.
    pub fn read_seq<T>(&mut self, mut read_elem: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.read_u32()? as usize;
        let mut out = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            out.push(read_elem(self)?);
        }
        Ok(out)
    }

    /// Read a K→V mapping written by [`Writer::write_map`]; `read_entry`
    /// decodes one key/value pair per call.
    pub fn read_map<K, V>(&mut self, mut read_entry: impl FnMut(&mut Self) -> Result<(K, V)>) -> Result<HashMap<K, V>>
    where
        K: Eq + Hash,
    {
        let count = self.read_u32()? as usize;
        let mut out = HashMap::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let (key, value) = read_entry(self)?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trip() {
        let mut buf = Buffer::new();
        {
            let mut w = Writer::new(&mut buf);
            w.write_bool(true);
            w.write_i8(-12);
            w.write_u8(200);
            w.write_i16(-3000);
            w.write_u16(40000);
            w.write_i32(-70000);
            w.write_u32(4_000_000_000);
            w.write_i64(-1);
            w.write_u64(u64::MAX);
            w.write_f32(1.5);
            w.write_f64(2.25);
            w.write_string("hello");
        }
        let bytes = buf.into_vec();
        let mut r = Reader::new(&bytes);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_i8().unwrap(), -12);
        assert_eq!(r.read_u8().unwrap(), 200);
        assert_eq!(r.read_i16().unwrap(), -3000);
        assert_eq!(r.read_u16().unwrap(), 40000);
        assert_eq!(r.read_i32().unwrap(), -70000);
        assert_eq!(r.read_u32().unwrap(), 4_000_000_000);
        assert_eq!(r.read_i64().unwrap(), -1);
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_f64().unwrap(), 2.25);
        assert_eq!(r.read_string().unwrap(), "hello");
    }

    #[test]
    fn seq_round_trip() {
        let mut buf = Buffer::new();
        {
            let mut w = Writer::new(&mut buf);
            w.write_seq(&[1u32, 2, 3], |w, v| w.write_u32(*v));
        }
        let bytes = buf.into_vec();
        let mut r = Reader::new(&bytes);
        let items = r.read_seq(|r| r.read_u32()).unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn map_round_trip() {
        let mut source = HashMap::new();
        source.insert("a".to_string(), 1u32);
        source.insert("b".to_string(), 2u32);

        let mut buf = Buffer::new();
        Writer::new(&mut buf).write_map(&source, |w, k, v| {
            w.write_string(k);
            w.write_u32(*v);
        });
        let bytes = buf.into_vec();
        let mut r = Reader::new(&bytes);
        let decoded = r
            .read_map(|r| {
                let k = r.read_string()?;
                let v = r.read_u32()?;
                Ok((k, v))
            })
            .unwrap();
        assert_eq!(decoded, source);
    }

    #[test]
    fn truncated_input_is_protocol_corrupt() {
        let mut r = Reader::new(&[1, 2]);
        assert!(matches!(r.read_u32(), Err(Error::ProtocolCorrupt)));
    }

    #[test]
    fn empty_string_round_trips() {
        let mut buf = Buffer::new();
        Writer::new(&mut buf).write_string("");
        let bytes = buf.into_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "");
    }
}
