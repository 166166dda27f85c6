//! Minimal little-endian encode/decode primitives shared by every
//! request/response payload. The wire protocol is bespoke (not
//! serde/bincode) per spec.md §6: payloads are length-prefixed so a
//! malformed frame is rejected without reading the wrong byte count.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ivf_error::EngineError;
use std::io::{Cursor, Read};

#[derive(Default)]
pub struct Writer(Vec<u8>);

impl Writer {
    pub fn new() -> Self {
        Writer(Vec::new())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.write_u16::<LittleEndian>(v).unwrap();
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.write_u32::<LittleEndian>(v).unwrap();
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.write_u64::<LittleEndian>(v).unwrap();
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.0.write_f32::<LittleEndian>(v).unwrap();
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.u32(v.len() as u32);
        self.0.extend_from_slice(v);
        self
    }

    pub fn u32_vec(&mut self, v: &[u32]) -> &mut Self {
        self.u32(v.len() as u32);
        for &x in v {
            self.u32(x);
        }
        self
    }

    pub fn f32_vec(&mut self, v: &[f32]) -> &mut Self {
        self.u32(v.len() as u32);
        for &x in v {
            self.f32(x);
        }
        self
    }
}

pub struct Reader<'a>(Cursor<&'a [u8]>);

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader(Cursor::new(buf))
    }

    fn err(e: impl std::fmt::Display) -> EngineError {
        EngineError::TransportFailure(format!("malformed payload: {e}"))
    }

    pub fn u8(&mut self) -> Result<u8, EngineError> {
        let mut b = [0u8; 1];
        self.0.read_exact(&mut b).map_err(Self::err)?;
        Ok(b[0])
    }

    pub fn u16(&mut self) -> Result<u16, EngineError> {
        self.0.read_u16::<LittleEndian>().map_err(Self::err)
    }

    pub fn u32(&mut self) -> Result<u32, EngineError> {
        self.0.read_u32::<LittleEndian>().map_err(Self::err)
    }

    pub fn u64(&mut self) -> Result<u64, EngineError> {
        self.0.read_u64::<LittleEndian>().map_err(Self::err)
    }

    pub fn f32(&mut self) -> Result<f32, EngineError> {
        self.0.read_f32::<LittleEndian>().map_err(Self::err)
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, EngineError> {
        let len = self.u32()? as usize;
        let mut buf = vec![0u8; len];
        self.0.read_exact(&mut buf).map_err(Self::err)?;
        Ok(buf)
    }

    pub fn u32_vec(&mut self) -> Result<Vec<u32>, EngineError> {
        let len = self.u32()? as usize;
        (0..len).map(|_| self.u32()).collect()
    }

    pub fn f32_vec(&mut self) -> Result<Vec<f32>, EngineError> {
        let len = self.u32()? as usize;
        (0..len).map(|_| self.f32()).collect()
    }

    pub fn remaining(&self) -> usize {
        let pos = self.0.position() as usize;
        self.0.get_ref().len().saturating_sub(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_primitive() {
        let mut w = Writer::new();
        w.u8(7).u16(1000).u32(70000).u64(1 << 40).f32(1.5).bytes(b"hi");
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.u8().unwrap(), 7);
        assert_eq!(r.u16().unwrap(), 1000);
        assert_eq!(r.u32().unwrap(), 70000);
        assert_eq!(r.u64().unwrap(), 1 << 40);
        assert_eq!(r.f32().unwrap(), 1.5);
        assert_eq!(r.bytes().unwrap(), b"hi");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_payload_is_rejected_not_misread() {
        let mut w = Writer::new();
        w.u32(42);
        let mut bytes = w.into_bytes();
        bytes.truncate(2);
        let mut r = Reader::new(&bytes);
        assert!(r.u32().is_err());
    }
}
