use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("unexpected end of stream at offset {0}")]
    EndOfStream(u64),
    #[error("string length {0} does not fit in a u16 prefix")]
    StringTooLong(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Little-endian reader over a borrowed byte buffer.
///
/// All of the file formats in this crate are little-endian and rely on
/// absolute seeking to honor their size-prefix tables, so the reader exposes
/// `tell`/`seek` alongside the primitive reads.
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn tell(&self) -> u64 {
        self.cursor.position()
    }

    pub fn seek(&mut self, pos: u64) {
        self.cursor.set_position(pos);
    }

    pub fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.tell())
    }

    fn eof(&self) -> StreamError {
        StreamError::EndOfStream(self.tell())
    }

    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        self.cursor.read_u8().map_err(|_| self.eof())
    }

    pub fn read_u16(&mut self) -> Result<u16, StreamError> {
        self.cursor.read_u16::<LE>().map_err(|_| self.eof())
    }

    pub fn read_u32(&mut self) -> Result<u32, StreamError> {
        self.cursor.read_u32::<LE>().map_err(|_| self.eof())
    }

    pub fn read_u64(&mut self) -> Result<u64, StreamError> {
        self.cursor.read_u64::<LE>().map_err(|_| self.eof())
    }

    pub fn read_i8(&mut self) -> Result<i8, StreamError> {
        self.cursor.read_i8().map_err(|_| self.eof())
    }

    pub fn read_i16(&mut self) -> Result<i16, StreamError> {
        self.cursor.read_i16::<LE>().map_err(|_| self.eof())
    }

    pub fn read_i32(&mut self) -> Result<i32, StreamError> {
        self.cursor.read_i32::<LE>().map_err(|_| self.eof())
    }

    pub fn read_i64(&mut self) -> Result<i64, StreamError> {
        self.cursor.read_i64::<LE>().map_err(|_| self.eof())
    }

    pub fn read_f32(&mut self) -> Result<f32, StreamError> {
        self.cursor.read_f32::<LE>().map_err(|_| self.eof())
    }

    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
        let mut buf = vec![0u8; len];
        self.cursor.read_exact(&mut buf).map_err(|_| self.eof())?;
        Ok(buf)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let mut buf = [0u8; N];
        self.cursor.read_exact(&mut buf).map_err(|_| self.eof())?;
        Ok(buf)
    }

    /// Length-prefixed UTF-8 string with a u16 length.
    pub fn read_str_u16(&mut self) -> Result<String, StreamError> {
        let len = self.read_u16()? as usize;
        let buf = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Fixed-size ASCII field, truncated at the first NUL.
    pub fn read_str_padded(&mut self, len: usize) -> Result<String, StreamError> {
        let buf = self.read_bytes(len)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    /// NUL-terminated string read byte by byte.
    pub fn read_str_nul(&mut self) -> Result<String, StreamError> {
        let mut buf = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
            buf.push(b);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn read_vec2(&mut self) -> Result<[f32; 2], StreamError> {
        Ok([self.read_f32()?, self.read_f32()?])
    }

    pub fn read_vec3(&mut self) -> Result<[f32; 3], StreamError> {
        Ok([self.read_f32()?, self.read_f32()?, self.read_f32()?])
    }

    pub fn read_vec4(&mut self) -> Result<[f32; 4], StreamError> {
        Ok([
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ])
    }

    pub fn read_mtx44(&mut self) -> Result<[f32; 16], StreamError> {
        let mut m = [0.0; 16];
        for v in m.iter_mut() {
            *v = self.read_f32()?;
        }
        Ok(m)
    }

    pub fn read_rgba(&mut self) -> Result<[u8; 4], StreamError> {
        self.read_array::<4>()
    }

    /// Skip `n` bytes; fails rather than running past the end.
    pub fn pad(&mut self, n: u64) -> Result<(), StreamError> {
        if self.remaining() < n {
            return Err(self.eof());
        }
        let pos = self.tell();
        self.seek(pos + n);
        Ok(())
    }
}

/// Little-endian writer over a growable byte buffer.
///
/// Size-prefixed containers reserve a u32, emit their payload and patch the
/// prefix afterwards via `tell` + `patch_u32_at`.
pub struct ByteWriter {
    cursor: Cursor<Vec<u8>>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self {
            cursor: Cursor::new(Vec::new()),
        }
    }

    pub fn tell(&self) -> u64 {
        self.cursor.position()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.cursor.into_inner()
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), StreamError> {
        self.cursor.write_u8(v)?;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), StreamError> {
        self.cursor.write_u16::<LE>(v)?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), StreamError> {
        self.cursor.write_u32::<LE>(v)?;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), StreamError> {
        self.cursor.write_u64::<LE>(v)?;
        Ok(())
    }

    pub fn write_i8(&mut self, v: i8) -> Result<(), StreamError> {
        self.cursor.write_i8(v)?;
        Ok(())
    }

    pub fn write_i16(&mut self, v: i16) -> Result<(), StreamError> {
        self.cursor.write_i16::<LE>(v)?;
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), StreamError> {
        self.cursor.write_i32::<LE>(v)?;
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), StreamError> {
        self.cursor.write_i64::<LE>(v)?;
        Ok(())
    }

    pub fn write_f32(&mut self, v: f32) -> Result<(), StreamError> {
        self.cursor.write_f32::<LE>(v)?;
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), StreamError> {
        self.write_u8(if v { 1 } else { 0 })
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> Result<(), StreamError> {
        self.cursor.write_all(v)?;
        Ok(())
    }

    pub fn write_str_u16(&mut self, v: &str) -> Result<(), StreamError> {
        if v.len() > u16::MAX as usize {
            return Err(StreamError::StringTooLong(v.len()));
        }
        self.write_u16(v.len() as u16)?;
        self.write_bytes(v.as_bytes())
    }

    /// Fixed-size ASCII field, NUL-padded; over-long input is truncated.
    pub fn write_str_padded(&mut self, v: &str, len: usize) -> Result<(), StreamError> {
        let bytes = v.as_bytes();
        let n = bytes.len().min(len);
        self.write_bytes(&bytes[..n])?;
        for _ in n..len {
            self.write_u8(0)?;
        }
        Ok(())
    }

    pub fn write_vec2(&mut self, v: [f32; 2]) -> Result<(), StreamError> {
        for x in v {
            self.write_f32(x)?;
        }
        Ok(())
    }

    pub fn write_vec3(&mut self, v: [f32; 3]) -> Result<(), StreamError> {
        for x in v {
            self.write_f32(x)?;
        }
        Ok(())
    }

    pub fn write_vec4(&mut self, v: [f32; 4]) -> Result<(), StreamError> {
        for x in v {
            self.write_f32(x)?;
        }
        Ok(())
    }

    pub fn write_mtx44(&mut self, v: [f32; 16]) -> Result<(), StreamError> {
        for x in v {
            self.write_f32(x)?;
        }
        Ok(())
    }

    pub fn write_rgba(&mut self, v: [u8; 4]) -> Result<(), StreamError> {
        self.write_bytes(&v)
    }

    /// Advance `n` bytes, zero-filling the buffer as needed.
    pub fn pad(&mut self, n: u64) -> Result<(), StreamError> {
        let new_pos = self.tell() + n;
        if new_pos > self.cursor.get_ref().len() as u64 {
            self.cursor.get_mut().resize(new_pos as usize, 0);
        }
        self.cursor.set_position(new_pos);
        Ok(())
    }

    /// Patch a previously reserved u32 without disturbing the write position.
    pub fn patch_u32_at(&mut self, pos: u64, v: u32) -> Result<(), StreamError> {
        let current = self.tell();
        self.cursor.seek(SeekFrom::Start(pos))?;
        self.write_u32(v)?;
        self.cursor.seek(SeekFrom::Start(current))?;
        Ok(())
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trip() {
        let mut w = ByteWriter::new();
        w.write_u8(0xAB).unwrap();
        w.write_u16(0x1234).unwrap();
        w.write_u32(0xDEADBEEF).unwrap();
        w.write_u64(0x0123456789ABCDEF).unwrap();
        w.write_i32(-7).unwrap();
        w.write_f32(1.5).unwrap();
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.read_u64().unwrap(), 0x0123456789ABCDEF);
        assert_eq!(r.read_i32().unwrap(), -7);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn read_past_end_fails() {
        let mut r = ByteReader::new(&[0x01]);
        assert_eq!(r.read_u8().unwrap(), 1);
        assert!(matches!(r.read_u32(), Err(StreamError::EndOfStream(_))));
    }

    #[test]
    fn string_forms() {
        let mut w = ByteWriter::new();
        w.write_str_u16("hello").unwrap();
        w.write_str_padded("mat", 8).unwrap();
        w.write_bytes(b"joint\0").unwrap();
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_str_u16().unwrap(), "hello");
        assert_eq!(r.read_str_padded(8).unwrap(), "mat");
        assert_eq!(r.read_str_nul().unwrap(), "joint");
    }

    #[test]
    fn empty_and_max_strings() {
        let mut w = ByteWriter::new();
        w.write_str_u16("").unwrap();
        let long = "x".repeat(u16::MAX as usize);
        w.write_str_u16(&long).unwrap();
        let over = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            w.write_str_u16(&over),
            Err(StreamError::StringTooLong(_))
        ));

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_str_u16().unwrap(), "");
        assert_eq!(r.read_str_u16().unwrap(), long);
    }

    #[test]
    fn pad_and_patch() {
        let mut w = ByteWriter::new();
        let size_pos = w.tell();
        w.write_u32(0).unwrap();
        w.pad(4).unwrap();
        w.write_u32(7).unwrap();
        w.patch_u32_at(size_pos, 8).unwrap();
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u32().unwrap(), 8);
        r.pad(4).unwrap();
        assert_eq!(r.read_u32().unwrap(), 7);
        assert!(r.pad(1).is_err());
    }
}
