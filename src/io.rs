use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
};

use crate::{error::ShoalError, types::ShoalResult};

/// Thin wrapper over a database file. All offsets are absolute byte
/// positions; the page math lives in the disk module.
pub struct ShoalFile {
    file: File,
}

impl ShoalFile {
    pub fn open<P: AsRef<Path>>(file_path: P) -> Result<Self, ShoalError> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(file_path)?;

        Ok(Self { file })
    }

    pub fn read_at(&mut self, pos: u64, len: usize) -> Result<Vec<u8>, ShoalError> {
        self.file.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; len];
        self.file
            .read_exact(&mut buf)
            .or_else(|e| Err(ShoalError::io(&e.to_string())))?;
        Ok(buf)
    }

    pub fn write_at(&mut self, pos: u64, buf: &[u8]) -> ShoalResult {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    pub fn get_size(&self) -> Result<u64, ShoalError> {
        let metadata = self.file.metadata()?;
        Ok(metadata.len())
    }

    pub fn set_len(&self, len: u64) -> ShoalResult {
        self.file.set_len(len)?;
        Ok(())
    }

    pub fn flush(&mut self) -> ShoalResult {
        self.file.sync_data()?;
        Ok(())
    }
}

pub fn read_into<T: Decodeable, R: std::io::Read>(reader: &mut R) -> T {
    T::decode_from(reader)
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .expect(&format!("io error, expect {}", bytes_count));
    buffer
}

pub struct ShoalWriter {
    buf: Vec<u8>,
}

impl ShoalWriter {
    pub fn new() -> Self {
        let buf = Vec::new();
        Self { buf }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }
}

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self;
}

/// # Format
///
/// - 1 byte (0 for false, 1 for true)
impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        u8::decode_from(reader) == 1
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_le_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, isize, usize, f32, f64);
