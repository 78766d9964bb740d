//! Fixed-size container superblock at offset 0.
//!
//! ```text
//! 0   magic            4   ".nbx"
//! 4   format_version   4   u32 LE
//! 8   container_uuid  16
//! 24  index_offset     8   u64 LE
//! 32  index_size       8   u64 LE
//! 40  flags            4   u32 LE
//! 44  dataset_count    4   u32 LE
//! 48  reserved        12   zero
//! 60  header_crc32     4   CRC32 of bytes 0..60
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;
use uuid::Uuid;

pub const MAGIC: &[u8; 4] = b".nbx";
pub const FORMAT_VERSION: u32 = 1;
pub const SUPERBLOCK_SIZE: usize = 64;

const CRC_OFFSET: usize = SUPERBLOCK_SIZE - 4;

#[derive(Error, Debug)]
pub enum SuperblockError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),
    #[error("Superblock checksum mismatch")]
    Checksum,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct Superblock {
    pub format_version: u32,
    pub container_uuid: Uuid,
    pub index_offset:   u64,
    pub index_size:     u64,
    pub flags:          u32,
    pub dataset_count:  u32,
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

impl Superblock {
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            container_uuid: Uuid::new_v4(),
            index_offset:   0,
            index_size:     0,
            flags:          0,
            dataset_count:  0,
        }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_SIZE);
        buf.write_all(MAGIC)?;
        buf.write_u32::<LittleEndian>(self.format_version)?;
        buf.write_all(self.container_uuid.as_bytes())?;
        buf.write_u64::<LittleEndian>(self.index_offset)?;
        buf.write_u64::<LittleEndian>(self.index_size)?;
        buf.write_u32::<LittleEndian>(self.flags)?;
        buf.write_u32::<LittleEndian>(self.dataset_count)?;
        buf.resize(CRC_OFFSET, 0);
        let crc = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(crc)?;
        writer.write_all(&buf)
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, SuperblockError> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        reader.read_exact(&mut buf)?;
        if &buf[..4] != MAGIC {
            return Err(SuperblockError::InvalidMagic);
        }

        let mut cur = Cursor::new(&buf[4..]);
        let format_version = cur.read_u32::<LittleEndian>()?;
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let stored_crc = (&buf[CRC_OFFSET..]).read_u32::<LittleEndian>()?;
        if crc32fast::hash(&buf[..CRC_OFFSET]) != stored_crc {
            return Err(SuperblockError::Checksum);
        }

        let mut uuid_bytes = [0u8; 16];
        cur.read_exact(&mut uuid_bytes)?;
        Ok(Self {
            format_version,
            container_uuid: Uuid::from_bytes(uuid_bytes),
            index_offset:   cur.read_u64::<LittleEndian>()?,
            index_size:     cur.read_u64::<LittleEndian>()?,
            flags:          cur.read_u32::<LittleEndian>()?,
            dataset_count:  cur.read_u32::<LittleEndian>()?,
        })
    }
}
