//! Self-describing blocks: one per dataset, plus the trailing INDEX block.
//!
//! ```text
//! 0   magic          4   "DSET" (u32 LE 0x54455344)
//! 4   kind           1   1 = dataset, 2 = index
//! 5   disk_tag       1   DiskTag code (0 for index blocks)
//! 6   rank           1   0 (index), 1 or 2
//! 7   codec          1   CodecId
//! 8   extents        16  2 × u64 LE, unused dimensions are 0
//! 24  orig_size      8   uncompressed payload bytes
//! 32  comp_size      8   payload bytes that follow the header
//! 40  payload_crc32  4   CRC32 of the stored (compressed) payload
//! 44  header_crc32   4   CRC32 of bytes 0..44
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::codec::{get_codec, get_codec_by_id, CodecError, CodecId};
use crate::dtype::DiskTag;

pub const BLOCK_MAGIC: u32 = 0x5445_5344;
pub const BLOCK_HEADER_SIZE: usize = 48;
pub const MAX_RANK: usize = 2;

const HEADER_CRC_OFFSET: usize = BLOCK_HEADER_SIZE - 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Dataset,
    Index,
}

impl BlockKind {
    fn code(self) -> u8 {
        match self {
            BlockKind::Dataset => 1,
            BlockKind::Index   => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(BlockKind::Dataset),
            2 => Some(BlockKind::Index),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub kind:          BlockKind,
    pub disk_tag:      Option<DiskTag>,
    pub rank:          u8,
    pub codec:         u8,
    pub extents:       [u64; MAX_RANK],
    pub orig_size:     u64,
    pub comp_size:     u64,
    pub payload_crc32: u32,
}

impl BlockHeader {
    /// Extents of the used dimensions only.
    pub fn shape(&self) -> Vec<u64> {
        self.extents[..usize::from(self.rank).min(MAX_RANK)].to_vec()
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE);
        buf.write_u32::<LittleEndian>(BLOCK_MAGIC)?;
        buf.write_u8(self.kind.code())?;
        buf.write_u8(self.disk_tag.map_or(0, DiskTag::code))?;
        buf.write_u8(self.rank)?;
        buf.write_u8(self.codec)?;
        for e in self.extents {
            buf.write_u64::<LittleEndian>(e)?;
        }
        buf.write_u64::<LittleEndian>(self.orig_size)?;
        buf.write_u64::<LittleEndian>(self.comp_size)?;
        buf.write_u32::<LittleEndian>(self.payload_crc32)?;
        let crc = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(crc)?;
        writer.write_all(&buf)
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        reader.read_exact(&mut buf)?;

        let stored_crc = (&buf[HEADER_CRC_OFFSET..]).read_u32::<LittleEndian>()?;
        if crc32fast::hash(&buf[..HEADER_CRC_OFFSET]) != stored_crc {
            return Err(invalid("block header checksum mismatch"));
        }

        let mut cur = Cursor::new(&buf[..]);
        if cur.read_u32::<LittleEndian>()? != BLOCK_MAGIC {
            return Err(invalid("bad block magic"));
        }
        let kind = BlockKind::from_code(cur.read_u8()?)
            .ok_or_else(|| invalid("unknown block kind"))?;
        let tag_code = cur.read_u8()?;
        let disk_tag = match (kind, tag_code) {
            (BlockKind::Index, _) => None,
            (BlockKind::Dataset, code) => {
                Some(DiskTag::from_code(code).ok_or_else(|| invalid("unknown disk tag"))?)
            }
        };
        let rank = cur.read_u8()?;
        if usize::from(rank) > MAX_RANK {
            return Err(invalid("block rank exceeds 2"));
        }
        let codec = cur.read_u8()?;
        let mut extents = [0u64; MAX_RANK];
        for e in extents.iter_mut() {
            *e = cur.read_u64::<LittleEndian>()?;
        }
        Ok(Self {
            kind,
            disk_tag,
            rank,
            codec,
            extents,
            orig_size:     cur.read_u64::<LittleEndian>()?,
            comp_size:     cur.read_u64::<LittleEndian>()?,
            payload_crc32: cur.read_u32::<LittleEndian>()?,
        })
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_owned())
}

/// Compress `data` and build the header that describes it.
pub fn encode_block(
    kind:     BlockKind,
    disk_tag: Option<DiskTag>,
    shape:    &[u64],
    data:     &[u8],
    codec_id: CodecId,
    level:    i32,
) -> Result<(BlockHeader, Vec<u8>), CodecError> {
    if shape.len() > MAX_RANK {
        return Err(CodecError::Compression(format!("rank {} exceeds {MAX_RANK}", shape.len())));
    }
    let mut extents = [0u64; MAX_RANK];
    extents[..shape.len()].copy_from_slice(shape);

    let payload = get_codec(codec_id).compress(data, level)?;
    let header = BlockHeader {
        kind,
        disk_tag,
        rank:          shape.len() as u8,
        codec:         codec_id.id(),
        extents,
        orig_size:     data.len() as u64,
        comp_size:     payload.len() as u64,
        payload_crc32: crc32fast::hash(&payload),
    };
    Ok((header, payload))
}

/// Verify and decompress a block payload.
pub fn decode_block(header: &BlockHeader, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if crc32fast::hash(payload) != header.payload_crc32 {
        return Err(CodecError::Decompression("Checksum mismatch".to_string()));
    }
    let data = get_codec_by_id(header.codec)?.decompress(payload)?;
    if data.len() as u64 != header.orig_size {
        return Err(CodecError::Decompression(format!(
            "decoded {} bytes, header declares {}",
            data.len(),
            header.orig_size
        )));
    }
    Ok(data)
}
