//! Payload codecs for dataset and index blocks.
//!
//! # Identity rules
//! Every codec is identified by a one-byte id written into each block header.
//! Ids are frozen: an id is never reused, even if a codec is retired.  A
//! reader that meets an unknown id MUST fail; there is no fallback codec.

use thiserror::Error;

// ── CodecId ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    None,
    Zstd,
    Lz4,
}

impl CodecId {
    /// On-disk id.
    #[inline]
    pub fn id(self) -> u8 {
        match self {
            CodecId::None => 0,
            CodecId::Zstd => 1,
            CodecId::Lz4  => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(CodecId::None),
            1 => Some(CodecId::Zstd),
            2 => Some(CodecId::Lz4),
            _ => None,
        }
    }

    /// Human-readable name; never parsed from disk.
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Zstd => "zstd",
            CodecId::Lz4  => "lz4",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CodecId::None),
            "zstd" => Some(CodecId::Zstd),
            "lz4"  => Some(CodecId::Lz4),
            _      => None,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    /// The block names a codec id this build does not know.  Decoding MUST NOT
    /// continue.
    #[error("Unknown codec id {0}")]
    UnknownCodec(u8),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId { CodecId::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8])        -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz4 }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(data))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None => Box::new(NoneCodec),
        CodecId::Zstd => Box::new(ZstdCodec),
        CodecId::Lz4  => Box::new(Lz4Codec),
    }
}

/// Resolve an on-disk id.  The caller MUST NOT fall back to another codec.
pub fn get_codec_by_id(id: u8) -> Result<Box<dyn Codec>, CodecError> {
    CodecId::from_id(id).map(get_codec).ok_or(CodecError::UnknownCodec(id))
}
