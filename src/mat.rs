//! Channelled matrix: rows × cols cells, each cell holding 1..N interleaved
//! channel values of one depth.
//!
//! Type codes follow the widespread image-matrix convention
//! `code = depth + ((channels - 1) << 3)` with depths
//! `U8=0, I8=1, U16=2, I16=3, I32=4, F32=5, F64=6`.  These codes are what a
//! store writes to `<path>_type`, so they must not change.

use crate::dtype::{DiskTag, Element, ElementKind, OnDiskEncoding};
use crate::error::{Result, StoreError};

/// Largest channel count a store accepts for matrices.
pub const MAX_CHANNELS: u16 = 4;
/// Largest channel count a type code can express.
pub const CODE_MAX_CHANNELS: u16 = 512;

const DEPTH_BITS: i32 = 3;
const DEPTH_MASK: i32 = (1 << DEPTH_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Depth {
    U8,
    I8,
    U16,
    I16,
    I32,
    F32,
    F64,
}

impl Depth {
    pub fn code(self) -> i32 {
        match self {
            Depth::U8  => 0,
            Depth::I8  => 1,
            Depth::U16 => 2,
            Depth::I16 => 3,
            Depth::I32 => 4,
            Depth::F32 => 5,
            Depth::F64 => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Depth::U8),
            1 => Some(Depth::I8),
            2 => Some(Depth::U16),
            3 => Some(Depth::I16),
            4 => Some(Depth::I32),
            5 => Some(Depth::F32),
            6 => Some(Depth::F64),
            _ => None,
        }
    }

    pub fn kind(self) -> ElementKind {
        match self {
            Depth::U8  => ElementKind::UInt8,
            Depth::I8  => ElementKind::Int8,
            Depth::U16 => ElementKind::UInt16,
            Depth::I16 => ElementKind::Int16,
            Depth::I32 => ElementKind::Int32,
            Depth::F32 => ElementKind::Float32,
            Depth::F64 => ElementKind::Float64,
        }
    }

    pub fn from_kind(kind: ElementKind) -> Option<Self> {
        match kind {
            ElementKind::UInt8   => Some(Depth::U8),
            ElementKind::Int8    => Some(Depth::I8),
            ElementKind::UInt16  => Some(Depth::U16),
            ElementKind::Int16   => Some(Depth::I16),
            ElementKind::Int32   => Some(Depth::I32),
            ElementKind::Float32 => Some(Depth::F32),
            ElementKind::Float64 => Some(Depth::F64),
            ElementKind::Int64 | ElementKind::UInt32 | ElementKind::UInt64 => None,
        }
    }

    pub fn size(self) -> usize {
        self.kind().size()
    }

    /// Matrix encoding table.  Unlike slot shapes, matrices keep their native
    /// width on disk.
    pub fn encoding(self) -> OnDiskEncoding {
        let disk = match self {
            Depth::U8  => DiskTag::U8Le,
            Depth::I8  => DiskTag::I8Le,
            Depth::U16 => DiskTag::U16Le,
            Depth::I16 => DiskTag::I16Le,
            Depth::I32 => DiskTag::I32Le,
            Depth::F32 => DiskTag::F32Le,
            Depth::F64 => DiskTag::F64Le,
        };
        OnDiskEncoding { kind: self.kind(), disk }
    }
}

/// Depth plus channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatType {
    pub depth:    Depth,
    pub channels: u16,
}

impl MatType {
    pub fn new(depth: Depth, channels: u16) -> Self {
        Self { depth, channels }
    }

    /// Packed element+channel tag.
    pub fn code(self) -> i32 {
        self.depth.code() + ((i32::from(self.channels) - 1) << DEPTH_BITS)
    }

    /// Decode a packed tag.  `None` for negative codes and unknown depths.
    pub fn from_code(code: i32) -> Option<Self> {
        if code < 0 {
            return None;
        }
        let depth = Depth::from_code(code & DEPTH_MASK)?;
        let channels = u16::try_from((code >> DEPTH_BITS) + 1).ok()?;
        if channels > CODE_MAX_CHANNELS {
            return None;
        }
        Some(Self { depth, channels })
    }

    /// Bytes per cell.
    pub fn cell_size(self) -> usize {
        self.depth.size() * usize::from(self.channels)
    }
}

/// Dense row-major matrix with interleaved channels.  `data` holds
/// little-endian native values, `rows * cols * channels` of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Mat {
    rows: usize,
    cols: usize,
    typ:  MatType,
    data: Vec<u8>,
}

impl Default for Mat {
    fn default() -> Self {
        Self { rows: 0, cols: 0, typ: MatType::new(Depth::U8, 1), data: Vec::new() }
    }
}

impl Mat {
    /// Zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize, typ: MatType) -> Self {
        Self { rows, cols, typ, data: vec![0u8; rows * cols * typ.cell_size()] }
    }

    /// Build from interleaved values: `values[(r * cols + c) * channels + ch]`.
    pub fn from_values<T: Element>(
        rows:     usize,
        cols:     usize,
        channels: u16,
        values:   &[T],
    ) -> Result<Self> {
        let depth = Depth::from_kind(T::KIND).ok_or_else(|| {
            StoreError::UnsupportedType(format!("no matrix depth for {} elements", T::KIND))
        })?;
        if channels == 0 || channels > CODE_MAX_CHANNELS {
            return Err(StoreError::UnsupportedType(format!("{channels} matrix channels")));
        }
        let expected = rows * cols * usize::from(channels);
        if values.len() != expected {
            return Err(StoreError::mismatch(
                "<matrix>",
                format!("{expected} values for {rows}x{cols}x{channels}"),
                format!("{} values", values.len()),
            ));
        }
        let mut data = Vec::with_capacity(expected * T::KIND.size());
        for v in values {
            v.put(&mut data);
        }
        Ok(Self { rows, cols, typ: MatType::new(depth, channels), data })
    }

    /// Adopt a raw native buffer.
    pub fn from_raw(rows: usize, cols: usize, typ: MatType, data: Vec<u8>) -> Result<Self> {
        let expected = rows * cols * typ.cell_size();
        if data.len() != expected {
            return Err(StoreError::mismatch(
                "<matrix>",
                format!("{expected} bytes"),
                format!("{} bytes", data.len()),
            ));
        }
        Ok(Self { rows, cols, typ, data })
    }

    pub fn rows(&self) -> usize { self.rows }
    pub fn cols(&self) -> usize { self.cols }
    pub fn channels(&self) -> u16 { self.typ.channels }
    pub fn depth(&self) -> Depth { self.typ.depth }
    pub fn mat_type(&self) -> MatType { self.typ }
    pub fn data(&self) -> &[u8] { &self.data }

    fn offset_of<T: Element>(&self, row: usize, col: usize, ch: u16) -> Option<usize> {
        if T::KIND != self.typ.depth.kind()
            || row >= self.rows
            || col >= self.cols
            || ch >= self.typ.channels
        {
            return None;
        }
        let idx = (row * self.cols + col) * usize::from(self.typ.channels) + usize::from(ch);
        Some(idx * T::KIND.size())
    }

    /// Value at `(row, col, ch)`; `None` when out of range or `T` is not the
    /// matrix depth.
    pub fn at<T: Element>(&self, row: usize, col: usize, ch: u16) -> Option<T> {
        self.offset_of::<T>(row, col, ch).map(|off| T::get(&self.data[off..]))
    }

    /// Overwrite one value.  Returns `false` when out of range or `T` is not
    /// the matrix depth.
    pub fn set<T: Element>(&mut self, row: usize, col: usize, ch: u16, value: T) -> bool {
        let Some(off) = self.offset_of::<T>(row, col, ch) else { return false };
        let mut bytes = Vec::with_capacity(T::KIND.size());
        value.put(&mut bytes);
        self.data[off..off + bytes.len()].copy_from_slice(&bytes);
        true
    }

    /// All values, interleaved; `None` if `T` is not the matrix depth.
    pub fn to_values<T: Element>(&self) -> Option<Vec<T>> {
        if T::KIND != self.typ.depth.kind() {
            return None;
        }
        Some(self.data.chunks_exact(T::KIND.size()).map(T::get).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_match_the_packed_convention() {
        assert_eq!(MatType::new(Depth::U8, 1).code(), 0);
        assert_eq!(MatType::new(Depth::U8, 3).code(), 16);
        assert_eq!(MatType::new(Depth::F32, 1).code(), 5);
        assert_eq!(MatType::new(Depth::F64, 4).code(), 30);
        assert_eq!(MatType::new(Depth::I16, 2).code(), 11);
    }

    #[test]
    fn codes_decode_back() {
        for depth in [Depth::U8, Depth::I8, Depth::U16, Depth::I16, Depth::I32, Depth::F32, Depth::F64] {
            for channels in 1..=4 {
                let t = MatType::new(depth, channels);
                assert_eq!(MatType::from_code(t.code()), Some(t));
            }
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(MatType::from_code(7), None);   // half-float depth
        assert_eq!(MatType::from_code(-1), None);
        assert_eq!(MatType::from_code(15), None);
    }

    #[test]
    fn values_are_interleaved_per_cell() {
        let vals: Vec<u8> = (0..12).collect();
        let m = Mat::from_values(2, 2, 3, &vals).unwrap();
        assert_eq!(m.at::<u8>(0, 1, 0), Some(3));
        assert_eq!(m.at::<u8>(1, 1, 2), Some(11));
        assert_eq!(m.at::<u8>(2, 0, 0), None);
        assert_eq!(m.at::<i8>(0, 0, 0), None);
    }

    #[test]
    fn set_and_read_back() {
        let mut m = Mat::zeros(2, 3, MatType::new(Depth::F32, 2));
        assert!(m.set(1, 2, 1, 4.25f32));
        assert!(!m.set(1, 2, 2, 1.0f32));
        assert_eq!(m.at::<f32>(1, 2, 1), Some(4.25));
        assert_eq!(m.to_values::<f32>().unwrap().len(), 12);
    }

    #[test]
    fn wide_integers_have_no_depth() {
        let err = Mat::from_values(1, 1, 1, &[1i64]).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedType(_)));
    }

    #[test]
    fn value_count_must_match_geometry() {
        let err = Mat::from_values(2, 2, 1, &[1u8, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));
    }
}
