//! Type-encoding resolver: in-memory element types → on-disk encodings.
//!
//! # Tables
//!
//! Sequences, arrays, points and single values (the "slot" shapes) use a
//! widening table.  Every 32-bit element is tagged on disk with its 64-bit
//! counterpart while the raw transfer still moves the 32-bit native type; the
//! engine widens on write and narrows on read:
//!
//! | In-memory | Disk tag | Native transfer |
//! |-----------|----------|-----------------|
//! | `f64`     | `F64LE`  | `Float64`       |
//! | `f32`     | `F64LE`  | `Float32`       |
//! | `i32`     | `I64LE`  | `Int32`         |
//! | `i64`     | `I64LE`  | `Int64`         |
//! | `u32`     | `U64LE`  | `UInt32`        |
//! | `u64`     | `U64LE`  | `UInt64`        |
//!
//! 8- and 16-bit elements have no slot encoding; they are only stored inside
//! matrices, whose table (see [`crate::mat`]) keeps the native width.
//!
//! # Byte order
//! Disk tags are little-endian.  Staging buffers handed to an engine hold the
//! native transfer type, also little-endian.

use std::fmt;

use crate::error::{Result, StoreError};

// ── ElementKind ──────────────────────────────────────────────────────────────

/// In-memory numeric element type.  Doubles as the native transfer type of a
/// raw read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Int8,
    UInt8,
    Int16,
    UInt16,
}

impl ElementKind {
    /// Byte width of one element.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            ElementKind::Int8  | ElementKind::UInt8  => 1,
            ElementKind::Int16 | ElementKind::UInt16 => 2,
            ElementKind::Int32 | ElementKind::UInt32 | ElementKind::Float32 => 4,
            ElementKind::Int64 | ElementKind::UInt64 | ElementKind::Float64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Int8    => "i8",
            ElementKind::UInt8   => "u8",
            ElementKind::Int16   => "i16",
            ElementKind::UInt16  => "u16",
            ElementKind::Int32   => "i32",
            ElementKind::UInt32  => "u32",
            ElementKind::Int64   => "i64",
            ElementKind::UInt64  => "u64",
            ElementKind::Float32 => "f32",
            ElementKind::Float64 => "f64",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── DiskTag ──────────────────────────────────────────────────────────────────

/// On-disk numeric type identifier.  The `code` is frozen: it is written into
/// every dataset block header and index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskTag {
    I8Le,
    U8Le,
    I16Le,
    U16Le,
    I32Le,
    U32Le,
    I64Le,
    U64Le,
    F32Le,
    F64Le,
}

impl DiskTag {
    pub fn code(self) -> u8 {
        match self {
            DiskTag::I8Le  => 1,
            DiskTag::U8Le  => 2,
            DiskTag::I16Le => 3,
            DiskTag::U16Le => 4,
            DiskTag::I32Le => 5,
            DiskTag::U32Le => 6,
            DiskTag::I64Le => 7,
            DiskTag::U64Le => 8,
            DiskTag::F32Le => 9,
            DiskTag::F64Le => 10,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1  => Some(DiskTag::I8Le),
            2  => Some(DiskTag::U8Le),
            3  => Some(DiskTag::I16Le),
            4  => Some(DiskTag::U16Le),
            5  => Some(DiskTag::I32Le),
            6  => Some(DiskTag::U32Le),
            7  => Some(DiskTag::I64Le),
            8  => Some(DiskTag::U64Le),
            9  => Some(DiskTag::F32Le),
            10 => Some(DiskTag::F64Le),
            _  => None,
        }
    }

    /// The element kind with the same width and representation; used to
    /// decode the stored bytes.
    pub fn kind(self) -> ElementKind {
        match self {
            DiskTag::I8Le  => ElementKind::Int8,
            DiskTag::U8Le  => ElementKind::UInt8,
            DiskTag::I16Le => ElementKind::Int16,
            DiskTag::U16Le => ElementKind::UInt16,
            DiskTag::I32Le => ElementKind::Int32,
            DiskTag::U32Le => ElementKind::UInt32,
            DiskTag::I64Le => ElementKind::Int64,
            DiskTag::U64Le => ElementKind::UInt64,
            DiskTag::F32Le => ElementKind::Float32,
            DiskTag::F64Le => ElementKind::Float64,
        }
    }

    pub fn size(self) -> usize {
        self.kind().size()
    }

    pub fn name(self) -> &'static str {
        match self {
            DiskTag::I8Le  => "I8LE",
            DiskTag::U8Le  => "U8LE",
            DiskTag::I16Le => "I16LE",
            DiskTag::U16Le => "U16LE",
            DiskTag::I32Le => "I32LE",
            DiskTag::U32Le => "U32LE",
            DiskTag::I64Le => "I64LE",
            DiskTag::U64Le => "U64LE",
            DiskTag::F32Le => "F32LE",
            DiskTag::F64Le => "F64LE",
        }
    }
}

impl fmt::Display for DiskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── OnDiskEncoding ───────────────────────────────────────────────────────────

/// A resolved encoding: what is written on disk and what moves through the
/// staging buffer.  `kind` and `disk` may differ in width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnDiskEncoding {
    pub kind: ElementKind,
    pub disk: DiskTag,
}

impl OnDiskEncoding {
    /// Encoding for slot shapes (sequences, arrays, points, single values).
    pub fn for_slot(kind: ElementKind) -> Result<Self> {
        let disk = match kind {
            ElementKind::Float64 | ElementKind::Float32 => DiskTag::F64Le,
            ElementKind::Int32   | ElementKind::Int64   => DiskTag::I64Le,
            ElementKind::UInt32  | ElementKind::UInt64  => DiskTag::U64Le,
            ElementKind::Int8 | ElementKind::UInt8 | ElementKind::Int16 | ElementKind::UInt16 => {
                return Err(StoreError::UnsupportedType(format!(
                    "no sequence encoding for {kind} elements"
                )));
            }
        };
        Ok(Self { kind, disk })
    }

    /// Native transfer type of the raw copy.
    #[inline]
    pub fn native(&self) -> ElementKind {
        self.kind
    }
}

/// Resolve the encoding for a slot type.
pub fn encoding_for<S: Slot>() -> Result<OnDiskEncoding> {
    OnDiskEncoding::for_slot(<S::Component as Element>::KIND)
}

// ── LogicalShape ─────────────────────────────────────────────────────────────

/// Logical shape of a stored dataset; fully determines rank and extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalShape {
    Scalars { len: u64 },
    Pairs { len: u64 },
    Matrix { rows: u64, cols: u64, channels: u64 },
}

impl LogicalShape {
    pub fn for_slots<S: Slot>(len: usize) -> Self {
        let len = len as u64;
        if S::WIDTH == 2 {
            LogicalShape::Pairs { len }
        } else {
            LogicalShape::Scalars { len }
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            LogicalShape::Scalars { .. } => 1,
            LogicalShape::Pairs { .. } | LogicalShape::Matrix { .. } => 2,
        }
    }

    pub fn extents(&self) -> Vec<u64> {
        match *self {
            LogicalShape::Scalars { len }  => vec![len],
            LogicalShape::Pairs { len }    => vec![len, 2],
            LogicalShape::Matrix { rows, cols, channels } => vec![rows, cols * channels],
        }
    }
}

// ── Element ──────────────────────────────────────────────────────────────────

/// A numeric element with a fixed native encoding.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + 'static {
    const KIND: ElementKind;

    /// Append the little-endian native bytes.
    fn put(self, out: &mut Vec<u8>);

    /// Decode from the first `KIND.size()` bytes.
    fn get(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $kind:ident),* $(,)?) => {$(
        impl Element for $t {
            const KIND: ElementKind = ElementKind::$kind;

            #[inline]
            fn put(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn get(bytes: &[u8]) -> Self {
                let mut b = [0u8; std::mem::size_of::<$t>()];
                b.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(b)
            }
        }
    )*};
}

impl_element! {
    i8  => Int8,
    u8  => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}

// ── Slot ─────────────────────────────────────────────────────────────────────

/// One position of a sequence: a single element (`WIDTH == 1`) or a
/// coordinate-like pair of elements (`WIDTH == 2`, stored as extents `[N, 2]`).
pub trait Slot: Copy + Default + PartialEq + fmt::Debug + 'static {
    type Component: Element;
    const WIDTH: usize;

    /// Append the slot's components, adjacently, to the staging buffer.
    fn stage(&self, out: &mut Vec<u8>);

    /// Rebuild the slot from `WIDTH` consecutive native components.
    fn unstage(bytes: &[u8]) -> Self;

    /// Bytes per slot in the staging buffer.
    fn staged_size() -> usize {
        Self::WIDTH * <Self::Component as Element>::KIND.size()
    }
}

macro_rules! impl_scalar_slot {
    ($($t:ty),*) => {$(
        impl Slot for $t {
            type Component = $t;
            const WIDTH: usize = 1;

            fn stage(&self, out: &mut Vec<u8>) {
                self.put(out);
            }

            fn unstage(bytes: &[u8]) -> Self {
                <$t as Element>::get(bytes)
            }
        }
    )*};
}

impl_scalar_slot!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

/// A 2-D point.  Stored like any other pair slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point2<T> {
    pub x: T,
    pub y: T,
}

impl<T> Point2<T> {
    pub fn new(x: T, y: T) -> Self {
        Self { x, y }
    }
}

impl<T> From<(T, T)> for Point2<T> {
    fn from((x, y): (T, T)) -> Self {
        Self { x, y }
    }
}

impl<T: Element> Slot for Point2<T> {
    type Component = T;
    const WIDTH: usize = 2;

    fn stage(&self, out: &mut Vec<u8>) {
        self.x.put(out);
        self.y.put(out);
    }

    fn unstage(bytes: &[u8]) -> Self {
        let w = T::KIND.size();
        Point2 { x: T::get(bytes), y: T::get(&bytes[w..]) }
    }
}

impl<T: Element> Slot for (T, T) {
    type Component = T;
    const WIDTH: usize = 2;

    fn stage(&self, out: &mut Vec<u8>) {
        self.0.put(out);
        self.1.put(out);
    }

    fn unstage(bytes: &[u8]) -> Self {
        let w = T::KIND.size();
        (T::get(bytes), T::get(&bytes[w..]))
    }
}

impl<T: Element> Slot for [T; 2] {
    type Component = T;
    const WIDTH: usize = 2;

    fn stage(&self, out: &mut Vec<u8>) {
        self[0].put(out);
        self[1].put(out);
    }

    fn unstage(bytes: &[u8]) -> Self {
        let w = T::KIND.size();
        [T::get(bytes), T::get(&bytes[w..])]
    }
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Value {
    Int(i128),
    Float(f64),
}

fn decode(kind: ElementKind, b: &[u8]) -> Value {
    match kind {
        ElementKind::Int8    => Value::Int(i8::get(b) as i128),
        ElementKind::UInt8   => Value::Int(u8::get(b) as i128),
        ElementKind::Int16   => Value::Int(i16::get(b) as i128),
        ElementKind::UInt16  => Value::Int(u16::get(b) as i128),
        ElementKind::Int32   => Value::Int(i32::get(b) as i128),
        ElementKind::UInt32  => Value::Int(u32::get(b) as i128),
        ElementKind::Int64   => Value::Int(i64::get(b) as i128),
        ElementKind::UInt64  => Value::Int(u64::get(b) as i128),
        ElementKind::Float32 => Value::Float(f32::get(b) as f64),
        ElementKind::Float64 => Value::Float(f64::get(b)),
    }
}

fn encode(value: Value, kind: ElementKind, out: &mut Vec<u8>) {
    // Integer targets clamp to their range; float → int truncates toward zero.
    let int = |lo: i128, hi: i128| -> i128 {
        match value {
            Value::Int(i)   => i.clamp(lo, hi),
            Value::Float(f) => (f as i128).clamp(lo, hi),
        }
    };
    let float = || -> f64 {
        match value {
            Value::Int(i)   => i as f64,
            Value::Float(f) => f,
        }
    };
    match kind {
        ElementKind::Int8    => (int(i8::MIN as i128, i8::MAX as i128) as i8).put(out),
        ElementKind::UInt8   => (int(0, u8::MAX as i128) as u8).put(out),
        ElementKind::Int16   => (int(i16::MIN as i128, i16::MAX as i128) as i16).put(out),
        ElementKind::UInt16  => (int(0, u16::MAX as i128) as u16).put(out),
        ElementKind::Int32   => (int(i32::MIN as i128, i32::MAX as i128) as i32).put(out),
        ElementKind::UInt32  => (int(0, u32::MAX as i128) as u32).put(out),
        ElementKind::Int64   => (int(i64::MIN as i128, i64::MAX as i128) as i64).put(out),
        ElementKind::UInt64  => (int(0, u64::MAX as i128) as u64).put(out),
        ElementKind::Float32 => (float() as f32).put(out),
        ElementKind::Float64 => float().put(out),
    }
}

/// Convert a packed buffer of `from` elements into `to` elements.
///
/// Same-kind conversion is a copy.  Trailing bytes that do not form a whole
/// element are ignored.
pub fn convert(src: &[u8], from: ElementKind, to: ElementKind) -> Vec<u8> {
    if from == to {
        return src.to_vec();
    }
    let n = src.len() / from.size();
    let mut out = Vec::with_capacity(n * to.size());
    for chunk in src.chunks_exact(from.size()) {
        encode(decode(from, chunk), to, &mut out);
    }
    out
}

/// Render a packed buffer for display (diagnostics only).
pub fn render(src: &[u8], kind: ElementKind) -> Vec<String> {
    src.chunks_exact(kind.size())
        .map(|chunk| match decode(kind, chunk) {
            Value::Int(i)   => i.to_string(),
            Value::Float(f) => f.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_table_widens_32_bit_types() {
        let f32_enc = encoding_for::<f32>().unwrap();
        assert_eq!(f32_enc.disk, DiskTag::F64Le);
        assert_eq!(f32_enc.native(), ElementKind::Float32);

        assert_eq!(encoding_for::<i32>().unwrap().disk, DiskTag::I64Le);
        assert_eq!(encoding_for::<u32>().unwrap().disk, DiskTag::U64Le);
        assert_eq!(encoding_for::<u64>().unwrap().disk, DiskTag::U64Le);
        assert_eq!(encoding_for::<f64>().unwrap().disk, DiskTag::F64Le);
    }

    #[test]
    fn pairs_resolve_through_their_component() {
        let enc = encoding_for::<(i32, i32)>().unwrap();
        assert_eq!(enc.disk, DiskTag::I64Le);
        assert_eq!(enc.native(), ElementKind::Int32);
        assert_eq!(encoding_for::<Point2<f32>>().unwrap().disk, DiskTag::F64Le);
        assert_eq!(encoding_for::<[f64; 2]>().unwrap().disk, DiskTag::F64Le);
    }

    #[test]
    fn small_integers_have_no_slot_encoding() {
        for err in [
            encoding_for::<i8>().unwrap_err(),
            encoding_for::<u16>().unwrap_err(),
            encoding_for::<(u8, u8)>().unwrap_err(),
        ] {
            assert!(matches!(err, StoreError::UnsupportedType(_)));
        }
    }

    #[test]
    fn shapes_report_rank_and_extents() {
        assert_eq!(LogicalShape::for_slots::<f64>(3).extents(), vec![3]);
        assert_eq!(LogicalShape::for_slots::<(i32, i32)>(2).extents(), vec![2, 2]);
        let m = LogicalShape::Matrix { rows: 3, cols: 4, channels: 3 };
        assert_eq!(m.rank(), 2);
        assert_eq!(m.extents(), vec![3, 12]);
    }

    #[test]
    fn disk_codes_are_stable() {
        for code in 1..=10u8 {
            let tag = DiskTag::from_code(code).unwrap();
            assert_eq!(tag.code(), code);
        }
        assert!(DiskTag::from_code(0).is_none());
        assert!(DiskTag::from_code(11).is_none());
    }

    #[test]
    fn f32_widens_and_narrows_exactly() {
        let mut src = Vec::new();
        for v in [1.5f32, -0.1, f32::MAX] {
            v.put(&mut src);
        }
        let wide = convert(&src, ElementKind::Float32, ElementKind::Float64);
        assert_eq!(wide.len(), 24);
        assert_eq!(f64::get(&wide[8..]), -0.1f32 as f64);
        let back = convert(&wide, ElementKind::Float64, ElementKind::Float32);
        assert_eq!(back, src);
    }

    #[test]
    fn integer_narrowing_clamps() {
        let mut src = Vec::new();
        (i64::MAX).put(&mut src);
        (-5i64).put(&mut src);
        let out = convert(&src, ElementKind::Int64, ElementKind::UInt8);
        assert_eq!(out, vec![255, 0]);
    }

    #[test]
    fn pair_slots_stage_components_adjacently() {
        let mut buf = Vec::new();
        (7i32, -3i32).stage(&mut buf);
        assert_eq!(buf.len(), <(i32, i32)>::staged_size());
        assert_eq!(i32::get(&buf), 7);
        assert_eq!(i32::get(&buf[4..]), -3);
        assert_eq!(Point2::<i32>::unstage(&buf), Point2::new(7, -3));
    }
}
