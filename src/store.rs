//! Shape-aware marshaller, the main entry point of the crate.
//!
//! ```no_run
//! use numbox::{Mat, Store, StoreOptions};
//!
//! let store = Store::create("results.nbx", StoreOptions::default())?;
//! store.write("/data/v", &vec![1.5f64, 2.5, 3.5])?;
//! store.write("/data/pts", &vec![(1i32, 2i32), (3, 4)])?;
//! store.write("/img/m", &Mat::from_values(2, 2, 1, &[1u8, 2, 3, 4])?)?;
//! store.close()?;
//!
//! let store = Store::open("results.nbx", StoreOptions::read_only())?;
//! let v: Vec<f64> = store.read_new("/data/v")?;
//! assert_eq!(v, vec![1.5, 2.5, 3.5]);
//! # Ok::<(), numbox::StoreError>(())
//! ```
//!
//! # Call sequence
//! Every write runs `resolve encoding → ensure groups → open-or-create the
//! dataset → validate tag and extents → stage → raw transfer → close`; every
//! read runs `open → validate → stage → raw transfer → copy out → close`.
//! Dataset and space handles are scoped, so a failure at any step still
//! releases what the call opened.  The destination container is only
//! replaced once the transfer succeeded.
//!
//! # Matrices
//! A [`Mat`] is stored as a flat `[rows, cols × channels]` grid at `<path>`
//! plus two `i32` scalars at `<path>_type` and `<path>_channels`, written in
//! that order.  The three writes are separate; a failure between them leaves
//! the grid without metadata.

use std::collections::{LinkedList, VecDeque};
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::codec::CodecId;
use crate::dtype::{encoding_for, DiskTag, Element, LogicalShape, OnDiskEncoding, Point2, Slot};
use crate::engine::{DatasetHandle, Engine, Entry, FileAccess, FileEngine, MemoryEngine, SpaceHandle};
use crate::error::{Result, StoreError};
use crate::mat::{Mat, MatType, MAX_CHANNELS};
use crate::path;

/// Default Zstd compression level for dataset payloads.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// ── StoreOptions ─────────────────────────────────────────────────────────────

/// What a read does when nothing is stored at the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingPolicy {
    /// Fail with [`StoreError::NotFound`].
    #[default]
    Error,
    /// Log a warning and leave the destination untouched.
    Skip,
}

/// What a write of an empty sequence does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyWrite {
    /// Write nothing; a later read of the path reports it missing.
    #[default]
    Skip,
    /// Store a zero-length dataset; a later read yields an empty container.
    Store,
}

/// Configuration for [`Store::open`] and [`Store::with_engine`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub access:       FileAccess,
    pub codec:        CodecId,
    pub level:        i32,
    pub on_missing:   MissingPolicy,
    pub empty_writes: EmptyWrite,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            access:       FileAccess::TruncateWrite,
            codec:        CodecId::Zstd,
            level:        DEFAULT_COMPRESSION_LEVEL,
            on_missing:   MissingPolicy::Error,
            empty_writes: EmptyWrite::Skip,
        }
    }
}

impl StoreOptions {
    pub fn read_only() -> Self {
        Self { access: FileAccess::ReadOnly, ..Self::default() }
    }

    pub fn read_write() -> Self {
        Self { access: FileAccess::ReadWrite, ..Self::default() }
    }
}

/// A dataset's raw contents in its disk representation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDataset {
    pub tag:     DiskTag,
    pub extents: Vec<u64>,
    pub data:    Vec<u8>,
}

// ── Persist ──────────────────────────────────────────────────────────────────

/// An in-memory shape the store can write and read back.
pub trait Persist {
    fn persist<E: Engine>(&self, store: &Store<E>, path: &str) -> Result<()>;

    /// Replace `self` with the stored value.  On error `self` is unchanged.
    fn restore<E: Engine>(&mut self, store: &Store<E>, path: &str) -> Result<()>;
}

impl<S: Slot> Persist for Vec<S> {
    fn persist<E: Engine>(&self, store: &Store<E>, path: &str) -> Result<()> {
        store.write_slots(path, self)
    }

    fn restore<E: Engine>(&mut self, store: &Store<E>, path: &str) -> Result<()> {
        if let Some(slots) = store.read_slots(path, None)? {
            *self = slots;
        }
        Ok(())
    }
}

impl<S: Slot> Persist for VecDeque<S> {
    fn persist<E: Engine>(&self, store: &Store<E>, path: &str) -> Result<()> {
        let staged: Vec<S> = self.iter().copied().collect();
        store.write_slots(path, &staged)
    }

    fn restore<E: Engine>(&mut self, store: &Store<E>, path: &str) -> Result<()> {
        if let Some(slots) = store.read_slots(path, None)? {
            *self = slots.into();
        }
        Ok(())
    }
}

impl<S: Slot> Persist for LinkedList<S> {
    fn persist<E: Engine>(&self, store: &Store<E>, path: &str) -> Result<()> {
        let staged: Vec<S> = self.iter().copied().collect();
        store.write_slots(path, &staged)
    }

    fn restore<E: Engine>(&mut self, store: &Store<E>, path: &str) -> Result<()> {
        if let Some(slots) = store.read_slots(path, None)? {
            *self = slots.into_iter().collect();
        }
        Ok(())
    }
}

/// Fixed-length arrays; a read requires the stored length to be exactly `N`.
impl<S: Slot, const N: usize> Persist for [S; N] {
    fn persist<E: Engine>(&self, store: &Store<E>, path: &str) -> Result<()> {
        store.write_slots(path, self.as_slice())
    }

    fn restore<E: Engine>(&mut self, store: &Store<E>, path: &str) -> Result<()> {
        if let Some(slots) = store.read_slots(path, Some(N))? {
            self.copy_from_slice(&slots);
        }
        Ok(())
    }
}

/// A single point, stored as extents `[1, 2]`.
impl<T: Element> Persist for Point2<T> {
    fn persist<E: Engine>(&self, store: &Store<E>, path: &str) -> Result<()> {
        store.write_slots(path, std::slice::from_ref(self))
    }

    fn restore<E: Engine>(&mut self, store: &Store<E>, path: &str) -> Result<()> {
        if let Some(slots) = store.read_slots::<Point2<T>>(path, Some(1))? {
            *self = slots[0];
        }
        Ok(())
    }
}

impl Persist for Mat {
    fn persist<E: Engine>(&self, store: &Store<E>, path: &str) -> Result<()> {
        store.write_matrix(path, self)
    }

    fn restore<E: Engine>(&mut self, store: &Store<E>, path: &str) -> Result<()> {
        if let Some(mat) = store.read_matrix(path)? {
            *self = mat;
        }
        Ok(())
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// Dataset plus the space handle created for it, released together.
struct Binding<'e, E: Engine> {
    dataset: DatasetHandle<'e, E>,
    space:   SpaceHandle<'e, E>,
}

impl<E: Engine> Binding<'_, E> {
    fn close(self) -> Result<()> {
        let Binding { dataset, space } = self;
        let dataset = dataset.close();
        let space = space.close();
        dataset?;
        space?;
        Ok(())
    }
}

pub struct Store<E: Engine = MemoryEngine> {
    engine: E,
    opts:   StoreOptions,
}

impl Store<FileEngine> {
    /// Create a new container, replacing any existing file.
    pub fn create<P: AsRef<Path>>(path: P, opts: StoreOptions) -> Result<Self> {
        Self::open(path, StoreOptions { access: FileAccess::TruncateWrite, ..opts })
    }

    /// Open a container with `opts.access`.
    pub fn open<P: AsRef<Path>>(path: P, opts: StoreOptions) -> Result<Self> {
        let engine = FileEngine::open(path, opts.access, opts.codec, opts.level)?;
        Ok(Self { engine, opts })
    }
}

impl Store<MemoryEngine> {
    pub fn in_memory() -> Self {
        Self::with_engine(MemoryEngine::new(), StoreOptions::default())
    }
}

impl<E: Engine> Store<E> {
    pub fn with_engine(engine: E, opts: StoreOptions) -> Self {
        Self { engine, opts }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn options(&self) -> &StoreOptions {
        &self.opts
    }

    pub fn contains(&self, path: &str) -> bool {
        self.engine.exists(path)
    }

    pub fn list(&self) -> Vec<Entry> {
        self.engine.list()
    }

    // ── Typed API ────────────────────────────────────────────────────────────

    pub fn write<T: Persist + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        path::validate(path)?;
        value.persist(self, path)
    }

    pub fn read<T: Persist + ?Sized>(&self, path: &str, dest: &mut T) -> Result<()> {
        path::validate(path)?;
        dest.restore(self, path)
    }

    pub fn read_new<T: Persist + Default>(&self, path: &str) -> Result<T> {
        let mut value = T::default();
        self.read(path, &mut value)?;
        Ok(value)
    }

    /// Store one scalar as a length-1 sequence.
    pub fn write_value<T: Slot<Component = T>>(&self, path: &str, value: T) -> Result<()> {
        path::validate(path)?;
        self.write_slots(path, std::slice::from_ref(&value))
    }

    /// Read one scalar.  Under [`MissingPolicy::Skip`] a missing path yields
    /// `T::default()`.
    pub fn read_value<T: Slot<Component = T>>(&self, path: &str) -> Result<T> {
        path::validate(path)?;
        Ok(self
            .read_slots::<T>(path, Some(1))?
            .and_then(|v| v.first().copied())
            .unwrap_or_default())
    }

    /// A dataset's stored bytes, decoded with its own disk tag.
    pub fn read_raw(&self, path: &str) -> Result<RawDataset> {
        path::validate(path)?;
        let dataset = DatasetHandle::open(&self.engine, path)?
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;
        let tag = dataset.tag()?;
        let extents = dataset.extents()?;
        let elements = to_usize(path, extents.iter().product())?;
        let mut data = vec![0u8; elements * tag.size()];
        dataset
            .read(tag.kind(), &mut data)
            .map_err(|e| StoreError::transfer("read", path, e))?;
        dataset.close()?;
        Ok(RawDataset { tag, extents, data })
    }

    /// Store bytes that are already in the disk representation of `raw.tag`.
    pub fn write_raw(&self, path: &str, raw: &RawDataset) -> Result<()> {
        path::validate(path)?;
        self.engine.ensure_groups(path)?;
        let enc = OnDiskEncoding { kind: raw.tag.kind(), disk: raw.tag };
        let binding = self.bind(path, enc, &raw.extents)?;
        binding
            .dataset
            .write(enc.native(), &raw.data)
            .map_err(|e| StoreError::transfer("write", path, e))?;
        binding.close()
    }

    pub fn flush(&self) -> Result<()> {
        self.engine.flush()?;
        Ok(())
    }

    /// Flush and release the engine, reporting flush errors.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    // ── Slot shapes ──────────────────────────────────────────────────────────

    pub(crate) fn write_slots<S: Slot>(&self, path: &str, slots: &[S]) -> Result<()> {
        let enc = encoding_for::<S>()?;
        trace!(path, stage = "start", native = %enc.kind, "write");
        if slots.is_empty() && self.opts.empty_writes == EmptyWrite::Skip {
            warn!(path, "empty sequence; write skipped");
            return Ok(());
        }

        let shape = LogicalShape::for_slots::<S>(slots.len());
        self.engine.ensure_groups(path)?;
        trace!(path, stage = "groups_ensured");
        let binding = self.bind(path, enc, &shape.extents())?;

        let mut staging = Vec::with_capacity(slots.len() * S::staged_size());
        for slot in slots {
            slot.stage(&mut staging);
        }
        trace!(path, stage = "buffer_staged", bytes = staging.len());

        binding
            .dataset
            .write(enc.native(), &staging)
            .map_err(|e| StoreError::transfer("write", path, e))?;
        trace!(path, stage = "transferred");
        binding.close()?;
        debug!(path, tag = %enc.disk, extents = ?shape.extents(), "dataset written");
        Ok(())
    }

    /// `Ok(None)` only when the path is missing under [`MissingPolicy::Skip`].
    pub(crate) fn read_slots<S: Slot>(&self, path: &str, expected_len: Option<usize>) -> Result<Option<Vec<S>>> {
        let enc = encoding_for::<S>()?;
        trace!(path, stage = "start", native = %enc.kind, "read");
        let Some(dataset) = DatasetHandle::open(&self.engine, path)? else {
            return self.missing(path);
        };
        trace!(path, stage = "dataset_bound");

        let space = dataset.space()?;
        let extents = space.extents()?;
        let len = slot_count::<S>(path, dataset.tag()?, enc.disk, &extents)?;
        if let Some(want) = expected_len {
            if len != want {
                return Err(StoreError::mismatch(
                    path,
                    format!("{} {want} slots", enc.disk),
                    format!("{len} slots"),
                ));
            }
        }
        trace!(path, stage = "extent_validated", len);

        let mut staging = vec![0u8; len * S::staged_size()];
        dataset
            .read(enc.native(), &mut staging)
            .map_err(|e| StoreError::transfer("read", path, e))?;
        trace!(path, stage = "transferred");

        let slots = staging.chunks_exact(S::staged_size()).map(S::unstage).collect();
        space.close()?;
        dataset.close()?;
        debug!(path, len, "dataset read");
        Ok(Some(slots))
    }

    // ── Matrices ─────────────────────────────────────────────────────────────

    pub(crate) fn write_matrix(&self, path: &str, mat: &Mat) -> Result<()> {
        let typ = mat.mat_type();
        if typ.channels == 0 || typ.channels > MAX_CHANNELS {
            return Err(StoreError::UnsupportedType(format!(
                "matrix with {} channels (at most {MAX_CHANNELS})",
                typ.channels
            )));
        }
        let enc = typ.depth.encoding();
        trace!(path, stage = "start", type_code = typ.code(), "write matrix");

        let shape = LogicalShape::Matrix {
            rows:     mat.rows() as u64,
            cols:     mat.cols() as u64,
            channels: u64::from(typ.channels),
        };
        self.engine.ensure_groups(path)?;
        trace!(path, stage = "groups_ensured");
        let binding = self.bind(path, enc, &shape.extents())?;
        binding
            .dataset
            .write(enc.native(), mat.data())
            .map_err(|e| StoreError::transfer("write", path, e))?;
        trace!(path, stage = "transferred");
        binding.close()?;

        self.write_slots(&path::type_path(path), &[typ.code()])?;
        self.write_slots(&path::channels_path(path), &[i32::from(typ.channels)])?;
        debug!(path, type_code = typ.code(), extents = ?shape.extents(), "matrix written");
        Ok(())
    }

    pub(crate) fn read_matrix(&self, path: &str) -> Result<Option<Mat>> {
        let Some(code) = self.read_slots::<i32>(&path::type_path(path), Some(1))? else {
            return Ok(None);
        };
        let Some(channels) = self.read_slots::<i32>(&path::channels_path(path), Some(1))? else {
            return Ok(None);
        };
        let (code, channels) = (code[0], channels[0]);

        let typ = MatType::from_code(code).ok_or_else(|| {
            StoreError::UnsupportedType(format!("unknown matrix type tag {code} at {path}"))
        })?;
        if channels != i32::from(typ.channels) {
            return Err(StoreError::mismatch(
                path,
                format!("{} channels (type tag {code})", typ.channels),
                format!("{channels} channels"),
            ));
        }
        if typ.channels > MAX_CHANNELS {
            return Err(StoreError::UnsupportedType(format!(
                "matrix with {} channels (at most {MAX_CHANNELS})",
                typ.channels
            )));
        }
        // The element type is only known now; dispatch on the recovered depth.
        let enc = typ.depth.encoding();

        let Some(dataset) = DatasetHandle::open(&self.engine, path)? else {
            return self.missing(path);
        };
        trace!(path, stage = "dataset_bound");
        let space = dataset.space()?;
        let extents = space.extents()?;
        let tag = dataset.tag()?;
        let ch = u64::from(typ.channels);
        let (rows, width) = match extents.as_slice() {
            [rows, width] if *width % ch == 0 && tag == enc.disk => (*rows, *width),
            _ => {
                return Err(StoreError::mismatch(
                    path,
                    format!("{} [rows, cols x {ch}]", enc.disk),
                    describe(tag, &extents),
                ))
            }
        };
        let rows = to_usize(path, rows)?;
        let cols = to_usize(path, width / ch)?;
        trace!(path, stage = "extent_validated", rows, cols);

        let mut staging = vec![0u8; rows * cols * typ.cell_size()];
        dataset
            .read(enc.native(), &mut staging)
            .map_err(|e| StoreError::transfer("read", path, e))?;
        trace!(path, stage = "transferred");
        space.close()?;
        dataset.close()?;

        debug!(path, rows, cols, type_code = code, "matrix read");
        Mat::from_raw(rows, cols, typ, staging).map(Some)
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    /// Open or create the dataset for a write and check that its tag and
    /// extents are exactly what the encoding and shape demand.
    fn bind(&self, path: &str, enc: OnDiskEncoding, extents: &[u64]) -> Result<Binding<'_, E>> {
        let space = SpaceHandle::create(&self.engine, extents)?;
        let dataset = match DatasetHandle::open(&self.engine, path)? {
            Some(dataset) => dataset,
            None => DatasetHandle::create(&self.engine, path, enc.disk, &space)?,
        };
        trace!(path, stage = "dataset_bound");

        let tag = dataset.tag()?;
        let found = dataset.extents()?;
        if tag != enc.disk || found != extents {
            return Err(StoreError::mismatch(path, describe(enc.disk, extents), describe(tag, &found)));
        }
        trace!(path, stage = "extent_validated");
        Ok(Binding { dataset, space })
    }

    fn missing<T>(&self, path: &str) -> Result<Option<T>> {
        match self.opts.on_missing {
            MissingPolicy::Error => Err(StoreError::NotFound(path.to_owned())),
            MissingPolicy::Skip => {
                warn!(path, "no dataset; destination left unchanged");
                Ok(None)
            }
        }
    }
}

impl<E: Engine + std::fmt::Debug> std::fmt::Debug for Store<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("engine", &self.engine)
            .field("opts", &self.opts)
            .finish()
    }
}

fn describe(tag: DiskTag, extents: &[u64]) -> String {
    format!("{tag} {extents:?}")
}

fn to_usize(path: &str, n: u64) -> Result<usize> {
    usize::try_from(n)
        .map_err(|_| StoreError::mismatch(path, "an addressable length", format!("{n} elements")))
}

/// Number of slots in a dataset, checking rank, pair width and tag.
fn slot_count<S: Slot>(path: &str, found_tag: DiskTag, tag: DiskTag, extents: &[u64]) -> Result<usize> {
    let n = match (S::WIDTH, extents) {
        (1, [n]) if found_tag == tag => *n,
        (2, [n, 2]) if found_tag == tag => *n,
        _ => {
            let expected = if S::WIDTH == 2 { "[N, 2]" } else { "[N]" };
            return Err(StoreError::mismatch(
                path,
                format!("{tag} {expected}"),
                describe(found_tag, extents),
            ));
        }
    };
    to_usize(path, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Fault;
    use crate::error::EngineError;
    use crate::mat::Depth;

    fn dataset_entry(store: &Store, path: &str) -> Option<(DiskTag, Vec<u64>)> {
        store.list().into_iter().find_map(|e| match e {
            Entry::Dataset { path: p, tag, extents } if p == path => Some((tag, extents)),
            _ => None,
        })
    }

    #[test]
    fn doubles_roundtrip_as_rank_one() {
        let store = Store::in_memory();
        store.write("/data/v", &vec![1.5f64, 2.5, 3.5]).unwrap();

        assert_eq!(dataset_entry(&store, "/data/v"), Some((DiskTag::F64Le, vec![3])));
        let back: Vec<f64> = store.read_new("/data/v").unwrap();
        assert_eq!(back, vec![1.5, 2.5, 3.5]);
        assert_eq!(store.engine().open_handles(), 0);
    }

    #[test]
    fn int_pairs_roundtrip_as_rank_two_int64() {
        let store = Store::in_memory();
        store.write("/data/pts", &vec![(1i32, 2i32), (3, 4)]).unwrap();

        assert_eq!(dataset_entry(&store, "/data/pts"), Some((DiskTag::I64Le, vec![2, 2])));
        let back: Vec<(i32, i32)> = store.read_new("/data/pts").unwrap();
        assert_eq!(back, vec![(1, 2), (3, 4)]);
    }

    #[test]
    fn f32_is_tagged_as_f64_on_disk() {
        let store = Store::in_memory();
        let values = vec![0.1f32, -2.75, 1e-7];
        store.write("/f", &values).unwrap();

        assert_eq!(dataset_entry(&store, "/f"), Some((DiskTag::F64Le, vec![3])));
        let raw = store.read_raw("/f").unwrap();
        assert_eq!(f64::get(&raw.data), 0.1f32 as f64);
        assert_eq!(store.read_new::<Vec<f32>>("/f").unwrap(), values);
        // Same disk tag, so the wide type reads it too.
        assert_eq!(store.read_new::<Vec<f64>>("/f").unwrap()[1], -2.75);
    }

    #[test]
    fn pairs_do_not_read_as_scalars() {
        let store = Store::in_memory();
        let pts: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, -(i as f64))).collect();
        store.write("/p", &pts).unwrap();

        let mut dest = vec![9.0f64];
        let err = store.read("/p", &mut dest).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }), "{err}");
        assert_eq!(dest, vec![9.0]);
        assert_eq!(store.engine().open_handles(), 0);
    }

    #[test]
    fn scalars_do_not_read_as_pairs() {
        let store = Store::in_memory();
        store.write("/s", &vec![1i64, 2, 3, 4]).unwrap();
        let err = store.read_new::<Vec<[i64; 2]>>("/s").unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn tag_mismatch_on_read_is_fatal() {
        let store = Store::in_memory();
        store.write("/i", &vec![1i32, 2]).unwrap();
        let err = store.read_new::<Vec<f64>>("/i").unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));
        let err = store.read_new::<Vec<u64>>("/i").unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn unsupported_element_creates_nothing() {
        let store = Store::in_memory();
        let err = store.write("/g/bytes", &vec![1u8, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedType(_)));
        assert!(store.list().is_empty());

        let err = store.read_new::<Vec<i16>>("/g/bytes").unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedType(_)));
    }

    #[test]
    fn missing_path_is_not_found_and_leaves_dest() {
        let store = Store::in_memory();
        let mut dest = vec![4u32, 5];
        let err = store.read("/nowhere", &mut dest).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(dest, vec![4, 5]);
    }

    #[test]
    fn skip_policy_leaves_dest_untouched() {
        let opts = StoreOptions { on_missing: MissingPolicy::Skip, ..StoreOptions::default() };
        let store = Store::with_engine(MemoryEngine::new(), opts);
        let mut dest = vec![7i64];
        store.read("/nowhere", &mut dest).unwrap();
        assert_eq!(dest, vec![7]);
        assert_eq!(store.read_value::<f64>("/nowhere").unwrap(), 0.0);
    }

    #[test]
    fn empty_sequence_write_is_skipped_by_default() {
        let store = Store::in_memory();
        store.write("/e", &Vec::<f64>::new()).unwrap();
        assert!(!store.contains("/e"));
        assert!(store.read_new::<Vec<f64>>("/e").unwrap_err().is_not_found());
    }

    #[test]
    fn empty_sequence_can_be_stored() {
        let opts = StoreOptions { empty_writes: EmptyWrite::Store, ..StoreOptions::default() };
        let store = Store::with_engine(MemoryEngine::new(), opts);
        store.write("/e", &Vec::<(u32, u32)>::new()).unwrap();
        assert_eq!(dataset_entry(&store, "/e"), Some((DiskTag::U64Le, vec![0, 2])));
        let mut dest = vec![(1u32, 1u32)];
        store.read("/e", &mut dest).unwrap();
        assert!(dest.is_empty());
    }

    #[test]
    fn rewrite_with_same_shape_replaces_values() {
        let store = Store::in_memory();
        store.write("/v", &vec![1u64, 2]).unwrap();
        store.write("/v", &vec![3u64, 4]).unwrap();
        assert_eq!(store.read_new::<Vec<u64>>("/v").unwrap(), vec![3, 4]);
    }

    #[test]
    fn rewrite_with_other_shape_is_a_mismatch() {
        let store = Store::in_memory();
        store.write("/v", &vec![1u64, 2]).unwrap();
        let err = store.write("/v", &vec![1u64, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));
        let err = store.write("/v", &vec![1.0f64, 2.0]).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));
        assert_eq!(store.engine().open_handles(), 0);
    }

    #[test]
    fn write_failure_releases_handles() {
        let store = Store::in_memory();
        store.engine().fail_next(Fault::WriteRaw);
        let err = store.write("/data/v", &vec![1.0f64]).unwrap_err();
        assert!(matches!(err, StoreError::TransferFailure { op: "write", .. }), "{err}");
        assert_eq!(store.engine().open_handles(), 0);
    }

    #[test]
    fn read_failure_releases_handles_and_keeps_dest() {
        let store = Store::in_memory();
        store.write("/v", &vec![1i32, 2, 3]).unwrap();
        store.engine().fail_next(Fault::ReadRaw);
        let mut dest: Vec<i32> = Vec::new();
        let err = store.read("/v", &mut dest).unwrap_err();
        assert!(matches!(err, StoreError::TransferFailure { op: "read", .. }));
        assert!(dest.is_empty());
        assert_eq!(store.engine().open_handles(), 0);
    }

    #[test]
    fn create_failure_releases_the_space() {
        let store = Store::in_memory();
        store.engine().fail_next(Fault::CreateDataset);
        assert!(store.write("/v", &vec![1.0f64]).is_err());
        assert_eq!(store.engine().open_handles(), 0);
    }

    #[test]
    fn matrix_roundtrips_with_metadata() {
        let store = Store::in_memory();
        let values: Vec<u16> = (0..36).map(|i| i * 100).collect();
        let mat = Mat::from_values(3, 4, 3, &values).unwrap();
        store.write("/img/m", &mat).unwrap();

        assert_eq!(dataset_entry(&store, "/img/m"), Some((DiskTag::U16Le, vec![3, 12])));
        assert_eq!(store.read_value::<i32>("/img/m_channels").unwrap(), 3);
        assert_eq!(store.read_value::<i32>("/img/m_type").unwrap(), MatType::new(Depth::U16, 3).code());

        let back: Mat = store.read_new("/img/m").unwrap();
        assert_eq!((back.rows(), back.cols(), back.channels()), (3, 4, 3));
        assert_eq!(back, mat);
    }

    #[test]
    fn five_channel_matrix_is_rejected_before_writing() {
        let store = Store::in_memory();
        let mat = Mat::zeros(2, 2, MatType::new(Depth::U8, 5));
        let err = store.write("/img/wide", &mat).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedType(_)));
        assert!(store.list().is_empty());
    }

    #[test]
    fn unknown_matrix_tag_is_unsupported() {
        let store = Store::in_memory();
        store.write("/m", &Mat::from_values(1, 2, 1, &[1u8, 2]).unwrap()).unwrap();
        store.write_value("/m_type", 7i32).unwrap();
        let err = store.read_new::<Mat>("/m").unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedType(_)), "{err}");
    }

    #[test]
    fn inconsistent_channel_metadata_is_a_mismatch() {
        let store = Store::in_memory();
        store.write("/m", &Mat::from_values(1, 2, 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap()).unwrap();
        store.write_value("/m_channels", 4i32).unwrap();
        let mut dest = Mat::default();
        let err = store.read("/m", &mut dest).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));
        assert_eq!(dest, Mat::default());
    }

    #[test]
    fn matrix_read_failure_keeps_dest_and_releases_handles() {
        let store = Store::in_memory();
        let mat = Mat::from_values(2, 3, 2, &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0])
            .unwrap();
        store.write("/img/m", &mat).unwrap();

        // `_type` and `_channels` are read first; the third read is the grid.
        store.engine().fail_nth(Fault::ReadRaw, 3);
        let before = Mat::from_values(1, 1, 1, &[7u8]).unwrap();
        let mut dest = before.clone();
        let err = store.read("/img/m", &mut dest).unwrap_err();
        assert!(
            matches!(&err, StoreError::TransferFailure { op: "read", path, .. } if path == "/img/m"),
            "{err}"
        );
        assert_eq!(dest, before);
        assert_eq!(store.engine().open_handles(), 0);
    }

    #[test]
    fn failed_metadata_write_leaves_the_grid_in_place() {
        let store = Store::in_memory();
        let mat = Mat::from_values(2, 2, 1, &[1i32, 2, 3, 4]).unwrap();

        // The grid transfer succeeds; the `_type` transfer after it fails.
        store.engine().fail_nth(Fault::WriteRaw, 2);
        let err = store.write("/m", &mat).unwrap_err();
        assert!(
            matches!(&err, StoreError::TransferFailure { op: "write", path, .. } if path == "/m_type"),
            "{err}"
        );
        assert_eq!(store.engine().open_handles(), 0);

        let grid = store.read_raw("/m").unwrap();
        assert_eq!((grid.tag, grid.extents), (DiskTag::I32Le, vec![2, 2]));
        assert!(!store.contains("/m_channels"));
        assert!(store.read_new::<Mat>("/m").unwrap_err().is_not_found());
    }

    #[test]
    fn oversized_raw_extents_are_an_engine_error() {
        let store = Store::in_memory();
        let raw = RawDataset { tag: DiskTag::F64Le, extents: vec![u64::MAX, 2], data: Vec::new() };
        let err = store.write_raw("/huge", &raw).unwrap_err();
        assert!(matches!(err, StoreError::Engine(EngineError::Oversized(_))), "{err}");
        assert!(!store.contains("/huge"));
        assert_eq!(store.engine().open_handles(), 0);
    }

    #[test]
    fn matrix_without_metadata_is_not_found() {
        let store = Store::in_memory();
        store.write("/m", &vec![1.0f64]).unwrap();
        assert!(store.read_new::<Mat>("/m").unwrap_err().is_not_found());
    }

    #[test]
    fn linked_list_roundtrips_through_staging() {
        let store = Store::in_memory();
        let list: LinkedList<Point2<f64>> =
            [Point2::new(0.5, 1.5), Point2::new(-3.0, 4.0)].into_iter().collect();
        store.write("/l", &list).unwrap();
        let back: LinkedList<Point2<f64>> = store.read_new("/l").unwrap();
        assert_eq!(back, list);
    }

    #[test]
    fn fixed_array_requires_exact_length() {
        let store = Store::in_memory();
        store.write("/a", &[1u32, 2, 3]).unwrap();
        let mut ok = [0u32; 3];
        store.read("/a", &mut ok).unwrap();
        assert_eq!(ok, [1, 2, 3]);

        let mut short = [0u32; 2];
        assert!(matches!(store.read("/a", &mut short), Err(StoreError::ShapeMismatch { .. })));
        assert_eq!(short, [0, 0]);
    }

    #[test]
    fn single_point_is_one_by_two() {
        let store = Store::in_memory();
        store.write("/pt", &Point2::new(3i64, -4)).unwrap();
        assert_eq!(dataset_entry(&store, "/pt"), Some((DiskTag::I64Le, vec![1, 2])));
        assert_eq!(store.read_new::<Point2<i64>>("/pt").unwrap(), Point2::new(3, -4));
    }

    #[test]
    fn raw_copy_preserves_tag_and_extents() {
        let src = Store::in_memory();
        src.write("/g/m", &Mat::from_values(2, 1, 2, &[1i16, -2, 3, -4]).unwrap()).unwrap();
        let raw = src.read_raw("/g/m").unwrap();
        assert_eq!((raw.tag, raw.extents.clone()), (DiskTag::I16Le, vec![2, 2]));

        let dst = Store::in_memory();
        dst.write_raw("/g/m", &raw).unwrap();
        assert_eq!(dst.read_raw("/g/m").unwrap(), raw);
        assert_eq!(dst.engine().open_handles(), 0);
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let store = Store::in_memory();
        assert!(matches!(store.write("data/v", &vec![1.0f64]), Err(StoreError::InvalidPath { .. })));
        assert!(matches!(store.read_value::<f64>("/"), Err(StoreError::InvalidPath { .. })));
    }

    #[test]
    fn dataset_under_a_dataset_is_an_engine_error() {
        let store = Store::in_memory();
        store.write("/v", &vec![1.0f64]).unwrap();
        let err = store.write("/v/child", &vec![1.0f64]).unwrap_err();
        assert!(matches!(err, StoreError::Engine(_)));
    }
}
