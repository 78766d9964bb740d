//! The hierarchical file-engine boundary.
//!
//! An [`Engine`] owns groups and datasets addressed by slash-delimited paths
//! and performs raw, typed transfers.  It hands out numeric handles for
//! datasets and data spaces (shape descriptors); every handle must be closed.
//! [`DatasetHandle`] and [`SpaceHandle`] scope those handles: `close()`
//! releases and reports errors, `Drop` releases on every other exit path.
//!
//! Engines:
//! - [`MemoryEngine`]: in-process tree with handle counting and fault injection.
//! - [`FileEngine`]: persistent `.nbx` container.

pub mod file;
pub mod memory;
mod tree;

pub use file::{FileAccess, FileEngine, VerifyEntry};
pub use memory::{Fault, MemoryEngine};

use tracing::warn;

use crate::dtype::{DiskTag, ElementKind};
use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceId(pub u64);

/// One node of the hierarchy, as reported by [`Engine::list`].
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Group { path: String },
    Dataset { path: String, tag: DiskTag, extents: Vec<u64> },
}

impl Entry {
    pub fn path(&self) -> &str {
        match self {
            Entry::Group { path } | Entry::Dataset { path, .. } => path,
        }
    }
}

/// Raw storage primitives.
///
/// Implementations must satisfy:
/// - A raw transfer moves every element of the dataset; partial I/O is not
///   expressible.
/// - `write_raw`/`read_raw` convert between the native transfer type and the
///   dataset's disk tag.
/// - Paths are validated by the caller; engines only enforce the
///   group/dataset structure.
/// - `open_handles` counts dataset and space handles not yet closed.
pub trait Engine {
    /// Create every missing group along `path` (not the final segment).
    fn ensure_groups(&self, path: &str) -> EngineResult<()>;

    fn exists(&self, path: &str) -> bool;

    /// Every group and dataset, sorted by path.
    fn list(&self) -> Vec<Entry>;

    fn create_space(&self, extents: &[u64]) -> EngineResult<SpaceId>;
    fn space_extents(&self, space: SpaceId) -> EngineResult<Vec<u64>>;
    fn close_space(&self, space: SpaceId) -> EngineResult<()>;

    /// `Ok(None)` when nothing exists at `path`.
    fn open_dataset(&self, path: &str) -> EngineResult<Option<DatasetId>>;
    fn create_dataset(&self, path: &str, tag: DiskTag, space: SpaceId) -> EngineResult<DatasetId>;
    /// A fresh space handle describing the dataset's extents.
    fn dataset_space(&self, dataset: DatasetId) -> EngineResult<SpaceId>;
    fn dataset_tag(&self, dataset: DatasetId) -> EngineResult<DiskTag>;
    fn write_raw(&self, dataset: DatasetId, native: ElementKind, buf: &[u8]) -> EngineResult<()>;
    fn read_raw(&self, dataset: DatasetId, native: ElementKind, buf: &mut [u8]) -> EngineResult<()>;
    fn close_dataset(&self, dataset: DatasetId) -> EngineResult<()>;

    fn open_handles(&self) -> usize;

    /// Persist pending changes.  In-memory engines have nothing to do.
    fn flush(&self) -> EngineResult<()> {
        Ok(())
    }
}

// ── Scoped handles ───────────────────────────────────────────────────────────

pub struct SpaceHandle<'e, E: Engine + ?Sized> {
    engine: &'e E,
    id:     SpaceId,
    open:   bool,
}

impl<'e, E: Engine + ?Sized> SpaceHandle<'e, E> {
    pub fn create(engine: &'e E, extents: &[u64]) -> EngineResult<Self> {
        let id = engine.create_space(extents)?;
        Ok(Self { engine, id, open: true })
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn extents(&self) -> EngineResult<Vec<u64>> {
        self.engine.space_extents(self.id)
    }

    pub fn close(mut self) -> EngineResult<()> {
        self.open = false;
        self.engine.close_space(self.id)
    }
}

impl<E: Engine + ?Sized> Drop for SpaceHandle<'_, E> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.engine.close_space(self.id) {
                warn!(space = self.id.0, error = %e, "failed to close space handle");
            }
        }
    }
}

pub struct DatasetHandle<'e, E: Engine + ?Sized> {
    engine: &'e E,
    id:     DatasetId,
    open:   bool,
}

impl<'e, E: Engine + ?Sized> DatasetHandle<'e, E> {
    pub fn open(engine: &'e E, path: &str) -> EngineResult<Option<Self>> {
        Ok(engine.open_dataset(path)?.map(|id| Self { engine, id, open: true }))
    }

    pub fn create(
        engine: &'e E,
        path:   &str,
        tag:    DiskTag,
        space:  &SpaceHandle<'_, E>,
    ) -> EngineResult<Self> {
        let id = engine.create_dataset(path, tag, space.id())?;
        Ok(Self { engine, id, open: true })
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn tag(&self) -> EngineResult<DiskTag> {
        self.engine.dataset_tag(self.id)
    }

    pub fn space(&self) -> EngineResult<SpaceHandle<'e, E>> {
        let id = self.engine.dataset_space(self.id)?;
        Ok(SpaceHandle { engine: self.engine, id, open: true })
    }

    /// Current extents; the transient space handle is released before return.
    pub fn extents(&self) -> EngineResult<Vec<u64>> {
        let space = self.space()?;
        let extents = space.extents()?;
        space.close()?;
        Ok(extents)
    }

    pub fn write(&self, native: ElementKind, buf: &[u8]) -> EngineResult<()> {
        self.engine.write_raw(self.id, native, buf)
    }

    pub fn read(&self, native: ElementKind, buf: &mut [u8]) -> EngineResult<()> {
        self.engine.read_raw(self.id, native, buf)
    }

    pub fn close(mut self) -> EngineResult<()> {
        self.open = false;
        self.engine.close_dataset(self.id)
    }
}

impl<E: Engine + ?Sized> Drop for DatasetHandle<'_, E> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.engine.close_dataset(self.id) {
                warn!(dataset = self.id.0, error = %e, "failed to close dataset handle");
            }
        }
    }
}
