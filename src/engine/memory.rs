use std::sync::Mutex;

use crate::dtype::{DiskTag, ElementKind};
use crate::error::{EngineError, EngineResult};

use super::tree::Tree;
use super::{DatasetId, Engine, Entry, SpaceId};

/// Operations a test can force to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    CreateDataset,
    WriteRaw,
    ReadRaw,
    CloseDataset,
}

impl Fault {
    fn name(self) -> &'static str {
        match self {
            Fault::CreateDataset => "create_dataset",
            Fault::WriteRaw      => "write_raw",
            Fault::ReadRaw       => "read_raw",
            Fault::CloseDataset  => "close_dataset",
        }
    }
}

/// In-memory engine.
///
/// Intended for tests and embedding.  Besides the [`Engine`] contract it
/// exposes handle counting (via [`Engine::open_handles`]) and one-shot fault
/// injection.
pub struct MemoryEngine {
    tree:   Mutex<Tree>,
    /// Armed faults with the number of matching calls left before each fires.
    faults: Mutex<Vec<(Fault, usize)>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            tree:   Mutex::new(Tree::default()),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Make the next call of `fault`'s operation fail with
    /// [`EngineError::Injected`].
    pub fn fail_next(&self, fault: Fault) {
        self.fail_nth(fault, 1);
    }

    /// Make the `n`-th upcoming call of `fault`'s operation fail (1-based);
    /// earlier calls succeed.
    pub fn fail_nth(&self, fault: Fault, n: usize) {
        self.faults.lock().expect("lock poisoned").push((fault, n.max(1)));
    }

    fn check(&self, fault: Fault) -> EngineResult<()> {
        let mut faults = self.faults.lock().expect("lock poisoned");
        let mut fired = false;
        faults.retain_mut(|(armed, remaining)| {
            if *armed != fault {
                return true;
            }
            *remaining -= 1;
            fired |= *remaining == 0;
            *remaining > 0
        });
        if fired {
            Err(EngineError::Injected(fault.name()))
        } else {
            Ok(())
        }
    }

    fn tree(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().expect("lock poisoned")
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MemoryEngine {
    fn ensure_groups(&self, path: &str) -> EngineResult<()> {
        self.tree().ensure_groups(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.tree().exists(path)
    }

    fn list(&self) -> Vec<Entry> {
        self.tree().list()
    }

    fn create_space(&self, extents: &[u64]) -> EngineResult<SpaceId> {
        self.tree().create_space(extents)
    }

    fn space_extents(&self, space: SpaceId) -> EngineResult<Vec<u64>> {
        self.tree().space_extents(space)
    }

    fn close_space(&self, space: SpaceId) -> EngineResult<()> {
        self.tree().close_space(space)
    }

    fn open_dataset(&self, path: &str) -> EngineResult<Option<DatasetId>> {
        self.tree().open_dataset(path)
    }

    fn create_dataset(&self, path: &str, tag: DiskTag, space: SpaceId) -> EngineResult<DatasetId> {
        self.check(Fault::CreateDataset)?;
        self.tree().create_dataset(path, tag, space)
    }

    fn dataset_space(&self, dataset: DatasetId) -> EngineResult<SpaceId> {
        self.tree().dataset_space(dataset)
    }

    fn dataset_tag(&self, dataset: DatasetId) -> EngineResult<DiskTag> {
        self.tree().dataset_tag(dataset)
    }

    fn write_raw(&self, dataset: DatasetId, native: ElementKind, buf: &[u8]) -> EngineResult<()> {
        self.check(Fault::WriteRaw)?;
        self.tree().write_raw(dataset, native, buf)
    }

    fn read_raw(&self, dataset: DatasetId, native: ElementKind, buf: &mut [u8]) -> EngineResult<()> {
        self.check(Fault::ReadRaw)?;
        self.tree().read_raw(dataset, native, buf)
    }

    fn close_dataset(&self, dataset: DatasetId) -> EngineResult<()> {
        // The handle is released even when the close reports a failure.
        let closed = self.tree().close_dataset(dataset);
        self.check(Fault::CloseDataset)?;
        closed
    }

    fn open_handles(&self) -> usize {
        self.tree().open_handles()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tree = self.tree();
        f.debug_struct("MemoryEngine")
            .field("entries", &tree.list().len())
            .field("open_handles", &tree.open_handles())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_fault_fires_once() {
        let engine = MemoryEngine::new();
        let space = engine.create_space(&[1]).unwrap();
        let ds = engine.create_dataset("/v", DiskTag::F64Le, space).unwrap();

        engine.fail_next(Fault::WriteRaw);
        let buf = 1.0f64.to_le_bytes();
        assert!(matches!(
            engine.write_raw(ds, ElementKind::Float64, &buf),
            Err(EngineError::Injected("write_raw"))
        ));
        engine.write_raw(ds, ElementKind::Float64, &buf).unwrap();
    }

    #[test]
    fn nth_fault_skips_earlier_calls() {
        let engine = MemoryEngine::new();
        let space = engine.create_space(&[1]).unwrap();
        let ds = engine.create_dataset("/v", DiskTag::F64Le, space).unwrap();
        let buf = 2.0f64.to_le_bytes();

        engine.fail_nth(Fault::WriteRaw, 3);
        engine.write_raw(ds, ElementKind::Float64, &buf).unwrap();
        engine.write_raw(ds, ElementKind::Float64, &buf).unwrap();
        assert!(engine.write_raw(ds, ElementKind::Float64, &buf).is_err());
        engine.write_raw(ds, ElementKind::Float64, &buf).unwrap();
    }

    #[test]
    fn failing_close_still_releases_the_handle() {
        let engine = MemoryEngine::new();
        let space = engine.create_space(&[1]).unwrap();
        let ds = engine.create_dataset("/v", DiskTag::F64Le, space).unwrap();
        engine.close_space(space).unwrap();

        engine.fail_next(Fault::CloseDataset);
        assert!(engine.close_dataset(ds).is_err());
        assert_eq!(engine.open_handles(), 0);
    }

    #[test]
    fn list_reports_groups_and_datasets() {
        let engine = MemoryEngine::new();
        engine.ensure_groups("/a/v").unwrap();
        let space = engine.create_space(&[4, 2]).unwrap();
        let ds = engine.create_dataset("/a/v", DiskTag::I64Le, space).unwrap();
        engine.close_dataset(ds).unwrap();
        engine.close_space(space).unwrap();

        assert_eq!(
            engine.list(),
            vec![
                Entry::Group { path: "/a".into() },
                Entry::Dataset { path: "/a/v".into(), tag: DiskTag::I64Le, extents: vec![4, 2] },
            ]
        );
    }
}
