use std::collections::{BTreeMap, HashMap};

use crate::dtype::{convert, DiskTag, ElementKind};
use crate::error::{EngineError, EngineResult};
use crate::path;

use super::{DatasetId, Entry, SpaceId};

const MAX_RANK: usize = crate::block::MAX_RANK;

#[derive(Debug, Clone)]
pub(crate) struct DatasetNode {
    pub tag:     DiskTag,
    pub extents: Vec<u64>,
    /// Little-endian values in the disk representation.
    pub data:    Vec<u8>,
}

/// Bytes needed for `extents` elements of `width` bytes each.
fn byte_len(extents: &[u64], width: usize) -> EngineResult<usize> {
    extents
        .iter()
        .try_fold(1u64, |acc, &e| acc.checked_mul(e))
        .and_then(|n| usize::try_from(n).ok())
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(|| EngineError::Oversized(extents.to_vec()))
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Group,
    Dataset(DatasetNode),
}

/// Group/dataset hierarchy plus the handle tables.  The root group `/` is
/// implicit.
#[derive(Debug, Default)]
pub(crate) struct Tree {
    nodes:       BTreeMap<String, Node>,
    datasets:    HashMap<u64, String>,
    spaces:      HashMap<u64, Vec<u64>>,
    next_handle: u64,
}

impl Tree {
    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn node(&self, ds: DatasetId) -> EngineResult<&DatasetNode> {
        let path = self.datasets.get(&ds.0).ok_or(EngineError::InvalidHandle(ds.0))?;
        match self.nodes.get(path) {
            Some(Node::Dataset(node)) => Ok(node),
            _ => Err(EngineError::InvalidHandle(ds.0)),
        }
    }

    fn node_mut(&mut self, ds: DatasetId) -> EngineResult<&mut DatasetNode> {
        let path = self.datasets.get(&ds.0).ok_or(EngineError::InvalidHandle(ds.0))?;
        match self.nodes.get_mut(path) {
            Some(Node::Dataset(node)) => Ok(node),
            _ => Err(EngineError::InvalidHandle(ds.0)),
        }
    }

    pub fn ensure_groups(&mut self, path: &str) -> EngineResult<()> {
        for group in path::group_prefixes(path) {
            match self.nodes.get(group) {
                Some(Node::Group) => {}
                Some(Node::Dataset(_)) => return Err(EngineError::PathConflict(group.to_owned())),
                None => {
                    self.nodes.insert(group.to_owned(), Node::Group);
                }
            }
        }
        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    pub fn list(&self) -> Vec<Entry> {
        self.nodes
            .iter()
            .map(|(path, node)| match node {
                Node::Group => Entry::Group { path: path.clone() },
                Node::Dataset(ds) => Entry::Dataset {
                    path:    path.clone(),
                    tag:     ds.tag,
                    extents: ds.extents.clone(),
                },
            })
            .collect()
    }

    pub fn create_space(&mut self, extents: &[u64]) -> EngineResult<SpaceId> {
        if extents.is_empty() || extents.len() > MAX_RANK {
            return Err(EngineError::UnsupportedRank(extents.len()));
        }
        let id = self.next_id();
        self.spaces.insert(id, extents.to_vec());
        Ok(SpaceId(id))
    }

    pub fn space_extents(&self, space: SpaceId) -> EngineResult<Vec<u64>> {
        self.spaces.get(&space.0).cloned().ok_or(EngineError::InvalidHandle(space.0))
    }

    pub fn close_space(&mut self, space: SpaceId) -> EngineResult<()> {
        self.spaces.remove(&space.0).map(|_| ()).ok_or(EngineError::InvalidHandle(space.0))
    }

    pub fn open_dataset(&mut self, path: &str) -> EngineResult<Option<DatasetId>> {
        match self.nodes.get(path) {
            None => Ok(None),
            Some(Node::Group) => Err(EngineError::PathConflict(path.to_owned())),
            Some(Node::Dataset(_)) => {
                let id = self.next_id();
                self.datasets.insert(id, path.to_owned());
                Ok(Some(DatasetId(id)))
            }
        }
    }

    pub fn create_dataset(&mut self, path: &str, tag: DiskTag, space: SpaceId) -> EngineResult<DatasetId> {
        let extents = self.space_extents(space)?;
        if self.nodes.contains_key(path) {
            return Err(EngineError::PathConflict(path.to_owned()));
        }
        let parent = path::parent(path);
        if !self.exists(parent) {
            return Err(EngineError::MissingGroup(path.to_owned()));
        }
        let size = byte_len(&extents, tag.size())?;
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|_| EngineError::Oversized(extents.clone()))?;
        data.resize(size, 0);
        let node = DatasetNode { tag, extents, data };
        self.nodes.insert(path.to_owned(), Node::Dataset(node));

        let id = self.next_id();
        self.datasets.insert(id, path.to_owned());
        Ok(DatasetId(id))
    }

    pub fn dataset_space(&mut self, ds: DatasetId) -> EngineResult<SpaceId> {
        let extents = self.node(ds)?.extents.clone();
        let id = self.next_id();
        self.spaces.insert(id, extents);
        Ok(SpaceId(id))
    }

    pub fn dataset_tag(&self, ds: DatasetId) -> EngineResult<DiskTag> {
        Ok(self.node(ds)?.tag)
    }

    pub fn write_raw(&mut self, ds: DatasetId, native: ElementKind, buf: &[u8]) -> EngineResult<()> {
        let node = self.node_mut(ds)?;
        let expected = byte_len(&node.extents, native.size())?;
        if buf.len() != expected {
            return Err(EngineError::BufferSize { expected, actual: buf.len() });
        }
        node.data = convert(buf, native, node.tag.kind());
        Ok(())
    }

    pub fn read_raw(&self, ds: DatasetId, native: ElementKind, buf: &mut [u8]) -> EngineResult<()> {
        let node = self.node(ds)?;
        let expected = byte_len(&node.extents, native.size())?;
        if buf.len() != expected {
            return Err(EngineError::BufferSize { expected, actual: buf.len() });
        }
        buf.copy_from_slice(&convert(&node.data, node.tag.kind(), native));
        Ok(())
    }

    pub fn close_dataset(&mut self, ds: DatasetId) -> EngineResult<()> {
        self.datasets.remove(&ds.0).map(|_| ()).ok_or(EngineError::InvalidHandle(ds.0))
    }

    pub fn open_handles(&self) -> usize {
        self.datasets.len() + self.spaces.len()
    }

    // ── Bulk access for persistence ─────────────────────────────────────────

    pub fn insert_group(&mut self, path: &str) {
        self.nodes.insert(path.to_owned(), Node::Group);
    }

    pub fn insert_dataset(&mut self, path: &str, node: DatasetNode) -> EngineResult<()> {
        let expected = byte_len(&node.extents, node.tag.size())?;
        if node.data.len() != expected {
            return Err(EngineError::Corrupt(format!(
                "{path}: {} payload bytes, extents need {expected}",
                node.data.len()
            )));
        }
        self.nodes.insert(path.to_owned(), Node::Dataset(node));
        Ok(())
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|(p, n)| matches!(n, Node::Group).then_some(p.as_str()))
    }

    pub fn datasets(&self) -> impl Iterator<Item = (&str, &DatasetNode)> {
        self.nodes.iter().filter_map(|(p, n)| match n {
            Node::Dataset(ds) => Some((p.as_str(), ds)),
            Node::Group => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_created_along_the_path() {
        let mut t = Tree::default();
        t.ensure_groups("/a/b/v").unwrap();
        assert!(t.exists("/a"));
        assert!(t.exists("/a/b"));
        assert!(!t.exists("/a/b/v"));
    }

    #[test]
    fn dataset_cannot_shadow_a_group() {
        let mut t = Tree::default();
        t.ensure_groups("/a/b/v").unwrap();
        let space = t.create_space(&[1]).unwrap();
        assert!(matches!(
            t.create_dataset("/a/b", DiskTag::I64Le, space),
            Err(EngineError::PathConflict(_))
        ));
        assert!(matches!(t.open_dataset("/a"), Err(EngineError::PathConflict(_))));
    }

    #[test]
    fn create_requires_parent_group() {
        let mut t = Tree::default();
        let space = t.create_space(&[1]).unwrap();
        assert!(matches!(
            t.create_dataset("/x/v", DiskTag::I64Le, space),
            Err(EngineError::MissingGroup(_))
        ));
    }

    #[test]
    fn transfers_convert_between_native_and_disk() {
        let mut t = Tree::default();
        let space = t.create_space(&[2]).unwrap();
        let ds = t.create_dataset("/v", DiskTag::I64Le, space).unwrap();

        let src: Vec<u8> = [7i32, -9].iter().flat_map(|v| v.to_le_bytes()).collect();
        t.write_raw(ds, ElementKind::Int32, &src).unwrap();

        let mut wide = vec![0u8; 16];
        t.read_raw(ds, ElementKind::Int64, &mut wide).unwrap();
        assert_eq!(i64::from_le_bytes(wide[8..].try_into().unwrap()), -9);

        let mut narrow = vec![0u8; 8];
        t.read_raw(ds, ElementKind::Int32, &mut narrow).unwrap();
        assert_eq!(narrow, src);
    }

    #[test]
    fn wrong_buffer_size_is_rejected() {
        let mut t = Tree::default();
        let space = t.create_space(&[3]).unwrap();
        let ds = t.create_dataset("/v", DiskTag::F64Le, space).unwrap();
        assert!(matches!(
            t.write_raw(ds, ElementKind::Float64, &[0u8; 16]),
            Err(EngineError::BufferSize { expected: 24, actual: 16 })
        ));
    }

    #[test]
    fn closed_handles_are_invalid() {
        let mut t = Tree::default();
        let space = t.create_space(&[1]).unwrap();
        let ds = t.create_dataset("/v", DiskTag::F64Le, space).unwrap();
        t.close_dataset(ds).unwrap();
        t.close_space(space).unwrap();
        assert_eq!(t.open_handles(), 0);
        assert!(matches!(t.dataset_tag(ds), Err(EngineError::InvalidHandle(_))));
        assert!(t.close_space(space).is_err());
    }

    #[test]
    fn oversized_extents_are_rejected() {
        let mut t = Tree::default();
        let space = t.create_space(&[u64::MAX, 2]).unwrap();
        assert!(matches!(
            t.create_dataset("/huge", DiskTag::F64Le, space),
            Err(EngineError::Oversized(_))
        ));
        assert!(!t.exists("/huge"));

        let node = DatasetNode { tag: DiskTag::I64Le, extents: vec![1 << 62, 4], data: Vec::new() };
        assert!(matches!(t.insert_dataset("/bad", node), Err(EngineError::Oversized(_))));
    }

    #[test]
    fn rank_is_limited_to_two() {
        let mut t = Tree::default();
        assert!(matches!(t.create_space(&[]), Err(EngineError::UnsupportedRank(0))));
        assert!(matches!(t.create_space(&[1, 2, 3]), Err(EngineError::UnsupportedRank(3))));
    }
}
