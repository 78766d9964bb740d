//! Persistent engine backed by a single `.nbx` container file.
//!
//! # Layout
//! ```text
//! [ superblock (64 B) ][ dataset block ]*[ INDEX block ]
//! ```
//! Each dataset block carries its own tag, rank, extents and checksums (see
//! `block.rs`).  The INDEX block is a JSON [`StoreIndex`] listing every group
//! and dataset with its block offset and BLAKE3 content hash.  The superblock
//! is patched in place once the INDEX block is written.
//!
//! # Lifecycle
//! The whole hierarchy is loaded when the container is opened and verified
//! against the index.  Mutations stay in memory until [`Engine::flush`],
//! which writes a complete new image to a temporary file next to the
//! container and renames it into place; a failed flush leaves the previous
//! container untouched.  Dropping a dirty engine flushes it and logs any
//! failure.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::block::{decode_block, encode_block, BlockHeader, BlockKind};
use crate::codec::CodecId;
use crate::dtype::{DiskTag, ElementKind};
use crate::error::{EngineError, EngineResult};
use crate::index::{content_hash, DatasetRecord, StoreIndex};
use crate::superblock::{Superblock, SUPERBLOCK_SIZE};

use super::tree::{DatasetNode, Tree};
use super::{DatasetId, Engine, Entry, SpaceId};

/// How a container file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileAccess {
    /// Create a new container, discarding any existing file.
    #[default]
    TruncateWrite,
    /// Open an existing container; every mutation fails with `ReadOnly`.
    ReadOnly,
    /// Open an existing container for update, creating it if missing.
    ReadWrite,
}

/// Result of re-checking one dataset block on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyEntry {
    pub path:  String,
    pub ok:    bool,
    pub error: Option<String>,
}

struct FileState {
    tree:       Tree,
    superblock: Superblock,
    created_at: i64,
    dirty:      bool,
}

pub struct FileEngine {
    path:   PathBuf,
    access: FileAccess,
    codec:  CodecId,
    level:  i32,
    state:  Mutex<FileState>,
}

impl FileEngine {
    pub fn open<P: AsRef<Path>>(path: P, access: FileAccess, codec: CodecId, level: i32) -> EngineResult<Self> {
        let path = path.as_ref().to_owned();
        let state = match access {
            FileAccess::TruncateWrite => None,
            FileAccess::ReadOnly => Some(load(&path)?),
            FileAccess::ReadWrite if path.exists() => Some(load(&path)?),
            FileAccess::ReadWrite => None,
        };
        let state = match state {
            Some(state) => state,
            None => {
                // Materialise an empty container so the file exists from the start.
                let mut state = FileState {
                    tree:       Tree::default(),
                    superblock: Superblock::new(),
                    created_at: Utc::now().timestamp(),
                    dirty:      false,
                };
                state.superblock = write_container(&path, codec, level, &state)?;
                info!(path = %path.display(), "created container");
                state
            }
        };
        Ok(Self { path, access, codec, level, state: Mutex::new(state) })
    }

    pub fn superblock(&self) -> Superblock {
        self.state().superblock.clone()
    }

    /// Unix timestamp recorded when the container was first created.
    pub fn created_at(&self) -> i64 {
        self.state().created_at
    }

    /// Re-read every dataset block from disk and compare it with the index.
    pub fn verify<P: AsRef<Path>>(path: P) -> EngineResult<Vec<VerifyEntry>> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        let (_, index) = read_index(&mut reader)?;
        let mut report = Vec::with_capacity(index.datasets.len());
        for record in &index.datasets {
            let error = match read_dataset(&mut reader, record) {
                Ok(_)  => None,
                Err(e) => Some(e.to_string()),
            };
            report.push(VerifyEntry { path: record.path.clone(), ok: error.is_none(), error });
        }
        Ok(report)
    }

    fn state(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().expect("lock poisoned")
    }

    fn writable(&self) -> EngineResult<()> {
        match self.access {
            FileAccess::ReadOnly => Err(EngineError::ReadOnly),
            _ => Ok(()),
        }
    }
}

/// Encode the whole hierarchy as a container image at `path`.  Returns the
/// superblock that now describes the file.
fn write_container(path: &Path, codec: CodecId, level: i32, state: &FileState) -> EngineResult<Superblock> {
    let mut superblock = state.superblock.clone();
    let mut index = StoreIndex {
        groups:      state.tree.groups().map(str::to_owned).collect(),
        datasets:    Vec::new(),
        created_at:  state.created_at,
        modified_at: Utc::now().timestamp(),
    };

    replace_container(path, |writer| {
        writer.write_all(&[0u8; SUPERBLOCK_SIZE])?; // reserved; patched below

        for (ds_path, node) in state.tree.datasets() {
            let (header, payload) =
                encode_block(BlockKind::Dataset, Some(node.tag), &node.extents, &node.data, codec, level)?;
            let offset = writer.stream_position()?;
            header.write(&mut *writer)?;
            writer.write_all(&payload)?;
            index.datasets.push(DatasetRecord {
                path:         ds_path.to_owned(),
                tag:          node.tag.code(),
                extents:      node.extents.clone(),
                offset,
                orig_size:    header.orig_size,
                comp_size:    header.comp_size,
                content_hash: content_hash(&node.data),
            });
        }

        // The index is always zstd-compressed, independent of the dataset codec.
        let (idx_header, idx_payload) =
            encode_block(BlockKind::Index, None, &[], &index.to_bytes()?, CodecId::Zstd, 3)?;
        let index_offset = writer.stream_position()?;
        idx_header.write(&mut *writer)?;
        writer.write_all(&idx_payload)?;

        superblock.index_offset = index_offset;
        superblock.index_size = (crate::block::BLOCK_HEADER_SIZE + idx_payload.len()) as u64;
        superblock.dataset_count = index.datasets.len() as u32;

        writer.seek(SeekFrom::Start(0))?;
        superblock.write(&mut *writer)?;
        Ok(())
    })?;

    debug!(
        path = %path.display(),
        datasets = index.datasets.len(),
        groups = index.groups.len(),
        "container written"
    );
    Ok(superblock)
}

/// Run `write` against a temporary file in `path`'s directory, sync it and
/// rename it over `path`.  On any error the temporary file is removed and
/// `path` keeps its previous contents.
fn replace_container<F>(path: &Path, write: F) -> EngineResult<()>
where
    F: FnOnce(&mut BufWriter<NamedTempFile>) -> EngineResult<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut writer = BufWriter::new(NamedTempFile::new_in(dir)?);
    write(&mut writer)?;

    let tmp = writer.into_inner().map_err(|e| e.into_error())?;
    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_index<R: Read + Seek>(reader: &mut R) -> EngineResult<(Superblock, StoreIndex)> {
    reader.seek(SeekFrom::Start(0))?;
    let sb = Superblock::read(&mut *reader)?;

    reader.seek(SeekFrom::Start(sb.index_offset))?;
    let header = BlockHeader::read(&mut *reader)?;
    if header.kind != BlockKind::Index {
        return Err(EngineError::Corrupt("superblock does not point at the INDEX block".into()));
    }
    let mut payload = vec![0u8; header.comp_size as usize];
    reader.read_exact(&mut payload)?;
    let index = StoreIndex::from_bytes(&decode_block(&header, &payload)?)?;
    Ok((sb, index))
}

fn read_dataset<R: Read + Seek>(reader: &mut R, record: &DatasetRecord) -> EngineResult<DatasetNode> {
    reader.seek(SeekFrom::Start(record.offset))?;
    let header = BlockHeader::read(&mut *reader)?;
    let tag = match (header.kind, header.disk_tag) {
        (BlockKind::Dataset, Some(tag)) => tag,
        _ => return Err(EngineError::Corrupt(format!("{}: not a dataset block", record.path))),
    };
    if tag.code() != record.tag || header.shape() != record.extents {
        return Err(EngineError::Corrupt(format!(
            "{}: block header disagrees with the index",
            record.path
        )));
    }
    let mut payload = vec![0u8; header.comp_size as usize];
    reader.read_exact(&mut payload)?;
    let data = decode_block(&header, &payload)?;
    if content_hash(&data) != record.content_hash {
        return Err(EngineError::Corrupt(format!("{}: content hash mismatch", record.path)));
    }
    Ok(DatasetNode { tag, extents: record.extents.clone(), data })
}

fn load(path: &Path) -> EngineResult<FileState> {
    let mut reader = BufReader::new(File::open(path)?);
    let (superblock, index) = read_index(&mut reader)?;

    let mut tree = Tree::default();
    for group in &index.groups {
        tree.insert_group(group);
    }
    for record in &index.datasets {
        if DiskTag::from_code(record.tag).is_none() {
            return Err(EngineError::Corrupt(format!("{}: unknown disk tag {}", record.path, record.tag)));
        }
        let node = read_dataset(&mut reader, record)?;
        tree.insert_dataset(&record.path, node)?;
    }
    debug!(
        path = %path.display(),
        datasets = index.datasets.len(),
        groups = index.groups.len(),
        "container loaded"
    );
    Ok(FileState { tree, superblock, created_at: index.created_at, dirty: false })
}

impl Engine for FileEngine {
    fn ensure_groups(&self, path: &str) -> EngineResult<()> {
        self.writable()?;
        let mut state = self.state();
        state.tree.ensure_groups(path)?;
        state.dirty = true;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.state().tree.exists(path)
    }

    fn list(&self) -> Vec<Entry> {
        self.state().tree.list()
    }

    fn create_space(&self, extents: &[u64]) -> EngineResult<SpaceId> {
        self.state().tree.create_space(extents)
    }

    fn space_extents(&self, space: SpaceId) -> EngineResult<Vec<u64>> {
        self.state().tree.space_extents(space)
    }

    fn close_space(&self, space: SpaceId) -> EngineResult<()> {
        self.state().tree.close_space(space)
    }

    fn open_dataset(&self, path: &str) -> EngineResult<Option<DatasetId>> {
        self.state().tree.open_dataset(path)
    }

    fn create_dataset(&self, path: &str, tag: DiskTag, space: SpaceId) -> EngineResult<DatasetId> {
        self.writable()?;
        let mut state = self.state();
        let id = state.tree.create_dataset(path, tag, space)?;
        state.dirty = true;
        Ok(id)
    }

    fn dataset_space(&self, dataset: DatasetId) -> EngineResult<SpaceId> {
        self.state().tree.dataset_space(dataset)
    }

    fn dataset_tag(&self, dataset: DatasetId) -> EngineResult<DiskTag> {
        self.state().tree.dataset_tag(dataset)
    }

    fn write_raw(&self, dataset: DatasetId, native: ElementKind, buf: &[u8]) -> EngineResult<()> {
        self.writable()?;
        let mut state = self.state();
        state.tree.write_raw(dataset, native, buf)?;
        state.dirty = true;
        Ok(())
    }

    fn read_raw(&self, dataset: DatasetId, native: ElementKind, buf: &mut [u8]) -> EngineResult<()> {
        self.state().tree.read_raw(dataset, native, buf)
    }

    fn close_dataset(&self, dataset: DatasetId) -> EngineResult<()> {
        self.state().tree.close_dataset(dataset)
    }

    fn open_handles(&self) -> usize {
        self.state().tree.open_handles()
    }

    fn flush(&self) -> EngineResult<()> {
        if self.access == FileAccess::ReadOnly {
            return Ok(());
        }
        let mut state = self.state();
        if !state.dirty {
            return Ok(());
        }
        state.superblock = write_container(&self.path, self.codec, self.level, &state)?;
        state.dirty = false;
        Ok(())
    }
}

impl Drop for FileEngine {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush container on close");
        }
    }
}

impl std::fmt::Debug for FileEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEngine")
            .field("path", &self.path)
            .field("access", &self.access)
            .field("codec", &self.codec)
            .finish()
    }
}
