//! Typed, self-describing storage of numeric containers in a hierarchical
//! `.nbx` file.
//!
//! The entry point is [`Store`]: it resolves how an element type is encoded
//! on disk, derives rank and extents from the container's shape, and moves
//! data through an [`Engine`] with scoped handles.

pub mod block;
pub mod codec;
pub mod dtype;
pub mod engine;
pub mod error;
pub mod index;
pub mod mat;
pub mod path;
pub mod store;
pub mod superblock;

pub use codec::CodecId;
pub use dtype::{DiskTag, Element, ElementKind, LogicalShape, OnDiskEncoding, Point2, Slot};
pub use engine::{Engine, Entry, FileAccess, FileEngine, MemoryEngine};
pub use error::{EngineError, Result, StoreError};
pub use mat::{Depth, Mat, MatType};
pub use store::{EmptyWrite, MissingPolicy, Persist, RawDataset, Store, StoreOptions};
pub use superblock::Superblock;
