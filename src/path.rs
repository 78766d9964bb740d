//! Hierarchical dataset paths.
//!
//! A path is slash-delimited and absolute: `/group/sub/dataset`.  Every
//! segment but the last names a group; the last names a dataset.  Matrices
//! occupy three sibling datasets: `<path>`, `<path>_type` and
//! `<path>_channels`.

use crate::error::{Result, StoreError};

pub const TYPE_SUFFIX: &str = "_type";
pub const CHANNELS_SUFFIX: &str = "_channels";

pub fn validate(path: &str) -> Result<()> {
    let invalid = |reason| Err(StoreError::InvalidPath { path: path.to_owned(), reason });
    if !path.starts_with('/') {
        return invalid("must start with '/'");
    }
    if path.len() == 1 {
        return invalid("the root group cannot hold a dataset");
    }
    if path.ends_with('/') {
        return invalid("must not end with '/'");
    }
    if path[1..].split('/').any(|seg| seg.is_empty()) {
        return invalid("empty segment");
    }
    Ok(())
}

/// Every group along `path`, outermost first: `/a/b/c` → `/a`, `/a/b`.
pub fn group_prefixes(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(|(i, _)| i)
        .filter(|&i| i > 0)
        .map(move |i| &path[..i])
}

/// Parent group of `path`; `/` for top-level datasets.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i)        => &path[..i],
    }
}

pub fn type_path(path: &str) -> String {
    format!("{path}{TYPE_SUFFIX}")
}

pub fn channels_path(path: &str) -> String {
    format!("{path}{CHANNELS_SUFFIX}")
}
