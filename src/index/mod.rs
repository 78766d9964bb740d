use serde::{Deserialize, Serialize};

/// Location and identity of one stored dataset.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DatasetRecord {
    pub path:         String,
    /// `DiskTag` code.
    pub tag:          u8,
    pub extents:      Vec<u64>,
    /// Archive offset of the dataset's block header.
    pub offset:       u64,
    pub orig_size:    u64,
    pub comp_size:    u64,
    /// BLAKE3 of the uncompressed payload, hex encoded.
    pub content_hash: String,
}

/// The INDEX block: every group and dataset in the container.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StoreIndex {
    pub groups:      Vec<String>,
    pub datasets:    Vec<DatasetRecord>,
    /// Unix seconds.
    pub created_at:  i64,
    #[serde(default)]
    pub modified_at: i64,
}

impl StoreIndex {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

pub fn content_hash(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_modified_at_defaults_to_zero() {
        let json = br#"{"groups":["/a"],"datasets":[],"created_at":5}"#;
        let idx = StoreIndex::from_bytes(json).unwrap();
        assert_eq!(idx.created_at, 5);
        assert_eq!(idx.modified_at, 0);
        assert_eq!(idx.groups, vec!["/a".to_string()]);
    }

    #[test]
    fn hash_is_hex_blake3() {
        let h = content_hash(b"abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hex::encode(blake3::hash(b"abc").as_bytes()));
    }
}
