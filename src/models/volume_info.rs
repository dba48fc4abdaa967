use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sequentially numbered parts discovered next to a first volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub part_count: u32,
    pub total_size: u64,
    pub parts: Vec<PathBuf>,
}
