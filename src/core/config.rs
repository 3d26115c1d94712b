//! Archive session configuration
//!
//! Nothing here is stored in the archive. Capacities only affect segments
//! created by this session; existing segments keep the capacities they were
//! written with.

use crate::error::{BafError, Result};
use crate::header::SUPPORTED_VERSIONS;
use crate::table::segment::segment_size;
use serde::{Deserialize, Serialize};

/// Default directory and file slots per new segment
pub const DEFAULT_SLOTS_PER_SEGMENT: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Header version written by `create`
    pub version: u32,

    /// Directory slots in every segment created after the first
    pub dirs_per_segment: u32,

    /// File slots in every segment created after the first
    pub files_per_segment: u32,

    /// Directory slots in the segment written by `create`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_segment_dirs: Option<u32>,

    /// File slots in the segment written by `create`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_segment_files: Option<u32>,

    /// Refuse to create two live siblings with the same name
    pub reject_duplicate_names: bool,

    /// Sync storage between the write steps of a mutation
    pub sync_barriers: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            version: crate::header::CURRENT_VERSION,
            dirs_per_segment: DEFAULT_SLOTS_PER_SEGMENT,
            files_per_segment: DEFAULT_SLOTS_PER_SEGMENT,
            first_segment_dirs: None,
            first_segment_files: None,
            reject_duplicate_names: true,
            sync_barriers: true,
        }
    }
}

impl ArchiveConfig {
    /// Parse a TOML document; missing keys take their defaults
    ///
    /// ```
    /// use baf_rs::ArchiveConfig;
    ///
    /// let config = ArchiveConfig::from_toml_str("dirs_per_segment = 16").unwrap();
    /// assert_eq!(config.dirs_per_segment, 16);
    /// assert_eq!(config.files_per_segment, 1024);
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ArchiveConfig =
            toml::from_str(s).map_err(|e| BafError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML document
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| BafError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(BafError::Config(format!(
                "unsupported format version {}",
                self.version
            )));
        }

        // The first segment may lack a slot kind, later ones must hold both
        if self.dirs_per_segment == 0 {
            return Err(BafError::Config(
                "dirs_per_segment must be at least 1".to_string(),
            ));
        }

        if self.files_per_segment == 0 {
            return Err(BafError::Config(
                "files_per_segment must be at least 1".to_string(),
            ));
        }

        let (first_dirs, first_files) = self.first_segment_capacities();
        for (dirs, files) in [
            (self.dirs_per_segment, self.files_per_segment),
            (first_dirs, first_files),
        ] {
            if segment_size(dirs, files).is_none() {
                return Err(BafError::Config(format!(
                    "segment with {} directory and {} file slots is too large",
                    dirs, files
                )));
            }
        }

        Ok(())
    }

    /// Capacities of the segment written by `create`
    pub fn first_segment_capacities(&self) -> (u32, u32) {
        (
            self.first_segment_dirs.unwrap_or(self.dirs_per_segment),
            self.first_segment_files.unwrap_or(self.files_per_segment),
        )
    }

    /// Capacities of every later segment
    pub fn segment_capacities(&self) -> (u32, u32) {
        (self.dirs_per_segment, self.files_per_segment)
    }
}
