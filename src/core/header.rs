use crate::error::{BafError, Result};

pub const MAGIC: [u8; 8] = *b"BASICARC";
pub const HEADER_SIZE: usize = 256;
pub const SUPPORTED_VERSIONS: &[u32] = &[1];
pub const CURRENT_VERSION: u32 = 1;

/// Archive header (offset 0, 256 bytes)
///
/// ```text
/// 0..8     magic "BASICARC"
/// 8..12    version (u32 LE)
/// 12..256  reserved, zero
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format version
    pub version: u32,
}

impl Header {
    /// Create a header for the current format version
    pub fn new() -> Self {
        Header {
            version: CURRENT_VERSION,
        }
    }

    /// Create a header for a specific version, rejecting unsupported ones
    pub fn with_version(version: u32) -> Result<Self> {
        let header = Header { version };
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(BafError::Format(format!(
                "Unsupported format version: {}",
                self.version
            )));
        }

        Ok(())
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0..8].copy_from_slice(&MAGIC);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());

        bytes
    }

    /// Deserialize header from bytes
    ///
    /// Reserved bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(BafError::Format(format!(
                "Truncated header: {} bytes, expected {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        if bytes[0..8] != MAGIC {
            return Err(BafError::Format(format!(
                "Invalid magic number: got {:X?}, expected {:X?}",
                &bytes[0..8],
                MAGIC
            )));
        }

        let header = Header {
            version: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        };

        header.validate()?;

        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}
