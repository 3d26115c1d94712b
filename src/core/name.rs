//! Entry names and archive paths
//!
//! Names live in a fixed 256-byte field inside every slot: one length byte
//! followed by up to 255 bytes of UTF-8, zero padded. Paths are never stored;
//! they are resolved against the directory tree one component at a time.

use crate::error::{BafError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters that can never appear in a name
const FORBIDDEN: &[char] = &['/', '\\', '\n', '\r', '\0'];

/// Validated entry name
///
/// # Rules
/// - 1 to 255 bytes of UTF-8
/// - No `/`, `\`, newline, carriage return or NUL
///
/// # Examples
///
/// ```
/// use baf_rs::ItemName;
///
/// let name = ItemName::new("report.txt").unwrap();
/// assert_eq!(name.as_str(), "report.txt");
///
/// assert!(ItemName::new("").is_err());
/// assert!(ItemName::new("a/b").is_err());
/// assert!(ItemName::new("x".repeat(256)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemName(String);

impl ItemName {
    /// Maximum encoded length in bytes
    pub const MAX_LEN: usize = 255;

    /// Size of the encoded name field (length byte + name bytes)
    pub const FIELD_SIZE: usize = 1 + Self::MAX_LEN;

    /// Create a new validated name
    ///
    /// # Errors
    ///
    /// `Capacity` if the name is longer than 255 bytes, `InvalidName` for
    /// empty names or forbidden characters.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(ItemName(name))
    }

    fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(BafError::InvalidName {
                name: name.to_string(),
                reason: "name cannot be empty",
            });
        }

        if name.len() > Self::MAX_LEN {
            return Err(BafError::Capacity { len: name.len() });
        }

        if name.contains(FORBIDDEN) {
            return Err(BafError::InvalidName {
                name: name.to_string(),
                reason: "name cannot contain '/', '\\', line breaks or NUL",
            });
        }

        Ok(())
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to String
    pub fn into_string(self) -> String {
        self.0
    }

    /// Encode into the fixed name field
    pub fn encode(&self, field: &mut [u8; Self::FIELD_SIZE]) {
        let bytes = self.0.as_bytes();
        field.fill(0);
        // Validated length always fits in one byte
        field[0] = bytes.len() as u8;
        field[1..1 + bytes.len()].copy_from_slice(bytes);
    }

    /// Decode a name field
    ///
    /// Padding beyond the stored length is ignored.
    pub fn decode(field: &[u8]) -> Result<Self> {
        if field.len() < Self::FIELD_SIZE {
            return Err(BafError::Format(format!(
                "Truncated name field: {} bytes",
                field.len()
            )));
        }

        let len = field[0] as usize;
        if len == 0 {
            return Err(BafError::Format("Live entry has an empty name".to_string()));
        }

        let name = std::str::from_utf8(&field[1..1 + len])
            .map_err(|e| BafError::Format(format!("Entry name is not valid UTF-8: {}", e)))?;

        // A name read from disk may contain characters we would refuse to write;
        // keep it so the entry stays reachable by id.
        Ok(ItemName(name.to_string()))
    }
}

impl fmt::Display for ItemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ItemName> for String {
    fn from(name: ItemName) -> String {
        name.0
    }
}

impl TryFrom<&str> for ItemName {
    type Error = BafError;

    fn try_from(value: &str) -> Result<Self> {
        ItemName::new(value)
    }
}

impl TryFrom<String> for ItemName {
    type Error = BafError;

    fn try_from(value: String) -> Result<Self> {
        ItemName::new(value)
    }
}

/// Normalized path inside an archive
///
/// Parsing splits on `/`, drops empty and `.` components and lets `..` pop
/// the previous component. `..` at the root stays at the root.
///
/// ```
/// use baf_rs::ArchivePath;
///
/// let path = ArchivePath::parse("/docs/./old/../report.txt").unwrap();
/// assert_eq!(path.to_string(), "/docs/report.txt");
/// assert!(ArchivePath::parse("/").unwrap().is_root());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ArchivePath {
    components: Vec<ItemName>,
}

impl ArchivePath {
    /// The root path
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(path: &str) -> Result<Self> {
        let mut components = Vec::new();

        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                name => components.push(ItemName::new(name)?),
            }
        }

        Ok(ArchivePath { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[ItemName] {
        &self.components
    }

    /// Last component, `None` for the root
    pub fn file_name(&self) -> Option<&ItemName> {
        self.components.last()
    }

    /// Path without its last component, `None` for the root
    pub fn parent(&self) -> Option<ArchivePath> {
        let (_, rest) = self.components.split_last()?;
        Some(ArchivePath {
            components: rest.to_vec(),
        })
    }

    /// Append a component
    pub fn join(&self, name: ItemName) -> ArchivePath {
        let mut components = self.components.clone();
        components.push(name);
        ArchivePath { components }
    }
}

impl fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }

        for component in &self.components {
            write!(f, "/{}", component)?;
        }

        Ok(())
    }
}

impl std::str::FromStr for ArchivePath {
    type Err = BafError;

    fn from_str(s: &str) -> Result<Self> {
        ArchivePath::parse(s)
    }
}

impl FromIterator<ItemName> for ArchivePath {
    fn from_iter<T: IntoIterator<Item = ItemName>>(iter: T) -> Self {
        ArchivePath {
            components: iter.into_iter().collect(),
        }
    }
}
