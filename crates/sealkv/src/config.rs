use sealkv_crypto::SegmentScheme;
use serde::{Deserialize, Serialize};

/// Options for opening a database file.
///
/// Loadable from a TOML `[store]` table; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Segment scheme for a new file. An existing file must match.
    pub segment_scheme: SegmentScheme,
    /// Create the file when it does not exist (default: true)
    pub create: bool,
    /// Unix permission bits for a newly created file (default: 0o600)
    pub file_mode: u32,
    /// Page cache size in bytes (default: the store's own default)
    pub cache_size: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            segment_scheme: SegmentScheme::Siv,
            create: true,
            file_mode: 0o600,
            cache_size: None,
        }
    }
}

impl Options {
    pub fn with_scheme(mut self, scheme: SegmentScheme) -> Self {
        self.segment_scheme = scheme;
        self
    }
}
