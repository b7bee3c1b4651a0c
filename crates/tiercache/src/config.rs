use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::key::filename_for_key;

/// Configuration shared by all caches of an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The well-known directory all cache directories live under.
    pub cache_root: PathBuf,

    /// How long bulk operations spanning all formats (`remove_all`,
    /// `remove_all_for_key`) wait for their disk fan-out before
    /// logging and moving on.
    #[serde(with = "humantime_serde")]
    pub bulk_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_root: std::env::temp_dir().join("tiercache"),
            bulk_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// The directory backing a whole cache: `<root>/<cache-name>`.
    pub fn cache_dir(&self, cache_name: &str) -> PathBuf {
        self.cache_root.join(filename_for_key(cache_name))
    }

    /// The directory backing one format of a cache:
    /// `<root>/<cache-name>/<format-name>`.
    pub fn format_dir(&self, cache_name: &str, format_name: &str) -> PathBuf {
        self.cache_dir(cache_name).join(filename_for_key(format_name))
    }
}
