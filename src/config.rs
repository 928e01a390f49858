use std::path::PathBuf;

/// Runtime settings for the `gigslot` binary, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the journal (`GIGSLOT_DATA_DIR`, default `./data`).
    pub data_dir: PathBuf,
    /// Journal file name inside `data_dir` (`GIGSLOT_JOURNAL`).
    pub journal_name: String,
    /// Compact once this many events were appended since the last
    /// compaction (`GIGSLOT_COMPACT_THRESHOLD`).
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            journal_name: "bookings.journal".into(),
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("GIGSLOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            journal_name: lookup("GIGSLOT_JOURNAL").unwrap_or(defaults.journal_name),
            compact_threshold: lookup("GIGSLOT_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(&self.journal_name)
    }
}
