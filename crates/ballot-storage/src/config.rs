use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ballot_types::EncodingFormat;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Configuration of the storage core.
///
/// Everything except `path` has a sensible default, so a minimal TOML file
/// only names the database directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the embedded keyspace.
    pub path: PathBuf,
    /// Artifact encoding for stored values.
    #[serde(default)]
    pub encoding: EncodingFormat,
    /// Age after which a reservation is considered abandoned.
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,
    /// How often the reaper looks for stale reservations.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    /// How often the lifecycle monitor checks for processes past their end
    /// time.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Bound on the in-memory metadata cache.
    #[serde(default = "default_metadata_cache_capacity")]
    pub metadata_cache_capacity: u64,
}

fn default_reservation_ttl_secs() -> u64 {
    5 * 60
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_metadata_cache_capacity() -> u64 {
    256
}

impl StorageConfig {
    /// Configuration with all defaults for a keyspace at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encoding: EncodingFormat::default(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            metadata_cache_capacity: default_metadata_cache_capacity(),
        }
    }

    /// Reservation time-to-live as a [`Duration`].
    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }

    /// Reaper tick interval as a [`Duration`].
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    /// Monitor tick interval as a [`Duration`].
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

/// Reads a TOML file as a specific type.
pub fn from_toml_path<P: AsRef<Path>, R: DeserializeOwned>(path: P) -> anyhow::Result<R> {
    let mut contents = String::new();
    {
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
    }
    tracing::debug!(
        size_in_bytes = contents.len(),
        "Parsing storage config file"
    );

    let result: R = toml::from_str(&contents)?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let mut config_file = NamedTempFile::new().unwrap();
        config_file.write_all(br#"path = "/tmp/ballots""#).unwrap();

        let config: StorageConfig = from_toml_path(config_file.path()).unwrap();
        assert_eq!(config, StorageConfig::new("/tmp/ballots"));
        assert_eq!(config.reservation_ttl(), Duration::from_secs(300));
        assert_eq!(config.reaper_interval(), Duration::from_secs(60));
        assert_eq!(config.monitor_interval(), Duration::from_secs(30));
    }

    #[test]
    fn full_config_round_trips() {
        let mut config_file = NamedTempFile::new().unwrap();
        config_file
            .write_all(
                br#"
                path = "/data/sequencer"
                encoding = "json"
                reservation_ttl_secs = 120
                reaper_interval_secs = 15
                monitor_interval_secs = 5
                metadata_cache_capacity = 8
            "#,
            )
            .unwrap();

        let config: StorageConfig = from_toml_path(config_file.path()).unwrap();
        assert_eq!(config.encoding, EncodingFormat::Json);
        assert_eq!(config.reservation_ttl_secs, 120);
        assert_eq!(config.metadata_cache_capacity, 8);
    }
}
