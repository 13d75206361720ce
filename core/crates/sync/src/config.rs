//! Synchronization settings, stored as JSON next to whatever else the host keeps on disk.

use std::{fs, io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("failed to access config file: {0}")]
	Io(#[from] io::Error),
	#[error("malformed config file: {0}")]
	Json(#[from] serde_json::Error),
	#[error("unknown config version: {0}")]
	UnknownVersion(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Config schema version
	pub version: u32,

	/// Remote table holding the bookmarks
	pub table: String,

	/// Name of the push channel, only shows up in logs
	pub channel: String,

	/// Reconciliation poll interval
	pub poll_interval_ms: u64,

	/// Report deletes that matched no row as not found
	pub strict_delete: bool,

	/// Capacity of the channel feeding the reducer
	pub event_buffer: usize,

	/// Tracing filter used when `RUST_LOG` is not set
	pub log_level: String,
}

impl SyncConfig {
	pub const VERSION: u32 = 1;

	#[must_use]
	pub fn poll_interval(&self) -> Duration {
		// tokio intervals can't tick at zero
		Duration::from_millis(self.poll_interval_ms.max(1))
	}

	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		info!(?path, "Loading sync config");
		let mut config = serde_json::from_str::<Self>(&fs::read_to_string(path)?)?;

		if config.version < Self::VERSION {
			info!(
				from = config.version,
				to = Self::VERSION,
				"Migrating sync config"
			);
			config.migrate()?;
			config.save(path)?;
		} else if config.version > Self::VERSION {
			return Err(ConfigError::UnknownVersion(config.version));
		}

		Ok(config)
	}

	pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		if path.exists() {
			return Self::load_from(path);
		}

		warn!(?path, "No sync config found, creating default");
		let config = Self::default();
		config.save(path)?;

		Ok(config)
	}

	pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
		let path = path.as_ref();

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}

		fs::write(path, serde_json::to_string_pretty(self)?)?;
		info!(?path, "Saved sync config");

		Ok(())
	}

	fn migrate(&mut self) -> Result<(), ConfigError> {
		match self.version {
			// v0 predates strict deletes and the event buffer, serde defaults already filled them
			0 => {
				self.version = 1;
				Ok(())
			}
			1 => Ok(()),
			v => Err(ConfigError::UnknownVersion(v)),
		}
	}
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			version: Self::VERSION,
			table: "bookmarks".to_string(),
			channel: "bookmarks-realtime".to_string(),
			poll_interval_ms: 3000,
			strict_delete: false,
			event_buffer: 256,
			log_level: "info".to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[test]
	fn creates_defaults_when_missing() -> Result<(), ConfigError> {
		let dir = tempdir()?;
		let path = dir.path().join("nested").join("sync.json");

		let config = SyncConfig::load_or_create(&path)?;

		assert_eq!(config, SyncConfig::default());
		assert!(path.exists());
		assert_eq!(SyncConfig::load_from(&path)?, config);

		Ok(())
	}

	#[test]
	fn migrates_old_versions_and_fills_missing_fields() -> Result<(), ConfigError> {
		let dir = tempdir()?;
		let path = dir.path().join("sync.json");
		fs::write(&path, r#"{ "version": 0, "poll_interval_ms": 500 }"#)?;

		let config = SyncConfig::load_from(&path)?;

		assert_eq!(config.version, SyncConfig::VERSION);
		assert_eq!(config.poll_interval(), Duration::from_millis(500));
		assert_eq!(config.table, "bookmarks");
		assert!(!config.strict_delete);

		// the migrated file was written back
		let on_disk = serde_json::from_str::<SyncConfig>(&fs::read_to_string(&path)?)?;
		assert_eq!(on_disk.version, SyncConfig::VERSION);

		Ok(())
	}

	#[test]
	fn rejects_unknown_versions() -> Result<(), ConfigError> {
		let dir = tempdir()?;
		let path = dir.path().join("sync.json");
		fs::write(&path, r#"{ "version": 7 }"#)?;

		assert!(matches!(
			SyncConfig::load_from(&path),
			Err(ConfigError::UnknownVersion(7))
		));

		Ok(())
	}

	#[test]
	fn zero_interval_is_clamped() {
		let config = SyncConfig {
			poll_interval_ms: 0,
			..SyncConfig::default()
		};

		assert_eq!(config.poll_interval(), Duration::from_millis(1));
	}
}
