use crate::subscriber::sync::watermark::{StopSignal, WatermarkError, WatermarkStore};
use crate::transaction::Round;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Watermark held in memory only; lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
	watermark: AtomicU64,
}

impl InMemoryWatermarkStore {
	pub fn new(initial: Round) -> Self {
		Self {
			watermark: AtomicU64::new(initial),
		}
	}
}

#[async_trait::async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
	async fn get(&self) -> Result<Round, WatermarkError> {
		Ok(self.watermark.load(Ordering::SeqCst))
	}

	async fn set(&self, round: Round) -> Result<(), WatermarkError> {
		self.watermark.store(round, Ordering::SeqCst);
		Ok(())
	}
}

/// On-disk shape of the watermark file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkFile {
	watermark: Round,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	updated_at: Option<String>,
}

/// File-based implementation of WatermarkStore
///
/// Writes `{"watermark": N, "updatedAt": "<rfc3339>"}` to a temporary sibling file and renames
/// it over the target, so a crash mid-write leaves the previous watermark intact.
pub struct FileWatermarkStore {
	path: PathBuf,
	default_round: Round,
}

impl FileWatermarkStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			default_round: 0,
		}
	}

	/// Watermark returned while the file does not exist yet.
	pub fn with_default_round(mut self, default_round: Round) -> Self {
		self.default_round = default_round;
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn temp_path(&self) -> PathBuf {
		let mut name = self
			.path
			.file_name()
			.map(|n| n.to_os_string())
			.unwrap_or_else(|| "watermark".into());
		name.push(".tmp");
		self.path.with_file_name(name)
	}
}

#[async_trait::async_trait]
impl WatermarkStore for FileWatermarkStore {
	async fn get(&self) -> Result<Round, WatermarkError> {
		let content = match tokio::fs::read_to_string(&self.path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(
					"No watermark file at {}, starting from {}",
					self.path.display(),
					self.default_round
				);
				return Ok(self.default_round);
			}
			Err(e) => return Err(e.into()),
		};

		let file: WatermarkFile = serde_json::from_str(&content)?;
		Ok(file.watermark)
	}

	async fn set(&self, round: Round) -> Result<(), WatermarkError> {
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent).await?;
			}
		}

		let file = WatermarkFile {
			watermark: round,
			updated_at: Some(chrono::Utc::now().to_rfc3339()),
		};
		let temp_path = self.temp_path();
		tokio::fs::write(&temp_path, serde_json::to_string_pretty(&file)?).await?;
		tokio::fs::rename(&temp_path, &self.path).await?;

		debug!("Saved watermark {} to {}", round, self.path.display());
		Ok(())
	}
}

/// Restricts another store to a fixed round range.
///
/// `start_round` is the first round to process: `get` never reports less than
/// `start_round - 1`. Once `end_round` has been recorded, `set` returns a stop signal, and so
/// does every later `get`, so a restarted subscriber never processes past the range.
pub struct BoundedWatermarkStore {
	inner: Arc<dyn WatermarkStore>,
	start_round: Option<Round>,
	end_round: Option<Round>,
}

impl BoundedWatermarkStore {
	pub fn new(inner: Arc<dyn WatermarkStore>) -> Self {
		Self {
			inner,
			start_round: None,
			end_round: None,
		}
	}

	pub fn with_start_round(mut self, start_round: Round) -> Self {
		self.start_round = Some(start_round);
		self
	}

	pub fn with_end_round(mut self, end_round: Round) -> Self {
		self.end_round = Some(end_round);
		self
	}
}

#[async_trait::async_trait]
impl WatermarkStore for BoundedWatermarkStore {
	async fn get(&self) -> Result<Round, WatermarkError> {
		let stored = self.inner.get().await?;
		if let Some(end) = self.end_round {
			if stored >= end {
				return Err(WatermarkError::Stop(StopSignal::new(
					stored,
					format!("end round {} already reached", end),
				)));
			}
		}
		let floor = self.start_round.map(|s| s.saturating_sub(1)).unwrap_or(0);
		Ok(stored.max(floor))
	}

	async fn set(&self, round: Round) -> Result<(), WatermarkError> {
		self.inner.set(round).await?;

		match self.end_round {
			Some(end) if round >= end => {
				info!("Reached end round {}", end);
				Err(WatermarkError::Stop(StopSignal::new(
					round,
					format!("end round {} reached", end),
				)))
			}
			_ => Ok(()),
		}
	}
}
