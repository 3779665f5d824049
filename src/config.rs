//! Client configuration.

#[cfg(feature = "fs")]
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "fs")]
use tracing::{debug, error};

/// Scan parameters passed to the adapter when a scan session starts. Times
/// are in milliseconds.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ScanParams {
    /// Duration of one scan window.
    pub window_ms: u32,
    /// Time between the starts of consecutive scan windows.
    pub interval_ms: u32,
    /// Total scan duration. The adapter reports scan completion once it
    /// elapses.
    pub duration_ms: u32,
    /// Request scan responses from advertisers.
    pub active: bool,
}

impl ScanParams {
    /// Returns the scan window.
    #[inline]
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms as u64)
    }

    /// Returns the scan interval.
    #[inline]
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms as u64)
    }

    /// Returns the total scan duration.
    #[inline]
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms as u64)
    }

    /// Returns a copy of the parameters with a different total duration.
    #[inline]
    #[must_use]
    pub const fn with_duration(mut self, ms: u32) -> Self {
        self.duration_ms = ms;
        self
    }
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            window_ms: 30,
            interval_ms: 30,
            duration_ms: 2000,
            active: true,
        }
    }
}

/// Client configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Config {
    /// Default scan parameters.
    pub scan: ScanParams,
}

#[cfg(feature = "fs")]
impl Config {
    const FILE_NAME: &'static str = "config.json";

    /// Loads the configuration from a JSON file. Returns [`None`] if the file
    /// does not exist or cannot be parsed.
    #[must_use]
    pub fn load(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound) => return None,
            Err(e) => {
                error!("Failed to read: {} ({e})", path.display());
                return None;
            }
        };
        let cfg = serde_json::from_str(&s)
            .map_err(|e| error!("Invalid config file: {} ({e})", path.display()))
            .ok()?;
        debug!("Loaded: {}", path.display());
        Some(cfg)
    }

    /// Saves the configuration to a JSON file, creating parent directories
    /// as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let s = serde_json::to_string_pretty(self)?;
        std::fs::write(path, s)?;
        debug!("Wrote: {}", path.display());
        Ok(())
    }

    /// Returns the configuration file path in the current user's config
    /// directory or [`None`] if the directory cannot be determined.
    #[must_use]
    pub fn per_user_path(app: impl AsRef<Path>) -> Option<PathBuf> {
        Some(dirs::config_dir()?.join(app).join(Self::FILE_NAME))
    }

    /// Loads the configuration from the current user's config directory,
    /// falling back to the defaults.
    #[must_use]
    pub fn per_user(app: impl AsRef<Path>) -> Self {
        Self::per_user_path(app)
            .and_then(Self::load)
            .unwrap_or_default()
    }
}
