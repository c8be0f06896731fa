use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use tpush_sync::{PacingConfig, UploadOptions, DEFAULT_CONCURRENCY};

/// Defaults read from `--config`. Command-line flags win over these.
///
/// ```toml
/// jobs = 16
/// cacert = "/etc/ssl/treehub-ca.pem"
/// timeout_secs = 600
///
/// [pacing]
/// initial_delay_ms = 250
/// max_retries = 5
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub jobs: Option<usize>,
    pub cacert: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub pacing: PacingSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_retries: u32,
}

impl Default for PacingSection {
    fn default() -> Self {
        let defaults = PacingConfig::default();
        Self {
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_retries: defaults.max_retries,
        }
    }
}

impl PacingSection {
    pub fn to_pacing_config(&self) -> PacingConfig {
        PacingConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            max_retries: self.max_retries,
        }
    }
}

impl PushConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        if config.pacing.backoff_factor < 1.0 {
            anyhow::bail!("pacing.backoff_factor must be at least 1.0");
        }
        Ok(config)
    }

    /// Build upload options, preferring explicit flag values.
    pub fn upload_options(
        &self,
        jobs: Option<usize>,
        timeout_secs: Option<u64>,
        dry_run: bool,
    ) -> UploadOptions {
        let mut options = UploadOptions::default()
            .with_dry_run(dry_run)
            .with_concurrency_limit(jobs.or(self.jobs).unwrap_or(DEFAULT_CONCURRENCY))
            .with_pacing(self.pacing.to_pacing_config());
        if let Some(secs) = timeout_secs.or(self.timeout_secs) {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        options
    }

    /// CA bundle from the flag, else from the file.
    pub fn cacert(&self, flag: Option<&Path>) -> Option<PathBuf> {
        flag.map(Path::to_path_buf).or_else(|| self.cacert.clone())
    }
}
