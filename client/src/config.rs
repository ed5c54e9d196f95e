use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use shared::SampleMethod;

use crate::error::ClientError;

pub const DEFAULT_CONFIG_PATH: &str = "mapchat_config.json";
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// Client settings, loaded from `mapchat_config.json` and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub places_radius_km: f64,
    pub features_radius_km: f64,
    pub streaming: bool,
    pub stream_idle_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub sampling: Option<Sampling>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            places_radius_km: 10.0,
            features_radius_km: 2.0,
            streaming: true,
            stream_idle_timeout_secs: None,
            request_timeout_secs: None,
            sampling: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Sampling {
    Interval {
        #[serde(default = "default_interval_km")]
        interval_km: f64,
    },
    Nth {
        #[serde(default = "default_every_nth")]
        every_nth: u32,
    },
}

impl Sampling {
    pub fn method(self) -> SampleMethod {
        match self {
            Sampling::Interval { .. } => SampleMethod::Interval,
            Sampling::Nth { .. } => SampleMethod::Nth,
        }
    }
}

fn default_interval_km() -> f64 {
    5.0
}

fn default_every_nth() -> u32 {
    10
}

impl ClientConfig {
    /// Reads `path`, or the default file when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        if !path.exists() {
            if explicit {
                return Err(ClientError::Config(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
            tracing::debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|err| ClientError::Config(format!("{}: {err}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| ClientError::Config(format!("{}: {err}", path.display())))?;
        tracing::info!("loaded configuration from {}", path.display());
        config.validated()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn validated(self) -> Result<Self, ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::Config("base_url must not be empty".into()));
        }
        for (label, radius) in [
            ("places_radius_km", self.places_radius_km),
            ("features_radius_km", self.features_radius_km),
        ] {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(ClientError::Config(format!(
                    "{label} must be a positive number, got {radius}"
                )));
            }
        }
        match self.sampling {
            Some(Sampling::Interval { interval_km })
                if !interval_km.is_finite() || interval_km <= 0.0 =>
            {
                return Err(ClientError::Config(format!(
                    "sampling interval_km must be a positive number, got {interval_km}"
                )));
            }
            Some(Sampling::Nth { every_nth: 0 }) => {
                return Err(ClientError::Config(
                    "sampling every_nth must be at least 1".into(),
                ));
            }
            _ => {}
        }
        Ok(self)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
