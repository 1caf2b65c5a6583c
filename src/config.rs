use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::detection::FaceSelection;
use crate::errors::{AppError, AppResult};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;
pub const DEFAULT_DISTANCE_SCALE: f64 = 100.0;
pub const DEFAULT_CAPTURE_COUNT: u32 = 5;
pub const DEFAULT_INTER_CAPTURE_DELAY_MILLIS: u64 = 500;
pub const DEFAULT_FRAME_TIMEOUT_MILLIS: u64 = 5_000;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub similarity_threshold: Option<f64>,
    pub distance_scale: Option<f64>,
    pub capture_count: Option<u32>,
    pub inter_capture_delay_millis: Option<u64>,
    pub frame_timeout_millis: Option<u64>,
    pub selection_policy: Option<FaceSelection>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub similarity_threshold: f64,
    pub distance_scale: f64,
    pub capture_count: u32,
    pub inter_capture_delay: Duration,
    pub frame_timeout: Duration,
    pub selection_policy: FaceSelection,
}

impl ResolvedConfig {
    /// Applies defaults, then validates. A threshold outside `[0, 1]`, a
    /// non-positive distance scale, or a zero capture count is a
    /// misconfiguration that must fail here, before any session runs with
    /// it.
    pub fn from_raw(raw: ConfigFile) -> AppResult<Self> {
        let similarity_threshold = raw
            .similarity_threshold
            .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(AppError::ConfigValue {
                field: "similarity_threshold",
                message: format!("must be within [0, 1], got {similarity_threshold}"),
            });
        }

        let distance_scale = raw.distance_scale.unwrap_or(DEFAULT_DISTANCE_SCALE);
        if !distance_scale.is_finite() || distance_scale <= 0.0 {
            return Err(AppError::ConfigValue {
                field: "distance_scale",
                message: format!("must be a positive finite number, got {distance_scale}"),
            });
        }

        let capture_count = raw.capture_count.unwrap_or(DEFAULT_CAPTURE_COUNT);
        if capture_count == 0 {
            return Err(AppError::ConfigValue {
                field: "capture_count",
                message: "at least one capture is required".into(),
            });
        }

        Ok(Self {
            similarity_threshold,
            distance_scale,
            capture_count,
            inter_capture_delay: Duration::from_millis(
                raw.inter_capture_delay_millis
                    .unwrap_or(DEFAULT_INTER_CAPTURE_DELAY_MILLIS),
            ),
            frame_timeout: Duration::from_millis(
                raw.frame_timeout_millis.unwrap_or(DEFAULT_FRAME_TIMEOUT_MILLIS),
            ),
            selection_policy: raw.selection_policy.unwrap_or_default(),
        })
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            distance_scale: DEFAULT_DISTANCE_SCALE,
            capture_count: DEFAULT_CAPTURE_COUNT,
            inter_capture_delay: Duration::from_millis(DEFAULT_INTER_CAPTURE_DELAY_MILLIS),
            frame_timeout: Duration::from_millis(DEFAULT_FRAME_TIMEOUT_MILLIS),
            selection_policy: FaceSelection::FirstDetected,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }

    pub fn into_contents(self) -> ConfigFile {
        self.contents
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

/// Reads the first path that exists; missing paths are skipped, anything
/// else (unreadable file, invalid TOML) is an error. Path lists come from
/// the embedding application; this crate hardcodes no deployment locations.
pub fn load_from_paths(paths: &[PathBuf]) -> AppResult<Option<LoadedConfig>> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| AppError::ConfigParse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig::new(parsed, path.clone())));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(AppError::ConfigRead {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(paths: &[PathBuf]) -> AppResult<ResolvedConfigWithSource> {
    match load_from_paths(paths)? {
        Some(entry) => {
            let source = entry.source.clone();
            Ok(ResolvedConfigWithSource {
                resolved: ResolvedConfig::from_raw(entry.into_contents())?,
                source: Some(source),
            })
        }
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}
