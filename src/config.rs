use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::Deserialize;

use crate::domain::{FieldSelection, SpatialReferenceId};
use crate::error::AgsError;
use crate::resolver::ExportSettings;
use crate::runner::QueryOptions;
use crate::service::HttpOptions;

pub const CONFIG_FILE_NAME: &str = "ags-export.json";
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_THRESHOLD: usize = 10;
pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub out_sr: Option<u32>,
    #[serde(default)]
    pub out_fields: Option<OutFieldsEntry>,
    #[serde(default)]
    pub no_geometry: Option<bool>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_threshold: Option<usize>,
    #[serde(default)]
    pub force: Option<bool>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub retries: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OutFieldsEntry {
    Shorthand(String),
    List(Vec<String>),
}

// Command-line values; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_dir: Option<String>,
    pub out_sr: Option<u32>,
    pub out_fields: Option<String>,
    pub no_geometry: bool,
    pub chunk_size: Option<usize>,
    pub chunk_threshold: Option<usize>,
    pub force: bool,
    pub retries: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub output_dir: Utf8PathBuf,
    pub out_sr: SpatialReferenceId,
    pub out_fields: FieldSelection,
    pub no_geometry: bool,
    pub chunk_size: NonZeroUsize,
    pub chunk_threshold: usize,
    pub force: bool,
    pub max_depth: usize,
    pub http: HttpOptions,
}

impl ResolvedConfig {
    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            output_dir: self.output_dir.clone(),
            query: QueryOptions {
                out_fields: self.out_fields.clone(),
                return_geometry: !self.no_geometry,
                out_sr: self.out_sr,
            },
            chunk_size: self.chunk_size,
            chunk_threshold: self.chunk_threshold,
            force: self.force,
            max_depth: self.max_depth,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, AgsError> {
        let config = match path.map(PathBuf::from).or_else(Self::discover) {
            Some(config_path) => Self::load(config_path)?,
            None => Config::default(),
        };
        Self::resolve_config(config, overrides)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "ags-export")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    fn load(config_path: PathBuf) -> Result<Config, AgsError> {
        let content = fs::read_to_string(&config_path)
            .map_err(|_| AgsError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| AgsError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, AgsError> {
        let out_fields = match overrides.out_fields {
            Some(value) => value.parse()?,
            None => match config.out_fields {
                Some(OutFieldsEntry::Shorthand(value)) => value.parse()?,
                Some(OutFieldsEntry::List(fields)) => fields.join(",").parse()?,
                None => FieldSelection::All,
            },
        };

        let chunk_size = overrides
            .chunk_size
            .or(config.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        let chunk_size = NonZeroUsize::new(chunk_size)
            .ok_or_else(|| AgsError::InvalidConfig("chunk_size must be at least 1".to_string()))?;

        let output_dir = overrides
            .output_dir
            .or(config.output_dir)
            .unwrap_or_else(|| ".".to_string());

        let defaults = HttpOptions::default();
        let http = HttpOptions {
            timeout: overrides
                .timeout_secs
                .or(config.timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retries: overrides
                .retries
                .or(config.retries)
                .unwrap_or(defaults.retries),
        };

        Ok(ResolvedConfig {
            output_dir: Utf8PathBuf::from(output_dir),
            out_sr: overrides
                .out_sr
                .or(config.out_sr)
                .map(SpatialReferenceId::new)
                .unwrap_or(SpatialReferenceId::WGS84),
            out_fields,
            no_geometry: overrides.no_geometry || config.no_geometry.unwrap_or(false),
            chunk_size,
            chunk_threshold: overrides
                .chunk_threshold
                .or(config.chunk_threshold)
                .unwrap_or(DEFAULT_CHUNK_THRESHOLD),
            force: overrides.force || config.force.unwrap_or(false),
            max_depth: config.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
            http,
        })
    }
}
