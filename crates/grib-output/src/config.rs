//! Output configuration.
//!
//! The environment is only read in [`OutputConfig::from_env`]; everything
//! downstream receives its template roots and defaults explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OutputError, Result};
use crate::metadata::FieldMetadata;
use crate::plan::{PlanProfile, PrintTarget};
use crate::template::TemplateSearchPath;

/// Environment variable naming a model-specific template directory.
pub const TEMPLATES_ENV: &str = "GRIB_OUTPUT_TEMPLATES";
/// Environment variable naming the codec sample directory (may be a `:` list).
pub const CODEC_SAMPLES_ENV: &str = "ECCODES_SAMPLES_PATH";
/// Environment variable overriding the bundled template directory.
pub const BUNDLED_TEMPLATES_ENV: &str = "GRIB_OUTPUT_BUNDLED_TEMPLATES";
/// Environment variable selecting the default plan profile.
pub const PROFILE_ENV: &str = "GRIB_OUTPUT_PROFILE";
/// Environment variable selecting where Print stages write.
pub const PRINT_TARGET_ENV: &str = "GRIB_OUTPUT_PRINT_TARGET";

/// Configuration for output sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Candidate roots for template resolution
    pub template_roots: TemplateSearchPath,

    /// Plan profile used when the host does not pick one
    #[serde(default)]
    pub default_profile: PlanProfile,

    /// Where Print stages echo payloads
    #[serde(default)]
    pub print_target: PrintTarget,

    /// Keys stripped from the namespace projection during normalization
    #[serde(default = "default_dropped_keys")]
    pub dropped_keys: Vec<String>,

    /// Static session defaults, filled in where the host left them unset
    #[serde(default = "default_session_defaults")]
    pub defaults: FieldMetadata,
}

fn default_dropped_keys() -> Vec<String> {
    vec!["levtype".to_string(), "param".to_string()]
}

fn default_session_defaults() -> FieldMetadata {
    FieldMetadata::new()
        .with("stream", "oper")
        .with("class", "ml")
        .with("gribEdition", 2)
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            template_roots: TemplateSearchPath::default(),
            default_profile: PlanProfile::default(),
            print_target: PrintTarget::default(),
            dropped_keys: default_dropped_keys(),
            defaults: default_session_defaults(),
        }
    }
}

impl OutputConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var(BUNDLED_TEMPLATES_ENV) {
            if !val.is_empty() {
                config.template_roots.bundled_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var(TEMPLATES_ENV) {
            if !val.is_empty() {
                config.template_roots.override_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var(CODEC_SAMPLES_ENV) {
            config.template_roots.codec_samples_dir = first_existing_dir(&val);
        }

        if let Ok(val) = std::env::var(PROFILE_ENV) {
            config.default_profile = val.parse()?;
        }

        if let Ok(val) = std::env::var(PRINT_TARGET_ENV) {
            config.print_target = val.parse()?;
        }

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: OutputConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.template_roots.bundled_dir.as_os_str().is_empty() {
            return Err(OutputError::invalid_config("template_roots.bundled_dir must be set"));
        }

        if self.template_roots.default_template.is_empty() {
            return Err(OutputError::invalid_config(
                "template_roots.default_template must be set",
            ));
        }

        Ok(())
    }
}

/// First entry of a `:`-separated directory list that exists.
fn first_existing_dir(list: &str) -> Option<PathBuf> {
    list.split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .find(|p| p.is_dir())
}
