//! Pipeline plans.
//!
//! A plan is an ordered list of stages handed to the transport. Each named
//! [`PlanProfile`] maps, by an exhaustive match, to the function assembling
//! its stages:
//!
//! | profile   | stages                                      |
//! |-----------|---------------------------------------------|
//! | `to_file` | encode, sink(file)                          |
//! | `to_fdb`  | encode, sink(fdb)                           |
//! | `debug`   | print(PRE-ENCODE), encode, print(POST-ENCODE) |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{OutputError, Result};
use crate::template::TemplateDescriptor;

/// Example archive configuration shipped with this crate.
pub const ARCHIVE_CONFIG_EXAMPLE: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/config/fdb-example.yaml");

/// Prefix of the Print stage placed before encoding in debug plans.
pub const PRE_ENCODE_PREFIX: &str = "PRE-ENCODE";
/// Prefix of the Print stage placed after encoding in debug plans.
pub const POST_ENCODE_PREFIX: &str = "POST-ENCODE";

/// Named pipeline shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanProfile {
    /// Encode and append to a file
    #[default]
    ToFile,
    /// Encode and archive
    ToFdb,
    /// Echo before and after encoding, persist nothing
    Debug,
}

impl PlanProfile {
    pub const ALL: [PlanProfile; 3] = [PlanProfile::ToFile, PlanProfile::ToFdb, PlanProfile::Debug];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanProfile::ToFile => "to_file",
            PlanProfile::ToFdb => "to_fdb",
            PlanProfile::Debug => "debug",
        }
    }
}

impl FromStr for PlanProfile {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self> {
        PlanProfile::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| OutputError::UnknownProfile(s.to_string()))
    }
}

impl fmt::Display for PlanProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where Print stages write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintTarget {
    #[default]
    Cout,
    Cerr,
    /// Through the tracing subscriber
    Log,
}

impl FromStr for PrintTarget {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cout" | "stdout" => Ok(PrintTarget::Cout),
            "cerr" | "stderr" => Ok(PrintTarget::Cerr),
            "log" => Ok(PrintTarget::Log),
            other => Err(OutputError::invalid_config(format!(
                "unknown print target '{}'",
                other
            ))),
        }
    }
}

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFormat {
    #[default]
    Grib,
}

/// A single pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Stage {
    Encode {
        template: PathBuf,
        format: EncodeFormat,
        #[serde(rename = "grid-type", default, skip_serializing_if = "Option::is_none")]
        grid: Option<String>,
    },
    Print {
        stream: PrintTarget,
        prefix: String,
    },
    Sink {
        sinks: Vec<SinkTarget>,
    },
}

/// Destination of a Sink stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SinkTarget {
    File {
        path: PathBuf,
        append: bool,
        #[serde(rename = "per-server")]
        per_server: bool,
    },
    Fdb {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<ArchiveConfig>,
    },
}

/// Archive (FDB-style) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<PathBuf>,
    #[serde(default)]
    pub spaces: Vec<ArchiveSpace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSpace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default)]
    pub roots: Vec<ArchiveRoot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRoot {
    pub path: PathBuf,
}

impl ArchiveConfig {
    /// Environment variable naming an archive root when no config supplies one.
    pub const ROOT_ENV: &'static str = "FDB_ROOT";

    /// Whether a destination path names an archive config file.
    pub fn looks_like_config(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
    }

    /// Parse an archive config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| OutputError::ArchiveConfig(format!("{}: {}", path.display(), e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| OutputError::ArchiveConfig(format!("{}: {}", path.display(), e)))
    }

    /// First configured root directory.
    pub fn first_root(&self) -> Option<&Path> {
        self.spaces
            .iter()
            .flat_map(|s| s.roots.iter())
            .map(|r| r.path.as_path())
            .next()
    }

    /// Archive root from the environment.
    pub fn root_from_env() -> Option<PathBuf> {
        std::env::var(Self::ROOT_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}

/// An assembled, immutable pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    name: String,
    actions: Vec<Stage>,
}

/// The document form handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub plans: Vec<PipelineConfig>,
}

impl PipelineConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.actions
    }

    /// Whether any stage persists or forwards records.
    pub fn has_sink(&self) -> bool {
        self.actions.iter().any(|s| matches!(s, Stage::Sink { .. }))
    }

    pub fn to_document(&self) -> PlanDocument {
        PlanDocument {
            plans: vec![self.clone()],
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_document())?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    /// Read back the single plan of a plan document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: PlanDocument = serde_yaml::from_str(yaml)?;
        document
            .plans
            .into_iter()
            .next()
            .ok_or_else(|| OutputError::invalid_config("plan document holds no plans"))
    }
}

/// Inputs shared by every profile's assembler.
struct PlanContext<'a> {
    template: &'a TemplateDescriptor,
    destination: &'a Path,
    print_target: PrintTarget,
}

type AssembleFn = fn(&PlanContext<'_>) -> Vec<Stage>;

/// Plan name and stage assembler of a profile.
fn plan_entry(profile: PlanProfile) -> (&'static str, AssembleFn) {
    match profile {
        PlanProfile::ToFile => ("output-to-file", to_file_stages),
        PlanProfile::ToFdb => ("output-to-fdb", to_fdb_stages),
        PlanProfile::Debug => ("output-debug", debug_stages),
    }
}

fn encode_stage(ctx: &PlanContext<'_>) -> Stage {
    Stage::Encode {
        template: ctx.template.path.clone(),
        format: EncodeFormat::Grib,
        grid: ctx.template.grid.clone(),
    }
}

fn to_file_stages(ctx: &PlanContext<'_>) -> Vec<Stage> {
    vec![
        encode_stage(ctx),
        Stage::Sink {
            sinks: vec![SinkTarget::File {
                path: ctx.destination.to_path_buf(),
                append: true,
                per_server: false,
            }],
        },
    ]
}

fn to_fdb_stages(ctx: &PlanContext<'_>) -> Vec<Stage> {
    let mut config = None;

    if ArchiveConfig::looks_like_config(ctx.destination) {
        match ArchiveConfig::load(ctx.destination) {
            Ok(parsed) => config = Some(parsed),
            Err(e) => warn!(
                path = %ctx.destination.display(),
                error = %e,
                example = ARCHIVE_CONFIG_EXAMPLE,
                "Could not parse archive config, see the example config; archiving without it"
            ),
        }
    }

    vec![
        encode_stage(ctx),
        Stage::Sink {
            sinks: vec![SinkTarget::Fdb { config }],
        },
    ]
}

fn debug_stages(ctx: &PlanContext<'_>) -> Vec<Stage> {
    vec![
        Stage::Print {
            stream: ctx.print_target,
            prefix: PRE_ENCODE_PREFIX.to_string(),
        },
        encode_stage(ctx),
        Stage::Print {
            stream: ctx.print_target,
            prefix: POST_ENCODE_PREFIX.to_string(),
        },
    ]
}

/// Builds pipelines from profiles.
///
/// The destination is never checked for writability here.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanAssembler {
    print_target: PrintTarget,
}

impl PlanAssembler {
    pub fn new(print_target: PrintTarget) -> Self {
        Self { print_target }
    }

    pub fn build(
        &self,
        profile: PlanProfile,
        template: &TemplateDescriptor,
        destination: &Path,
    ) -> PipelineConfig {
        let ctx = PlanContext {
            template,
            destination,
            print_target: self.print_target,
        };

        let (name, assemble) = plan_entry(profile);

        let plan = PipelineConfig {
            name: name.to_string(),
            actions: assemble(&ctx),
        };

        info!(
            profile = %profile,
            plan = %plan.name,
            stages = plan.actions.len(),
            "Assembled output plan"
        );

        plan
    }
}
