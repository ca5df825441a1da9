//! Encoding template resolution.
//!
//! Picks the template file used to encode a field from the field's rank and
//! metadata, searching an ordered list of roots:
//!
//! 1. the bundled template directory
//! 2. the model-specific override directory
//! 3. the codec sample directory
//! 4. the bundled default template, used unconditionally
//!
//! Falling back to (4) is reported as a [`ResolveWarning`], never an error.
//! The only hard failure is a rank-1 field, whose reduced-grid templates are
//! not supported yet.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{OutputError, Result};
use crate::metadata::{grib_edition, level_type, FieldMetadata};

/// Template name used for fields whose rank has no dedicated template.
pub const DEFAULT_TEMPLATE_NAME: &str = "default";

/// Kind of template search root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    /// Templates shipped with this crate
    Bundled,
    /// Model-specific template directory supplied by configuration
    Override,
    /// Codec sample directory
    CodecSamples,
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RootKind::Bundled => "bundled",
            RootKind::Override => "override",
            RootKind::CodecSamples => "codec-samples",
        };
        write!(f, "{}", name)
    }
}

/// Ordered candidate roots for template lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSearchPath {
    /// Bundled template directory (root 1, also holds the default template)
    pub bundled_dir: PathBuf,
    /// Model-specific template directory (root 2)
    #[serde(default)]
    pub override_dir: Option<PathBuf>,
    /// Codec sample directory (root 3)
    #[serde(default)]
    pub codec_samples_dir: Option<PathBuf>,
    /// File name of the bundled default template
    pub default_template: String,
    /// Template file extension, without the dot
    pub extension: String,
}

impl Default for TemplateSearchPath {
    fn default() -> Self {
        Self {
            bundled_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/templates")),
            override_dir: None,
            codec_samples_dir: None,
            default_template: "default.tmpl".to_string(),
            extension: "tmpl".to_string(),
        }
    }
}

impl TemplateSearchPath {
    /// Search path with only a bundled directory.
    pub fn bundled(dir: impl Into<PathBuf>) -> Self {
        Self {
            bundled_dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn with_override_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.override_dir = Some(dir.into());
        self
    }

    pub fn with_codec_samples_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.codec_samples_dir = Some(dir.into());
        self
    }

    /// Candidate roots in priority order.
    pub fn roots(&self) -> Vec<(RootKind, &Path)> {
        let mut roots = vec![(RootKind::Bundled, self.bundled_dir.as_path())];
        if let Some(dir) = &self.override_dir {
            roots.push((RootKind::Override, dir.as_path()));
        }
        if let Some(dir) = &self.codec_samples_dir {
            roots.push((RootKind::CodecSamples, dir.as_path()));
        }
        roots
    }

    /// File name for a template name.
    pub fn file_name(&self, template_name: &str) -> String {
        format!("{}.{}", template_name, self.extension)
    }

    /// The bundled default template.
    pub fn default_path(&self) -> PathBuf {
        self.bundled_dir.join(&self.default_template)
    }
}

/// Where a resolved template was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
    Root(RootKind),
    BundledDefault,
}

/// A resolved encoding template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    /// Template name, e.g. `regular_ll_pl_grib2`
    pub name: String,
    /// Path of the template file that will be used
    pub path: PathBuf,
    /// Grid descriptor, e.g. `L360x181`, for regular grids
    pub grid: Option<String>,
    pub source: TemplateSource,
}

impl TemplateDescriptor {
    pub fn is_fallback(&self) -> bool {
        self.source == TemplateSource::BundledDefault
    }
}

/// Non-fatal resolution shortfalls.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveWarning {
    /// Rank with no dedicated template; the default template name was used.
    UnsupportedRank { rank: usize },
    /// No candidate root held the template; the bundled default was used.
    MissingTemplate { name: String, searched: Vec<PathBuf> },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveWarning::UnsupportedRank { rank } => write!(
                f,
                "no template family for rank {} fields, using '{}'",
                rank, DEFAULT_TEMPLATE_NAME
            ),
            ResolveWarning::MissingTemplate { name, searched } => write!(
                f,
                "template '{}' not found in {} location(s), using bundled default",
                name,
                searched.len()
            ),
        }
    }
}

/// Grid classification derived from array shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridKind {
    /// Rank-1 reduced or unstructured grid
    Unstructured { points: usize },
    /// Rank-2 regular lat/lon grid of `nj` rows by `ni` columns
    Regular { nj: usize, ni: usize },
    /// Any other rank
    Other { rank: usize },
}

impl GridKind {
    pub fn from_shape(shape: &[usize]) -> Self {
        match *shape {
            [points] => GridKind::Unstructured { points },
            [nj, ni] => GridKind::Regular { nj, ni },
            _ => GridKind::Other { rank: shape.len() },
        }
    }

    /// Compact grid descriptor: `L{Ni}x{Nj}` for regular grids.
    pub fn descriptor(&self) -> Option<String> {
        match self {
            GridKind::Regular { nj, ni } => Some(format!("L{}x{}", ni, nj)),
            _ => None,
        }
    }
}

/// A template file found under one of the search roots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateEntry {
    pub name: String,
    pub root: RootKind,
    pub path: PathBuf,
}

/// Resolves encoding templates against a [`TemplateSearchPath`].
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    search: TemplateSearchPath,
}

impl TemplateResolver {
    pub fn new(search: TemplateSearchPath) -> Self {
        Self { search }
    }

    pub fn search_path(&self) -> &TemplateSearchPath {
        &self.search
    }

    /// Template name and grid descriptor for a shape.
    ///
    /// Fails for rank-1 fields.
    pub fn template_name(
        shape: &[usize],
        metadata: &FieldMetadata,
    ) -> Result<(String, Option<String>, Vec<ResolveWarning>)> {
        let levtype = level_type(metadata);
        let edition = grib_edition(metadata);
        let kind = GridKind::from_shape(shape);

        match kind {
            GridKind::Unstructured { .. } => Err(OutputError::UnsupportedGridKind {
                rank: 1,
                template: format!("regular_gg_{}_grib{}", levtype, edition),
            }),
            GridKind::Regular { .. } => Ok((
                format!("regular_ll_{}_grib{}", levtype, edition),
                kind.descriptor(),
                Vec::new(),
            )),
            GridKind::Other { rank } => Ok((
                DEFAULT_TEMPLATE_NAME.to_string(),
                None,
                vec![ResolveWarning::UnsupportedRank { rank }],
            )),
        }
    }

    /// Resolve a template, returning the diagnostics instead of logging them.
    pub fn resolve_with_diagnostics(
        &self,
        shape: &[usize],
        metadata: &FieldMetadata,
    ) -> Result<(TemplateDescriptor, Vec<ResolveWarning>)> {
        let (name, grid, mut warnings) = Self::template_name(shape, metadata)?;
        let file_name = self.search.file_name(&name);

        let mut searched = Vec::new();
        for (kind, root) in self.search.roots() {
            let candidate = root.join(&file_name);
            if candidate.is_file() {
                let descriptor = TemplateDescriptor {
                    name,
                    path: candidate,
                    grid,
                    source: TemplateSource::Root(kind),
                };
                return Ok((descriptor, warnings));
            }
            searched.push(candidate);
        }

        warnings.push(ResolveWarning::MissingTemplate {
            name: name.clone(),
            searched,
        });

        let descriptor = TemplateDescriptor {
            name,
            path: self.search.default_path(),
            grid,
            source: TemplateSource::BundledDefault,
        };
        Ok((descriptor, warnings))
    }

    /// Resolve a template, logging fallbacks as warnings.
    pub fn resolve(&self, shape: &[usize], metadata: &FieldMetadata) -> Result<TemplateDescriptor> {
        let (descriptor, warnings) = self.resolve_with_diagnostics(shape, metadata)?;

        for warning in &warnings {
            warn!(shape = ?shape, "{}", warning);
        }

        info!(
            template = %descriptor.path.display(),
            name = %descriptor.name,
            grid = ?descriptor.grid,
            "Resolved encoding template"
        );

        Ok(descriptor)
    }

    /// List template files visible under every search root.
    pub fn available(&self) -> Vec<TemplateEntry> {
        let suffix = format!(".{}", self.search.extension);
        let mut entries = Vec::new();

        for (kind, root) in self.search.roots() {
            if !root.is_dir() {
                continue;
            }

            for entry in walkdir::WalkDir::new(root)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }

                let Some(file_name) = entry.file_name().to_str() else {
                    continue;
                };

                if let Some(name) = file_name.strip_suffix(&suffix) {
                    entries.push(TemplateEntry {
                        name: name.to_string(),
                        root: kind,
                        path: entry.path().to_path_buf(),
                    });
                }
            }
        }

        entries
    }
}
