//! Host-facing output plugins.
//!
//! The model runner drives an [`Output`]: one `write` per field and step.
//! The three registrations differ only in their plan profile.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::OutputConfig;
use crate::error::Result;
use crate::field::FieldArray;
use crate::metadata::{FieldMetadata, SourceMetadata};
use crate::plan::PlanProfile;
use crate::session::{OutputSession, Owner};
use crate::transport::{LocalTransportFactory, TransportFactory};

/// Write contract consumed by the model runner.
pub trait Output {
    /// Write `data` for `step`, described by `template`, with per-write overrides.
    fn write(
        &mut self,
        data: Option<&FieldArray>,
        template: &dyn SourceMetadata,
        step: i64,
        overrides: &FieldMetadata,
    ) -> Result<()>;
}

impl Output for OutputSession {
    fn write(
        &mut self,
        data: Option<&FieldArray>,
        template: &dyn SourceMetadata,
        step: i64,
        overrides: &FieldMetadata,
    ) -> Result<()> {
        OutputSession::write(self, data, step, template, overrides).map(|_| ())
    }
}

fn local_session(
    owner: &Owner,
    path: impl Into<PathBuf>,
    metadata: FieldMetadata,
    profile: PlanProfile,
    config: &OutputConfig,
) -> Result<OutputSession> {
    let factory: Arc<dyn TransportFactory> = Arc::new(LocalTransportFactory::default());
    OutputSession::new(owner, path, metadata, profile, config, factory)
}

/// Output appending encoded fields to a file.
pub fn file_output(
    owner: &Owner,
    path: impl Into<PathBuf>,
    metadata: FieldMetadata,
    config: &OutputConfig,
) -> Result<OutputSession> {
    local_session(owner, path, metadata, PlanProfile::ToFile, config)
}

/// Output archiving encoded fields. `path` may name an archive config file.
pub fn fdb_output(
    owner: &Owner,
    path: impl Into<PathBuf>,
    metadata: FieldMetadata,
    config: &OutputConfig,
) -> Result<OutputSession> {
    local_session(owner, path, metadata, PlanProfile::ToFdb, config)
}

/// Output echoing fields before and after encoding, persisting nothing.
pub fn debug_output(
    owner: &Owner,
    path: impl Into<PathBuf>,
    metadata: FieldMetadata,
    config: &OutputConfig,
) -> Result<OutputSession> {
    local_session(owner, path, metadata, PlanProfile::Debug, config)
}
