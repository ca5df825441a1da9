//! Output sessions.
//!
//! A session serves one output stream. It starts `Uninitialized` and moves
//! to `Ready` on the first write carrying a field: the template can only be
//! resolved once a field's shape is known, so template resolution, plan
//! assembly and transport construction all happen then, exactly once.
//! If that fails the session is `Failed` for good and every later write
//! returns [`OutputError::InitializationFailed`].
//!
//! Later writes reuse the resolved template and transport even when their
//! shape differs from the first field. This is a known limitation; a shape
//! change is logged but not re-resolved.
//!
//! Sessions do no internal locking. Callers serialize writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::OutputConfig;
use crate::error::{OutputError, Result};
use crate::field::FieldArray;
use crate::metadata::{
    resolution_metadata, FieldMetadata, MetadataLayers, MetadataValue, Normalizer, SourceMetadata,
    WriteFields,
};
use crate::plan::{PipelineConfig, PlanAssembler, PlanProfile};
use crate::template::{TemplateDescriptor, TemplateResolver};
use crate::transport::{Connection, Transport, TransportFactory};

/// The model run producing the fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    /// Experiment version, used as the `expver` default
    pub expver: String,
    /// Model version, written as `generatingProcessIdentifier`
    pub version: MetadataValue,
}

impl Owner {
    pub fn new(expver: impl Into<String>, version: impl Into<MetadataValue>) -> Self {
        Self {
            expver: expver.into(),
            version: version.into(),
        }
    }
}

/// What a call to [`OutputSession::write`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No field for this step; nothing was sent.
    Skipped,
    /// The field was written and notified.
    Written,
}

struct ReadySession {
    transport: Box<dyn Transport>,
    template: TemplateDescriptor,
    plan: PipelineConfig,
    shape: Vec<usize>,
}

enum SessionState {
    Uninitialized,
    Ready(ReadySession),
    /// Initialization failed; holds the reason.
    Failed(String),
}

/// One lazily-initialized output stream.
pub struct OutputSession {
    destination: PathBuf,
    profile: PlanProfile,
    static_metadata: FieldMetadata,
    model_version: MetadataValue,
    resolver: TemplateResolver,
    assembler: PlanAssembler,
    normalizer: Normalizer,
    factory: Arc<dyn TransportFactory>,
    state: SessionState,
}

impl OutputSession {
    /// Create a session.
    ///
    /// `metadata` holds the host's static keys; `stream`, `class`,
    /// `gribEdition` and the owner's `expver` fill in whatever it leaves unset.
    pub fn new(
        owner: &Owner,
        destination: impl Into<PathBuf>,
        metadata: FieldMetadata,
        profile: PlanProfile,
        config: &OutputConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let destination = destination.into();
        if profile == PlanProfile::ToFile && destination.as_os_str().is_empty() {
            return Err(OutputError::invalid_config("to_file output needs a destination path"));
        }

        let mut static_metadata = metadata;
        static_metadata.set_default("expver", owner.expver.as_str());
        for (key, value) in config.defaults.iter() {
            static_metadata.set_default(key.clone(), value.clone());
        }

        info!(
            profile = %profile,
            destination = %destination.display(),
            expver = ?static_metadata.get("expver"),
            "Created output session"
        );

        Ok(Self {
            destination,
            profile,
            static_metadata,
            model_version: owner.version.clone(),
            resolver: TemplateResolver::new(config.template_roots.clone()),
            assembler: PlanAssembler::new(config.print_target),
            normalizer: Normalizer::with_dropped_keys(config.dropped_keys.clone()),
            factory,
            state: SessionState::Uninitialized,
        })
    }

    /// Create a session from a profile name; unknown names are rejected here.
    pub fn with_profile_name(
        owner: &Owner,
        destination: impl Into<PathBuf>,
        metadata: FieldMetadata,
        profile: &str,
        config: &OutputConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self> {
        let profile: PlanProfile = profile.parse()?;
        Self::new(owner, destination, metadata, profile, config, factory)
    }

    pub fn profile(&self) -> PlanProfile {
        self.profile
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Static session defaults merged under every write.
    pub fn static_metadata(&self) -> &FieldMetadata {
        &self.static_metadata
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready(_))
    }

    /// Whether initialization failed, leaving the session unusable.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, SessionState::Failed(_))
    }

    /// Template resolved by the first write, if any.
    pub fn template(&self) -> Option<&TemplateDescriptor> {
        match &self.state {
            SessionState::Ready(ready) => Some(&ready.template),
            SessionState::Uninitialized | SessionState::Failed(_) => None,
        }
    }

    /// Plan assembled by the first write, if any.
    pub fn plan(&self) -> Option<&PipelineConfig> {
        match &self.state {
            SessionState::Ready(ready) => Some(&ready.plan),
            SessionState::Uninitialized | SessionState::Failed(_) => None,
        }
    }

    /// Write one field for a forecast step.
    ///
    /// `None` means the step produced no field and is skipped. Otherwise
    /// the metadata layers are merged and the field is written and notified
    /// inside one transport bracket.
    pub fn write(
        &mut self,
        field: Option<&FieldArray>,
        step: i64,
        template: &dyn SourceMetadata,
        overrides: &FieldMetadata,
    ) -> Result<WriteOutcome> {
        let Some(field) = field else {
            debug!(step, "No field for step, skipping");
            return Ok(WriteOutcome::Skipped);
        };

        let metadata = MetadataLayers::new(self.normalizer.normalize(template))
            .with_defaults(&self.static_metadata)
            .with_overrides(overrides)
            .finish(&WriteFields {
                step,
                global_size: field.global_size(),
                generating_process: self.model_version.clone(),
            });

        let ready = self.ready(field, template, overrides)?;
        if ready.shape != field.shape() {
            warn!(
                resolved_shape = ?ready.shape,
                shape = ?field.shape(),
                template = %ready.template.name,
                "Field shape differs from the first write; reusing its template"
            );
        }

        debug!(step, keys = metadata.len(), "Writing field");

        let mut connection = Connection::open(ready.transport.as_mut())?;
        connection.write_and_notify(&metadata, field)?;
        connection.finish()?;

        Ok(WriteOutcome::Written)
    }

    fn ready(
        &mut self,
        field: &FieldArray,
        template: &dyn SourceMetadata,
        overrides: &FieldMetadata,
    ) -> Result<&mut ReadySession> {
        if let SessionState::Uninitialized = self.state {
            let resolution = resolution_metadata(template, &self.static_metadata, overrides);
            match self.initialize(field, &resolution) {
                Ok(ready) => self.state = SessionState::Ready(ready),
                Err(e) => {
                    error!(
                        profile = %self.profile,
                        shape = ?field.shape(),
                        error = %e,
                        "Output session failed to initialize"
                    );
                    self.state = SessionState::Failed(e.to_string());
                    return Err(e);
                }
            }
        }

        match &mut self.state {
            SessionState::Ready(ready) => Ok(ready),
            SessionState::Failed(reason) => {
                Err(OutputError::InitializationFailed(reason.clone()))
            }
            SessionState::Uninitialized => {
                Err(OutputError::transport("output session is not initialized"))
            }
        }
    }

    fn initialize(&self, field: &FieldArray, metadata: &FieldMetadata) -> Result<ReadySession> {
        let template = self.resolver.resolve(field.shape(), metadata)?;
        let plan = self.assembler.build(self.profile, &template, &self.destination);
        let transport = self.factory.connect(&plan)?;

        info!(
            plan = %plan.name(),
            template = %template.name,
            grid = ?template.grid,
            "Output session ready"
        );

        Ok(ReadySession {
            transport,
            template,
            plan,
            shape: field.shape().to_vec(),
        })
    }
}
