//! Routing of gridded model output into a GRIB post-processing pipeline.
//!
//! Translates in-memory fields and their metadata into records the
//! encoding pipeline understands and hands them to a configurable sink.
//!
//! # Architecture
//!
//! ```text
//! host: Output::write(field, template, step, overrides)
//!      │
//!      ▼
//! OutputSession ── first write only ──► TemplateResolver::resolve(shape, metadata)
//!      │                                      │
//!      │                                      ▼
//!      │                               PlanAssembler::build(profile, template, destination)
//!      │                                      │
//!      │                                      ▼
//!      │                               TransportFactory::connect(plan)
//!      │
//!      ├─► Normalizer + MetadataLayers (template < defaults < overrides < computed)
//!      │
//!      └─► Connection: open ─► write_field ─► notify ─► close
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grib_output::{file_output, EarthkitMetadata, FieldArray, FieldMetadata, Output, OutputConfig, Owner};
//!
//! let config = OutputConfig::from_env()?;
//! let mut output = file_output(&Owner::new("0001", "1.0.0"), "forecast.grib", FieldMetadata::new(), &config)?;
//!
//! let field = FieldArray::regular(181, 360, values)?;
//! let template = EarthkitMetadata::new(FieldMetadata::new().with("paramId", 130).with("levelist", 850));
//! output.write(Some(&field), &template, 6, &FieldMetadata::new())?;
//! ```

pub mod config;
pub mod encode;
pub mod error;
pub mod field;
pub mod metadata;
pub mod output;
pub mod plan;
pub mod session;
pub mod sink;
pub mod template;
pub mod transport;

// Re-exports
pub use config::OutputConfig;
pub use encode::{EncodeSpec, EncodedRecord, FieldEncoder, FrameHeader, FramedEncoder};
pub use error::{OutputError, Result};
pub use field::FieldArray;
pub use metadata::{
    grib_edition, level_type, resolution_metadata, EarthkitMetadata, FieldMetadata, LayerKind,
    MetadataLayers, MetadataValue, NativeMetadata, Normalizer, SourceMetadata, WriteFields,
};
pub use output::{debug_output, fdb_output, file_output, Output};
pub use plan::{
    ArchiveConfig, EncodeFormat, PipelineConfig, PlanAssembler, PlanProfile, PrintTarget,
    SinkTarget, Stage,
};
pub use session::{OutputSession, Owner, WriteOutcome};
pub use template::{
    GridKind, ResolveWarning, RootKind, TemplateDescriptor, TemplateResolver, TemplateSearchPath,
    TemplateSource,
};
pub use transport::{
    Journal, LocalTransport, LocalTransportFactory, MemoryTransportFactory, Transport,
    TransportEvent, TransportFactory,
};
