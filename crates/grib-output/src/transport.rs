//! Transport to the post-processing bus.
//!
//! The real transport is an external service configured from a
//! [`PipelineConfig`]. This module defines the narrow interface the session
//! talks to and two in-process implementations:
//!
//! - [`LocalTransport`] runs the plan's stages in the calling thread
//! - [`MemoryTransport`] only records what it is asked to do
//!
//! Each write is bracketed by a [`Connection`]: `open`, then
//! `write_field` followed by its paired `notify`, then `close` when the
//! connection is dropped or finished.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::encode::{EncodeSpec, EncodedRecord, FieldEncoder, FramedEncoder};
use crate::error::{OutputError, Result};
use crate::field::FieldArray;
use crate::metadata::FieldMetadata;
use crate::plan::{EncodeFormat, PipelineConfig, PrintTarget, Stage};
use crate::sink::{open_sink, Sink};

/// A configured transport session.
pub trait Transport: Send {
    /// Acquire the transport for one write.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field(&mut self, metadata: &FieldMetadata, field: &FieldArray) -> Result<()>;

    /// Signal downstream consumers that the field keyed by `metadata` is complete.
    fn notify(&mut self, metadata: &FieldMetadata) -> Result<()>;

    /// Release the transport after a write.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds transports from plans.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, plan: &PipelineConfig) -> Result<Box<dyn Transport>>;
}

/// Open/close bracket around a write and its notify.
pub struct Connection<'a> {
    transport: &'a mut dyn Transport,
    open: bool,
}

impl<'a> Connection<'a> {
    pub fn open(transport: &'a mut dyn Transport) -> Result<Self> {
        transport.open()?;
        Ok(Self {
            transport,
            open: true,
        })
    }

    /// Write a field, then notify. A failed write returns before notifying.
    pub fn write_and_notify(&mut self, metadata: &FieldMetadata, field: &FieldArray) -> Result<()> {
        self.transport.write_field(metadata, field)?;
        self.transport.notify(metadata)
    }

    /// Close explicitly, surfacing any close error.
    pub fn finish(mut self) -> Result<()> {
        self.open = false;
        self.transport.close()
    }
}

impl Drop for Connection<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.transport.close() {
                warn!(error = %e, "Failed to close transport");
            }
        }
    }
}

// ============================================================================
// In-process transport
// ============================================================================

/// Creates [`LocalTransport`]s.
///
/// The plan is staged as a YAML document in a temporary file for the
/// duration of construction and read back from there, as an external
/// transport would receive it.
#[derive(Clone)]
pub struct LocalTransportFactory {
    encoder: Arc<dyn FieldEncoder>,
}

impl Default for LocalTransportFactory {
    fn default() -> Self {
        Self::new(Arc::new(FramedEncoder))
    }
}

impl LocalTransportFactory {
    pub fn new(encoder: Arc<dyn FieldEncoder>) -> Self {
        Self { encoder }
    }
}

impl TransportFactory for LocalTransportFactory {
    fn connect(&self, plan: &PipelineConfig) -> Result<Box<dyn Transport>> {
        let mut staged = tempfile::Builder::new()
            .prefix("output-plan-")
            .suffix(".yaml")
            .tempfile()?;
        staged.write_all(plan.to_yaml()?.as_bytes())?;
        staged.flush()?;

        let document = std::fs::read_to_string(staged.path())?;
        let plan = PipelineConfig::from_yaml(&document)?;
        let transport = LocalTransport::from_plan(&plan, self.encoder.clone())?;

        debug!(plan = %plan.name(), staged = %staged.path().display(), "Configured local transport");
        Ok(Box::new(transport))
    }
}

enum Action {
    Print {
        target: PrintTarget,
        prefix: String,
    },
    Encode {
        template: std::path::PathBuf,
        format: EncodeFormat,
        grid: Option<String>,
    },
    Sink {
        sinks: Vec<Box<dyn Sink>>,
    },
}

enum Payload<'a> {
    Raw(&'a FieldArray),
    Encoded(EncodedRecord),
}

/// Runs a plan's stages in-process.
pub struct LocalTransport {
    plan_name: String,
    actions: Vec<Action>,
    encoder: Arc<dyn FieldEncoder>,
    fields_written: u64,
    notifications: u64,
}

impl LocalTransport {
    /// Build from a plan, opening every sink up front.
    pub fn from_plan(plan: &PipelineConfig, encoder: Arc<dyn FieldEncoder>) -> Result<Self> {
        let mut actions = Vec::with_capacity(plan.stages().len());

        for stage in plan.stages() {
            let action = match stage {
                Stage::Print { stream, prefix } => Action::Print {
                    target: *stream,
                    prefix: prefix.clone(),
                },
                Stage::Encode {
                    template,
                    format,
                    grid,
                } => Action::Encode {
                    template: template.clone(),
                    format: *format,
                    grid: grid.clone(),
                },
                Stage::Sink { sinks } => Action::Sink {
                    sinks: sinks.iter().map(open_sink).collect::<Result<Vec<_>>>()?,
                },
            };
            actions.push(action);
        }

        Ok(Self {
            plan_name: plan.name().to_string(),
            actions,
            encoder,
            fields_written: 0,
            notifications: 0,
        })
    }

    pub fn fields_written(&self) -> u64 {
        self.fields_written
    }

    pub fn notifications(&self) -> u64 {
        self.notifications
    }

    fn print(target: PrintTarget, prefix: &str, metadata: &FieldMetadata, payload: &Payload<'_>) {
        let summary = match payload {
            Payload::Raw(field) => match field.value_range() {
                Some((lo, hi)) => format!("raw field shape={:?} min={} max={}", field.shape(), lo, hi),
                None => format!("raw field shape={:?} (all missing)", field.shape()),
            },
            Payload::Encoded(record) => format!("encoded record {} bytes", record.len()),
        };
        let keys = describe_metadata(metadata);

        match target {
            PrintTarget::Cout => println!("{} :: {} :: {}", prefix, summary, keys),
            PrintTarget::Cerr => eprintln!("{} :: {} :: {}", prefix, summary, keys),
            PrintTarget::Log => info!(prefix = %prefix, metadata = %keys, "{}", summary),
        }
    }
}

/// Metadata as printed by Print stages: JSON, or its debug form if that fails.
fn describe_metadata(metadata: &FieldMetadata) -> String {
    match serde_json::to_string(metadata) {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "Could not serialize metadata for printing");
            format!("{:?}", metadata)
        }
    }
}

impl Transport for LocalTransport {
    fn write_field(&mut self, metadata: &FieldMetadata, field: &FieldArray) -> Result<()> {
        let mut payload = Payload::Raw(field);

        for action in &mut self.actions {
            match action {
                Action::Print { target, prefix } => {
                    Self::print(*target, prefix.as_str(), metadata, &payload);
                }
                Action::Encode {
                    template,
                    format,
                    grid,
                } => {
                    let Payload::Raw(field) = payload else {
                        return Err(OutputError::transport("plan encodes the same field twice"));
                    };
                    let spec = EncodeSpec {
                        template: template.as_path(),
                        format: *format,
                        grid: grid.as_deref(),
                    };
                    payload = Payload::Encoded(self.encoder.encode(&spec, metadata, field)?);
                }
                Action::Sink { sinks } => {
                    let Payload::Encoded(record) = &payload else {
                        return Err(OutputError::transport("plan sinks a field before encoding it"));
                    };
                    for sink in sinks.iter_mut() {
                        sink.accept(record)?;
                    }
                }
            }
        }

        self.fields_written += 1;
        Ok(())
    }

    fn notify(&mut self, metadata: &FieldMetadata) -> Result<()> {
        for action in &mut self.actions {
            if let Action::Sink { sinks } = action {
                for sink in sinks.iter_mut() {
                    sink.flush()?;
                }
            }
        }

        self.notifications += 1;
        debug!(
            plan = %self.plan_name,
            step = ?metadata.get("step"),
            param = ?metadata.get("paramId"),
            "Field complete"
        );
        Ok(())
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        debug!(
            plan = %self.plan_name,
            fields = self.fields_written,
            notifications = self.notifications,
            "Local transport shut down"
        );
    }
}

// ============================================================================
// Recording transport
// ============================================================================

/// Something a [`MemoryTransport`] was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { plan: PipelineConfig },
    Opened,
    Written { metadata: FieldMetadata, shape: Vec<usize> },
    Notified { metadata: FieldMetadata },
    Closed,
}

/// Shared log of transport events.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<TransportEvent>>>,
}

impl Journal {
    fn lock(&self) -> MutexGuard<'_, Vec<TransportEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: TransportEvent) {
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Plans the factory was asked to connect.
    pub fn plans(&self) -> Vec<PipelineConfig> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Connected { plan } => Some(plan.clone()),
                _ => None,
            })
            .collect()
    }

    /// Metadata of every written field.
    pub fn written(&self) -> Vec<FieldMetadata> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Written { metadata, .. } => Some(metadata.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Creates [`MemoryTransport`]s sharing one [`Journal`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTransportFactory {
    journal: Journal,
    fail_writes: bool,
}

impl MemoryTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose transports reject every write.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn connect(&self, plan: &PipelineConfig) -> Result<Box<dyn Transport>> {
        self.journal.record(TransportEvent::Connected { plan: plan.clone() });
        Ok(Box::new(MemoryTransport {
            journal: self.journal.clone(),
            fail_writes: self.fail_writes,
        }))
    }
}

/// Transport that records calls into a [`Journal`].
#[derive(Debug)]
pub struct MemoryTransport {
    journal: Journal,
    fail_writes: bool,
}

impl Transport for MemoryTransport {
    fn open(&mut self) -> Result<()> {
        self.journal.record(TransportEvent::Opened);
        Ok(())
    }

    fn write_field(&mut self, metadata: &FieldMetadata, field: &FieldArray) -> Result<()> {
        if self.fail_writes {
            return Err(OutputError::transport("write rejected"));
        }
        self.journal.record(TransportEvent::Written {
            metadata: metadata.clone(),
            shape: field.shape().to_vec(),
        });
        Ok(())
    }

    fn notify(&mut self, metadata: &FieldMetadata) -> Result<()> {
        self.journal.record(TransportEvent::Notified {
            metadata: metadata.clone(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.journal.record(TransportEvent::Closed);
        Ok(())
    }
}
