//! Subcommand implementations.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use grib_output::{
    debug_output, fdb_output, file_output, resolution_metadata, FieldArray, FieldMetadata,
    NativeMetadata, OutputConfig, OutputSession, Owner, PlanAssembler, PlanProfile,
    TemplateResolver, WriteOutcome,
};

/// Model version recorded as the generating process of synthetic writes.
const CLI_MODEL_VERSION: &str = env!("CARGO_PKG_VERSION");

fn parse_meta(meta: &[String]) -> Result<FieldMetadata> {
    FieldMetadata::from_assignments(meta.iter().map(String::as_str))
        .ok_or_else(|| anyhow!("metadata must be given as key=value, got {:?}", meta))
}

fn parse_profile(profile: Option<&str>, config: &OutputConfig) -> Result<PlanProfile> {
    match profile {
        Some(name) => Ok(name.parse()?),
        None => Ok(config.default_profile),
    }
}

#[derive(Debug, Serialize)]
struct Resolution<'a> {
    name: &'a str,
    path: &'a Path,
    grid: Option<&'a str>,
    fallback: bool,
    warnings: Vec<String>,
}

pub fn resolve(config: &OutputConfig, shape: &[usize], meta: &[String]) -> Result<()> {
    let metadata = parse_meta(meta)?;
    let resolver = TemplateResolver::new(config.template_roots.clone());
    let (descriptor, warnings) = resolver.resolve_with_diagnostics(shape, &metadata)?;

    let resolution = Resolution {
        name: &descriptor.name,
        path: &descriptor.path,
        grid: descriptor.grid.as_deref(),
        fallback: descriptor.is_fallback(),
        warnings: warnings.iter().map(ToString::to_string).collect(),
    };
    println!("{}", serde_json::to_string_pretty(&resolution)?);
    Ok(())
}

/// Render the plan a session with these inputs would hand to its transport.
pub fn render_plan(
    config: &OutputConfig,
    profile: PlanProfile,
    destination: &Path,
    shape: &[usize],
    metadata: &FieldMetadata,
    format: &str,
) -> Result<String> {
    // Same resolution inputs a session writing `metadata` as its template sees
    let source = NativeMetadata::new(metadata.clone());
    let resolution = resolution_metadata(&source, &config.defaults, &FieldMetadata::new());

    let resolver = TemplateResolver::new(config.template_roots.clone());
    let template = resolver.resolve(shape, &resolution)?;
    let plan = PlanAssembler::new(config.print_target).build(profile, &template, destination);

    let rendered = match format {
        "yaml" | "yml" => plan.to_yaml()?,
        "json" => plan.to_json()?,
        other => bail!("unknown plan format '{}', expected yaml or json", other),
    };
    Ok(rendered)
}

pub fn plan(
    config: &OutputConfig,
    profile: Option<&str>,
    destination: &Path,
    shape: &[usize],
    meta: &[String],
    format: &str,
) -> Result<()> {
    let profile = parse_profile(profile, config)?;
    let metadata = parse_meta(meta)?;
    print!(
        "{}",
        render_plan(config, profile, destination, shape, &metadata, format)?
    );
    Ok(())
}

pub fn templates(config: &OutputConfig) -> Result<()> {
    let resolver = TemplateResolver::new(config.template_roots.clone());
    let entries = resolver.available();

    for (kind, root) in config.template_roots.roots() {
        let count = entries.iter().filter(|e| e.root == kind).count();
        println!("# {} ({}): {} template(s)", kind, root.display(), count);
        for entry in entries.iter().filter(|e| e.root == kind) {
            println!("{}\t{}", entry.name, entry.path.display());
        }
    }
    Ok(())
}

pub struct WriteRequest<'a> {
    pub profile: Option<&'a str>,
    pub destination: &'a Path,
    pub shape: &'a [usize],
    pub steps: u32,
    pub step_interval: i64,
    pub expver: &'a str,
    pub meta: &'a [String],
}

/// Smooth synthetic field: a latitude ramp with a zonal wave.
pub fn synthetic_field(shape: &[usize], step: i64) -> Result<FieldArray> {
    let size: usize = shape.iter().product();
    let rows = shape.first().copied().unwrap_or(1).max(1);
    let cols = (size / rows).max(1);

    let values = (0..size)
        .map(|i| {
            let lat = (i / cols) as f32 / rows as f32;
            let lon = (i % cols) as f32 / cols as f32;
            let wave = (lon * std::f32::consts::TAU + step as f32 * 0.1).sin();
            250.0 + 40.0 * (lat * std::f32::consts::PI).sin() + 5.0 * wave
        })
        .collect();

    Ok(FieldArray::new(shape.to_vec(), values)?)
}

fn open_session(
    config: &OutputConfig,
    profile: PlanProfile,
    owner: &Owner,
    destination: &Path,
) -> Result<OutputSession> {
    let session = match profile {
        PlanProfile::ToFile => file_output(owner, destination, FieldMetadata::new(), config)?,
        PlanProfile::ToFdb => fdb_output(owner, destination, FieldMetadata::new(), config)?,
        PlanProfile::Debug => debug_output(owner, destination, FieldMetadata::new(), config)?,
    };
    Ok(session)
}

pub fn write(config: &OutputConfig, request: &WriteRequest<'_>) -> Result<()> {
    let profile = parse_profile(request.profile, config)?;
    let metadata = parse_meta(request.meta)?;
    let owner = Owner::new(request.expver, CLI_MODEL_VERSION);
    let template = NativeMetadata::new(metadata);

    let mut session = open_session(config, profile, &owner, request.destination)?;

    let mut written = 0u32;
    for index in 0..request.steps {
        let step = i64::from(index) * request.step_interval;
        let field = synthetic_field(request.shape, step)?;
        let outcome = session
            .write(Some(&field), step, &template, &FieldMetadata::new())
            .with_context(|| format!("writing step {}", step))?;
        if outcome == WriteOutcome::Written {
            written += 1;
        }
    }

    info!(
        profile = %profile,
        destination = %request.destination.display(),
        fields = written,
        template = ?session.template().map(|t| t.name.as_str()),
        "Finished writing"
    );
    Ok(())
}
