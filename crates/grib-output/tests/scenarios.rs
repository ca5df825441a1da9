//! End-to-end output scenarios through a full session.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use grib_output::{
    EarthkitMetadata, EncodeSpec, EncodedRecord, FieldArray, FieldEncoder, FieldMetadata,
    FramedEncoder, LocalTransportFactory, MemoryTransportFactory, OutputConfig, OutputError,
    OutputSession, Owner, PlanProfile, PrintTarget, SinkTarget, Stage, TemplateSearchPath,
    TemplateSource, TransportEvent, WriteOutcome,
};
use test_utils::{create_temperature_field, shapes, TemplateTree};

fn config_for(tree: &TemplateTree) -> OutputConfig {
    OutputConfig {
        template_roots: TemplateSearchPath::bundled(tree.bundled())
            .with_override_dir(tree.override_dir())
            .with_codec_samples_dir(tree.samples()),
        print_target: PrintTarget::Log,
        ..OutputConfig::default()
    }
}

fn pressure_level_source() -> EarthkitMetadata {
    EarthkitMetadata::new(
        FieldMetadata::new()
            .with("class", "od")
            .with("levtype", "pl")
            .with("levelist", vec![850])
            .with("param", "t")
            .with("paramId", 130)
            .with("typeOfLevel", "isobaricInhPa"),
    )
}

fn one_degree_field() -> FieldArray {
    let (nj, ni) = shapes::ONE_DEGREE;
    FieldArray::regular(nj, ni, create_temperature_field(nj, ni)).unwrap()
}

/// Counts encode calls, delegating to the framed encoder.
struct CountingEncoder {
    calls: Arc<AtomicUsize>,
}

impl FieldEncoder for CountingEncoder {
    fn encode(
        &self,
        spec: &EncodeSpec<'_>,
        metadata: &FieldMetadata,
        field: &FieldArray,
    ) -> grib_output::Result<EncodedRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FramedEncoder.encode(spec, metadata, field)
    }
}

fn files_under(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

// ============================================================================
// Scenario A: regular grid to file
// ============================================================================

#[test]
fn test_regular_grid_to_file_plan() {
    let tree = TemplateTree::new();
    let template = tree.add(&tree.override_dir(), "regular_ll_pl_grib2.tmpl");
    let out = tree.path().join("forecast.grib");

    let factory = MemoryTransportFactory::new();
    let journal = factory.journal();
    let mut session = OutputSession::new(
        &Owner::new("0001", "1.0.0"),
        &out,
        FieldMetadata::new(),
        PlanProfile::ToFile,
        &config_for(&tree),
        Arc::new(factory),
    )
    .unwrap();

    let outcome = session
        .write(Some(&one_degree_field()), 6, &pressure_level_source(), &FieldMetadata::new())
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Written);

    let descriptor = session.template().unwrap();
    assert_eq!(descriptor.name, "regular_ll_pl_grib2");
    assert_eq!(descriptor.grid.as_deref(), Some("L360x181"));
    assert_eq!(descriptor.path, template);
    assert!(!descriptor.is_fallback());

    let plans = journal.plans();
    assert_eq!(plans.len(), 1);
    let stages = plans[0].stages();
    assert_eq!(stages.len(), 2);
    assert!(matches!(&stages[0], Stage::Encode { grid: Some(g), .. } if g == "L360x181"));
    match &stages[1] {
        Stage::Sink { sinks } => assert_eq!(
            sinks,
            &vec![SinkTarget::File {
                path: out.clone(),
                append: true,
                per_server: false,
            }]
        ),
        other => panic!("expected a sink stage, got {other:?}"),
    }
}

#[test]
fn test_regular_grid_to_file_appends_records() {
    let tree = TemplateTree::new();
    tree.add(&tree.bundled(), "regular_ll_pl_grib2.tmpl");
    let out = tree.path().join("forecast.grib");

    let mut session = OutputSession::new(
        &Owner::new("0001", "1.0.0"),
        &out,
        FieldMetadata::new(),
        PlanProfile::ToFile,
        &config_for(&tree),
        Arc::new(LocalTransportFactory::default()),
    )
    .unwrap();

    let field = one_degree_field();
    session
        .write(Some(&field), 0, &pressure_level_source(), &FieldMetadata::new())
        .unwrap();
    let after_first = std::fs::metadata(&out).unwrap().len();
    session
        .write(Some(&field), 6, &pressure_level_source(), &FieldMetadata::new())
        .unwrap();
    let after_second = std::fs::metadata(&out).unwrap().len();

    assert!(after_first > 0);
    assert_eq!(after_second, after_first * 2);

    let bytes = std::fs::read(&out).unwrap();
    let header = FramedEncoder::read_header(&bytes).unwrap();
    assert_eq!(header.metadata.get_i64("step"), Some(0));
    assert_eq!(header.metadata.get_i64("paramId"), Some(130));
    assert_eq!(header.metadata.get_str("expver"), Some("0001"));
    assert!(!header.metadata.contains_key("levtype"));
    assert!(!header.metadata.contains_key("param"));
}

// ============================================================================
// Scenario B: absent field
// ============================================================================

#[test]
fn test_absent_field_is_skipped_for_every_profile() {
    for profile in PlanProfile::ALL {
        let tree = TemplateTree::new();
        let factory = MemoryTransportFactory::new();
        let journal = factory.journal();
        let mut session = OutputSession::new(
            &Owner::new("0001", 1),
            tree.path().join("out.grib"),
            FieldMetadata::new(),
            profile,
            &config_for(&tree),
            Arc::new(factory),
        )
        .unwrap();

        let outcome = session
            .write(None, 12, &pressure_level_source(), &FieldMetadata::new())
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Skipped);
        assert!(journal.is_empty(), "{profile} touched the transport");
        assert!(!session.is_ready());
    }
}

// ============================================================================
// Scenario C: unstructured grid
// ============================================================================

#[test]
fn test_unstructured_grid_fails_before_transport() {
    let tree = TemplateTree::new();
    let factory = MemoryTransportFactory::new();
    let journal = factory.journal();
    let mut session = OutputSession::new(
        &Owner::new("0001", 1),
        tree.path().join("fdb.yaml"),
        FieldMetadata::new(),
        PlanProfile::ToFdb,
        &config_for(&tree),
        Arc::new(factory),
    )
    .unwrap();

    let field = FieldArray::unstructured(vec![1.0; 10]);
    let err = session
        .write(Some(&field), 0, &pressure_level_source(), &FieldMetadata::new())
        .unwrap_err();

    assert!(matches!(err, OutputError::UnsupportedGridKind { rank: 1, .. }));
    assert!(err.is_configuration_error());
    assert!(journal.is_empty());
    assert!(!session.is_ready());
}

// ============================================================================
// Scenario D: debug profile
// ============================================================================

#[test]
fn test_debug_profile_encodes_without_persisting() {
    let tree = TemplateTree::new();
    let out_dir = tree.path().join("out");
    std::fs::create_dir_all(&out_dir).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let factory = LocalTransportFactory::new(Arc::new(CountingEncoder {
        calls: calls.clone(),
    }));
    let mut session = OutputSession::new(
        &Owner::new("0001", 1),
        out_dir.join("never-written.grib"),
        FieldMetadata::new(),
        PlanProfile::Debug,
        &config_for(&tree),
        Arc::new(factory),
    )
    .unwrap();

    let (nj, ni) = shapes::TINY;
    let field = FieldArray::regular(nj, ni, create_temperature_field(nj, ni)).unwrap();
    session
        .write(Some(&field), 0, &pressure_level_source(), &FieldMetadata::new())
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!session.plan().unwrap().has_sink());
    assert_eq!(files_under(&out_dir), 0);
}

// ============================================================================
// Archive output
// ============================================================================

#[test]
fn test_fdb_profile_archives_under_config_root() {
    let tree = TemplateTree::new();
    let root = tree.path().join("fdb-root");
    let config_path = tree.path().join("fdb.yaml");
    std::fs::write(
        &config_path,
        format!(
            "type: local\nengine: toc\nspaces:\n  - handler: Default\n    roots:\n      - path: {}\n",
            root.display()
        ),
    )
    .unwrap();

    let mut session = OutputSession::new(
        &Owner::new("0001", 1),
        &config_path,
        FieldMetadata::new(),
        PlanProfile::ToFdb,
        &config_for(&tree),
        Arc::new(LocalTransportFactory::default()),
    )
    .unwrap();

    session
        .write(Some(&one_degree_field()), 6, &pressure_level_source(), &FieldMetadata::new())
        .unwrap();

    let archived = root.join("ml:oper:0001/fc/6/130.850.grib");
    assert!(archived.is_file(), "missing {}", archived.display());
}

// ============================================================================
// Template fallback
// ============================================================================

#[test]
fn test_missing_template_falls_back_to_bundled_default() {
    let tree = TemplateTree::new();
    let default = tree.add(&tree.bundled(), "default.tmpl");
    tree.add(&tree.samples(), "regular_ll_sfc_grib2.tmpl");

    let factory = MemoryTransportFactory::new();
    let mut session = OutputSession::new(
        &Owner::new("0001", 1),
        tree.path().join("out.grib"),
        FieldMetadata::new(),
        PlanProfile::ToFile,
        &config_for(&tree),
        Arc::new(factory),
    )
    .unwrap();

    session
        .write(Some(&one_degree_field()), 0, &pressure_level_source(), &FieldMetadata::new())
        .unwrap();

    let descriptor = session.template().unwrap();
    assert_eq!(descriptor.source, TemplateSource::BundledDefault);
    assert_eq!(descriptor.path, default);
}

// ============================================================================
// Metadata merge through a session
// ============================================================================

#[test]
fn test_overrides_cannot_replace_computed_fields() {
    let tree = TemplateTree::new();
    let factory = MemoryTransportFactory::new();
    let journal = factory.journal();
    let mut session = OutputSession::new(
        &Owner::new("0001", "2.1.0"),
        tree.path().join("out.grib"),
        FieldMetadata::new().with("stream", "enfo"),
        PlanProfile::ToFile,
        &config_for(&tree),
        Arc::new(factory),
    )
    .unwrap();

    let overrides = FieldMetadata::new()
        .with("step", 999)
        .with("type", "an")
        .with("trigger", "manual")
        .with("globalSize", 1)
        .with("generatingProcessIdentifier", "fake")
        .with("expver", "abcd")
        .with("class", "rd");

    session
        .write(Some(&one_degree_field()), 24, &pressure_level_source(), &overrides)
        .unwrap();

    let written = journal.written();
    let metadata = &written[0];
    assert_eq!(metadata.get_i64("step"), Some(24));
    assert_eq!(metadata.get_str("type"), Some("fc"));
    assert_eq!(metadata.get_str("trigger"), Some("step"));
    assert_eq!(metadata.get_i64("globalSize"), Some(181 * 360));
    assert_eq!(metadata.get_str("generatingProcessIdentifier"), Some("2.1.0"));
    assert_eq!(metadata.get_str("expver"), Some("abcd"));
    assert_eq!(metadata.get_str("class"), Some("rd"));
    assert_eq!(metadata.get_str("stream"), Some("enfo"));
}

#[test]
fn test_write_and_notify_are_paired() {
    let tree = TemplateTree::new();
    let factory = MemoryTransportFactory::new();
    let journal = factory.journal();
    let mut session = OutputSession::new(
        &Owner::new("0001", 1),
        tree.path().join("out.grib"),
        FieldMetadata::new(),
        PlanProfile::ToFile,
        &config_for(&tree),
        Arc::new(factory),
    )
    .unwrap();

    let field = one_degree_field();
    for step in [0, 6, 12] {
        session
            .write(Some(&field), step, &pressure_level_source(), &FieldMetadata::new())
            .unwrap();
    }

    let events: Vec<_> = journal
        .events()
        .into_iter()
        .filter(|e| !matches!(e, TransportEvent::Connected { .. }))
        .collect();
    assert_eq!(events.len(), 12);
    for chunk in events.chunks(4) {
        assert_eq!(chunk[0], TransportEvent::Opened);
        assert!(matches!(chunk[1], TransportEvent::Written { .. }));
        match (&chunk[1], &chunk[2]) {
            (TransportEvent::Written { metadata: w, .. }, TransportEvent::Notified { metadata: n }) => {
                assert_eq!(w, n)
            }
            other => panic!("write not followed by notify: {other:?}"),
        }
        assert_eq!(chunk[3], TransportEvent::Closed);
    }
}

// ============================================================================
// Fields with missing values
// ============================================================================

#[test]
fn test_missing_values_survive_file_output() {
    let tree = TemplateTree::new();
    let out_dir = test_utils::temp_test_dir_with_prefix("missing_");
    let out = out_dir.path().join("sparse.grib");

    let mut session = grib_output::file_output(
        &Owner::new("0001", 1),
        &out,
        FieldMetadata::new(),
        &config_for(&tree),
    )
    .unwrap();

    let (nj, ni) = shapes::TINY;
    let sparse = FieldArray::regular(nj, ni, test_utils::create_field_with_missing(nj * ni, 3)).unwrap();
    let constant = FieldArray::regular(nj, ni, test_utils::create_constant_field(nj * ni, 273.15)).unwrap();
    assert!(sparse.value_range().is_some());
    test_utils::assert_approx_eq!(constant.value_range().unwrap().0, 273.15, 1e-4);

    let source = EarthkitMetadata::new(FieldMetadata::new().with("paramId", 167));
    session.write(Some(&sparse), 0, &source, &FieldMetadata::new()).unwrap();
    session.write(Some(&constant), 6, &source, &FieldMetadata::new()).unwrap();

    let bytes = std::fs::read(&out).unwrap();
    let header = FramedEncoder::read_header(&bytes).unwrap();
    assert_eq!(header.shape, vec![nj, ni]);
    assert_eq!(header.metadata.get_i64("globalSize"), Some((nj * ni) as i64));
}

// ============================================================================
// Explicit level type and edition
// ============================================================================

#[test]
fn test_explicit_levtype_and_edition_select_template() {
    let tree = TemplateTree::new();
    let template = tree.add(&tree.samples(), "regular_ll_ml_grib1.tmpl");
    tree.add(&tree.bundled(), "regular_ll_pl_grib2.tmpl");

    let factory = MemoryTransportFactory::new();
    let journal = factory.journal();
    let mut session = OutputSession::new(
        &Owner::new("0001", 1),
        tree.path().join("out.grib"),
        FieldMetadata::new(),
        PlanProfile::ToFile,
        &config_for(&tree),
        Arc::new(factory),
    )
    .unwrap();

    let source = EarthkitMetadata::new(
        FieldMetadata::new()
            .with("levtype", "ml")
            .with("levelist", vec![137])
            .with("paramId", 130)
            .with("edition", 1),
    );
    let (nj, ni) = shapes::TINY;
    let field = FieldArray::regular(nj, ni, create_temperature_field(nj, ni)).unwrap();
    session
        .write(Some(&field), 0, &source, &FieldMetadata::new())
        .unwrap();

    let descriptor = session.template().unwrap();
    assert_eq!(descriptor.name, "regular_ll_ml_grib1");
    assert_eq!(descriptor.path, template);
    assert_eq!(descriptor.source, TemplateSource::Root(grib_output::RootKind::CodecSamples));

    // Encoder metadata still follows the normalizer
    let written = journal.written();
    assert!(!written[0].contains_key("levtype"));
    assert_eq!(written[0].get_i64("paramId"), Some(130));
}

#[test]
fn test_override_levtype_selects_template() {
    let tree = TemplateTree::new();
    let factory = MemoryTransportFactory::new();
    let mut session = OutputSession::new(
        &Owner::new("0001", 1),
        tree.path().join("out.grib"),
        FieldMetadata::new(),
        PlanProfile::ToFile,
        &config_for(&tree),
        Arc::new(factory),
    )
    .unwrap();

    let overrides = FieldMetadata::new().with("levtype", "pt");
    session
        .write(Some(&one_degree_field()), 0, &pressure_level_source(), &overrides)
        .unwrap();

    assert_eq!(session.template().unwrap().name, "regular_ll_pt_grib2");
}

// ============================================================================
// Initialization failure
// ============================================================================

#[test]
fn test_initialization_failure_is_final() {
    let tree = TemplateTree::new();
    let factory = MemoryTransportFactory::new();
    let journal = factory.journal();
    let mut session = OutputSession::new(
        &Owner::new("0001", 1),
        tree.path().join("out.grib"),
        FieldMetadata::new(),
        PlanProfile::ToFile,
        &config_for(&tree),
        Arc::new(factory),
    )
    .unwrap();

    let unstructured = FieldArray::unstructured(vec![1.0; 10]);
    let err = session
        .write(Some(&unstructured), 0, &pressure_level_source(), &FieldMetadata::new())
        .unwrap_err();
    assert!(matches!(err, OutputError::UnsupportedGridKind { .. }));

    for step in [6, 12] {
        let err = session
            .write(Some(&one_degree_field()), step, &pressure_level_source(), &FieldMetadata::new())
            .unwrap_err();
        assert!(matches!(err, OutputError::InitializationFailed(_)));
        assert!(err.is_configuration_error());
    }

    // Absent fields are still skipped
    let outcome = session
        .write(None, 18, &pressure_level_source(), &FieldMetadata::new())
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Skipped);

    assert!(session.is_failed());
    assert!(journal.is_empty());
    assert!(journal.plans().is_empty());
}
