//! Field metadata model and translation into the flat encoder namespace.
//!
//! Metadata arrives from the model runner in source-specific shapes
//! (earthkit-style objects with namespaces, or flat model-native maps).
//! The encoding stage expects a single flat key/value mapping, built here
//! by projecting the source onto the `mars` namespace and then merging the
//! write layers in a fixed order:
//!
//! ```text
//! template (normalized)  <  session defaults  <  caller overrides  <  computed
//! ```
//!
//! The computed layer (`step`, `trigger`, `type`, `globalSize`,
//! `generatingProcessIdentifier`) is applied by [`MetadataLayers::finish`],
//! which consumes the builder, so nothing supplied by the caller can shadow it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Keys making up the `mars` namespace of an earthkit-style source.
pub const MARS_NAMESPACE_KEYS: &[&str] = &[
    "class", "stream", "type", "expver", "date", "time", "step", "levtype", "levelist",
    "param", "domain", "number",
];

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<MetadataValue>),
}

impl MetadataValue {
    /// Parse a command-line style value: integers, floats, `/`-separated
    /// lists, anything else as a string.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains('/') {
            return MetadataValue::List(raw.split('/').map(MetadataValue::parse).collect());
        }
        if let Ok(i) = raw.parse::<i64>() {
            return MetadataValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return MetadataValue::Float(f);
        }
        MetadataValue::Str(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; numeric strings are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            MetadataValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Str(s) => write!(f, "{}", s),
            MetadataValue::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "/")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        MetadataValue::Int(v as i64)
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        MetadataValue::Int(v as i64)
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::Int(v as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(v: Vec<T>) -> Self {
        MetadataValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Flat, deterministically ordered key/value metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMetadata {
    entries: BTreeMap<String, MetadataValue>,
}

impl FieldMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert only when the key is absent.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.entries.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetadataValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(MetadataValue::as_i64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.entries.remove(key)
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn overlay(&mut self, other: &FieldMetadata) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Keep only the listed keys.
    pub fn project(&self, keys: &[&str]) -> FieldMetadata {
        self.entries
            .iter()
            .filter(|(k, _)| keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `key=value` assignments (as given on a command line).
    pub fn from_assignments<'a, I>(assignments: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut metadata = FieldMetadata::new();
        for assignment in assignments {
            let (key, value) = assignment.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            metadata.insert(key, MetadataValue::parse(value));
        }
        Some(metadata)
    }
}

impl FromIterator<(String, MetadataValue)> for FieldMetadata {
    fn from_iter<T: IntoIterator<Item = (String, MetadataValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FieldMetadata {
    type Item = (String, MetadataValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, MetadataValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Level type of a field: the explicit `levtype`, else `pl` when a
/// `levelist` is present, else `sfc`.
pub fn level_type(metadata: &FieldMetadata) -> String {
    if let Some(levtype) = metadata.get("levtype") {
        return levtype.to_string();
    }
    if metadata.contains_key("levelist") {
        "pl".to_string()
    } else {
        "sfc".to_string()
    }
}

/// GRIB edition of a field: `edition`, then `gribEdition`, defaulting to 2.
pub fn grib_edition(metadata: &FieldMetadata) -> i64 {
    metadata
        .get_i64("edition")
        .or_else(|| metadata.get_i64("gribEdition"))
        .unwrap_or(2)
}

/// A source of field metadata as handed over by the model runner.
pub trait SourceMetadata {
    /// Look up a single key in the full (un-projected) metadata.
    fn get(&self, key: &str) -> Option<MetadataValue>;

    /// Project the metadata onto a named namespace.
    fn namespace(&self, name: &str) -> FieldMetadata;
}

/// Earthkit-style metadata: a full key set with namespace views.
#[derive(Debug, Clone, Default)]
pub struct EarthkitMetadata {
    fields: FieldMetadata,
}

impl EarthkitMetadata {
    pub fn new(fields: FieldMetadata) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &FieldMetadata {
        &self.fields
    }
}

impl SourceMetadata for EarthkitMetadata {
    fn get(&self, key: &str) -> Option<MetadataValue> {
        self.fields.get(key).cloned()
    }

    fn namespace(&self, name: &str) -> FieldMetadata {
        match name {
            "mars" => self.fields.project(MARS_NAMESPACE_KEYS),
            _ => FieldMetadata::new(),
        }
    }
}

/// Model-native metadata that is already flat; every namespace view is the
/// whole mapping.
#[derive(Debug, Clone, Default)]
pub struct NativeMetadata {
    fields: FieldMetadata,
}

impl NativeMetadata {
    pub fn new(fields: FieldMetadata) -> Self {
        Self { fields }
    }
}

impl SourceMetadata for NativeMetadata {
    fn get(&self, key: &str) -> Option<MetadataValue> {
        self.fields.get(key).cloned()
    }

    fn namespace(&self, _name: &str) -> FieldMetadata {
        self.fields.clone()
    }
}

/// Converts source metadata into the flat encoder namespace.
#[derive(Debug, Clone)]
pub struct Normalizer {
    namespace: String,
    dropped: Vec<String>,
    injected: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            namespace: "mars".to_string(),
            dropped: vec!["levtype".to_string(), "param".to_string()],
            injected: vec!["paramId".to_string(), "typeOfLevel".to_string()],
        }
    }
}

impl Normalizer {
    /// Normalizer dropping the given keys from the namespace projection.
    pub fn with_dropped_keys(dropped: Vec<String>) -> Self {
        Self {
            dropped,
            ..Self::default()
        }
    }

    pub fn dropped_keys(&self) -> &[String] {
        &self.dropped
    }

    /// Project, strip and inject.
    ///
    /// `levtype` is dropped because it is re-derived downstream and `param`
    /// is superseded by `paramId`. `paramId` and `typeOfLevel` are copied
    /// from the un-projected source when present.
    pub fn normalize(&self, source: &dyn SourceMetadata) -> FieldMetadata {
        let mut metadata = source.namespace(&self.namespace);

        for key in &self.dropped {
            metadata.remove(key);
        }

        for key in &self.injected {
            match source.get(key) {
                Some(value) => metadata.insert(key.clone(), value),
                None => debug!(key = %key, "Source metadata has no value to inject"),
            }
        }

        metadata
    }
}

/// Source keys that select a template family.
pub const RESOLUTION_KEYS: [&str; 4] = ["levtype", "levelist", "edition", "gribEdition"];

/// Metadata a template is resolved from.
///
/// Taken from the un-projected source, since normalization drops `levtype`
/// and namespace projection hides `edition`. Session defaults and caller
/// overrides are layered over it in the usual order.
pub fn resolution_metadata(
    source: &dyn SourceMetadata,
    defaults: &FieldMetadata,
    overrides: &FieldMetadata,
) -> FieldMetadata {
    let mut explicit = FieldMetadata::new();
    for key in RESOLUTION_KEYS {
        if let Some(value) = source.get(key) {
            explicit.insert(key, value);
        }
    }

    MetadataLayers::new(explicit)
        .with_defaults(defaults)
        .with_overrides(overrides)
        .merged()
}

/// Named merge layers, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Template,
    Defaults,
    Overrides,
    Computed,
}

/// Structural facts about a single write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFields {
    pub step: i64,
    pub global_size: usize,
    pub generating_process: MetadataValue,
}

impl WriteFields {
    /// Keys owned by the computed layer.
    pub const KEYS: [&'static str; 5] = [
        "step",
        "trigger",
        "type",
        "globalSize",
        "generatingProcessIdentifier",
    ];

    pub fn to_metadata(&self) -> FieldMetadata {
        FieldMetadata::new()
            .with("step", self.step)
            .with("trigger", "step")
            .with("type", "fc")
            .with("globalSize", self.global_size)
            .with("generatingProcessIdentifier", self.generating_process.clone())
    }
}

/// Ordered metadata layers for one write.
#[derive(Debug, Clone)]
pub struct MetadataLayers {
    layers: Vec<(LayerKind, FieldMetadata)>,
}

impl MetadataLayers {
    /// Start from the normalized template metadata.
    pub fn new(template: FieldMetadata) -> Self {
        Self {
            layers: vec![(LayerKind::Template, template)],
        }
    }

    pub fn with_defaults(mut self, defaults: &FieldMetadata) -> Self {
        self.layers.push((LayerKind::Defaults, defaults.clone()));
        self
    }

    pub fn with_overrides(mut self, overrides: &FieldMetadata) -> Self {
        self.layers.push((LayerKind::Overrides, overrides.clone()));
        self
    }

    /// Merge the caller-controlled layers only.
    pub fn merged(&self) -> FieldMetadata {
        let mut merged = FieldMetadata::new();
        for (_, layer) in &self.layers {
            merged.overlay(layer);
        }
        merged
    }

    /// Layer that supplied the effective value of `key`, if any.
    pub fn provenance(&self, key: &str) -> Option<LayerKind> {
        self.layers
            .iter()
            .rev()
            .find(|(_, layer)| layer.contains_key(key))
            .map(|(kind, _)| *kind)
    }

    /// Apply the computed layer last and return the final mapping.
    pub fn finish(self, computed: &WriteFields) -> FieldMetadata {
        let mut merged = self.merged();
        for key in WriteFields::KEYS {
            if let Some(LayerKind::Overrides) = self.provenance(key) {
                debug!(key = key, "Ignoring caller override of a computed field");
            }
        }
        merged.overlay(&computed.to_metadata());
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn earthkit_source() -> EarthkitMetadata {
        EarthkitMetadata::new(
            FieldMetadata::new()
                .with("class", "od")
                .with("levtype", "pl")
                .with("levelist", 850)
                .with("param", "t")
                .with("paramId", 130)
                .with("typeOfLevel", "isobaricInhPa")
                .with("shortName", "t")
                .with("gridType", "regular_ll"),
        )
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(MetadataValue::parse("850"), MetadataValue::Int(850));
        assert_eq!(MetadataValue::parse("0.5"), MetadataValue::Float(0.5));
        assert_eq!(MetadataValue::parse("oper"), MetadataValue::from("oper"));
        assert_eq!(
            MetadataValue::parse("500/850"),
            MetadataValue::List(vec![MetadataValue::Int(500), MetadataValue::Int(850)])
        );
    }

    #[test]
    fn test_display_list() {
        let value = MetadataValue::from(vec![500, 850, 1000]);
        assert_eq!(value.to_string(), "500/850/1000");
    }

    #[test]
    fn test_set_default_keeps_existing() {
        let mut meta = FieldMetadata::new().with("stream", "enfo");
        meta.set_default("stream", "oper");
        meta.set_default("class", "ml");
        assert_eq!(meta.get_str("stream"), Some("enfo"));
        assert_eq!(meta.get_str("class"), Some("ml"));
    }

    #[test]
    fn test_level_type_inference() {
        assert_eq!(level_type(&FieldMetadata::new()), "sfc");
        assert_eq!(level_type(&FieldMetadata::new().with("levelist", vec![850])), "pl");
        assert_eq!(level_type(&FieldMetadata::new().with("levtype", "ml")), "ml");
    }

    #[test]
    fn test_grib_edition() {
        assert_eq!(grib_edition(&FieldMetadata::new()), 2);
        assert_eq!(grib_edition(&FieldMetadata::new().with("gribEdition", "1")), 1);
        assert_eq!(
            grib_edition(&FieldMetadata::new().with("edition", 1).with("gribEdition", 2)),
            1
        );
    }

    #[test]
    fn test_earthkit_namespace_projection() {
        let mars = earthkit_source().namespace("mars");
        assert!(mars.contains_key("class"));
        assert!(mars.contains_key("levelist"));
        assert!(!mars.contains_key("shortName"));
        assert!(!mars.contains_key("paramId"));
    }

    #[test]
    fn test_normalize_strips_and_injects() {
        let normalized = Normalizer::default().normalize(&earthkit_source());
        assert!(!normalized.contains_key("levtype"));
        assert!(!normalized.contains_key("param"));
        assert_eq!(normalized.get_i64("paramId"), Some(130));
        assert_eq!(normalized.get_str("typeOfLevel"), Some("isobaricInhPa"));
        assert_eq!(normalized.get_i64("levelist"), Some(850));
    }

    #[test]
    fn test_normalize_tolerates_missing_injected_keys() {
        let source = EarthkitMetadata::new(FieldMetadata::new().with("class", "od"));
        let normalized = Normalizer::default().normalize(&source);
        assert_eq!(normalized.len(), 1);
    }

    #[test]
    fn test_native_metadata_keeps_everything_but_dropped() {
        let source = NativeMetadata::new(
            FieldMetadata::new()
                .with("levtype", "sfc")
                .with("param", "2t")
                .with("paramId", 167)
                .with("anything", "kept"),
        );
        let normalized = Normalizer::with_dropped_keys(vec!["levtype".into()]).normalize(&source);
        assert!(!normalized.contains_key("levtype"));
        assert_eq!(normalized.get_str("param"), Some("2t"));
        assert_eq!(normalized.get_str("anything"), Some("kept"));
    }

    #[test]
    fn test_layer_precedence() {
        let template = FieldMetadata::new().with("class", "od").with("stream", "enfo");
        let defaults = FieldMetadata::new().with("stream", "oper").with("expver", "0001");
        let overrides = FieldMetadata::new().with("expver", "abcd").with("step", 99);
        let layers = MetadataLayers::new(template)
            .with_defaults(&defaults)
            .with_overrides(&overrides);

        assert_eq!(layers.provenance("class"), Some(LayerKind::Template));
        assert_eq!(layers.provenance("stream"), Some(LayerKind::Defaults));
        assert_eq!(layers.provenance("expver"), Some(LayerKind::Overrides));
        assert_eq!(layers.provenance("missing"), None);

        let computed = WriteFields {
            step: 6,
            global_size: 65160,
            generating_process: MetadataValue::from("0.3.1"),
        };
        let merged = layers.finish(&computed);

        assert_eq!(merged.get_str("class"), Some("od"));
        assert_eq!(merged.get_str("stream"), Some("oper"));
        assert_eq!(merged.get_str("expver"), Some("abcd"));
        assert_eq!(merged.get_i64("step"), Some(6));
        assert_eq!(merged.get_str("trigger"), Some("step"));
        assert_eq!(merged.get_str("type"), Some("fc"));
        assert_eq!(merged.get_i64("globalSize"), Some(65160));
        assert_eq!(merged.get_str("generatingProcessIdentifier"), Some("0.3.1"));
    }

    #[test]
    fn test_from_assignments() {
        let meta = FieldMetadata::from_assignments(["levelist=500/850", "stream=oper"]).unwrap();
        assert_eq!(meta.get_str("stream"), Some("oper"));
        assert!(matches!(meta.get("levelist"), Some(MetadataValue::List(_))));

        assert!(FieldMetadata::from_assignments(["novalue"]).is_none());
        assert!(FieldMetadata::from_assignments(["=x"]).is_none());
    }

    #[test]
    fn test_serde_round_trip_is_flat() {
        let meta = FieldMetadata::new().with("paramId", 130).with("levelist", vec![850]);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({"levelist": [850], "paramId": 130}));
    }

    #[test]
    fn test_resolution_metadata_keeps_explicit_level_and_edition() {
        let source = EarthkitMetadata::new(
            FieldMetadata::new()
                .with("levtype", "ml")
                .with("levelist", vec![137])
                .with("edition", 1)
                .with("paramId", 130),
        );
        let defaults = FieldMetadata::new().with("gribEdition", 2).with("class", "ml");

        let resolution = resolution_metadata(&source, &defaults, &FieldMetadata::new());
        assert_eq!(level_type(&resolution), "ml");
        assert_eq!(grib_edition(&resolution), 1);
        assert!(!resolution.contains_key("paramId"));

        // The normalized view has lost both
        let normalized = Normalizer::default().normalize(&source);
        assert_eq!(level_type(&normalized), "pl");
    }

    #[test]
    fn test_resolution_metadata_overrides_win() {
        let source = NativeMetadata::new(FieldMetadata::new().with("levtype", "ml"));
        let overrides = FieldMetadata::new().with("levtype", "sfc");
        let resolution = resolution_metadata(&source, &FieldMetadata::new(), &overrides);
        assert_eq!(level_type(&resolution), "sfc");
    }
}
