//! Sinks persisting encoded records.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::encode::EncodedRecord;
use crate::error::{OutputError, Result};
use crate::metadata::FieldMetadata;
use crate::plan::{ArchiveConfig, SinkTarget};

/// Receives encoded records.
pub trait Sink: Send {
    fn accept(&mut self, record: &EncodedRecord) -> Result<()>;

    /// Make everything accepted so far durable.
    fn flush(&mut self) -> Result<()>;
}

/// Open the sink for a plan target.
pub fn open_sink(target: &SinkTarget) -> Result<Box<dyn Sink>> {
    match target {
        SinkTarget::File {
            path,
            append,
            per_server,
        } => {
            let path = if *per_server {
                per_process_path(path)
            } else {
                path.clone()
            };
            Ok(Box::new(FileSink::open(&path, *append)?))
        }
        SinkTarget::Fdb { config } => {
            let root = config
                .as_ref()
                .and_then(|c| c.first_root().map(Path::to_path_buf))
                .or_else(ArchiveConfig::root_from_env)
                .ok_or_else(|| {
                    OutputError::ArchiveConfig(format!(
                        "no archive root configured; supply a config with a root or set {}",
                        ArchiveConfig::ROOT_ENV
                    ))
                })?;
            Ok(Box::new(DirectoryArchive::open(root)?))
        }
    }
}

fn per_process_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", std::process::id()));
    PathBuf::from(name)
}

/// Appends records to a single file.
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn open(path: &Path, append: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|e| OutputError::sink(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn accept(&mut self, record: &EncodedRecord) -> Result<()> {
        self.writer
            .write_all(&record.bytes)
            .map_err(|e| OutputError::sink(format!("{}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), bytes = record.len(), "Appended record");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::sink(format!("{}: {}", self.path.display(), e)))
    }
}

/// Archive keyed by field identity, one file per field under a root.
///
/// Layout: `{root}/{class}:{stream}:{expver}/{type}/{step}/{paramId}.{level}.grib`.
/// Archiving a field with the same identity replaces the earlier record.
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn open(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .map_err(|e| OutputError::ArchiveConfig(format!("{}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a field in the archive.
    ///
    /// Key values are escaped into single path components, so the result
    /// always lies under the archive root.
    pub fn key_path(&self, metadata: &FieldMetadata) -> PathBuf {
        let value = |key: &str| {
            metadata
                .get(key)
                .map(|v| path_component(&v.to_string()))
                .unwrap_or_else(|| "none".to_string())
        };

        let dataset = format!("{}:{}:{}", value("class"), value("stream"), value("expver"));
        let level = match metadata.get("levelist") {
            Some(levels) => path_component(&levels.to_string()),
            None => value("typeOfLevel"),
        };

        self.root
            .join(dataset)
            .join(value("type"))
            .join(value("step"))
            .join(format!("{}.{}.grib", value("paramId"), level))
    }
}

/// Escape a key value into one path component.
///
/// Separators become `-`; an empty value or one made only of dots
/// becomes underscores.
fn path_component(raw: &str) -> String {
    let escaped: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' => '-',
            '\0' => '_',
            c => c,
        })
        .collect();

    if escaped.is_empty() || escaped.chars().all(|c| c == '.') {
        "_".repeat(escaped.len().max(1))
    } else {
        escaped
    }
}

impl Sink for DirectoryArchive {
    fn accept(&mut self, record: &EncodedRecord) -> Result<()> {
        let path = self.key_path(&record.metadata);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| OutputError::sink(format!("{}: {}", parent.display(), e)))?;
        }
        fs::write(&path, &record.bytes)
            .map_err(|e| OutputError::sink(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = record.len(), "Archived record");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
