//! Common test fixtures.

use std::fs;
use std::path::{Path, PathBuf};

/// Common grid shapes as `(nj, ni)`.
pub mod shapes {
    /// 1 degree global lat/lon grid
    pub const ONE_DEGREE: (usize, usize) = (181, 360);

    /// Tiny grid for fast tests
    pub const TINY: (usize, usize) = (3, 4);
}

/// A template search tree in a temporary directory.
///
/// Holds `bundled/`, `override/` and `samples/` roots that tests populate
/// with template files. Everything is removed on drop.
pub struct TemplateTree {
    dir: tempfile::TempDir,
}

impl TemplateTree {
    pub fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("templates_")
            .tempdir()
            .expect("Failed to create template tree");
        for root in ["bundled", "override", "samples"] {
            fs::create_dir_all(dir.path().join(root)).expect("Failed to create template root");
        }
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn bundled(&self) -> PathBuf {
        self.dir.path().join("bundled")
    }

    pub fn override_dir(&self) -> PathBuf {
        self.dir.path().join("override")
    }

    pub fn samples(&self) -> PathBuf {
        self.dir.path().join("samples")
    }

    /// Write a template file into one of the roots and return its path.
    pub fn add(&self, root: &Path, file_name: &str) -> PathBuf {
        let path = root.join(file_name);
        fs::write(&path, b"GRIB template fixture").expect("Failed to write template fixture");
        path
    }
}

impl Default for TemplateTree {
    fn default() -> Self {
        Self::new()
    }
}
