#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Header row shared by the hand-written sample exports.
pub const SAMPLE_HEADER: &str = "Patient,Test,Result,Units,Date,Age,Sex";

/// Builds a sample export from data lines under [`SAMPLE_HEADER`].
pub fn sample_export(lines: &[&str]) -> String {
    let mut contents = String::from(SAMPLE_HEADER);
    contents.push('\n');
    for line in lines {
        contents.push_str(line);
        contents.push('\n');
    }
    contents
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Directory for a result store; created lazily by the store itself.
    pub fn store_dir(&self) -> PathBuf {
        self.temp_dir.path().join("store")
    }

    pub fn read(&self, relative: impl AsRef<Path>) -> String {
        fs::read_to_string(self.temp_dir.path().join(relative)).expect("read workspace file")
    }
}
