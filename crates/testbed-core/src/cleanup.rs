//! Best-effort removal of per-instance files.

use std::io;
use std::path::{Path, PathBuf};

/// A path that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    /// Path that was left behind.
    pub path: PathBuf,
    /// Why removal failed.
    pub error: String,
}

/// Outcome of a cleanup pass. Cleanup never fails; problems are listed here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Non-fatal removal failures.
    pub warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    /// Returns true if every path was removed or already absent.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Removes each path recursively, collecting failures instead of raising them.
///
/// A path that does not exist is not a warning.
pub fn cleanup<I, P>(paths: I) -> CleanupReport
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut report = CleanupReport::default();

    for path in paths {
        let path = path.as_ref();
        match remove_path(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), "cleanup failed: {}", e);
                report.warnings.push(CleanupWarning {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                });
            }
        }
    }

    report
}

fn remove_path(path: &Path) -> io::Result<()> {
    if std::fs::symlink_metadata(path)?.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
