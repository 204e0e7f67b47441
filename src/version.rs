//! Version string resolution.
//!
//! The version is resolved once at startup and is read-only afterwards. It
//! either comes from a text file written by the release pipeline or from the
//! `APP_VERSION` variable captured at compile time.

use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Returned whenever no usable version can be found.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Where the version string comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum VersionSource {
    File(PathBuf),
    Embedded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    version: String,
}

impl VersionInfo {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Resolve the version from its source. A missing or empty file is not
    /// fatal: it is logged and the version falls back to `unknown`.
    pub fn resolve(source: &VersionSource) -> Self {
        match source {
            VersionSource::File(path) => match fs::read_to_string(path) {
                Ok(contents) => {
                    let version = contents.trim();
                    if version.is_empty() {
                        warn!(
                            path = %path.display(),
                            "Version file is empty, using '{}'",
                            UNKNOWN_VERSION
                        );
                        Self::new(UNKNOWN_VERSION)
                    } else {
                        debug!(path = %path.display(), version, "Resolved version from file");
                        Self::new(version)
                    }
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Version file unavailable, using '{}'",
                        UNKNOWN_VERSION
                    );
                    Self::new(UNKNOWN_VERSION)
                }
            },
            VersionSource::Embedded => Self::new(embedded_version()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.version
    }
}

fn embedded_version() -> &'static str {
    match option_env!("APP_VERSION") {
        Some(v) if !v.trim().is_empty() => v,
        _ => env!("CARGO_PKG_VERSION"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("greeter-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_resolve_from_file_trims_whitespace() {
        let path = temp_path("version");
        fs::write(&path, "1.4.2\n").unwrap();

        let info = VersionInfo::resolve(&VersionSource::File(path.clone()));
        assert_eq!(info.as_str(), "1.4.2");

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_falls_back_to_unknown() {
        let info = VersionInfo::resolve(&VersionSource::File(temp_path("missing")));
        assert_eq!(info.as_str(), UNKNOWN_VERSION);
    }

    #[test]
    fn test_empty_file_falls_back_to_unknown() {
        let path = temp_path("empty");
        fs::write(&path, "   \n").unwrap();

        let info = VersionInfo::resolve(&VersionSource::File(path.clone()));
        assert_eq!(info.as_str(), UNKNOWN_VERSION);

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_embedded_version_is_never_empty() {
        let info = VersionInfo::resolve(&VersionSource::Embedded);
        assert!(!info.as_str().is_empty());
    }
}
