//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Executable lookup before anything is launched."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tbh_common::BinaryConfig;
use tracing::info;

use crate::{HarnessError, Result};

/// Resolved executables for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinaries {
    /// Reference engine executable.
    pub reference_engine: PathBuf,
    /// Test binary executable.
    pub test_binary: PathBuf,
}

impl ResolvedBinaries {
    /// Convert back into configuration.
    pub fn into_config(self) -> BinaryConfig {
        BinaryConfig {
            reference_engine: self.reference_engine,
            test_binary: self.test_binary,
        }
    }
}

/// Locate both executables, failing on the first one missing.
pub fn check(binaries: &BinaryConfig) -> Result<ResolvedBinaries> {
    let reference_engine = look_path("reference engine", &binaries.reference_engine)?;
    let test_binary = look_path("test binary", &binaries.test_binary)?;
    info!(
        reference_engine = %reference_engine.display(),
        test_binary = %test_binary.display(),
        "executables located"
    );
    Ok(ResolvedBinaries {
        reference_engine,
        test_binary,
    })
}

/// Resolve `program` the way a shell would.
///
/// A path with more than one component must name an executable file; a bare
/// name is searched on `PATH`.
pub fn look_path(role: &'static str, program: &Path) -> Result<PathBuf> {
    let missing = || HarnessError::ExecutableMissing {
        role,
        path: program.to_path_buf(),
    };
    if program.components().count() > 1 || program.is_absolute() {
        return if is_executable(program) {
            Ok(program.to_path_buf())
        } else {
            Err(missing())
        };
    }
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    search(program.as_os_str(), &path_var).ok_or_else(missing)
}

fn search(name: &OsStr, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                PathBuf::from(".").join(name)
            } else {
                dir.join(name)
            }
        })
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_file(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn explicit_path_must_be_executable() {
        let dir = tempfile::tempdir().unwrap();
        let exec = write_file(dir.path(), "h2cli", 0o755);
        let plain = write_file(dir.path(), "h2JackTimebase", 0o644);

        assert_eq!(look_path("reference engine", &exec).unwrap(), exec);
        assert!(matches!(
            look_path("test binary", &plain),
            Err(HarnessError::ExecutableMissing { role: "test binary", .. })
        ));
        assert!(look_path("test binary", &dir.path().join("absent")).is_err());
        assert!(look_path("test binary", dir.path()).is_err());
    }

    #[test]
    fn bare_name_is_searched_on_path() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_file(first.path(), "h2cli", 0o644);
        let expected = write_file(second.path(), "h2cli", 0o755);
        let path_var =
            std::env::join_paths([first.path(), second.path()]).expect("joinable paths");

        assert_eq!(search(OsStr::new("h2cli"), &path_var), Some(expected));
        assert_eq!(search(OsStr::new("h2JackTimebase"), &path_var), None);
    }

    #[test]
    fn check_reports_first_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_file(dir.path(), "h2cli", 0o755);
        let binaries = BinaryConfig {
            reference_engine: reference.clone(),
            test_binary: dir.path().join("missing/h2JackTimebase"),
        };
        match check(&binaries) {
            Err(HarnessError::ExecutableMissing { role, path }) => {
                assert_eq!(role, "test binary");
                assert_eq!(path, binaries.test_binary);
            }
            other => panic!("unexpected {other:?}"),
        }

        let test_binary = write_file(dir.path(), "h2JackTimebase", 0o755);
        let resolved = check(&BinaryConfig {
            reference_engine: reference.clone(),
            test_binary: test_binary.clone(),
        })
        .unwrap();
        assert_eq!(resolved.reference_engine, reference);
        assert_eq!(resolved.into_config().test_binary, test_binary);
    }
}
