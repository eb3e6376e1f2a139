//! Validation functions for profile values.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

/// Job names end up inside snapshot and lock file names, so they must be a
/// single safe path component.
pub fn validate_job_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidJobName")
            .with_message("job name must not be empty".into()));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ValidationError::new("InvalidJobName")
            .with_message(format!("job name {name:?} must not be a path").into()));
    }
    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidJobName").with_message(
            format!(
                "Invalid job name {:?}, try sanitizing like {:?}",
                name,
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_non_empty_path<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    if path.as_ref().as_os_str().is_empty() {
        return Err(ValidationError::new("EmptyPath").with_message("path must not be empty".into()));
    }

    Ok(())
}

/// The directory may be missing, it is created on first backup, but it must
/// not be something other than a directory.
pub fn validate_dir_or_absent<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_non_empty_path(dir)?;
    if dir.exists() && !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_valid_job_names() {
        for name in ["app", "app.db", "my-app_2", "Ünïcode"] {
            assert!(validate_job_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_invalid_job_names() {
        for name in ["", ".", "..", "a/b", "a\\b", "nul\0byte", "bell\u{7}"] {
            assert!(validate_job_name(name).is_err(), "{name:?}");
        }
    }

    #[test]
    fn test_validate_dir_or_absent() {
        let tmp = TempDir::new().unwrap();
        assert!(validate_dir_or_absent(tmp.path()).is_ok());
        assert!(validate_dir_or_absent(tmp.path().join("later")).is_ok());
        assert!(validate_dir_or_absent("").is_err());

        let file = tmp.path().join("file");
        std::fs::write(&file, b"").unwrap();
        assert!(validate_dir_or_absent(&file).is_err());
    }
}
