use std::path::Path;

use regex::Regex;

use crate::error::ConfigError;

/// `preProvisionCommand` and `hcloudImageURLCommand`, if set, must match
/// this basename regex and resolve to a file the process can read.
fn basename_regex() -> Regex {
    Regex::new(r"^[a-z][a-z0-9_.-]*[a-z0-9]$").expect("static regex is valid")
}

pub fn validate_command_path(path: &Path) -> Result<(), ConfigError> {
    let basename = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ConfigError::InvalidCommandPath {
            path: path.display().to_string(),
            reason: "path has no valid UTF-8 basename".into(),
        })?;

    if !basename_regex().is_match(basename) {
        return Err(ConfigError::InvalidCommandPath {
            path: path.display().to_string(),
            reason: format!("basename '{}' does not match [a-z][a-z0-9_.-]*[a-z0-9]", basename),
        });
    }

    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::InvalidCommandPath {
        path: path.display().to_string(),
        reason: format!("cannot stat: {}", e),
    })?;

    if !metadata.is_file() {
        return Err(ConfigError::InvalidCommandPath {
            path: path.display().to_string(),
            reason: "not a regular file".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rejects_uppercase_basename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Bad-Name.sh");
        std::fs::File::create(&path).unwrap();
        assert!(validate_command_path(&path).is_err());
    }

    #[test]
    fn rejects_missing_file() {
        let path = Path::new("/no/such/script.sh");
        assert!(validate_command_path(path).is_err());
    }

    #[test]
    fn accepts_valid_basename_and_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pre-provision.sh");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        assert!(validate_command_path(&path).is_ok());
    }

    #[test]
    fn rejects_single_character_basename() {
        // [a-z][a-z0-9_.-]*[a-z0-9] requires at least two characters.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        std::fs::File::create(&path).unwrap();
        assert!(validate_command_path(&path).is_err());
    }
}
