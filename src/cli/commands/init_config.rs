//! Init-config command implementation

use std::path::Path;

use crate::cli::error::CliError;
use crate::config::sample_config;

/// Write the sample configuration to `path`
pub fn handle_init_config(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::FileExists(path.to_path_buf()));
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| CliError::FileWriteError(parent.to_path_buf(), e.to_string()))?;
    }

    std::fs::write(path, sample_config())
        .map_err(|e| CliError::FileWriteError(path.to_path_buf(), e.to_string()))?;

    println!("Wrote sample configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReporterConfig;
    use tempfile::tempdir;

    #[test]
    fn test_writes_parseable_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("agol-reporter.toml");

        handle_init_config(&path, false).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(ReporterConfig::parse(&content).is_ok());
    }

    #[test]
    fn test_refuses_to_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agol-reporter.toml");
        std::fs::write(&path, "# mine").unwrap();

        let result = handle_init_config(&path, false);
        assert!(matches!(result, Err(CliError::FileExists(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine");

        handle_init_config(&path, true).unwrap();
        assert_ne!(std::fs::read_to_string(&path).unwrap(), "# mine");
    }
}
