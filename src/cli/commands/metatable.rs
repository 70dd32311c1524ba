//! Metatable command implementation

use std::path::Path;

use crate::catalog::PortalClient;
use crate::cli::error::CliError;
use crate::config::{ConfigError, MetatableLocation, ReporterConfig};
use crate::metatable::{MetatableIndex, read_metatable};

use super::configured_metatables;

/// Read both configured metatables and print what they hold
pub fn handle_metatable(config_path: &Path) -> Result<(), CliError> {
    let config = ReporterConfig::load(config_path)?;
    if config.metatables.sgid.trim().is_empty() || config.metatables.shelved.trim().is_empty() {
        return Err(ConfigError::Missing("metatables.sgid, metatables.shelved".to_string()).into());
    }

    let index = read_configured(&config)?;

    println!("Metatable records: {}", index.len());
    if index.duplicate_keys().is_empty() {
        println!("No duplicate item ids");
    } else {
        println!("Duplicate item ids ({}):", index.duplicate_keys().len());
        for key in index.duplicate_keys() {
            println!("  {}", key);
        }
    }

    Ok(())
}

fn read_configured(config: &ReporterConfig) -> Result<MetatableIndex, CliError> {
    let mut index = MetatableIndex::new();
    let portal = signed_in_portal(config)?;
    for (source, schema) in configured_metatables(config, portal.as_ref()) {
        read_metatable(&mut index, &source, schema)?;
    }
    Ok(index)
}

/// Portal session for hosted metatables when credentials are configured
fn signed_in_portal(config: &ReporterConfig) -> Result<Option<PortalClient>, CliError> {
    let hosted = matches!(config.sgid_metatable(), MetatableLocation::Url(_))
        || matches!(config.shelved_metatable(), MetatableLocation::Url(_));
    let org = &config.organization;
    if !hosted || org.url.is_empty() || org.username.is_empty() || org.password.is_empty() {
        return Ok(None);
    }

    Ok(Some(PortalClient::connect(
        &org.url,
        &org.username,
        &org.password,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SGID: &str = r#"{"features": [
        {"attributes": {"TABLENAME": "SGID.BOUNDARIES.Counties", "AGOL_ITEM_ID": "a0b1c2d3e4f5a6b7c8d9e0f1a2b3c4d5", "AGOL_PUBLISHED_NAME": "Counties", "Authoritative": "y"}}
    ]}"#;

    const SHELVED: &str = r#"{"features": [
        {"attributes": {"TABLENAME": "Old Counties", "AGOL_ITEM_ID": "a0b1c2d3e4f5a6b7c8d9e0f1a2b3c4d5", "AGOL_PUBLISHED_NAME": "Old Counties", "CATEGORY": "shelved"}},
        {"attributes": {"TABLENAME": "Roads", "AGOL_ITEM_ID": "11111111222233334444555555555555", "AGOL_PUBLISHED_NAME": "Roads", "CATEGORY": "static"}}
    ]}"#;

    #[test]
    fn test_reads_file_metatables_without_portal() {
        let dir = tempdir().unwrap();
        let sgid = dir.path().join("sgid.json");
        let shelved = dir.path().join("shelved.json");
        std::fs::write(&sgid, SGID).unwrap();
        std::fs::write(&shelved, SHELVED).unwrap();

        let mut config = ReporterConfig::new();
        config.metatables.sgid = sgid.display().to_string();
        config.metatables.shelved = shelved.display().to_string();

        let index = read_configured(&config).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.duplicate_keys(), ["a0b1c2d3e4f5a6b7c8d9e0f1a2b3c4d5"]);
        assert_eq!(
            index.category("a0b1c2d3e4f5a6b7c8d9e0f1a2b3c4d5"),
            Some("SGID")
        );
    }

    #[test]
    fn test_missing_metatable_file_is_an_error() {
        let dir = tempdir().unwrap();
        let mut config = ReporterConfig::new();
        config.metatables.sgid = dir.path().join("nope.json").display().to_string();
        config.metatables.shelved = dir.path().join("nope2.json").display().to_string();

        assert!(matches!(
            read_configured(&config),
            Err(CliError::MetatableError(_))
        ));
    }
}
