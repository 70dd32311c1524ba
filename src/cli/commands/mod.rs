//! CLI command implementations

pub mod init_config;
pub mod metatable;
pub mod run;

use crate::catalog::PortalClient;
use crate::config::{MetatableLocation, ReporterConfig};
use crate::metatable::{FeatureLayerSource, FeatureSetFile, FieldSchema, MetatableSource};

/// Build the source for a configured metatable location.
///
/// Hosted layers are queried through `portal` when signed in, so they carry
/// its token and referer.
pub(crate) fn metatable_source(
    location: MetatableLocation,
    portal: Option<&PortalClient>,
) -> Box<dyn MetatableSource> {
    match (location, portal) {
        (MetatableLocation::Url(url), Some(portal)) => {
            Box::new(FeatureLayerSource::for_portal(url, portal))
        }
        (MetatableLocation::Url(url), None) => Box::new(FeatureLayerSource::new(url)),
        (MetatableLocation::File(path), _) => Box::new(FeatureSetFile::new(path)),
    }
}

/// Configured metatables in read order: SGID first, then shelved
pub(crate) fn configured_metatables(
    config: &ReporterConfig,
    portal: Option<&PortalClient>,
) -> Vec<(Box<dyn MetatableSource>, FieldSchema)> {
    vec![
        (
            metatable_source(config.sgid_metatable(), portal),
            FieldSchema::Sgid,
        ),
        (
            metatable_source(config.shelved_metatable(), portal),
            FieldSchema::Shelved,
        ),
    ]
}
