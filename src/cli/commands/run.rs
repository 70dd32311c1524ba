//! Run command implementation

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::catalog::PortalClient;
use crate::cli::error::CliError;
use crate::config::{OutputFormat, ReporterConfig};
use crate::report::usage::usage_report_path;
use crate::report::{Report, UsageReport};

use super::configured_metatables;

/// Arguments for the run command
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub config: PathBuf,
    /// Overrides `[output] format`
    pub format: Option<OutputFormat>,
    /// Overrides `[output] report_dir`
    pub out_dir: Option<PathBuf>,
}

/// Load the configuration for a run, applying command-line overrides
pub fn load_run_config(args: &RunArgs) -> Result<ReporterConfig, CliError> {
    let mut config = ReporterConfig::load(&args.config)?;

    if let Some(format) = args.format {
        config.output.format = format;
    }
    if let Some(dir) = &args.out_dir {
        config.output.report_dir = dir.display().to_string();
    }

    config.validate()?;
    Ok(config)
}

/// Build and save the usage report
pub fn handle_run(args: &RunArgs) -> Result<(), CliError> {
    let config = load_run_config(args)?;
    let org = &config.organization;

    let portal = PortalClient::connect(&org.url, &org.username, &org.password)?;
    let metatables = configured_metatables(&config, Some(&portal));

    let sink = config.report_sink();
    let out_path = usage_report_path(Path::new(&config.output.report_dir), &sink, &Local::now());

    let mut report = UsageReport::new(portal, out_path)
        .with_rates(config.rate_card())
        .with_retry(config.retry_policy())
        .with_sink(sink);
    for (source, schema) in metatables {
        report = report.with_metatable(source, schema);
    }

    let written = report.run()?;
    info!("Report finished");
    println!("{}", written.display());

    Ok(())
}
