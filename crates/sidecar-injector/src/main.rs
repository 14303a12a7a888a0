use anyhow::Result;
use sidecar_injector::{cli, config::Config, fatal_error};

fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();

    // the tracing system is not ready yet, failures are reported on stderr
    let config = match Config::from_args(&matches) {
        Ok(config) => config,
        Err(e) => fatal_error(e.to_string()),
    };

    sidecar_injector::run(config)
}
