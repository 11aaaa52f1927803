use clap::Parser;
use log::{error, info};
use arc_remote::{init_logging, run, Args};
use arc_remote::error::{AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!(concat!("arc-remote ", env!("CARGO_PKG_VERSION")));

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("arc-remote is already running; only one session per user is supported");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        }
        Ok(_) => Ok(())
    }
}
