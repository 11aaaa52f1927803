use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::io::ConfigIO;
use crate::config::types::{Config, FirmwareKind};
use crate::device::connection::BtleTransport;
use crate::device::session::SessionController;
use crate::device::types::{AngleValue, SessionEvent};
use crate::error::{AppRunError, DeviceError};

pub mod config;
pub mod device;
pub mod error;

#[derive(Parser, Debug)]
#[command(version, about = "Connects to a BLE peripheral and sends it angles read from stdin")]
pub struct Args {
    /// Config file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Firmware variant of the peripheral, overrides the config file
    #[arg(long, value_enum)]
    pub firmware: Option<FirmwareKind>,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Warn)
        .level_for("arc_remote", level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        match fern::log_file(&log_file) {
            Ok(file) => dispatch = dispatch.chain(file),
            Err(err) => eprintln!("Failed to open LOG_FILE {}: {}", log_file, err),
        }
    }

    if let Err(err) = dispatch.apply() {
        eprintln!("Failed to initialize logger: {}", err);
    }
}

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read_or_init().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {}", err);
            }
            Config::default()
        }
    }
}

enum Command {
    Angle(AngleValue),
    Raw(String),
    Read,
}

fn parse_command(line: &str) -> Option<Result<Command, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line == "?" {
        return Some(Ok(Command::Read));
    }

    if let Some(raw) = line.strip_prefix('!') {
        return Some(Ok(Command::Raw(raw.to_string())));
    }

    Some(line.parse::<AngleValue>().map(Command::Angle).map_err(|err| err.to_string()))
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ValueUpdate(value) => info!("Peripheral reports {}", value),
        SessionEvent::AngleWritten(angle) => info!("Sent angle {}", angle),
        SessionEvent::WriteFailed { angle, reason } => warn!("Sending angle {} failed: {}", angle, reason),
        SessionEvent::Disconnected => info!("Disconnected"),
        SessionEvent::Connected(_) | SessionEvent::DeviceFound(_) => {},
    }
}

async fn run_session(config: Config) -> Result<(), AppRunError> {
    let transport = Arc::new(BtleTransport::new().await?);
    let (mut controller, mut events) = SessionController::new(transport, &config);

    let profile = controller.profile();
    info!(
        "Using {} firmware (service {}); looking for {:?}",
        profile.kind, profile.service, config.allowed_names
    );
    controller.start_scanning().await?;

    let device = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                controller.stop_scanning().await?;
                return Ok(());
            },
            event = events.next() => match event {
                Some(SessionEvent::DeviceFound(device)) => break device,
                Some(_) => {},
                None => return Err(DeviceError::ChannelClosed.into()),
            },
        }
    };

    controller.connect(device).await?;
    controller.start_listening().await?;

    match controller.read_value().await {
        Ok(value) => info!("Current value {}", value),
        Err(err) => warn!("Failed to read current value: {}", err),
    }

    info!("Enter an angle in degrees (0-180), '!<text>' to send text, '?' to read");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };

                match parse_command(&line) {
                    None => {},
                    Some(Err(reason)) => warn!("{}", reason),
                    Some(Ok(Command::Angle(angle))) => controller.send_angle(angle)?,
                    Some(Ok(Command::Raw(text))) => {
                        if let Err(err) = controller.send_value(&text).await {
                            warn!("Sending {:?} failed: {}", text, err);
                        }
                    },
                    Some(Ok(Command::Read)) => match controller.read_value().await {
                        Ok(value) => info!("Current value {}", value),
                        Err(err) => warn!("Read failed: {}", err),
                    },
                }
            },
        }
    }

    // a trailing angle typed just before EOF is still waiting for its debounce delay
    controller.flush_angle().await;
    controller.disconnect().await?;

    while let Ok(Some(event)) = events.try_next() {
        log_event(&event);
    }
    Ok(())
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    let mut config_io = match &args.config {
        Some(path) => ConfigIO::open_sync(path)?,
        None => ConfigIO::new_sync()?,
    };
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut config = load_config(&config_io).await;
        if let Some(firmware) = args.firmware {
            config.firmware = firmware;
        }

        run_session(config).await
    })
}
