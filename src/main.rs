mod commandline;
mod daemon;

use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

use commandline::{CliArgs, CliCommands};
use ecobms_lib::bluest_async::BleTransport;
use ecobms_lib::protocol::{self, BasicInfo, CellVoltages};
use ecobms_lib::scan::Scanner;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn decode_frame(frame: &[u8]) -> Result<()> {
    if frame.len() < 2 {
        bail!("Frame too short to carry a command echo");
    }
    match frame[1] {
        0x03 => {
            let info = BasicInfo::decode(frame).with_context(|| "Cannot decode basic info")?;
            println!("Basic info: {info:?}");
        }
        0x04 => {
            let cells = CellVoltages::decode(frame).with_context(|| "Cannot decode cell voltages")?;
            println!("Cell voltages: {cells:?}");
        }
        other => {
            println!("Command {other:02X}, raw frame: {frame:02X?}");
        }
    }
    Ok(())
}

async fn build_scanner(args: &CliArgs) -> Result<Scanner<BleTransport>> {
    if args.devices.is_empty() {
        bail!("No devices given, use --device at least once");
    }
    let transport = BleTransport::new()
        .await
        .with_context(|| "Cannot initialize Bluetooth adapter")?;
    let mut scanner = Scanner::new(transport);
    scanner.set_timeout(args.timeout);
    Ok(scanner)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    match &args.command {
        CliCommands::Encode { command } => {
            let frame = protocol::create_command((*command).into());
            println!("{}", hex::encode(frame));
        }
        CliCommands::Decode { frame } => {
            let bytes = hex::decode(frame).with_context(|| "Invalid hex input")?;
            decode_frame(&bytes)?;
        }
        CliCommands::Scan => {
            let mut scanner = build_scanner(&args).await?;
            daemon::scan_pass(&mut scanner, &args.devices, args.settle).await;
        }
        CliCommands::Daemon { interval } => {
            let mut scanner = build_scanner(&args).await?;
            daemon::run(&mut scanner, &args.devices, *interval, args.settle).await;
        }
    }
    Ok(())
}
