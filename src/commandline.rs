use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use ecobms_lib::protocol;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Poll every device once and print the decoded telemetry
    Scan,
    /// Poll the devices periodically and print each pass
    Daemon {
        /// Interval between scan passes (e.g., "30s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "30s")]
        interval: Duration,
    },
    /// Print the hex encoding of a command frame
    Encode {
        /// Command to encode
        command: CommandArg,
    },
    /// Decode a captured response frame given as hex (e.g. "dd03001d...")
    Decode {
        /// Raw frame bytes as a hex string
        frame: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum CommandArg {
    /// Pack voltage, current, capacity, switches and temperature
    BasicInfo,
    /// Per-cell voltages
    CellVoltages,
    /// Hardware version string
    HardwareVersion,
}

impl From<CommandArg> for protocol::Command {
    fn from(arg: CommandArg) -> Self {
        match arg {
            CommandArg::BasicInfo => protocol::Command::BasicInfo,
            CommandArg::CellVoltages => protocol::Command::CellVoltages,
            CommandArg::HardwareVersion => protocol::Command::HardwareVersion,
        }
    }
}

const fn about_text() -> &'static str {
    "ECO-WORTHY BMS Bluetooth command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Advertised Bluetooth name of a device; repeat for multiple devices
    #[arg(short, long = "device")]
    pub devices: Vec<String>,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Timeout for one command exchange (e.g., "2s", "5s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "5s")]
    pub timeout: Duration,

    /// Settle time between devices within one scan pass (e.g., "2s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "2s")]
    pub settle: Duration,
}
