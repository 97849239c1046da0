use std::time::Duration;

use clap::{Args, Subcommand};
use serialhub_frame::{Encoding, ProtocolConfig, DEFAULT_MARKER};
use serialhub_transport::{Parity, PortAttributes, DEFAULT_BAUDRATE};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod monitor;
pub mod ports;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports visible to this host.
    Ports(PortsArgs),
    /// Send one enveloped command and print the batch response.
    Send(SendArgs),
    /// Print lines and envelope events received on a port.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ports(args) => ports::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Line settings shared by every command that opens a port.
#[derive(Args, Debug)]
pub struct LineArgs {
    /// Line speed.
    #[arg(long, short = 'b', default_value_t = DEFAULT_BAUDRATE, env = "SERIALHUB_BAUDRATE")]
    pub baudrate: u32,
    /// Data bits (5-8).
    #[arg(long, default_value_t = 8)]
    pub bytesize: u8,
    /// Parity: N, E or O.
    #[arg(long, default_value = "N")]
    pub parity: String,
    /// Stop bits (1 or 2).
    #[arg(long, default_value_t = 1)]
    pub stopbits: u8,
    /// Software flow control.
    #[arg(long, conflicts_with = "rtscts")]
    pub xonxoff: bool,
    /// Hardware flow control.
    #[arg(long)]
    pub rtscts: bool,
    /// Envelope marker character.
    #[arg(long, default_value_t = DEFAULT_MARKER)]
    pub marker: char,
    /// Line terminator; `\n`, `\r` and `\t` escapes are understood.
    #[arg(long, default_value = "\\n")]
    pub terminator: String,
    /// Wire encoding: ascii or utf-8.
    #[arg(long, default_value = "ascii")]
    pub encoding: String,
}

impl LineArgs {
    pub fn attributes(&self) -> CliResult<PortAttributes> {
        let attributes = PortAttributes {
            baudrate: self.baudrate,
            bytesize: self.bytesize,
            parity: from_name::<Parity>("parity", &self.parity)?,
            stopbits: self.stopbits,
            xonxoff: self.xonxoff,
            rtscts: self.rtscts,
        };
        attributes
            .validate()
            .map_err(|err| CliError::usage(err.to_string()))?;
        Ok(attributes)
    }

    pub fn protocol(&self) -> CliResult<ProtocolConfig> {
        let config = ProtocolConfig {
            marker: self.marker,
            terminator: unescape(&self.terminator),
            encoding: from_name::<Encoding>("encoding", &self.encoding)?,
        };
        config
            .validate()
            .map_err(|err| CliError::usage(err.to_string()))?;
        Ok(config)
    }
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Port path (e.g. /dev/ttyUSB0, COM3, socket://host:port).
    pub port: String,
    /// Command text to wrap in the envelope.
    pub command: String,
    /// Envelope id. Default: a random id.
    #[arg(long, short = 's')]
    pub session: Option<String>,
    /// Maximum wait between device events (e.g. 5s, 500ms).
    #[arg(long, short = 't', default_value = "5s")]
    pub timeout: String,
    #[command(flatten)]
    pub line: LineArgs,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Port path (e.g. /dev/ttyUSB0, COM3, socket://host:port).
    pub port: String,
    /// Exit after printing N lines or events.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub line: LineArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `150ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Expand `\n`, `\r`, `\t` and `\\` escapes.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn from_name<T: serde::de::DeserializeOwned>(what: &str, name: &str) -> CliResult<T> {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .map_err(|_| CliError::usage(format!("unknown {what}: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_args() -> LineArgs {
        LineArgs {
            baudrate: 9600,
            bytesize: 8,
            parity: "N".to_string(),
            stopbits: 1,
            xonxoff: false,
            rtscts: false,
            marker: '!',
            terminator: "\\r\\n".to_string(),
            encoding: "utf-8".to_string(),
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn unescape_terminators() {
        assert_eq!(unescape("\\n"), "\n");
        assert_eq!(unescape("\\r\\n"), "\r\n");
        assert_eq!(unescape("a\\qb\\"), "a\\qb\\");
        assert_eq!(unescape(";"), ";");
    }

    #[test]
    fn line_args_build_configs() {
        let args = line_args();
        let protocol = args.protocol().unwrap();
        assert_eq!(protocol.terminator, "\r\n");
        assert_eq!(protocol.encoding, Encoding::Utf8);

        let attributes = LineArgs {
            parity: "even".to_string(),
            ..line_args()
        }
        .attributes()
        .unwrap();
        assert_eq!(attributes.parity, Parity::Even);
    }

    #[test]
    fn line_args_reject_unknown_names() {
        let bad_parity = LineArgs {
            parity: "X".to_string(),
            ..line_args()
        };
        assert_eq!(bad_parity.attributes().unwrap_err().code, crate::exit::USAGE);

        let bad_encoding = LineArgs {
            encoding: "latin-1".to_string(),
            ..line_args()
        };
        assert!(bad_encoding.protocol().is_err());
    }
}
