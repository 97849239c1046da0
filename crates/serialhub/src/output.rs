use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serialhub_frame::{BatchResponse, ProtocolEvent};
use serialhub_transport::PortInfo;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct BatchOutput<'a> {
    port: &'a str,
    session: &'a str,
    result: &'a str,
    events: &'a [ProtocolEvent],
}

#[derive(Serialize)]
struct LineOutput<'a> {
    port: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'a ProtocolEvent>,
    timestamp: String,
}

pub fn print_ports(ports: &[PortInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ports),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "TYPE", "VID:PID", "SERIAL", "PRODUCT"]);
            for port in ports {
                table.add_row(vec![
                    port.device.clone(),
                    port.port_type.clone(),
                    usb_id(port),
                    port.serial_number.clone().unwrap_or_default(),
                    port.product.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for port in ports {
                println!("{} type={} id={}", port.device, port.port_type, usb_id(port));
            }
        }
        OutputFormat::Raw => {
            for port in ports {
                println!("{}", port.device);
            }
        }
    }
}

pub fn print_batch(port: &str, session: &str, batch: &BatchResponse, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&BatchOutput {
            port,
            session,
            result: &batch.result,
            events: &batch.events,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "DETAIL"]);
            for event in &batch.events {
                table.add_row(vec![event_kind(event).to_string(), event_detail(event)]);
            }
            table.add_row(vec!["result".to_string(), batch.result.clone()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("port={port} session={session}");
            for event in &batch.events {
                println!("  {}: {}", event_kind(event), event_detail(event));
            }
            println!("{}", batch.result);
        }
        OutputFormat::Raw => {
            print_raw(batch.result.as_bytes());
            if !batch.result.is_empty() {
                print_raw(b"\n");
            }
        }
    }
}

pub fn print_line(port: &str, line: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&LineOutput {
            port,
            line: Some(line),
            event: None,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!("{port} | {line}"),
        OutputFormat::Raw => println!("{line}"),
    }
}

pub fn print_event(port: &str, event: &ProtocolEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&LineOutput {
            port,
            line: None,
            event: Some(event),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("{port} * {} {}", event_kind(event), event_detail(event))
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn event_kind(event: &ProtocolEvent) -> &'static str {
    match event {
        ProtocolEvent::Begin { .. } => "begin",
        ProtocolEvent::End { .. } => "end",
        ProtocolEvent::Fault { .. } => "fault",
    }
}

fn event_detail(event: &ProtocolEvent) -> String {
    match event {
        ProtocolEvent::Begin { identifier } | ProtocolEvent::End { identifier } => {
            identifier.clone()
        }
        ProtocolEvent::Fault { kind, trace } => format!("{kind}: {trace}"),
    }
}

fn usb_id(port: &PortInfo) -> String {
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!("{vid:04x}:{pid:04x}"),
        _ => String::new(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
