use serialhub_transport::available_ports;

use crate::cmd::PortsArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_ports, OutputFormat};

pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = available_ports().map_err(|err| transport_error("Cannot list comports", err))?;
    tracing::debug!(count = ports.len(), "listing ports");
    print_ports(&ports, format);
    Ok(SUCCESS)
}
