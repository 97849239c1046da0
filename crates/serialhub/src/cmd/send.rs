use serialhub_port::PortManager;
use tracing::debug;
use uuid::Uuid;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{port_error, CliResult, SUCCESS};
use crate::output::{print_batch, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let attributes = args.line.attributes()?;
    let protocol = args.line.protocol()?;
    let session = args
        .session
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let manager = PortManager::new();
    manager
        .connect(&args.port, attributes, protocol)
        .map_err(|err| port_error("connect failed", err))?;

    debug!(port = %args.port, %session, "sending command");
    let result = manager.dispatch(&args.port, &session, &args.command, timeout);
    manager.close_all();

    let batch = result.map_err(|err| port_error("send failed", err))?;
    print_batch(&args.port, &session, &batch, format);
    Ok(SUCCESS)
}
