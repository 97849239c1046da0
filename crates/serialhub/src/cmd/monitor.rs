use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serialhub_port::PortManager;
use tracing::info;

use crate::cmd::MonitorArgs;
use crate::exit::{port_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_event, print_line, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let attributes = args.line.attributes()?;
    let protocol_config = args.line.protocol()?;

    let manager = PortManager::new();
    manager
        .connect(&args.port, attributes, protocol_config)
        .map_err(|err| port_error("connect failed", err))?;
    let protocol = manager
        .protocol(&args.port)
        .ok_or_else(|| CliError::new(INTERNAL, format!("{} vanished after connect", args.port)))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    info!(port = %args.port, "monitoring");

    let mut printed = 0usize;
    let limit_reached = |printed: usize| args.count.is_some_and(|count| printed >= count);

    while running.load(Ordering::SeqCst) {
        // Sampled before draining so output fed just before the reader died
        // is still printed.
        let alive = manager.is_alive(&args.port);

        for line in protocol.take_responses() {
            print_line(&args.port, &line, format);
            printed = printed.saturating_add(1);
            if limit_reached(printed) {
                manager.close_all();
                return Ok(SUCCESS);
            }
        }
        for event in protocol.take_events() {
            print_event(&args.port, &event, format);
            printed = printed.saturating_add(1);
            if limit_reached(printed) {
                manager.close_all();
                return Ok(SUCCESS);
            }
        }

        if !alive {
            manager.close_all();
            return Err(CliError::new(
                FAILURE,
                format!("{} connection dead", args.port),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }

    manager.close_all();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
