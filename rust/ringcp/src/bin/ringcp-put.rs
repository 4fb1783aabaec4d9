//! ringcp-put: copies the source file into the ring.
//!
//! Started by `ringcp`; see [`ringcp::spawn`] for the argument contract.

use std::process::ExitCode;

use ringcp::endpoint::run_put;
use ringcp::{EndpointArgs, logging};

fn main() -> ExitCode {
    let args = match EndpointArgs::from_env() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("ringcp-put: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(args.config.verbose);

    let span = tracing::info_span!("put", pid = std::process::id());
    let _enter = span.enter();

    match run_put(&args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
