//! ringcp-get: copies the ring into the destination file.
//!
//! Started by `ringcp`; see [`ringcp::spawn`] for the argument contract.

use std::process::ExitCode;

use ringcp::endpoint::run_get;
use ringcp::{EndpointArgs, logging};

fn main() -> ExitCode {
    let args = match EndpointArgs::from_env() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("ringcp-get: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(args.config.verbose);

    let span = tracing::info_span!("get", pid = std::process::id());
    let _enter = span.enter();

    match run_get(&args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
