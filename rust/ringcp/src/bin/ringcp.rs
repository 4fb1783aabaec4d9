//! ringcp: copy a file through a System V shared-memory ring buffer.
//!
//! ```bash
//! ringcp -t 2 --buffer-capacity 4096 --buffer-number 16 big.iso copy.iso
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ringcp::config::{DEFAULT_CAPACITY, DEFAULT_SLOT_COUNT};
use ringcp::signal::reraise;
use ringcp::{CopyOptions, Coordinator, Error, SyncMode, logging};
use sysv_shm::IpcKey;

#[derive(Parser, Debug)]
#[command(name = "ringcp", version)]
#[command(about = "A simple cp implementation with inter-process communication")]
struct Args {
    /// Explain what is being done
    #[arg(short, long)]
    verbose: bool,

    /// 1 - semaphore, 2 - retry loop, other - none
    #[arg(short = 't', long = "type", default_value_t = 1, allow_negative_numbers = true)]
    mode: i64,

    /// Slot capacity in bytes
    #[arg(long, default_value_t = DEFAULT_CAPACITY as i64, allow_negative_numbers = true)]
    buffer_capacity: i64,

    /// Number of slots
    #[arg(long, default_value_t = DEFAULT_SLOT_COUNT as i64, allow_negative_numbers = true)]
    buffer_number: i64,

    /// IPC key to use instead of one derived from this executable
    #[arg(long, allow_negative_numbers = true)]
    key: Option<i32>,

    /// Never draw the progress bar
    #[arg(long)]
    no_progress: bool,

    /// File to read
    source: PathBuf,

    /// File to create or truncate
    dest: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    let options = CopyOptions {
        source: args.source,
        dest: args.dest,
        mode: SyncMode::from_code(args.mode),
        capacity: args.buffer_capacity,
        slot_count: args.buffer_number,
        verbose: args.verbose,
        key: args.key.map(IpcKey::from_raw),
        progress: !args.no_progress,
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("ringcp: failed to create runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(Coordinator::new(options).run());
    drop(rt);

    match result {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(Error::Interrupted { signal }) => reraise(signal),
        Err(e) => {
            eprintln!("ringcp: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
