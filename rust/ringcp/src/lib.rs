//! Copy a file between processes through a System V shared-memory ring.
//!
//! Three executables cooperate:
//!
//! - `ringcp` ([`coordinator`]) validates the request, creates the semaphore
//!   set and ring segment, starts both endpoints and removes everything at
//!   the end, whichever way the run ends.
//! - `ringcp-put` ([`endpoint::run_put`]) reads the source file into ring
//!   slots and finishes with a zero-length sentinel.
//! - `ringcp-get` ([`endpoint::run_get`]) drains slots into the destination
//!   until it sees the sentinel.
//!
//! The ring lives in [`ring`], its byte layout in [`layout`], and the three
//! ways of pacing producer and consumer in [`gate`].

#![cfg(unix)]

#[macro_use]
mod macros;

pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod gate;
pub mod layout;
pub mod logging;
pub mod progress;
pub mod ring;
pub mod signal;
pub mod spawn;

pub use config::TransferConfig;
pub use coordinator::{CopyOptions, Coordinator, Phase, SharedResources, TransferReport};
pub use error::{Error, Result};
pub use gate::{Gate, SyncMode};
pub use layout::{LayoutError, RingLayout};
pub use ring::{RingBuffer, RingConsumer, RingProducer, RingSegment, RingStatus};
pub use spawn::{EndpointArgs, Role};
