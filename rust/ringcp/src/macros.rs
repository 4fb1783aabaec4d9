// Tracing macros for ringcp
//
// These macros forward to the tracing crate.

// -----------------------------------------------------------------------------
// trace! - Very verbose: per-slot bookkeeping, spin iterations
// -----------------------------------------------------------------------------

#![allow(unused_macro_rules)]

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!($($arg)*) }
}

// -----------------------------------------------------------------------------
// debug! - Lifecycle steps and per-chunk transfer events (shown with -v)
// -----------------------------------------------------------------------------

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) }
}

// -----------------------------------------------------------------------------
// info! - One line per phase of a run
// -----------------------------------------------------------------------------

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!($($arg)*) }
}

// -----------------------------------------------------------------------------
// warn! - Cleanup that did not go through, unsafe modes
// -----------------------------------------------------------------------------

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}

// -----------------------------------------------------------------------------
// error! - Failures that end a process
// -----------------------------------------------------------------------------

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!($($arg)*) }
}

// Macros are made available via #[macro_use] on the module in lib.rs
