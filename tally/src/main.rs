//! The tally binary.
//!
//! Runs the distributed outlet and the self-metrics channel, and offers utilities to inspect the
//! configuration and issue authentication tokens. See `tally --help` for all commands.
mod cli;
mod cliapp;
mod setup;

use std::process;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            tally_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
