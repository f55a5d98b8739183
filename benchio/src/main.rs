//! Load generator for S3-compatible object storage.
//!
//! Run `benchio --help` for the available commands.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    benchio::cli::execute()
}
