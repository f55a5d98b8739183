//! Writes the benchmark workload to a local directory.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::Config;
use crate::content::ContentSource;
use crate::error::Result;
use crate::executor::object_key;

/// Writes `config.count` files named like the object keys of a run into `directory`.
///
/// Every file holds `config.object_size` bytes built from one shared random sample, exactly as
/// the objects uploaded by a run. Returns the paths written, in key order.
pub fn create_workload(config: &Config, directory: &Path) -> Result<Vec<PathBuf>> {
    let start = Instant::now();
    if config.verbose {
        println!("Generating in-memory sample data... ");
    }
    let source = ContentSource::generate(config.object_size.as_u64(), config.object_split)?;

    fs::create_dir_all(directory)?;

    let mut written = Vec::with_capacity(usize::try_from(config.count).unwrap_or_default());
    for index in 0..config.count {
        let path = directory.join(object_key(&config.prefix, index));

        let mut file = BufWriter::new(File::create(&path)?);
        let bytes = io::copy(&mut source.reader(), &mut file)?;
        file.flush()?;

        if config.verbose {
            println!("Wrote {bytes} bytes to {}", path.display());
        }
        tracing::trace!(path = %path.display(), bytes, "wrote object");
        written.push(path);
    }

    if config.verbose {
        println!("Done ({:?})", start.elapsed());
    }

    Ok(written)
}
