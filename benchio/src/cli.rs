//! Command line entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;

use crate::config::{Config, Overrides};
use crate::create::create_workload;
use crate::storage::S3Factory;
use crate::{observability, runner};

/// Load generator for S3-compatible object storage.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Create(CreateCommand),
    Version(VersionCommand),
}

/// write, read and delete objects and report latencies and throughput
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// comma-separated list of endpoints, such as `http://minio:9000`
    #[argh(option, short = 'e')]
    endpoint: Option<String>,

    /// the bucket to write objects to
    #[argh(option, short = 'b')]
    bucket: Option<String>,

    /// size of every object, such as `64 MiB`
    #[argh(option, short = 's')]
    object_size: Option<String>,

    /// keep 1/N of an object in memory and repeat it
    #[argh(option)]
    object_split: Option<u64>,

    /// part size for multipart transfers, `0` disables them
    #[argh(option)]
    multipart_size: Option<String>,

    /// prefix of every object key
    #[argh(option, short = 'p')]
    prefix: Option<String>,

    /// the number of objects per phase
    #[argh(option, short = 'n')]
    count: Option<u64>,

    /// the number of concurrent workers
    #[argh(option, short = 'w')]
    workers: Option<usize>,

    /// print every completed operation
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// skip the write phase
    #[argh(switch)]
    no_write: bool,

    /// skip the read phase
    #[argh(switch)]
    no_read: bool,

    /// keep the objects after the run
    #[argh(switch)]
    no_cleanup: bool,

    /// signing region, `us-east-1` by default
    #[argh(option)]
    region: Option<String>,

    /// access key for the endpoints
    #[argh(option)]
    access_key: Option<String>,

    /// secret key for the endpoints
    #[argh(option)]
    secret_key: Option<String>,

    /// write a JSON summary of the run to this path
    #[argh(option)]
    report: Option<PathBuf>,
}

impl RunCommand {
    fn overrides(&self) -> Overrides {
        Overrides {
            endpoint: self.endpoint.clone(),
            bucket: self.bucket.clone(),
            object_size: self.object_size.clone(),
            object_split: self.object_split,
            multipart_size: self.multipart_size.clone(),
            prefix: self.prefix.clone(),
            count: self.count,
            workers: self.workers,
            verbose: self.verbose.then_some(true),
            write: self.no_write.then_some(false),
            read: self.no_read.then_some(false),
            cleanup: self.no_cleanup.then_some(false),
            region: self.region.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            report_path: self.report.clone(),
        }
    }
}

/// write the workload to a local directory instead of object storage
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "create")]
struct CreateCommand {
    /// directory to save the workload in
    #[argh(option, short = 'd', default = "PathBuf::from(\".\")")]
    directory: PathBuf,

    /// size of every object, such as `64 MiB`
    #[argh(option, short = 's')]
    object_size: Option<String>,

    /// keep 1/N of an object in memory and repeat it
    #[argh(option)]
    object_split: Option<u64>,

    /// prefix of every file name
    #[argh(option, short = 'p')]
    prefix: Option<String>,

    /// the number of files to write
    #[argh(option, short = 'n')]
    count: Option<u64>,

    /// print every written file
    #[argh(switch, short = 'v')]
    verbose: bool,
}

impl CreateCommand {
    fn overrides(&self) -> Overrides {
        Overrides {
            object_size: self.object_size.clone(),
            object_split: self.object_split,
            prefix: self.prefix.clone(),
            count: self.count,
            verbose: self.verbose.then_some(true),
            ..Default::default()
        }
    }
}

/// print the benchio version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let overrides = match &args.command {
        Command::Run(command) => command.overrides(),
        Command::Create(command) => command.overrides(),
        // Special switch to just print the version and exit.
        Command::Version(_) => {
            println!("benchio {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
    };

    let config = Config::load(args.config.as_deref(), &overrides)
        .context("failed to load configuration")?;

    if let Command::Create(command) = &args.command {
        observability::init_tracing(&config);
        tracing::debug!(?config);

        create_workload(&config, &command.directory).context("failed to create workload")?;
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("benchio-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let factory = S3Factory::new(
        config.access_key.as_str(),
        config.secret_key.as_str(),
        config.region.as_str(),
    )
    .with_request_timeout(config.request_timeout);

    runtime
        .block_on(runner::run(&config, &factory))
        .context("benchmark failed")?;

    Ok(())
}
