//! car is like tar, but for containers: list or extract files from an OCI
//! image's filesystem layers, straight from the registry.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use car_image::{Car, Reference, RegistryClient};
use clap::Parser;
use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod flags;

/// car is like tar, but for containers!
#[derive(Debug, Parser)]
#[command(name = "car", version, about = "car is like tar, but for containers!")]
struct Cli {
    /// OCI reference to list or extract files from,
    /// e.g. envoyproxy/envoy:v1.18.3 or ghcr.io/homebrew/core/envoy:1.18.3-1
    #[arg(short = 'f', long, value_name = "reference")]
    reference: String,

    /// List image filesystem layers to stdout
    #[arg(short = 't', long)]
    list: bool,

    /// Extract the image filesystem layers
    #[arg(short = 'x', long)]
    extract: bool,

    /// Required when multi-architecture, e.g. linux/arm64, darwin/amd64 or
    /// windows/amd64
    #[arg(long, default_value = "", hide_default_value = true)]
    platform: String,

    /// Regular expression to match the 'created_by' field of image layers
    #[arg(long, value_name = "regex")]
    created_by_pattern: Option<String>,

    /// Change to this directory before extracting files
    #[arg(short = 'C', long, default_value = ".")]
    directory: PathBuf,

    /// Strip NUMBER leading components from file names on extraction
    #[arg(long, value_name = "NUMBER", default_value_t = 0)]
    strip_components: usize,

    /// Extract or list only the first archive entry that matches each
    /// pattern or filename operand
    #[arg(short = 'q', long)]
    fast_read: bool,

    /// Produce verbose output; in extract mode this lists each file name as
    /// it is extracted, in list mode the output is similar to ls
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Produce very verbose output: a header for each image layer plus file
    /// details similar to ls
    #[arg(long, alias = "vv")]
    very_verbose: bool,

    /// Filename glob patterns selecting files, just like tar
    #[arg(value_name = "pattern")]
    patterns: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = flags::unbundle(std::env::args());
    let cli = Cli::parse_from(args);
    init_tracing();

    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "car=warn,car_image=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    if cli.list && cli.extract {
        bail!("you cannot combine flags [list] and [extract]");
    }
    if !cli.list && !cli.extract {
        bail!("specify one of flags [list] or [extract]");
    }

    flags::validate_platform(&cli.platform)?;
    let created_by_pattern = cli
        .created_by_pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid [created-by-pattern] flag")?;
    let reference = Reference::parse(&cli.reference).context("invalid [reference] flag")?;
    let directory = std::path::absolute(&cli.directory).context("invalid [directory] flag")?;

    let registry = RegistryClient::for_host(reference.domain());
    let mut car = Car::new(
        registry,
        std::io::stdout(),
        created_by_pattern,
        cli.patterns,
        cli.fast_read,
        cli.verbose,
        cli.very_verbose,
    );

    if cli.list {
        car.list(&reference, &cli.platform).await?;
    } else {
        car.extract(&reference, &cli.platform, &directory, cli.strip_components)
            .await?;
    }
    Ok(())
}
