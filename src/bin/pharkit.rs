//! pharkit CLI - build, verify and inspect PHAR archives

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pharkit::error::ErrorKind;
use pharkit::{normalize_file, ArchiveReader, BackendRegistry, BuildConfig, Builder, PharError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "pharkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build an archive from a configuration file
    Build {
        /// Configuration file
        #[arg(short, long, default_value = "pharkit.toml")]
        config: PathBuf,

        /// Override the output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the number of compaction workers
        #[arg(short = 'j', long)]
        parallelism: Option<usize>,

        /// Fixed timestamp for a reproducible archive
        #[arg(long)]
        timestamp: Option<u32>,

        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify the signature of an archive
    Verify {
        archive: PathBuf,

        /// Public key (defaults to <archive>.pubkey)
        #[arg(long)]
        pubkey: Option<PathBuf>,

        /// Also check the CRC of every entry
        #[arg(long)]
        entries: bool,
    },

    /// Show the manifest of an archive
    Info {
        archive: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Rewrite entry timestamps and re-sign an archive in place
    Normalize {
        archive: PathBuf,

        #[arg(long)]
        timestamp: u32,

        /// Private key for asymmetrically signed archives
        #[arg(long)]
        key: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            let kind = err.downcast_ref::<PharError>().map(PharError::kind);
            ExitCode::from(match kind {
                Some(ErrorKind::Corrupt) => 2,
                Some(ErrorKind::SignatureMismatch) => 3,
                Some(ErrorKind::KeyMaterial) => 4,
                Some(ErrorKind::Config) => 5,
                _ => 1,
            })
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Build {
            config,
            output,
            parallelism,
            timestamp,
            json,
        } => build(&config, output, parallelism, timestamp, json),
        Commands::Verify {
            archive,
            pubkey,
            entries,
        } => verify(&archive, pubkey, entries),
        Commands::Info { archive, json } => info(&archive, json),
        Commands::Normalize {
            archive,
            timestamp,
            key,
        } => {
            normalize_file(&archive, timestamp, key.as_deref())?;
            println!("{}: timestamps set to {}", archive.display(), timestamp);
            Ok(())
        }
    }
}

fn build(
    config_path: &Path,
    output: Option<PathBuf>,
    parallelism: Option<usize>,
    timestamp: Option<u32>,
    json: bool,
) -> Result<()> {
    let mut config = BuildConfig::from_file(config_path)?;
    if let Some(p) = parallelism {
        config.parallelism = p;
    }
    if timestamp.is_some() {
        config.timestamp = timestamp;
    }
    config.validate()?;

    let output = output.unwrap_or_else(|| config.output_path());
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }

    let files = config.source_files()?;
    let report = Builder::new(config.to_options()?).build(files, &output)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {} files, {} bytes, {} {}",
            report.output.display(),
            report.entries,
            report.size,
            report.algorithm,
            report.signature
        );
        for warning in &report.warnings {
            println!("  warning: {} ({}): {}", warning.path, warning.compactor, warning.message);
        }
    }
    Ok(())
}

fn verify(archive: &Path, pubkey: Option<PathBuf>, entries: bool) -> Result<()> {
    let reader = ArchiveReader::open(archive)?;
    match pubkey {
        Some(key) => reader.verify_with(Some(&key), &BackendRegistry::probe())?,
        None => reader.verify()?,
    }
    if entries {
        for path in reader.list_files() {
            reader.read_file(path)?;
        }
    }
    println!(
        "{}: OK ({} {})",
        archive.display(),
        reader.signature().algorithm,
        reader.signature().hex()
    );
    Ok(())
}

fn info(archive: &Path, json: bool) -> Result<()> {
    let info = ArchiveReader::open(archive)?.inspect();
    if json {
        println!("{}", String::from_utf8_lossy(&info.to_json()?));
        return Ok(());
    }

    println!("alias:     {}", info.alias.as_deref().unwrap_or("-"));
    println!("api:       {}", info.api_version);
    println!("flags:     {:#010x}", info.flags);
    println!("signature: {} {}", info.signature.algorithm, info.signature.hash);
    println!("files:     {}", info.files.len());
    for file in &info.files {
        println!(
            "  {:<40} {:>8} {:>8} {} {:o} {}",
            file.path, file.size, file.compressed_size, file.crc32, file.permissions, file.timestamp
        );
    }
    Ok(())
}
