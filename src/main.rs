//! Command line front end: assembles section directories into patch blobs and dumps existing blobs

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use log::error;

use ramblob::assemble::build;
use ramblob::fragment::selector::Target;
use ramblob::wire::decode::decode_stream;
use ramblob::wire::Record;
use ramblob::Result;

/// Firmware RAM patch packager
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// The subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a write/launch command stream from a directory of section files
    Assemble {
        /// Directory holding `NN_writeram_0xAAAAAAAA.bin` sections
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Blob to write
        #[arg(short, long)]
        output: PathBuf,

        /// Chip revision to package for
        #[arg(long, default_value = "generic")]
        chip: String,

        /// Firmware build to package for
        #[arg(long, default_value = "generic")]
        firmware: String,
    },
    /// Print the records of an existing blob
    Inspect {
        /// Blob to decode
        blob: PathBuf,
    },
}

/// Sets up `env_logger`, defaulting to `info` and honouring `RUST_LOG`
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Assembles `input_dir` for the given target and writes the result to `output`
fn run_assemble(input_dir: &Path, output: &Path, chip: &str, firmware: &str) -> Result<()> {
    let target = Target::new(chip, firmware)?;
    let assembly = build(input_dir, output, &target)?;
    println!(
        "{}: {} write record(s) + launch, {} bytes",
        output.display(),
        assembly.write_count(),
        assembly.bytes().len()
    );
    Ok(())
}

/// Prints one line per record of `blob`
fn run_inspect(blob: &Path) -> Result<()> {
    let bytes = fs::read(blob).map_err(|source| ramblob::Error::SectionUnreadable {
        path: blob.to_owned(),
        source,
    })?;
    for record in decode_stream(&bytes)? {
        match record {
            Record::Write(write) => println!(
                "write  {:#010x}..{:#010x} ({} bytes)",
                write.address(),
                write.address() as u64 + write.data().len() as u64,
                write.data().len()
            ),
            Record::Launch(_) => println!("launch"),
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Assemble {
            input_dir,
            output,
            chip,
            firmware,
        } => run_assemble(&input_dir, &output, &chip, &firmware),
        Commands::Inspect { blob } => run_inspect(&blob),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{} ({:?})", e, e.kind());
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                error!("  caused by: {}", cause);
                source = std::error::Error::source(cause);
            }
            ExitCode::FAILURE
        }
    }
}
