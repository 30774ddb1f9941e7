//! protolane: client generator CLI
//!
//! Reads a protoc descriptor set (or the JSON schema form) and writes one
//! Rust source per protobuf package.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use protolane::codegen::{self, CallStyle};
use protolane::{Config, Generator, SchemaSet};

/// Protolane client generator
#[derive(Parser)]
#[command(name = "protolane")]
#[command(version = protolane::PKG_VERSION)]
#[command(about = "Generate typed RPC clients from protobuf descriptors")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate client sources
    Generate {
        #[command(flatten)]
        input: Input,
        /// Output directory
        #[arg(short, long)]
        out: PathBuf,
        /// Path to configuration file (generator options)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the method bindings of every service
    Inspect {
        #[command(flatten)]
        input: Input,
    },
}

#[derive(clap::Args)]
struct Input {
    /// Descriptor set written by `protoc --descriptor_set_out`
    #[arg(short, long)]
    descriptor_set: PathBuf,
    /// Read the descriptor set as JSON schema declarations instead
    #[arg(long)]
    json: bool,
}

impl Input {
    fn load(&self) -> protolane::Result<SchemaSet> {
        if self.json {
            SchemaSet::from_json(&fs::read_to_string(&self.descriptor_set)?)
        } else {
            SchemaSet::from_descriptor_bytes(&fs::read(&self.descriptor_set)?)
        }
    }
}

fn main() -> ExitCode {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let result = match args.command {
        Command::Generate { input, out, config } => generate(&input, &out, config.as_deref()),
        Command::Inspect { input } => inspect(&input),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn generate(input: &Input, out: &Path, config: Option<&Path>) -> protolane::Result<ExitCode> {
    let options = match config {
        Some(path) => Config::load(Some(path))?.generator,
        None => Default::default(),
    };

    let schema = input.load()?;
    let output = Generator::new(options).generate(&schema)?;

    fs::create_dir_all(out)?;
    for file in &output.files {
        let path = out.join(&file.name);
        fs::write(&path, &file.source)?;
        println!("wrote {}", path.display());
    }

    for method in &output.unsupported {
        eprintln!(
            "skipped {} ({}): no call shape for this cardinality",
            method.path, method.cardinality
        );
    }
    for failure in &output.errors {
        eprintln!("failed {}: {}", failure.file, failure.error);
    }

    Ok(if output.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn inspect(input: &Input) -> protolane::Result<ExitCode> {
    let schema = input.load()?;
    for service in codegen::service_bindings(&schema)? {
        println!("{}", service.service_id);
        for method in &service.methods {
            let marker = if method.call == CallStyle::Unsupported {
                " (unsupported)"
            } else {
                ""
            };
            println!(
                "  {:<40} {:<18} {}{marker}",
                method.path,
                method.cardinality.as_str(),
                method.call
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}
