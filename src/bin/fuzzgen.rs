//! Generate a fuzzing corpus from a script.
//!
//! Usage:
//!   fuzzgen SCRIPT [-n COUNT] [-s SEED] [-o DIR] [--little-endian] [--dump] [--max-failures N]
//!
//! Without `-o`, artifacts are printed to stdout as hex, one per line. The seed falls back
//! to `FUZZDSL_SEED`, then to a fresh random seed (which is logged so a run can be
//! replayed). Log verbosity follows `RUST_LOG`.

use anyhow::{Context, Result};
use clap::Parser;
use fuzzdsl::config::SEED_ENV;
use fuzzdsl::dump::hex_string;
use fuzzdsl::{dump_field, parse, Endianness, Generator, GeneratorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fuzzgen", about = "Generate fuzzing artifacts from a layout script")]
struct Args {
    /// Script describing the artifact layout.
    script: PathBuf,
    /// Number of artifacts to generate.
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,
    /// Seed for the random source.
    #[arg(short, long, env = SEED_ENV)]
    seed: Option<u64>,
    /// Write artifacts into this directory instead of printing them.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Write numbers least significant byte first.
    #[arg(long)]
    little_endian: bool,
    /// Print each generated field tree.
    #[arg(long)]
    dump: bool,
    /// Consecutive failed passes tolerated before giving up.
    #[arg(long, default_value_t = 16)]
    max_failures: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading {}", args.script.display()))?;
    let program = parse(&source).with_context(|| format!("parsing {}", args.script.display()))?;

    let seed = args.seed.unwrap_or_else(rand::random);
    tracing::info!(seed, script = %args.script.display(), "generating");
    let config = GeneratorConfig {
        seed,
        count: args.count,
        max_failures: args.max_failures,
        endianness: if args.little_endian {
            Endianness::Little
        } else {
            Endianness::Big
        },
        output_dir: args.output.clone(),
        ..GeneratorConfig::default()
    };
    let mut generator = Generator::new(program, &config);

    if let Some(dir) = &config.output_dir {
        let report = generator
            .write_corpus(dir)
            .with_context(|| format!("writing corpus to {}", dir.display()))?;
        eprintln!(
            "wrote {} artifacts to {} (seed {}, {} passes discarded)",
            report.written.len(),
            dir.display(),
            seed,
            report.discarded
        );
        return Ok(());
    }

    for _ in 0..config.count {
        let root = generator.next_field()?;
        if args.dump {
            println!("{}", dump_field(&root, generator.program().mapper()));
        }
        let bytes = root.to_bytes()?;
        println!("{}", hex_string(&bytes));
    }
    Ok(())
}
