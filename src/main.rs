use clap::{Parser, Subcommand};
use numbox::dtype::render;
use numbox::{CodecId, Entry, FileEngine, Store, StoreOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nbx", about = "Inspect .nbx numeric containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List groups and datasets
    Ls {
        input: PathBuf,
    },
    /// Show container metadata
    Info {
        input: PathBuf,
    },
    /// Print a dataset's values
    Dump {
        input: PathBuf,
        /// Absolute dataset path, e.g. /data/v
        dataset: String,
        /// Maximum number of rows to print
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Re-check every dataset block against the index
    Verify {
        input: PathBuf,
    },
    /// Rewrite a container with another payload codec
    Repack {
        input:  PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Codec: zstd (default), lz4, none
        #[arg(short, long, default_value = "zstd")]
        codec:  String,
        /// Compression level (zstd 1-19; ignored for lz4/none)
        #[arg(short, long, default_value = "19")]
        level:  i32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Ls ───────────────────────────────────────────────────────────────
        Commands::Ls { input } => {
            let store = open_store(&input)?;
            println!("{:<40} {:<8} Extents", "Path", "Tag");
            for entry in store.list() {
                match entry {
                    Entry::Group { path } => println!("{:<40} {:<8} -", format!("{path}/"), "group"),
                    Entry::Dataset { path, tag, extents } => {
                        println!("{:<40} {:<8} {:?}", path, tag.name(), extents)
                    }
                }
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let store   = open_store(&input)?;
            let engine  = store.engine();
            let sb      = engine.superblock();
            let entries = store.list();
            let groups  = entries.iter().filter(|e| matches!(e, Entry::Group { .. })).count();
            let created = chrono::DateTime::from_timestamp(engine.created_at(), 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".into());

            println!("── .nbx Container ───────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Format version {}", sb.format_version);
            println!("  UUID           {}", sb.container_uuid);
            println!("  Created        {}", created);
            println!("  Index offset   {} B", sb.index_offset);
            println!("  Index size     {} B", sb.index_size);
            println!("  Groups         {}", groups);
            println!("  Datasets       {}", sb.dataset_count);
            println!("  File size      {} B", std::fs::metadata(&input)?.len());
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, dataset, limit } => {
            let store = open_store(&input)?;
            let raw   = store.read_raw(&dataset)?;
            let values = render(&raw.data, raw.tag.kind());
            let width = match raw.extents.as_slice() {
                [_, w] => *w as usize,
                _      => 1,
            };
            println!("{}  {}  {:?}", dataset, raw.tag, raw.extents);
            if width == 0 {
                return Ok(());
            }
            let rows = values.len() / width;
            for row in values.chunks(width).take(limit) {
                println!("  {}", row.join("  "));
            }
            if rows > limit {
                println!("  … {} more row(s)", rows - limit);
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let report = FileEngine::verify(&input)?;
            let failed = report.iter().filter(|e| !e.ok).count();
            for entry in &report {
                match &entry.error {
                    None    => println!("  ok      {}", entry.path),
                    Some(e) => println!("  FAILED  {}  ({})", entry.path, e),
                }
            }
            println!("{} dataset(s), {} failed", report.len(), failed);
            if failed > 0 {
                return Err(format!("{failed} dataset(s) failed verification").into());
            }
        }

        // ── Repack ───────────────────────────────────────────────────────────
        Commands::Repack { input, output, codec, level } => {
            let src  = open_store(&input)?;
            let opts = StoreOptions { codec: parse_codec(&codec), level, ..StoreOptions::default() };
            let dst  = Store::create(&output, opts)?;
            let mut copied = 0usize;
            for entry in src.list() {
                if let Entry::Dataset { path, .. } = entry {
                    dst.write_raw(&path, &src.read_raw(&path)?)?;
                    copied += 1;
                }
            }
            dst.close()?;
            println!("Repacked {} dataset(s) → {}", copied, output.display());
        }
    }

    Ok(())
}

fn open_store(path: &PathBuf) -> Result<Store<FileEngine>, Box<dyn std::error::Error>> {
    Ok(Store::open(path, StoreOptions::read_only())?)
}

fn parse_codec(s: &str) -> CodecId {
    CodecId::from_name(s).unwrap_or_else(|| {
        eprintln!("Unknown codec '{}', defaulting to zstd", s);
        CodecId::Zstd
    })
}
