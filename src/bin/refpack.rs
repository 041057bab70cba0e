//! refpack - reference image packager.
//!
//! Validates the libraries in a `refpack.toml`, writes the archive, compiles
//! asset catalogs when Xcode is available, and attaches the result to a
//! project directory.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use refpack::archive::Archive;
use refpack::catalog::{catalog_dir_name, AssetCatalog, DEFAULT_CATALOG_NAME};
use refpack::config::{PackConfig, DEFAULT_MANIFEST};
use refpack::integrate::DirectoryProject;
use refpack::pipeline::{Pipeline, PrepareOutcome, Prepared};
use refpack::preflight;
use refpack::source::ManifestSource;
use refpack::store::ArtifactStore;

#[derive(Parser)]
#[command(name = "refpack")]
#[command(about = "Reference image packager")]
#[command(
    after_help = "QUICK START:\n  refpack preflight          Check for xcrun/actool\n  refpack build              Validate and write the archive\n  refpack attach --project . Build and attach to a project\n  refpack inspect <archive>  List groups and records"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every library and write the archive
    Build {
        #[command(flatten)]
        pack: PackArgs,
    },

    /// Build, then attach the result to a project directory
    Attach {
        #[command(flatten)]
        pack: PackArgs,

        /// Project directory to attach into
        #[arg(long)]
        project: PathBuf,

        /// Attach an existing archive instead of rebuilding
        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Show the groups and records in an archive
    Inspect {
        archive: PathBuf,
    },

    /// Export an archive as an uncompiled asset catalog
    Export {
        archive: PathBuf,

        /// Directory to write `<catalog-name>.xcassets` into
        #[arg(short, long)]
        out: PathBuf,

        #[arg(long, default_value = DEFAULT_CATALOG_NAME)]
        catalog_name: String,
    },

    /// Inspect or clean the compiled artifact cache
    Store {
        #[command(subcommand)]
        what: StoreTarget,

        /// Store directory (default: <cache dir>/refpack)
        #[arg(long, global = true)]
        store: Option<PathBuf>,
    },

    /// Check that the catalog compiler is installed
    Preflight {
        /// Fail if xcrun is missing (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum StoreTarget {
    /// Show entry count and size
    Status,
    /// Remove unreferenced blobs
    Gc,
    /// Keep only the newest entries per kind, then gc
    Prune {
        #[arg(long, default_value = "32")]
        keep_last: usize,
    },
}

#[derive(Args)]
struct PackArgs {
    /// Package manifest
    #[arg(short, long, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,

    /// Archive output path (overrides [package] output)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Artifact store directory (overrides [store] dir)
    #[arg(long, conflicts_with = "no_store")]
    store: Option<PathBuf>,

    /// Don't cache compiled catalogs
    #[arg(long)]
    no_store: bool,

    /// Don't compile catalogs even if xcrun is available
    #[arg(long)]
    no_compile: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build { pack } => {
            let pipeline = open_pipeline(&pack)?;
            let prepared = prepare(&pipeline)?;
            print_prepared(&prepared);
        }
        Commands::Attach {
            pack,
            project,
            archive,
        } => {
            let pipeline = open_pipeline(&pack)?;
            let prepared = match archive {
                Some(path) => Prepared::load(&path)?,
                None => prepare(&pipeline)?,
            };
            print_prepared(&prepared);

            let mut target = DirectoryProject::open(&project, &pipeline.config().catalog_name)?;
            let report = pipeline.attach(&prepared, &mut target)?;
            if report.is_empty() {
                println!("Nothing to attach.");
            } else {
                println!(
                    "Attached to {}: {} compiled, {} in {}",
                    project.display(),
                    report.compiled.len(),
                    report.catalog.len(),
                    catalog_dir_name(&pipeline.config().catalog_name)
                );
            }
        }
        Commands::Inspect { archive } => inspect(&archive)?,
        Commands::Export {
            archive,
            out,
            catalog_name,
        } => {
            let archive = Archive::read_from(&archive)?;
            let catalog = AssetCatalog::from_archive(&catalog_name, &archive);
            let dir = out.join(catalog_dir_name(&catalog_name));
            let images = catalog.write(&dir)?;
            println!(
                "Exported {} groups ({} images) to {}",
                catalog.len(),
                images.len(),
                dir.display()
            );
        }
        Commands::Store { what, store } => {
            let store = match store {
                Some(dir) => ArtifactStore::open(&dir)?,
                None => ArtifactStore::open_default()?,
            };
            match what {
                StoreTarget::Status => {
                    let status = store.status()?;
                    println!("Store:   {}", status.root.display());
                    println!("Entries: {}", status.index_entries);
                    println!(
                        "Blobs:   {} ({})",
                        status.referenced_blobs,
                        human_bytes(status.referenced_bytes)
                    );
                }
                StoreTarget::Gc => {
                    let removed = store.gc()?;
                    println!("Removed {} unreferenced blobs", removed);
                }
                StoreTarget::Prune { keep_last } => {
                    let pruned = store.prune_keep_last(keep_last)?;
                    let removed = store.gc()?;
                    println!("Pruned {} entries, removed {} blobs", pruned, removed);
                }
            }
        }
        Commands::Preflight { strict } => match preflight::check_host_tools() {
            Ok(()) => println!("All required tools found."),
            Err(e) if strict => return Err(e),
            Err(e) => {
                println!("{}", e);
                println!("Archives can still be built; catalogs will ship uncompiled.");
            }
        },
    }

    Ok(())
}

fn open_pipeline(args: &PackArgs) -> Result<Pipeline> {
    let mut config = PackConfig::load(&args.manifest)?;
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if let Some(dir) = &args.store {
        config.store_dir = Some(dir.clone());
    }

    let store = if args.no_store {
        None
    } else {
        let dir = config.resolved_store_dir()?;
        Some(
            ArtifactStore::open(&dir)
                .with_context(|| format!("opening artifact store '{}'", dir.display()))?,
        )
    };

    let compiler = if args.no_compile {
        None
    } else {
        config.compiler.locate()
    };

    Ok(Pipeline::new(config, store, compiler))
}

fn prepare(pipeline: &Pipeline) -> Result<Prepared> {
    let source = ManifestSource::new(pipeline.config());
    match pipeline.prepare_source(&source)? {
        PrepareOutcome::Prepared(prepared) => Ok(prepared),
        PrepareOutcome::Failed(failures) => {
            for failure in &failures {
                eprintln!("error: {}", failure);
            }
            bail!(
                "{} of {} libraries failed validation; no archive was written",
                failures.len(),
                pipeline.config().libraries.len()
            );
        }
    }
}

fn print_prepared(prepared: &Prepared) {
    let archive = prepared.archive();
    println!(
        "Archive: {} ({} groups, {} images)",
        prepared.archive_path().display(),
        archive.len(),
        archive.record_count()
    );
    if !prepared.compiled.is_empty() || !prepared.cached.is_empty() {
        println!(
            "Compiled: {} new, {} cached",
            prepared.compiled.len(),
            prepared.cached.len()
        );
    }
}

fn inspect(path: &Path) -> Result<()> {
    let archive = Archive::read_from(path)?;
    println!("{} (format version {})", path.display(), archive.format_version());
    for group in archive.groups() {
        println!("  {} ({} images)", group.name(), group.len());
        for record in group {
            println!(
                "    {:<32} {:>5}x{:<5} {:<4} {}",
                record.name(),
                record.width(),
                record.height(),
                record.format().to_string(),
                human_bytes(record.pixel_data().len() as u64)
            );
        }
    }
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
