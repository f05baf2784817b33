use clap::{Parser, Subcommand};
use frogtools_core::binary::read_bin;
use frogtools_core::bumpath::{Bumpath, ProcessOptions};
use frogtools_core::hashtable::{
    default_cache_dir, HashFetcher, HashSelection, HashTables, HttpHashSource,
};
use frogtools_core::model::BinValue;
use frogtools_core::walker::{NoProbe, RefWalker};
use frogtools_core::{read_scb, read_skl, read_tex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "FrogTools core: game file codecs and the bumpath engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory to load hash tables from (defaults to the user cache)
    #[arg(short = 'd', long, global = true)]
    hashes: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a bin/tex/skl/scb file
    Info {
        /// Input file
        input: PathBuf,
    },

    /// Dump a bin file as JSON with resolved names
    Json {
        /// Input bin file
        input: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List every file and link reference in a bin file
    Refs {
        /// Input bin file
        input: PathBuf,
    },

    /// Download the hash lists into the user cache
    FetchHashes {
        /// Re-download even if the files are already cached
        #[arg(short, long)]
        refresh: bool,
    },

    /// Rewrite selected bins and their referenced assets under a prefix
    Bumpath {
        /// Source directories to index
        #[arg(short, long, required = true)]
        source: Vec<PathBuf>,

        /// Unify paths of the bins to rewrite
        #[arg(short = 'b', long = "bin", required = true)]
        bins: Vec<String>,

        /// Prefix to insert in front of every rewritten path
        #[arg(short, long, default_value = "bum")]
        prefix: String,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Warn instead of failing on missing referenced files
        #[arg(long)]
        ignore_missing: bool,

        /// Merge linked animation bins into their parent
        #[arg(long)]
        combine_linked: bool,

        /// Output path length threshold
        #[arg(long, default_value_t = 240)]
        path_length_cap: u16,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    simple_logger::SimpleLogger::new()
        .with_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init()?;

    match &cli.command {
        Commands::Info { input } => info_command(input),
        Commands::Json { input, output } => json_command(&cli, input, output.as_deref()),
        Commands::Refs { input } => refs_command(&cli, input),
        Commands::FetchHashes { refresh } => fetch_hashes_command(*refresh),
        Commands::Bumpath {
            source,
            bins,
            prefix,
            output,
            ignore_missing,
            combine_linked,
            path_length_cap,
        } => bumpath_command(
            &cli,
            source,
            bins,
            prefix,
            output,
            ProcessOptions {
                ignore_missing: *ignore_missing,
                combine_linked: *combine_linked,
                path_length_cap: *path_length_cap,
            },
        ),
    }
}

fn load_tables(cli: &Cli, selection: HashSelection) -> HashTables {
    let mut tables = HashTables::new();
    let dir = cli.hashes.clone().or_else(default_cache_dir);
    if let Some(dir) = dir {
        if dir.exists() {
            match tables.load_dir(&dir, selection) {
                Ok(n) => log::debug!("loaded {} hashes from {}", n, dir.display()),
                Err(e) => log::warn!("failed to load hashes: {}", e),
            }
        } else {
            log::warn!(
                "hash directory {} does not exist; run fetch-hashes first",
                dir.display()
            );
        }
    }
    tables
}

fn info_command(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(input)?;
    println!("{} ({} bytes)", input.display(), data.len());

    if data.starts_with(b"PROP") || data.starts_with(b"PTCH") {
        let bin = read_bin(&data)?;
        println!("bin version {}", bin.version);
        if bin.is_patch() {
            println!("patch with {} overrides", bin.patches.len());
        }
        println!("{} linked files", bin.linked.len());
        println!("{} entries", bin.entries.len());
        for (hash, entry) in bin.entries.iter().take(20) {
            println!(
                "  {:08x}: type {:08x}, {} fields",
                hash,
                entry.type_hash,
                entry.fields.len()
            );
            for field in entry.fields.iter().take(4) {
                println!("    {:08x} = {}", field.hash, brief_value(&field.value));
            }
        }
        if bin.entries.len() > 20 {
            println!("  ... and {} more", bin.entries.len() - 20);
        }
    } else if data.starts_with(b"r3d2Mesh") {
        let scb = read_scb(&data)?;
        println!(
            "scb mesh: {} vertices, {} faces, material {:?}",
            scb.positions.len(),
            scb.faces.len(),
            scb.material().unwrap_or("")
        );
    } else if data.len() >= 4 && data[..3] == *b"TEX" {
        let tex = read_tex(&data)?;
        println!(
            "tex {}x{} {:?}, {} level(s)",
            tex.width,
            tex.height,
            tex.format,
            tex.levels.len()
        );
    } else {
        let skl = read_skl(&data)?;
        println!("skl: {} joints, {} influences", skl.joints.len(), skl.influences.len());
        if let Err(e) = skl.validate() {
            println!("warning: {}", e);
        }
    }
    Ok(())
}

fn json_command(
    cli: &Cli,
    input: &Path,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(input)?;
    let mut bin = read_bin(&data)?;
    load_tables(cli, HashSelection::All).resolve_bin(&mut bin);

    let json = serde_json::to_string_pretty(&bin)?;
    match output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{}", json),
    }
    Ok(())
}

fn refs_command(cli: &Cli, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(input)?;
    let mut bin = read_bin(&data)?;
    let tables = load_tables(cli, HashSelection::All);
    tables.resolve_bin(&mut bin);

    let walker = RefWalker::new(&tables);
    for (&hash, entry) in &bin.entries {
        for reference in walker.walk_entry(hash, entry, &NoProbe) {
            println!(
                "{:08x}\t{:?}\t{}\t{}",
                hash, reference.kind, reference.field_path, reference.value
            );
        }
    }
    Ok(())
}

fn fetch_hashes_command(refresh: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dir = default_cache_dir().ok_or("no user data directory available")?;
    let fetcher = HashFetcher::new(HttpHashSource::default(), &dir);
    let written = if refresh {
        fetcher.refresh()?
    } else {
        fetcher.ensure()?
    };
    if written.is_empty() {
        println!("hash files already cached in {}", dir.display());
    } else {
        println!("downloaded {} hash files to {}", written.len(), dir.display());
    }
    Ok(())
}

fn bumpath_command(
    cli: &Cli,
    sources: &[PathBuf],
    bins: &[String],
    prefix: &str,
    output: &Path,
    options: ProcessOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = Bumpath::new();
    engine.set_prefix(prefix);
    engine.add_source_dirs(sources)?;

    let selection: HashMap<String, bool> = bins.iter().map(|b| (b.clone(), true)).collect();
    engine.set_bin_selection(&selection);

    let tables = Arc::new(load_tables(cli, HashSelection::All));
    let tree = engine.scan(tables)?;

    let mut missing = 0usize;
    for bin in &tree.bins {
        for entry in &bin.entries {
            for r in &entry.refs {
                if !r.exists {
                    missing += 1;
                    log::debug!("{}: missing {}", bin.unify_path, r.path);
                }
            }
        }
    }
    if missing > 0 {
        log::warn!("{} references are missing from the source set", missing);
    }

    let report = engine.process(output, &options, |count, message| {
        log::info!("[{}] {}", count, message);
    })?;

    println!(
        "{} bins written, {} assets copied, {} warnings",
        report.written.len(),
        report.copied.len(),
        report.warnings.len()
    );
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    Ok(())
}

/// One-line rendering used by `info` for field previews.
fn brief_value(value: &BinValue) -> String {
    match value {
        BinValue::String(s) => format!("{:?}", s),
        BinValue::Hash { value, name } | BinValue::Link { value, name } => name
            .clone()
            .unwrap_or_else(|| format!("0x{:08x}", value)),
        BinValue::File { value, name } => name
            .clone()
            .unwrap_or_else(|| format!("0x{:016x}", value)),
        other => format!("{:?}", other.tag()),
    }
}
