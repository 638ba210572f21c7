//! Thin demo binary wrapping the library for manual smoke testing.
//!
//! This is the ambient driver a real director/FD integration would
//! replace. Catalog rows and volume metadata are read from flat text
//! files rather than a SQL connection, with each subcommand wrapping
//! one library operation behind a `clap::Parser` struct.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use restore_tree::bsr::VolumeRecord;
use restore_tree::builder::{CatalogRow, TreeBuilder};
use restore_tree::cancel::CancellationFlag;
use restore_tree::config::{self, Configuration};
use restore_tree::error::{Error, Result as CoreResult};
use restore_tree::selection::Selection;
use restore_tree::serialize;
use restore_tree::session::RowSource;
use restore_tree::tree::BuiltTree;

#[derive(Debug, Parser)]
#[command(name = "restore-tree-demo", version, about = "Drives the restore-tree core over flat-file catalog dumps")]
struct Args {
    /// Verbosity (-v, -vv, -vvv, ...).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a tree from a catalog-row dump and report its node count.
    Build {
        /// Path to a file of tab-separated catalog rows.
        rows: Utf8PathBuf,
        /// Write the built tree to a snapshot file afterward.
        #[arg(long)]
        save: Option<Utf8PathBuf>,
    },
    /// Build a tree, then run a scripted sequence of shell-style commands
    /// against it (`cd`, `ls`, `mark`, `unmark`, `find`, `lsmark`,
    /// `estimate`), one per line of `script` (or stdin if omitted).
    Browse {
        rows: Utf8PathBuf,
        script: Option<Utf8PathBuf>,
    },
    /// Build a tree, mark the given globs, and emit a BSR to stdout (or
    /// `--output`) using volume metadata from a flat-file catalog stub.
    Bsr {
        rows: Utf8PathBuf,
        /// Tab-separated volume records, keyed by job_id.
        volumes: Utf8PathBuf,
        /// Globs to mark before synthesizing (default: mark everything).
        #[arg(long = "mark")]
        marks: Vec<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load a previously-saved snapshot and print its node count and
    /// mark totals.
    Load {
        snapshot: Utf8PathBuf,
        #[arg(long)]
        mark_on_load: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Build { rows, save } => run_build(&rows, save.as_deref()),
        Command::Browse { rows, script } => run_browse(&rows, script.as_deref()),
        Command::Bsr {
            rows,
            volumes,
            marks,
            output,
        } => run_bsr(&rows, &volumes, &marks, output.as_deref()),
        Command::Load { snapshot, mark_on_load } => run_load(&snapshot, mark_on_load),
    }
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();
}

/// A row source that reads tab-separated catalog rows from a file
/// already loaded into memory -- a stand-in for the SQL catalog
/// collaborator.
struct FileRows {
    lines: Vec<String>,
}

impl FileRows {
    fn load(path: &Utf8PathBuf) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        Ok(Self {
            lines: text.lines().map(str::to_owned).collect(),
        })
    }
}

impl RowSource for FileRows {
    fn for_each_row(&mut self, mut handler: impl FnMut(&CatalogRow) -> CoreResult<()>) -> CoreResult<()> {
        for line in &self.lines {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 8 {
                return Err(Error::MalformedRow(format!(
                    "expected 8 tab-separated fields, got {}: {line:?}",
                    fields.len()
                )));
            }
            let row = CatalogRow {
                path: fields[0],
                filename: fields[1],
                file_index: fields[2].parse().map_err(|_| Error::MalformedRow(format!("bad file_index in {line:?}")))?,
                job_id: fields[3].parse().map_err(|_| Error::MalformedRow(format!("bad job_id in {line:?}")))?,
                lstat: fields[4],
                delta_seq: fields[5].parse().map_err(|_| Error::MalformedRow(format!("bad delta_seq in {line:?}")))?,
                fhinfo: fields[6].parse().map_err(|_| Error::MalformedRow(format!("bad fhinfo in {line:?}")))?,
                fhnode: fields[7].parse().map_err(|_| Error::MalformedRow(format!("bad fhnode in {line:?}")))?,
            };
            handler(&row)?;
        }
        Ok(())
    }
}

fn build_tree_from_file(rows_path: &Utf8PathBuf, config: &Configuration) -> Result<BuiltTree> {
    let mut source = FileRows::load(rows_path)?;
    let mut builder = TreeBuilder::new(config);
    source
        .for_each_row(|row| builder.handle_row(row, false).map(|_| ()))
        .context("ingesting catalog rows")?;
    Ok(builder.build())
}

fn run_build(rows: &Utf8PathBuf, save: Option<&Utf8PathBuf>) -> Result<()> {
    let config = config::load().unwrap_or_default();
    let tree = build_tree_from_file(rows, &config)?;
    println!("built tree: {} nodes ({} inserted)", tree.len(), tree.count());
    if let Some(save) = save {
        serialize::save_tree(&tree, save.as_std_path()).context("saving snapshot")?;
        println!("snapshot written to {save}");
    }
    Ok(())
}

fn run_load(snapshot: &Utf8PathBuf, mark_on_load: bool) -> Result<()> {
    let tree = serialize::load_tree(snapshot.as_std_path(), mark_on_load).context("loading snapshot")?;
    let marked = tree
        .subtree(tree.root())
        .filter(|&idx| tree.node(idx).marked())
        .count();
    println!("loaded tree: {} nodes, {} marked", tree.len(), marked);
    Ok(())
}

fn run_browse(rows: &Utf8PathBuf, script: Option<&Utf8PathBuf>) -> Result<()> {
    let config = config::load().unwrap_or_default();
    let mut tree = build_tree_from_file(rows, &config)?;
    let cancel = CancellationFlag::new();
    let mut sel = Selection::new(&mut tree, config.case_sensitive);

    let lines: Vec<String> = match script {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {path}"))?
            .lines()
            .map(str::to_owned)
            .collect(),
        None => io::stdin().lock().lines().collect::<io::Result<_>>()?,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = run_command(&mut sel, line, &cancel, &mut out) {
            writeln!(out, "error: {}", sel.error_string(&e))?;
        }
        if line == "done" || line == "quit" {
            break;
        }
    }
    Ok(())
}

fn run_command(sel: &mut Selection<'_>, line: &str, cancel: &CancellationFlag, out: &mut impl Write) -> CoreResult<()> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match cmd {
        "cd" => sel.change_directory(rest)?,
        "ls" | "dir" => {
            for entry in sel.list(if rest.is_empty() { None } else { Some(rest) })? {
                let mark = if entry.extract || entry.extract_dir { "*" } else { " " };
                writeln!(out, "{mark} {}", entry.name).ok();
            }
        }
        "mark" => {
            let n = sel.mark(rest, cancel)?;
            writeln!(out, "marked {n}").ok();
        }
        "unmark" => {
            let n = sel.unmark(rest, cancel)?;
            writeln!(out, "unmarked {n}").ok();
        }
        "find" => {
            for path in sel.find_paths(rest)? {
                writeln!(out, "{path}").ok();
            }
        }
        "lsmark" => {
            for path in sel.list_marked() {
                writeln!(out, "{path}").ok();
            }
        }
        "estimate" => {
            let (files, dirs) = sel.estimate();
            writeln!(out, "{files} files, {dirs} directories").ok();
        }
        "done" | "quit" => {}
        other => {
            writeln!(out, "unrecognized command: {other}").ok();
        }
    }
    Ok(())
}

/// Tab-separated volume records, one per line: `job_id\tname\tmedia_type\t
/// device\tslot\tsession_id\tsession_time\tfirst_vol_file\tlast_vol_file\t
/// first_vol_block\tlast_vol_block`. `slot` may be empty.
struct FileCatalog {
    by_job: std::collections::HashMap<u32, Vec<VolumeRecord>>,
}

impl FileCatalog {
    fn load(path: &Utf8PathBuf) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let mut by_job: std::collections::HashMap<u32, Vec<VolumeRecord>> = std::collections::HashMap::new();
        for line in text.lines() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let f: Vec<&str> = line.split('\t').collect();
            if f.len() != 11 {
                bail!("expected 11 tab-separated fields, got {}: {line:?}", f.len());
            }
            let job_id: u32 = f[0].parse()?;
            by_job.entry(job_id).or_default().push(VolumeRecord {
                volume_name: f[1].to_string(),
                media_type: f[2].to_string(),
                device: f[3].to_string(),
                slot: if f[4].is_empty() { None } else { Some(f[4].parse()?) },
                vol_session_id: f[5].parse()?,
                vol_session_time: f[6].parse()?,
                first_vol_file: f[7].parse()?,
                last_vol_file: f[8].parse()?,
                first_vol_block: f[9].parse()?,
                last_vol_block: f[10].parse()?,
            });
        }
        Ok(Self { by_job })
    }
}

impl restore_tree::bsr::VolumeCatalog for FileCatalog {
    fn volumes_for_job(&self, job_id: u32) -> CoreResult<Vec<VolumeRecord>> {
        Ok(self.by_job.get(&job_id).cloned().unwrap_or_default())
    }
}

fn run_bsr(
    rows: &Utf8PathBuf,
    volumes: &Utf8PathBuf,
    marks: &[String],
    output: Option<&std::path::Path>,
) -> Result<()> {
    let config = config::load().unwrap_or_default();
    let mut tree = build_tree_from_file(rows, &config)?;
    let cancel = CancellationFlag::new();

    if marks.is_empty() {
        tree.mark_subtree(tree.root(), &cancel)?;
    } else {
        let mut sel = Selection::new(&mut tree, config.case_sensitive);
        for glob in marks {
            sel.mark(glob, &cancel)?;
        }
    }

    let catalog = FileCatalog::load(volumes)?;
    let report = restore_tree::bsr::synthesize(&tree, &catalog, &cancel)?;
    restore_tree::counters::log_counts();

    match output {
        Some(path) => std::fs::write(path, &report.text).context("writing BSR")?,
        None => print!("{}", report.text),
    }
    eprintln!("selected {} files", report.selected_files);
    Ok(())
}
