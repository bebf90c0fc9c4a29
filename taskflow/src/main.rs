use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use taskflow::archive::{self, ArchiveEntry};
use taskflow::core::Address;
use taskflow::grammar::line_title;
use taskflow::{LineBuffer, Pipeline, Settings, TaskTree};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "taskflow",
    about = "Outline task tracker for markdown checkbox documents",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every pass over a document and save it when it changed.
    Run(RunArgs),

    /// Print the task tree of a document.
    Tree(TreeArgs),

    /// List the topics of a document with their line ranges.
    Topics(TopicsArgs),

    /// Merge a block of text into an archive under a heading address.
    Merge(MergeArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Outline document to process.
    doc: PathBuf,
    /// Archive receiving completed topics.
    #[arg(long)]
    archive: Option<PathBuf>,
    /// Results log written by shell requests (`<path>:<exit code>` lines).
    #[arg(long)]
    executions_log: Option<PathBuf>,
    /// Directory for the copy taken before saving.
    #[arg(long)]
    memories_dir: Option<PathBuf>,
    /// JSON settings file providing defaults for the flags above.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Do not maintain the active-tasks overview.
    #[arg(long)]
    no_overview: bool,
    /// Date used for untitled documents. Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct TreeArgs {
    doc: PathBuf,
    /// Emit JSON instead of an indented listing.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct TopicsArgs {
    doc: PathBuf,
}

#[derive(Debug, Args)]
struct MergeArgs {
    /// Archive document to merge into.
    archive: PathBuf,
    /// Heading path, e.g. "Proj -> Done".
    #[arg(long)]
    address: String,
    /// Text to merge. Reads stdin when omitted.
    input: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Tree(args) => handle_tree(args),
        Commands::Topics(args) => handle_topics(args),
        Commands::Merge(args) => handle_merge(args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "taskflow=debug,info"
    } else {
        "taskflow=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Settings file values, overridden by whatever was given on the command line.
fn resolve_settings(args: &RunArgs) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(archive) = &args.archive {
        settings.archive = Some(archive.clone());
    }
    if let Some(log) = &args.executions_log {
        settings.executions_log = Some(log.clone());
    }
    if let Some(dir) = &args.memories_dir {
        settings.memories_dir = Some(dir.clone());
    }
    if args.no_overview {
        settings.overview = false;
    }
    Ok(settings)
}

fn handle_run(args: RunArgs) -> Result<()> {
    let settings = resolve_settings(&args)?;
    let today = args.date.unwrap_or_else(|| Local::now().date_naive());
    let mut pipeline = Pipeline::open(&args.doc, settings)?;
    let report = pipeline
        .execute(today)
        .with_context(|| format!("processing {:?}", args.doc))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.changed {
        println!(
            "Updated {:?}: {} archived, {} extracted, {} checkboxes added",
            args.doc,
            report.topics_archived,
            report.comment_blocks + report.subtasks_extracted,
            report.checkboxes_added
        );
    } else {
        println!("{:?} is up to date", args.doc);
    }
    if report.commands_running > 0 {
        eprintln!("{} command(s) still running", report.commands_running);
    }
    Ok(())
}

fn load_doc(path: &Path) -> Result<LineBuffer> {
    LineBuffer::load(path).with_context(|| format!("loading {:?}", path))
}

fn handle_tree(args: TreeArgs) -> Result<()> {
    let doc = load_doc(&args.doc)?;
    let tree = TaskTree::build(doc.lines());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&tree.view())?);
    } else {
        for line in tree.outline() {
            println!("{line}");
        }
    }
    Ok(())
}

fn handle_topics(args: TopicsArgs) -> Result<()> {
    let doc = load_doc(&args.doc)?;
    for topic in doc.topics() {
        println!(
            "{:>5}-{:<5} {} {}",
            topic.range.start + 1,
            topic.range.end + 1,
            "#".repeat(topic.level),
            line_title(&doc.lines()[topic.range.start])
        );
    }
    Ok(())
}

fn handle_merge(args: MergeArgs) -> Result<()> {
    let address = Address::parse(&args.address);
    if address.is_empty() {
        anyhow::bail!("--address needs at least one heading");
    }
    let text = match &args.input {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };

    let mut target = load_doc(&args.archive)?;
    let entry = ArchiveEntry {
        lines: text.lines().map(str::to_string).collect(),
        address,
    };
    let outcome = archive::merge(&mut target, &entry);
    target
        .save()
        .with_context(|| format!("writing {:?}", args.archive))?;
    println!(
        "{} heading(s) created, {} line(s) inserted, {} already present",
        outcome.headings_created, outcome.lines_inserted, outcome.lines_skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = tmp.path().join("taskflow.json");
        fs::write(
            &config,
            r#"{ "archive": "from-file.md", "executions_log": "/var/exec.log", "overview": true }"#,
        )
        .expect("write settings");

        let cli = Cli::parse_from([
            "taskflow",
            "run",
            "tasks.md",
            "--config",
            config.to_str().expect("utf-8 path"),
            "--archive",
            "cli.md",
            "--no-overview",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let settings = resolve_settings(&args).expect("settings");
        assert_eq!(settings.archive, Some(PathBuf::from("cli.md")));
        assert_eq!(settings.executions_log, Some(PathBuf::from("/var/exec.log")));
        assert!(!settings.overview);
    }

    #[test]
    fn merge_requires_an_address() {
        let cli = Cli::parse_from(["taskflow", "--verbose", "merge", "archive.md", "--address", "A -> B"]);
        assert!(cli.verbose);
        let Commands::Merge(args) = cli.command else {
            panic!("expected merge command");
        };
        assert_eq!(Address::parse(&args.address).segments(), ["A", "B"]);
        assert!(args.input.is_none());
    }
}
