//! fixcorpus - vulnerability-fix training corpus CLI
//!
//! The `fixcorpus` command runs the curation pipeline one stage at a time
//! or end to end. Stage outputs for repository `NAME` live under
//! `DATA_DIR/NAME/`.
//!
//! ## Commands
//!
//! - `retrieve`: keyword retrieval from a local clone (S0a)
//! - `triage`: size filters and the security verdict (S0b)
//! - `refine`: single-function changes with file snapshots (S1)
//! - `mask` / `resolve`: vulnerable span and undefined elements (S2)
//! - `explain`: localization, root cause and impact (S3)
//! - `assemble`: training instances (S4)
//! - `run`, `status`, `export`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fixcorpus_core::{
    level_for_verbosity, GitHistory, HistorySource, LogFormat, Pipeline, PipelineConfig,
    RunOptions, StageReport,
};
use fixcorpus_oracle::{HttpOracle, Oracle};
use fixcorpus_store::{BlobStore, FsBlobStore};
use tracing::info;

#[derive(Parser)]
#[command(name = "fixcorpus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Curate vulnerability-fix training instances from git history", long_about = None)]
struct Cli {
    /// Root directory for stage outputs
    #[arg(long, global = true, env = "FIXCORPUS_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Pipeline configuration (TOML)
    #[arg(long, global = true, env = "FIXCORPUS_CONFIG")]
    config: Option<PathBuf>,

    /// Repository name; defaults to the `--repo` directory name
    #[arg(long, global = true, env = "FIXCORPUS_REPO_NAME")]
    name: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct RangeArgs {
    /// First input index (inclusive)
    #[arg(long)]
    start: Option<usize>,

    /// Last input index (exclusive)
    #[arg(long)]
    end: Option<usize>,

    /// Discard stored progress for this stage
    #[arg(long)]
    restart: bool,
}

impl From<RangeArgs> for RunOptions {
    fn from(args: RangeArgs) -> Self {
        RunOptions {
            start: args.start,
            end: args.end,
            restart: args.restart,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Collect keyword-matching commits from a local clone (S0a)
    Retrieve {
        /// Path to the git work tree
        #[arg(long)]
        repo: PathBuf,
    },

    /// Apply size filters and ask the oracle for a security verdict (S0b)
    Triage(RangeArgs),

    /// Keep single-function changes and attach file snapshots (S1)
    Refine {
        /// Path to the git work tree
        #[arg(long)]
        repo: PathBuf,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Mask the vulnerable span (S2a)
    Mask(RangeArgs),

    /// Extract and resolve undefined elements (S2b)
    Resolve(RangeArgs),

    /// Locate the vulnerability and explain it (S3)
    Explain(RangeArgs),

    /// Compose training instances (S4)
    Assemble(RangeArgs),

    /// Run every stage in order
    Run {
        /// Path to the git work tree
        #[arg(long)]
        repo: PathBuf,
    },

    /// Show per-stage record counts and cursor coverage
    Status,

    /// Write assembled instances as JSON Lines
    Export {
        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.json { LogFormat::Json } else { LogFormat::Text };
    fixcorpus_core::init_tracing(format, level_for_verbosity(cli.verbose))
        .context("Failed to initialise logging")?;

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let repo = match &cli.command {
        Commands::Retrieve { repo } | Commands::Refine { repo, .. } | Commands::Run { repo } => {
            Some(repo.as_path())
        }
        _ => None,
    };
    let name = repo_name(cli.name.as_deref(), repo)?;
    let pipeline = open_pipeline(&cli.data_dir, &name, config)?;
    info!(repo = %name, run_id = %pipeline.run_id(), "fixcorpus starting");

    let command = async {
        match cli.command {
            Commands::Retrieve { repo } => cmd_retrieve(&pipeline, &repo, &name).await,
            Commands::Triage(range) => report(pipeline.triage(&range.into()).await),
            Commands::Refine { repo, range } => cmd_refine(&pipeline, &repo, &name, range).await,
            Commands::Mask(range) => report(pipeline.mask(&range.into()).await),
            Commands::Resolve(range) => report(pipeline.resolve(&range.into()).await),
            Commands::Explain(range) => report(pipeline.explain(&range.into()).await),
            Commands::Assemble(range) => report(pipeline.assemble(&range.into()).await),
            Commands::Run { repo } => cmd_run(&pipeline, &repo, &name).await,
            Commands::Status => cmd_status(&pipeline).await,
            Commands::Export { out } => cmd_export(&pipeline, &out).await,
        }
    };

    // Dropping the command on Ctrl-C releases the stage lock; committed
    // batches stay in the cursor.
    tokio::select! {
        result = command => result,
        _ = tokio::signal::ctrl_c() => {
            bail!("interrupted; rerun the same command to resume")
        }
    }
}

/// `--name`, else the final component of the repository path.
fn repo_name(explicit: Option<&str>, repo: Option<&Path>) -> Result<String> {
    if let Some(name) = explicit {
        if name.trim().is_empty() || name.contains(['/', '\\']) {
            bail!("invalid repository name '{}'", name);
        }
        return Ok(name.to_string());
    }
    let Some(repo) = repo else {
        bail!("--name is required for commands without --repo");
    };
    let canonical = repo
        .canonicalize()
        .with_context(|| format!("Cannot resolve repository path {}", repo.display()))?;
    canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Repository path has no directory name")
}

fn open_pipeline(data_dir: &Path, name: &str, config: PipelineConfig) -> Result<Pipeline> {
    let root = data_dir.join(name);
    let store: Arc<dyn BlobStore> = Arc::new(
        FsBlobStore::new(&root)
            .with_context(|| format!("Failed to open stage store at {}", root.display()))?,
    );
    let oracle: Arc<dyn Oracle> =
        Arc::new(HttpOracle::new(config.oracle.clone()).context("Failed to configure oracle")?);
    Ok(Pipeline::new(store, oracle, config))
}

async fn open_history(repo: &Path, name: &str) -> Result<Arc<dyn HistorySource>> {
    let history = GitHistory::open(repo, Some(name))
        .await
        .with_context(|| format!("Failed to open repository {}", repo.display()))?;
    Ok(Arc::new(history))
}

/// Print a stage report and turn an incomplete run into a non-zero exit.
fn report(result: fixcorpus_core::PipelineResult<StageReport>) -> Result<()> {
    let report = result.context("Stage aborted")?;
    print_report(&report);
    if !report.complete {
        bail!(
            "{}: {} of {} records covered; rerun to retry failed records",
            report.stage,
            report.covered,
            report.input_len
        );
    }
    Ok(())
}

fn print_report(report: &StageReport) {
    let range = report
        .range
        .map(|r| format!("[{}, {})", r.start, r.end))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<12} range {:<12} attempted {:>5}  skipped {:>5}  kept {:>5}  rejected {:>5}  invalid {:>5}  failed {:>5}  covered {}/{}",
        report.stage,
        range,
        report.attempted,
        report.skipped,
        report.kept,
        report.rejected,
        report.invalid,
        report.failed,
        report.covered,
        report.input_len,
    );
}

async fn cmd_retrieve(pipeline: &Pipeline, repo: &Path, name: &str) -> Result<()> {
    let history = open_history(repo, name).await?;
    report(pipeline.retrieve(history.as_ref()).await)
}

async fn cmd_refine(pipeline: &Pipeline, repo: &Path, name: &str, range: RangeArgs) -> Result<()> {
    let history = open_history(repo, name).await?;
    report(pipeline.refine(history, &range.into()).await)
}

async fn cmd_run(pipeline: &Pipeline, repo: &Path, name: &str) -> Result<()> {
    let history = open_history(repo, name).await?;
    let reports = pipeline.run_all(history).await.context("Pipeline aborted")?;
    for report in &reports {
        print_report(report);
    }
    if let Some(last) = reports.last().filter(|r| !r.complete) {
        bail!("stopped at {}: failed records remain uncovered", last.stage);
    }
    Ok(())
}

async fn cmd_status(pipeline: &Pipeline) -> Result<()> {
    let statuses = pipeline.status().await.context("Failed to read stage status")?;
    println!(
        "{:<12} {:>8} {:>14}  {:<8} last run",
        "stage", "records", "covered", "complete"
    );
    for status in statuses {
        let records = status
            .records
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        let covered = match status.input_len {
            Some(len) => format!("{}/{}", status.covered, len),
            None => "-".to_string(),
        };
        println!(
            "{:<12} {:>8} {:>14}  {:<8} {}",
            status.stage.key(),
            records,
            covered,
            if status.complete { "yes" } else { "no" },
            status.last_run.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn cmd_export(pipeline: &Pipeline, out: &Path) -> Result<()> {
    let count = pipeline
        .export_jsonl(out)
        .await
        .with_context(|| format!("Failed to export to {}", out.display()))?;
    println!("Exported {} instances to {}", count, out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stage_flags_map_to_run_options() {
        let cli = Cli::parse_from([
            "fixcorpus", "--name", "demo", "mask", "--start", "2", "--end", "5", "--restart",
        ]);
        let Commands::Mask(range) = cli.command else {
            panic!("expected mask");
        };
        let options: RunOptions = range.into();
        assert_eq!(options.start, Some(2));
        assert_eq!(options.end, Some(5));
        assert!(options.restart);
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::parse_from(["fixcorpus", "-vv", "status"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn name_defaults_to_repo_directory() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("libfoo");
        std::fs::create_dir(&repo).unwrap();
        assert_eq!(repo_name(None, Some(&repo)).unwrap(), "libfoo");
        assert_eq!(repo_name(Some("bar"), Some(&repo)).unwrap(), "bar");
        assert!(repo_name(None, None).is_err());
        assert!(repo_name(Some("../x"), None).is_err());
    }

    #[tokio::test]
    async fn status_of_empty_store_reports_nothing_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = open_pipeline(dir.path(), "demo", PipelineConfig::default()).unwrap();
        let statuses = pipeline.status().await.unwrap();
        assert_eq!(statuses.len(), 7);
        assert!(statuses.iter().all(|s| s.records.is_none() && !s.complete));
        assert!(dir.path().join("demo").is_dir());
    }
}
