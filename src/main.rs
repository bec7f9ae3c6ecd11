use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use retrace::model::{MatchStatus, ScreenshotRole};
use retrace::{diff, util, Config, Screenshot, TestBundle};

#[derive(Parser, Debug)]
#[command(
    name = "retrace",
    version,
    about = "Inspect and compare visual record-and-replay test bundles"
)]
struct Cli {
    /// Data directory (default: $RETRACE_HOME, then ~/.retrace)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare two PNG screenshots the way replay verification does
    Diff(DiffArgs),
    /// List the actions and images stored in a test bundle
    Inspect {
        /// Bundle path, or the name of a bundle in the data dir's tests/
        bundle: PathBuf,
    },
    /// Rewrite a test bundle with contiguous action indices
    Renumber {
        /// Bundle path, or the name of a bundle in the data dir's tests/
        bundle: PathBuf,
    },
}

#[derive(Args, Debug)]
struct DiffArgs {
    expected: PathBuf,
    actual: PathBuf,
    /// Acceptable-difference mask; non-transparent pixels are ignored
    #[arg(long)]
    mask: Option<PathBuf>,
    /// Colour distance threshold in 0..=1 (default from config)
    #[arg(long)]
    threshold: Option<f64>,
    /// Write the diff visualisation here
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir.clone());

    // Initialize logging to file (~/.retrace/logs/retrace.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Diff(args) => run_diff(&config, args),
        Commands::Inspect { bundle } => run_inspect(&util::resolve_bundle(&bundle)),
        Commands::Renumber { bundle } => run_renumber(&util::resolve_bundle(&bundle)),
    }
}

fn load_png(path: &Path) -> Result<Screenshot> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Screenshot::from_png_bytes(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn status_label(status: MatchStatus) -> &'static str {
    match status {
        MatchStatus::Unevaluated => "-",
        MatchStatus::Pass => "pass",
        MatchStatus::Allow => "allow",
        MatchStatus::Fail => "fail",
        MatchStatus::Cancelled => "cancelled",
    }
}

fn run_diff(config: &Config, args: DiffArgs) -> Result<()> {
    let expected = load_png(&args.expected)?;
    let actual = load_png(&args.actual)?;
    let mask = args.mask.as_deref().map(load_png).transpose()?;
    let threshold = args.threshold.unwrap_or(config.diff.threshold);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("threshold must be between 0 and 1, got {threshold}");
    }

    let result = diff(&expected, &actual, mask.as_ref(), threshold);
    if let Some(out) = &args.out {
        fs::write(out, result.diff_image.to_png_bytes()?)
            .with_context(|| format!("writing {}", out.display()))?;
    }

    let status = result.classification().unwrap_or(MatchStatus::Fail);
    println!(
        "{}: {} of {} pixels differ ({} masked)",
        status_label(status),
        result.differing_pixels,
        result.total_pixels,
        result.consumed_mask_pixels()
    );
    if !result.dimensions_match {
        println!(
            "size mismatch: expected {}x{}, actual {}x{}",
            expected.width(),
            expected.height(),
            actual.width(),
            actual.height()
        );
    }
    if status == MatchStatus::Fail {
        bail!("screenshots differ");
    }
    Ok(())
}

fn run_inspect(path: &Path) -> Result<()> {
    let opened =
        TestBundle::open(path).with_context(|| format!("opening bundle {}", path.display()))?;
    let test = &opened.test;
    println!("{} ({})", test.name, test.id);
    println!(
        "schema {} written by retrace {} at {}",
        opened.meta.schema_version,
        opened.meta.app_version,
        opened.meta.created_at.to_rfc3339()
    );
    for action in test.actions() {
        let images: Vec<&str> = ScreenshotRole::ALL
            .iter()
            .filter(|role| action.screenshot(**role).is_some())
            .map(|role| role.as_str())
            .collect();
        println!(
            "{:>4}  {:<12} tab {:<3} {:<9} {}",
            action.index,
            action.action_type,
            action.target_tab_virtual_id,
            status_label(action.match_status),
            images.join(",")
        );
    }
    println!("overall: {}", status_label(test.overall_status()));
    Ok(())
}

fn run_renumber(path: &Path) -> Result<()> {
    let opened =
        TestBundle::open(path).with_context(|| format!("opening bundle {}", path.display()))?;
    if opened.renumbered == 0 {
        println!("{}: indices already contiguous", path.display());
        return Ok(());
    }
    TestBundle::create(path, &opened.test)
        .with_context(|| format!("rewriting bundle {}", path.display()))?;
    println!("{}: renumbered {} actions", path.display(), opened.renumbered);
    Ok(())
}
