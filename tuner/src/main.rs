//! Compile-constant autotuner CLI.
//!
//! `tuner` (or `tuner run`) evaluates trials against the configured project;
//! `init`, `report` and `restore` manage the config, inspect a stored study and
//! recover the artifact after a crash.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};

use tuner::core::anchor::AnchorError;
use tuner::core::study::{Direction, Study};
use tuner::driver::{StopReason, StudyPlan, run_study};
use tuner::evaluate::{EvalSettings, TrialEvaluator};
use tuner::exit_codes;
use tuner::io::artifact::ConfigArtifact;
use tuner::io::config::{DEFAULT_CONFIG_FILE, TunerConfig, load_config, write_config};
use tuner::io::harness::CommandHarness;
use tuner::io::interrupt::InterruptFlag;
use tuner::io::journal::{JournalStorage, parse_db_uri};
use tuner::logging;
use tuner::report::{render_report, trial_line};
use tuner::sampler::build_sampler;

#[derive(Parser)]
#[command(
    name = "tuner",
    version,
    about = "Tune compile-time constants by rebuilding and benchmarking"
)]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Default)]
struct GlobalOpts {
    /// Project root holding the artifact and the build/benchmark scripts.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file (default `<root>/tune.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Study name inside the storage journal.
    #[arg(long, global = true)]
    study_name: Option<String>,

    /// Number of new trials to run.
    #[arg(long, global = true)]
    trials: Option<u32>,

    /// Study storage: a path, file://<path> or journal://<path>.
    #[arg(long, global = true)]
    db: Option<String>,

    /// Benchmark iterations per trial.
    #[arg(long, global = true)]
    iterations: Option<u32>,

    /// Sampler seed.
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// More diagnostics on stderr (-v info, -vv debug, -vvv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run trials (the default).
    Run,
    /// Write the default `tune.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the report for a stored study without running trials.
    Report,
    /// Restore the artifact from a leftover backup.
    Restore,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.opts.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            if err.downcast_ref::<AnchorError>().is_some() {
                exit_codes::MISCONFIGURED
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = match &cli.opts.root {
        Some(root) => root.clone(),
        None => env::current_dir().context("resolve current directory")?,
    };
    let config_path = cli
        .opts
        .config
        .clone()
        .unwrap_or_else(|| root.join(DEFAULT_CONFIG_FILE));

    match cli.command.unwrap_or(Command::Run) {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Run => cmd_run(&root, &resolve_config(&config_path, &cli.opts)?),
        Command::Report => cmd_report(&root, &resolve_config(&config_path, &cli.opts)?),
        Command::Restore => cmd_restore(&root, &resolve_config(&config_path, &cli.opts)?),
    }
}

/// Load the config and apply command-line overrides.
fn resolve_config(path: &Path, opts: &GlobalOpts) -> Result<TunerConfig> {
    let mut cfg = load_config(path)?;
    if let Some(name) = &opts.study_name {
        cfg.study_name = name.clone();
    }
    if let Some(trials) = opts.trials {
        cfg.trials = trials;
    }
    if let Some(db) = &opts.db {
        cfg.storage = db.clone();
    }
    if let Some(iterations) = opts.iterations {
        cfg.benchmark.iterations = iterations;
    }
    if let Some(seed) = opts.seed {
        cfg.sampler.seed = seed;
    }
    cfg.validate().context("invalid command-line override")?;
    Ok(cfg)
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &TunerConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, cfg: &TunerConfig) -> Result<i32> {
    let space = cfg.search_space()?;
    let storage = JournalStorage::open(&parse_db_uri(&cfg.storage, root)?);
    let harness = CommandHarness::from_config(cfg)?;
    let settings = EvalSettings::from_config(root, cfg);
    let evaluator = TrialEvaluator {
        space: &space,
        constraints: &cfg.constraints,
        units: &cfg.units,
        harness: &harness,
        settings: &settings,
    };
    let mut artifact = ConfigArtifact::new(&root.join(&cfg.artifact));
    let mut sampler = build_sampler(&cfg.sampler);
    let interrupt = InterruptFlag::install()?;

    println!(
        "--- Starting optimization of {} ({} trials, storage {}) ---",
        cfg.study_name,
        cfg.trials,
        storage.path().display()
    );
    let outcome = run_study(
        &StudyPlan {
            study_name: &cfg.study_name,
            trials: cfg.trials,
            warm_start: &cfg.warm_start,
        },
        &evaluator,
        &mut artifact,
        &storage,
        sampler.as_mut(),
        &interrupt,
        |trial| println!("{}", trial_line(trial, &space, &cfg.benchmark.unit)),
    )?;

    if outcome.reconciled {
        println!("Restored {} from a leftover backup.", artifact.path().display());
    }
    if outcome.resumed_trials > 0 {
        println!("Resumed with {} earlier trials.", outcome.resumed_trials);
    }
    match outcome.stop {
        StopReason::Interrupted => println!("\nOptimization interrupted by user."),
        StopReason::BudgetExhausted => println!("\nOptimization complete."),
    }
    print!("{}", render_report(&outcome.study, &space, &cfg.benchmark.unit));
    Ok(exit_codes::OK)
}

fn cmd_report(root: &Path, cfg: &TunerConfig) -> Result<i32> {
    let space = cfg.search_space()?;
    let storage = JournalStorage::open(&parse_db_uri(&cfg.storage, root)?);
    let study = match storage.load(&cfg.study_name)? {
        Some(stored) => stored.study,
        None => Study::new(&cfg.study_name, Direction::Maximize),
    };
    print!("{}", render_report(&study, &space, &cfg.benchmark.unit));
    Ok(exit_codes::OK)
}

fn cmd_restore(root: &Path, cfg: &TunerConfig) -> Result<i32> {
    let artifact = ConfigArtifact::new(&root.join(&cfg.artifact));
    if artifact.reconcile()? {
        println!("restored {} from {}", artifact.path().display(), artifact.backup_path().display());
    } else {
        println!("no backup found; {} untouched", artifact.path().display());
    }
    Ok(exit_codes::OK)
}
