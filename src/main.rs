//! `wtsync` CLI: loads a fleet config and drives the [`EngineSupervisor`]
//! either once (`run`) or on a cron schedule (`daemon`). Not a TUI — no
//! picker, no interactive prompts, no branch-creation wizard. Those stay
//! out of scope; see `lib.rs` for what this binary is a thin shell around.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::{Parser, Subcommand};

use wtsync::concurrency::ConcurrencyLimiter;
use wtsync::config::{FleetConfig, RepoConfig, parse_branch_max_age};
use wtsync::engine::{CancellationToken, Engine, EngineEvent, EventSink, LogLevel, RepoContext};
use wtsync::retry::RetryConfig;
use wtsync::supervisor::EngineSupervisor;

#[derive(Parser)]
#[command(name = "wtsync")]
#[command(about = "Keeps a tree of git worktrees aligned with a remote's branches")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass across every configured repository, then exit.
    Run {
        /// Path to the fleet config TOML file.
        #[arg(long)]
        config: PathBuf,
    },

    /// Schedule cron-driven sync passes per repository and block forever.
    Daemon {
        /// Path to the fleet config TOML file.
        #[arg(long)]
        config: PathBuf,
    },

    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the fleet config's JSON Schema, for editor validation.
    Schema,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => run_once(&config),
        Commands::Daemon { config } => run_daemon(&config),
        Commands::Config(ConfigCommand::Schema) => print_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_schema() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(FleetConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Builds one `Engine` per `[[repo]]` table, wired to a shared event sink so
/// a single drain thread can log every repository's chatter through one
/// `log` sink instead of the engine writing to stdout directly (§4.E).
fn build_engines(
    fleet: &FleetConfig,
    sink: &EventSink,
) -> anyhow::Result<Vec<(Engine, Option<String>)>> {
    fleet
        .repos
        .iter()
        .map(|repo| build_engine(repo, sink.clone()))
        .collect()
}

fn build_engine(repo: &RepoConfig, sink: EventSink) -> anyhow::Result<(Engine, Option<String>)> {
    let branch_max_age = repo
        .branch_max_age
        .as_deref()
        .map(parse_branch_max_age)
        .transpose()
        .map_err(|reason| anyhow::anyhow!("invalid branchMaxAge for {}: {reason}", repo.repo_url))?;

    let context = RepoContext {
        repo_url: repo.repo_url.clone(),
        bare_repo_path: repo.resolved_bare_repo_dir(),
        worktree_base: repo.worktree_dir.clone(),
        default_branch_name: String::new(),
        skip_lfs: repo.skip_lfs,
        update_existing: repo.update_existing_worktrees,
        branch_max_age,
        files_to_copy_on_branch_create: repo.files_to_copy_on_branch_create.clone(),
        retry: RetryConfig::from(&repo.retry),
    };

    let limiter = ConcurrencyLimiter::new(&(&repo.parallelism).into())?;
    let mut engine = Engine::new(context, limiter, sink, CancellationToken::new());
    engine.initialize()?;

    let schedule = if repo.run_once {
        None
    } else {
        repo.cron_schedule.clone()
    };
    Ok((engine, schedule))
}

fn init_logging(fleet: &FleetConfig) {
    let verbose = fleet.repos.iter().any(|r| r.debug);
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if verbose { "debug" } else { "info" }),
    )
    .init();
}

/// Drains engine events onto the `log` facade. `Log` events are skipped —
/// the engine already logs them itself at the call site
/// (`wtsync::engine::events::emit_log`) — this thread only surfaces the
/// structured events that have no other voice.
fn spawn_event_logger(receiver: crossbeam_channel::Receiver<EngineEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in receiver.iter() {
            match event {
                EngineEvent::Log { .. } => {}
                EngineEvent::PhaseStart { phase } => log::debug!("phase {phase:?} starting"),
                EngineEvent::PhaseEnd {
                    phase,
                    duration,
                    op_count,
                } => log::info!("phase {phase:?} finished in {duration:?} ({op_count} ops)"),
                EngineEvent::WorktreeStatus { branch, action } => {
                    log::info!("{branch}: {action}")
                }
            }
        }
    })
}

fn load_fleet(config: &PathBuf) -> anyhow::Result<FleetConfig> {
    let fleet = FleetConfig::load(config)?;
    init_logging(&fleet);
    Ok(fleet)
}

fn run_once(config: &PathBuf) -> anyhow::Result<()> {
    let fleet = load_fleet(config)?;
    let (sink, receiver) = wtsync::engine::events::channel();
    let logger = spawn_event_logger(receiver);

    let built = build_engines(&fleet, &sink)?;
    let engines = built.into_iter().map(|(engine, _)| engine).collect();
    let supervisor = EngineSupervisor::new(engines, fleet.max_repositories());

    drop(sink);
    let results = supervisor.sync_all();
    for (repo_url, result) in &results {
        if let Err(err) = result {
            log::error!("sync failed for {repo_url}: {err:#}");
        }
    }
    let _ = logger.join();

    Ok(())
}

fn run_daemon(config: &PathBuf) -> anyhow::Result<()> {
    let fleet = load_fleet(config)?;
    let (sink, receiver) = wtsync::engine::events::channel();
    spawn_event_logger(receiver);

    let built = build_engines(&fleet, &sink)?;
    let (engines, schedules): (Vec<_>, Vec<_>) = built.into_iter().unzip();
    let cron_schedules: Vec<(usize, String)> = schedules
        .into_iter()
        .enumerate()
        .filter_map(|(index, expr)| expr.map(|expr| (index, expr)))
        .collect();

    let supervisor = EngineSupervisor::new(engines, fleet.max_repositories());
    let tokens = supervisor.cancellation_tokens();
    install_shutdown_handler(tokens);
    supervisor.schedule(cron_schedules)?;

    wtsync::engine::events::emit_log(&sink, LogLevel::Info, "daemon started, awaiting cron ticks");
    drop(sink);

    loop {
        thread::sleep(std::time::Duration::from_secs(60 * 60));
    }
}

#[cfg(unix)]
fn install_shutdown_handler(tokens: Vec<CancellationToken>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            log::warn!("could not install signal handler: {err}");
            return;
        }
    };
    thread::spawn(move || {
        if signals.forever().next().is_some() {
            log::info!("shutdown signal received, cancelling in-progress syncs");
            for token in &tokens {
                token.cancel();
            }
        }
    });
}

#[cfg(not(unix))]
fn install_shutdown_handler(_tokens: Vec<CancellationToken>) {}
