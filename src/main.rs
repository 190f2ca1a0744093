//! Quickstack CLI entrypoint.
//!
//! This is the main entrypoint for the quickstack command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use quickstack::cli::{Cli, Commands, OutputFormatter, StateCommands};
use quickstack::config::{
    ConfigParser, ConfigValidator, ConfigValues, StackConfig, build_registry, find_config_file,
};
use quickstack::error::{ConfigError, QuickstackError, Result};
use quickstack::executor::{Executor, ProviderConfig};
use quickstack::graph::DependencyGraph;
use quickstack::handlers::builtin_handlers;
use quickstack::reconciler::Reconciler;
use quickstack::state::{LocalStateStore, STATE_DIR, StateStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over `--verbose` when set.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Graph => cmd_graph(cli.config.as_ref(), &formatter),
        Commands::Preview { detailed } => cmd_preview(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Up { yes, parallel } => cmd_up(cli.config.as_ref(), yes, parallel, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, &formatter).await,
        Commands::Outputs => cmd_outputs(cli.config.as_ref(), &formatter).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new stack.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new stack in: {}", path.display());

    let config_path = path.join("quickstack.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && config_path.exists() {
        eprintln!("Stack file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/quickstack.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    // Write/update .gitignore
    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.contains(STATE_DIR);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# quickstack")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your secrets");
    eprintln!("  2. Edit quickstack.yaml with your resources");
    eprintln!("  3. Run 'quickstack validate' to check the stack file");
    eprintln!("  4. Run 'quickstack preview' to see what will change");
    eprintln!("  5. Run 'quickstack up' to apply it");

    Ok(())
}

/// Validate the stack file.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config_file, config) = load_config(config_path)?;
    info!("Validating stack file: {}", config_file.display());

    let handlers = builtin_handlers(config.provider.as_ref())?;
    let result = ConfigValidator::with_known_types(handlers.types()).check(&config);
    eprint!("{}", formatter.format_validation(&result, show_warnings));

    if !result.is_valid() {
        return Err(ConfigError::validation_general(format!(
            "{} validation error(s)",
            result.error_count()
        ))
        .into());
    }

    // Values must resolve too (missing env vars)
    ConfigValues::resolve(&config)?;

    eprintln!("\nStack summary:");
    eprintln!("  Project: {}", config.project.name);
    eprintln!("  Environment: {}", config.project.environment);
    eprintln!("  Resources: {}", config.resources.len());
    eprintln!("  Types: {}", config.resource_types().join(", "));
    Ok(())
}

/// Show the dependency graph.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let stack = load_stack(config_path)?;
    let registry = build_registry(&stack.config, &stack.values)?;
    let graph = DependencyGraph::build(&registry)?;
    eprint!("{}", formatter.format_graph(&graph));
    Ok(())
}

/// Show what `up` would do.
async fn cmd_preview(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let stack = load_stack(config_path)?;
    let executor = stack.executor(None)?;
    let reconciler = Reconciler::new(&stack.config, &stack.values, &stack.state_store, executor);

    let plan = reconciler.preview().await?;
    eprintln!("{}", formatter.format_plan(&plan, detailed));
    Ok(())
}

/// Create or update resources.
async fn cmd_up(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    parallel: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let stack = load_stack(config_path)?;
    let executor = stack.executor(parallel)?;
    cancel_on_ctrl_c(&executor);
    let reconciler = Reconciler::new(&stack.config, &stack.values, &stack.state_store, executor);

    let plan = reconciler.preview().await?;
    if plan.is_empty() {
        eprintln!("{}", formatter.format_plan(&plan, false));
        return Ok(());
    }

    eprintln!("{}", formatter.format_plan(&plan, true));
    if !auto_approve && !confirm("Do you want to apply these changes? [y/N]: ", "y")? {
        eprintln!("Up cancelled.");
        return Ok(());
    }

    let result = reconciler
        .up(|r| eprintln!("{}", formatter.format_result(r)))
        .await?;
    eprintln!("\n{}", formatter.format_reconciliation(&result));

    if result.success {
        Ok(())
    } else {
        Err(QuickstackError::internal(format!(
            "up finished with {} failed and {} cancelled resource(s)",
            result.errors.len(),
            result.cancelled
        )))
    }
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let stack = load_stack(config_path)?;
    let executor = stack.executor(None)?;
    cancel_on_ctrl_c(&executor);
    let reconciler = Reconciler::new(&stack.config, &stack.values, &stack.state_store, executor);

    let plan = reconciler.preview_destroy().await?;
    if plan.entries.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for entry in &plan.entries {
        eprintln!("  - {} ({})", entry.name, entry.resource_type);
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let result = reconciler
        .destroy(|r| eprintln!("{}", formatter.format_result(r)))
        .await?;
    eprintln!("\n{}", formatter.format_reconciliation(&result));

    if result.success {
        Ok(())
    } else {
        Err(QuickstackError::internal("destroy did not complete"))
    }
}

/// Print stack outputs.
async fn cmd_outputs(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config_file, config) = load_config(config_path)?;
    let state_store = state_store_for(&config_file, &config);

    let outputs = state_store
        .load()
        .await?
        .map(|state| state.outputs)
        .unwrap_or_default();
    println!("{}", formatter.format_outputs(&outputs));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config_file, config) = load_config(config_path)?;
    let state_store = state_store_for(&config_file, &config);

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                eprintln!("{}", formatter.format_state(&state));
            } else {
                eprintln!("No state found.");
            }
            if let Some(lock) = state_store.get_lock_info().await? {
                eprintln!(
                    "Locked by {} for {} ({}s remaining)",
                    lock.holder,
                    lock.operation.as_deref().unwrap_or("unknown operation"),
                    lock.remaining_secs()
                );
            }
        }
        StateCommands::Lock { holder } => {
            let holder_str = holder.as_deref().unwrap_or("");
            let lock = state_store.acquire_lock(holder_str, "manual").await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = state_store.get_lock_info().await? {
                    state_store.release_lock(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A loaded and validated stack.
struct LoadedStack {
    config: StackConfig,
    values: ConfigValues,
    config_dir: PathBuf,
    state_store: LocalStateStore,
}

impl LoadedStack {
    /// Builds the executor for this stack.
    fn executor(&self, parallel: Option<usize>) -> Result<Executor> {
        let handlers = builtin_handlers(self.config.provider.as_ref())?;
        let provider = ProviderConfig::new(&self.config.project.name, &self.config.project.environment)
            .with_config(self.values.plain())
            .with_work_dir(&self.config_dir);

        Ok(Executor::new(handlers, provider)
            .with_max_in_flight(parallel.unwrap_or(self.config.executor.max_in_flight)))
    }
}

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn config_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Loads the stack file with `.env` and environment overrides applied.
fn load_config(config_path: Option<&PathBuf>) -> Result<(PathBuf, StackConfig)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading stack from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;
    Ok((config_file, config))
}

/// Loads, validates and resolves a stack.
fn load_stack(config_path: Option<&PathBuf>) -> Result<LoadedStack> {
    let (config_file, config) = load_config(config_path)?;

    let handlers = builtin_handlers(config.provider.as_ref())?;
    let validation = ConfigValidator::with_known_types(handlers.types()).validate(&config)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let values = ConfigValues::resolve(&config)?;
    let state_store = state_store_for(&config_file, &config);

    Ok(LoadedStack {
        config,
        values,
        config_dir: config_dir(&config_file),
        state_store,
    })
}

/// Creates the state store for a stack.
fn state_store_for(config_file: &Path, config: &StackConfig) -> LocalStateStore {
    let path = config.state.path.as_ref().map_or_else(
        || config_dir(config_file).join(STATE_DIR),
        PathBuf::from,
    );
    LocalStateStore::with_base_dir(path)
}

/// Cancels the run on Ctrl-C; in-flight actions still finish.
fn cancel_on_ctrl_c(executor: &Executor) {
    let token = executor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight actions");
            token.cancel();
        }
    });
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}
