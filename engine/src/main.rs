use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::Mutex as AsyncMutex;

use coterie_agent::{CoderWorker, CommunicatorWorker, ResearcherWorker, WorkerChassis, WorkerRole};
use coterie_core::{AgentBudget, Ceo, Config};
use coterie_governance::{EventBinder, FinancialAllocator};
use coterie_memory::{CompactionPolicy, ContextBudget, MemoryAssembler};
use coterie_observability::{init_process_logging, ProcessKind};
use coterie_router::{BudgetConfig, Router};
use coterie_signals::{stdio, SignalBus};
use coterie_store::Store;
use coterie_tools::{build_default_registry, default_permission_matrix, ToolRegistry};

#[derive(Parser, Debug)]
#[command(name = "coterie")]
#[command(about = "Local multi-agent orchestration runtime")]
struct Cli {
    /// Workspace directory: holds the database, MEMORY.md, the daily log,
    /// and per-session context notes. Defaults to $COTERIE_WORKSPACE or
    /// ./workspace. Precedes the subcommand on the command line (the
    /// `worker` subcommand takes its own `--workspace` instead, since the
    /// supervisor invokes it directly without a parent flag).
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Configuration YAML file. Defaults to <workspace>/config.yaml; a
    /// missing file is not an error, defaults plus env still apply.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive single-session chat against the CEO coordinator.
    Chat,
    /// Reports the fleet's state by reading agent_state directly from the store.
    Status,
    /// Reports today's and this week's spend against the configured budget.
    Cost,
    /// Loads and validates the configuration, printing the resolved values.
    Config,
    /// Runs the supervisor in the foreground; the long-lived process a
    /// service manager supervises.
    Watchdog,
    /// Internal entry point the supervisor spawns one per worker role.
    Worker {
        #[arg(long)]
        role: String,
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long)]
        ram_cap_mb: u64,
    },
    /// Runs a single preset task through the CEO non-interactively.
    Preset {
        name: String,
        #[arg(long)]
        input: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let workspace = resolve_workspace(cli.workspace.clone());
    std::fs::create_dir_all(&workspace).with_context(|| format!("creating workspace directory {}", workspace.display()))?;

    let process_kind = match cli.command {
        Command::Watchdog => ProcessKind::Supervisor,
        Command::Worker { .. } => ProcessKind::Worker,
        _ => ProcessKind::Engine,
    };
    let _log_guard = init_process_logging(process_kind, &workspace.join("logs"), 14)
        .context("initializing logging")?
        .0;

    let config_path = cli.config.clone().unwrap_or_else(|| workspace.join("config.yaml"));

    match cli.command {
        Command::Chat => run_chat(&workspace, &config_path).await,
        Command::Status => run_status(&workspace, &config_path).await,
        Command::Cost => run_cost(&workspace, &config_path).await,
        Command::Config => run_config(&config_path).await,
        Command::Watchdog => run_watchdog(&workspace, &config_path).await,
        Command::Worker { role, workspace, ram_cap_mb } => run_worker(&role, &workspace, &config_path, ram_cap_mb).await,
        Command::Preset { name, input } => run_preset(&workspace, &config_path, &name, input).await,
    }
}

fn resolve_workspace(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = std::env::var("COTERIE_WORKSPACE") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from("workspace")
}

/// The process-level stack every subcommand but `worker` shares: store,
/// provider registry, router, tool registry, and the governance middleware
/// trio, wired in the dependency order named in the configuration section
/// (§10.L): store, then providers, then router, then tools, then
/// governance. The memory assembler and the CEO are session-scoped and are
/// built on top of this once a session id is known.
struct Stack {
    config: Config,
    store: Store,
    router: Arc<Router>,
    tools: Arc<ToolRegistry>,
    delegate: Arc<coterie_tools::DelegateTaskTool>,
    event_binder: EventBinder,
}

async fn build_stack(workspace: &Path, config_path: &Path) -> anyhow::Result<Stack> {
    let config = coterie_core::load_config(config_path).context("loading configuration")?;

    let store = Store::open(&workspace.join(&config.memory.db_path)).await.context("opening store")?;

    let registrations = coterie_core::providers_from_config(&config);
    let router = Arc::new(Router::new(
        registrations,
        store.clone(),
        BudgetConfig { daily_budget_usd: config.budget.daily_usd, alert_threshold_percent: config.budget.alert_threshold_percent },
    ));

    let permissions = default_permission_matrix();
    let (registry, delegate) = build_default_registry(workspace.to_path_buf(), store.clone(), permissions).await;

    let event_binder = EventBinder::new();

    Ok(Stack { config, store, router, tools: Arc::new(registry), delegate, event_binder })
}

fn agent_budget(config: &Config, role: &str, default: AgentBudget) -> AgentBudget {
    config.agent_budgets.get(role).copied().unwrap_or(default)
}

fn allocator_for(config: &Config) -> FinancialAllocator {
    let mut allocator = FinancialAllocator::new(config.budget.daily_usd);
    for (role, budget) in &config.agent_budgets {
        allocator.set_role_budget(role, budget.max_output_tokens);
    }
    allocator
}

async fn build_ceo(stack: &Stack, workspace: &Path, session_id: &str) -> anyhow::Result<Ceo> {
    let budget = agent_budget(&stack.config, "ceo", AgentBudget { max_input_tokens: 6_000, max_output_tokens: 1_024, context_turns: 10 });
    let memory = MemoryAssembler::new(stack.store.clone(), workspace, session_id, stack.config.memory.short_term_maxlen)
        .await
        .context("building memory assembler")?;
    let context_budget = ContextBudget { max_input_tokens: budget.max_input_tokens, context_turns: budget.context_turns };
    let compaction = CompactionPolicy {
        every_n_turns: stack.config.memory.summarize_every_n_turns,
        target_compression: stack.config.memory.summary_compression_ratio,
    };
    let tier = coterie_core::default_tier(&stack.config);

    Ok(Ceo::new(
        stack.store.clone(),
        Arc::clone(&stack.router),
        Arc::clone(&stack.tools),
        Arc::clone(&stack.delegate),
        allocator_for(&stack.config),
        memory,
        workspace.to_path_buf(),
        context_budget,
        compaction,
        stack.config.max_tool_iterations,
        budget.max_output_tokens,
        tier,
    )
    .await)
}

fn local_user() -> String {
    std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "local".to_string())
}

/// Interactive REPL against one CEO session. Also registers a workspace
/// `inbox/` watch (§4.I event binder): a markdown file dropped there while
/// the session is running is read and fed to the CEO as if the Chairman
/// had typed it, mirroring the original COO-to-CEO file-event callback.
async fn run_chat(workspace: &Path, config_path: &Path) -> anyhow::Result<()> {
    let stack = build_stack(workspace, config_path).await?;
    let session_id = stack.store.make_session_id("cli", &local_user(), "chat");
    let ceo = Arc::new(AsyncMutex::new(build_ceo(&stack, workspace, &session_id).await?));

    let inbox_dir = workspace.join("inbox");
    let _ = std::fs::create_dir_all(&inbox_dir);
    let watch_ceo = Arc::clone(&ceo);
    stack.event_binder.watch(
        &inbox_dir,
        "*.md",
        "chairman inbox drop",
        Arc::new(move |kind, path| {
            if kind == "deleted" {
                return;
            }
            let Ok(content) = std::fs::read_to_string(path) else { return };
            if content.trim().is_empty() {
                return;
            }
            let ceo = Arc::clone(&watch_ceo);
            let path = path.to_string();
            tokio::spawn(async move {
                let mut ceo = ceo.lock().await;
                match ceo.handle_user_turn(&content).await {
                    Ok(reply) => println!("\n[inbox:{path}] {reply}\n> "),
                    Err(err) => tracing::warn!(path, error = %err, "inbox turn failed"),
                }
            });
        }),
    );

    println!("Coterie chat — session {session_id}. Type /exit to quit, /status, /cost, /clear.");
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        line.clear();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        match text {
            "/exit" | "/quit" => break,
            "/status" => {
                print_status(&stack.store).await?;
                continue;
            }
            "/cost" => {
                print_cost(&stack.store, &stack.config).await?;
                continue;
            }
            "/clear" => {
                print!("\x1B[2J\x1B[1;1H");
                continue;
            }
            _ => {}
        }

        let mut ceo = ceo.lock().await;
        match ceo.handle_user_turn(text).await {
            Ok(reply) => println!("{reply}"),
            Err(err) => eprintln!("error: {err}"),
        }
    }

    stack.event_binder.stop_all();
    Ok(())
}

async fn print_status(store: &Store) -> anyhow::Result<()> {
    let states = store.list_agent_states().await?;
    if states.is_empty() {
        println!("no agents have reported state yet");
        return Ok(());
    }
    for state in states {
        println!(
            "{:<13} {:<8} pid={:<8} last_task={} updated={}",
            state.role,
            state.status.as_str(),
            state.process_id.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            state.last_seen_task_id.as_deref().unwrap_or("-"),
            state.updated_at.to_rfc3339(),
        );
    }
    Ok(())
}

async fn run_status(workspace: &Path, config_path: &Path) -> anyhow::Result<()> {
    let config = coterie_core::load_config(config_path).context("loading configuration")?;
    let store = Store::open(&workspace.join(&config.memory.db_path)).await.context("opening store")?;
    print_status(&store).await
}

async fn print_cost(store: &Store, config: &Config) -> anyhow::Result<()> {
    let daily = store.get_daily_cost().await?;
    let weekly = store.get_weekly_cost().await?;
    println!("today:     ${daily:.4} / ${:.2} budget", config.budget.daily_usd);
    println!("this week: ${weekly:.4} / ${:.2} budget", config.budget.weekly_usd);
    Ok(())
}

async fn run_cost(workspace: &Path, config_path: &Path) -> anyhow::Result<()> {
    let config = coterie_core::load_config(config_path).context("loading configuration")?;
    let store = Store::open(&workspace.join(&config.memory.db_path)).await.context("opening store")?;
    print_cost(&store, &config).await
}

async fn run_config(config_path: &Path) -> anyhow::Result<()> {
    let config = coterie_core::load_config(config_path).context("loading configuration")?;
    println!("{}", serde_json::to_string_pretty(&config_summary(&config))?);
    Ok(())
}

fn config_summary(config: &Config) -> serde_json::Value {
    serde_json::json!({
        "providers_enabled": config.providers.keys().collect::<Vec<_>>(),
        "default_model_task": config.default_model_task,
        "max_tool_iterations": config.max_tool_iterations,
        "sandbox_timeout_seconds": config.sandbox_timeout_seconds,
        "budget": {
            "daily_usd": config.budget.daily_usd,
            "weekly_usd": config.budget.weekly_usd,
            "alert_threshold_percent": config.budget.alert_threshold_percent,
        },
        "watchdog": {
            "poll_interval_seconds": config.watchdog.poll_interval_seconds,
            "max_restarts": config.watchdog.max_restarts,
        },
    })
}

const WORKER_ROLES: &[&str] = &["researcher", "coder", "communicator"];

/// Runs the supervisor to completion in the foreground. Spawns one child
/// process per entry in `WORKER_ROLES`, invoking this same binary's
/// `worker` subcommand for each (§4.H).
async fn run_watchdog(workspace: &Path, config_path: &Path) -> anyhow::Result<()> {
    let config = coterie_core::load_config(config_path).context("loading configuration")?;
    let store = Store::open(&workspace.join(&config.memory.db_path)).await.context("opening store")?;
    let bus = SignalBus::new();
    let binary_path = std::env::current_exe().context("resolving current executable path")?;

    let roles = WORKER_ROLES.iter().map(|role| (role.to_string(), config.watchdog.ram_kill_threshold_mb));
    let supervisor_config = coterie_supervisor::SupervisorConfig {
        poll_interval: std::time::Duration::from_secs(config.watchdog.poll_interval_seconds),
        heartbeat_timeout: std::time::Duration::from_secs(config.watchdog.heartbeat_timeout_seconds),
        rss_cap_mb: config.watchdog.ram_kill_threshold_mb,
        cpu_threshold_percent: config.watchdog.cpu_kill_threshold_percent,
        cpu_sustained_for: std::time::Duration::from_secs(config.watchdog.cpu_kill_sustained_seconds),
        shutdown_grace: std::time::Duration::from_secs(2),
        max_restarts: config.watchdog.max_restarts,
    };

    let supervisor = coterie_supervisor::Supervisor::new(roles, bus, store, binary_path, workspace.to_path_buf(), supervisor_config);
    supervisor.start_all().await.context("starting worker fleet")?;

    let shutdown_supervisor = Arc::clone(&supervisor);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("watchdog received ctrl-c, shutting down worker fleet");
        shutdown_supervisor.shutdown().await;
    });

    supervisor.run().await;
    Ok(())
}

/// Internal process entry point: bridges real stdin/stdout to an
/// in-process `SignalBus` the way the supervisor's own `spawn_agent`
/// bridges it from the other side, then runs the matching worker role's
/// chassis to completion.
async fn run_worker(role: &str, workspace: &Path, config_path: &Path, ram_cap_mb: u64) -> anyhow::Result<()> {
    let config = coterie_core::load_config(config_path).context("loading configuration")?;
    let store = Store::open(&workspace.join(&config.memory.db_path)).await.context("opening store")?;
    let registrations = coterie_core::providers_from_config(&config);
    let router = Arc::new(Router::new(
        registrations,
        store.clone(),
        BudgetConfig { daily_budget_usd: config.budget.daily_usd, alert_threshold_percent: config.budget.alert_threshold_percent },
    ));
    let permissions = default_permission_matrix();
    let (registry, _delegate) = build_default_registry(workspace.to_path_buf(), store.clone(), permissions).await;
    let registry = Arc::new(registry);

    let worker_role: Arc<dyn WorkerRole> = match role {
        "researcher" => Arc::new(ResearcherWorker::new(Arc::clone(&router), Arc::clone(&registry))),
        "coder" => Arc::new(CoderWorker::new(Arc::clone(&router), Arc::clone(&registry))),
        "communicator" => Arc::new(CommunicatorWorker::new(Arc::clone(&router))),
        other => anyhow::bail!("unknown worker role '{other}'"),
    };

    let bus = SignalBus::new();
    let mut outbound = bus.register("supervisor").await;
    let mut stdout = tokio::io::stdout();
    let outbound_task = tokio::spawn(async move {
        while let Some(signal) = outbound.recv().await {
            if stdio::write_signal(&mut stdout, &signal).await.is_err() {
                break;
            }
        }
    });

    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::channel(256);
    let drain_task = tokio::spawn(stdio::drain_signal_lines(tokio::io::stdin(), inbound_tx));
    let forward_bus = bus.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(signal) = inbound_rx.recv().await {
            let _ = forward_bus.send(signal).await;
        }
    });

    let chassis = WorkerChassis::new(worker_role, store, bus, "supervisor", ram_cap_mb);
    let result = chassis.run().await;

    outbound_task.abort();
    drain_task.abort();
    forward_task.abort();
    result.map_err(anyhow::Error::from)
}

/// Runs a named preset task non-interactively through a fresh CEO session.
/// A preset is a plain text file under `<workspace>/presets/<name>.md`; the
/// optional `--input` is appended after its own content. Rich preset
/// loading (parameters, scheduling) is out of scope — this is the minimal
/// mechanism the CLI surface names.
async fn run_preset(workspace: &Path, config_path: &Path, name: &str, input: Option<String>) -> anyhow::Result<()> {
    let preset_path = workspace.join("presets").join(format!("{name}.md"));
    let mut task = std::fs::read_to_string(&preset_path)
        .with_context(|| format!("reading preset file {}", preset_path.display()))?;
    if let Some(extra) = input {
        task.push_str("\n\n");
        task.push_str(&extra);
    }

    let stack = build_stack(workspace, config_path).await?;
    let session_id = stack.store.make_session_id("cli", &local_user(), &format!("preset:{name}"));
    let mut ceo = build_ceo(&stack, workspace, &session_id).await?;
    let reply = ceo.handle_user_turn(&task).await?;
    println!("{reply}");
    Ok(())
}
