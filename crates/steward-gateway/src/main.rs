//! Boot: load config, wire every subsystem, spawn the background fleet,
//! serve the webhook/health surface. Exits non-zero only on unrecoverable
//! boot failure (no LLM credential, unusable data directory).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use steward_agent::anthropic::AnthropicProvider;
use steward_agent::compat::CompatProvider;
use steward_agent::router::{ModelRouter, TierModels};
use steward_agent::tools::{
    clock::ClockTool, reminder::ReminderTool, shell::ShellTool, web::WebFetchTool, ToolRegistry,
};
use steward_agent::{ConversationManager, LlmProvider};
use steward_channels::allow::AllowList;
use steward_channels::{Notifier, NotifyLevel};
use steward_core::config::StewardConfig;
use steward_memory::contacts::ContactIntelligence;
use steward_memory::embed::{Embedder, HashEmbedder, HttpEmbedder};
use steward_memory::thalamus::ContextThalamus;
use steward_memory::{Brain, WorkingMemory};
use steward_nervous::{AgentStateMachine, DeadLetterQueue, Outbox, PolicyGate};
use steward_scheduler::attention::AttentionEngine;
use steward_scheduler::consolidate::MemoryConsolidator;
use steward_scheduler::digest::DailyDigest;
use steward_scheduler::patterns::PatternDetector;
use steward_scheduler::reminders::{Reminder, ReminderDelivery, ReminderScheduler, ReminderStore};
use steward_scheduler::update::AutoUpdater;
use steward_tasks::runner::{TaskRunner, TaskRunnerConfig};
use steward_tasks::tool::TaskTool;
use steward_tasks::TaskQueue;

mod app;
mod http;
mod notify;

use notify::QueueNotifier;

#[derive(Parser)]
#[command(name = "steward-gateway", about = "Personal executive-assistant agent daemon")]
struct Args {
    /// Path to steward.toml (STEWARD_* env vars override its values).
    #[arg(long)]
    config: Option<String>,
    /// Override paths.data_dir from the config.
    #[arg(long)]
    data_dir: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Boot validation happens before the runtime: a missing credential or
    // unusable data dir is an exit-1, not a crash loop.
    let mut config = match StewardConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config load failed: {e}");
            std::process::exit(1);
        }
    };
    if let Some(dir) = args.data_dir {
        config.paths.data_dir = dir;
    }
    if let Err(e) = config.validate() {
        eprintln!("config invalid: {e}");
        std::process::exit(1);
    }
    let data_dir = PathBuf::from(&config.paths.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("data directory {} is unusable: {e}", data_dir.display());
        std::process::exit(1);
    }

    let _log_guard = init_tracing(&config.paths.log_file);

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    if let Err(e) = runtime.block_on(serve(config, data_dir)) {
        error!(error = %e, "gateway terminated with error");
        std::process::exit(1);
    }
}

/// Log to stdout and to the file the daily digest parses.
fn init_tracing(log_file: &str) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let path = Path::new(log_file);
    let (dir, file) = (
        path.parent().unwrap_or_else(|| Path::new(".")),
        path.file_name().map(|f| f.to_owned()).unwrap_or_else(|| "steward.log".into()),
    );

    match std::fs::create_dir_all(dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            warn!(error = %e, "log directory unavailable, logging to stdout only");
            None
        }
    }
}

async fn serve(config: StewardConfig, data_dir: PathBuf) -> anyhow::Result<()> {
    let tz = steward_core::timezone::user_tz(&config.schedule.timezone);

    // ── Memory plane ─────────────────────────────────────────────────────
    let embedder: Arc<dyn Embedder> = match config.embedding.provider.as_str() {
        "http" => Arc::new(HttpEmbedder::new(
            config.embedding.base_url.clone(),
            config.embedding.model.clone(),
            config.embedding.api_key.clone(),
        )),
        _ => Arc::new(HashEmbedder::default()),
    };
    let brain = Arc::new(Brain::open(&data_dir, embedder).await?);
    let working = Arc::new(WorkingMemory::load(data_dir.join("working_memory.json")));
    let thalamus = Arc::new(ContextThalamus::new());
    let contacts = Arc::new(ContactIntelligence::load(
        data_dir.join("contact_interactions.json"),
    ));

    // ── Nervous system ───────────────────────────────────────────────────
    let gate = Arc::new(PolicyGate::new(config.execution.strict_approval));
    let outbox = Arc::new(Outbox::load(data_dir.join("outbox.json")));
    let dlq = Arc::new(DeadLetterQueue::load(data_dir.join("dead_letter_queue.json")));
    let state_machine = Arc::new(AgentStateMachine::new());

    // ── LLM plane ────────────────────────────────────────────────────────
    let local = config
        .providers
        .local
        .as_ref()
        .map(|l| {
            (
                Arc::new(CompatProvider::new(l.base_url.clone(), l.api_key.clone()))
                    as Arc<dyn LlmProvider>,
                l.model.clone(),
            )
        });
    let (primary, fallback): (Arc<dyn LlmProvider>, _) = match config.providers.anthropic.as_ref()
    {
        Some(a) => (
            Arc::new(AnthropicProvider::new(a.api_key.clone(), Some(a.base_url.clone()))),
            local,
        ),
        None => {
            let (provider, _) = local.expect("config validation guarantees a provider");
            (provider, None)
        }
    };
    let router = Arc::new(ModelRouter::new(
        TierModels {
            default: config.models.default.clone(),
            subagent: config.models.subagent.clone(),
            chat: config.models.chat.clone(),
            intent: config.models.intent.clone(),
        },
        primary,
        fallback,
    ));

    // ── Stores the tools need ────────────────────────────────────────────
    let reminders = Arc::new(ReminderStore::load(data_dir.join("reminders.json")));
    let task_queue = Arc::new(TaskQueue::load(data_dir.join("task_queue.json")));

    // ── Tools ────────────────────────────────────────────────────────────
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ClockTool::new(tz)));
    registry.register(Arc::new(WebFetchTool::new()));
    registry.register(Arc::new(ShellTool));
    registry.register(Arc::new(ReminderTool::new(Arc::clone(&reminders))));
    registry.register(Arc::new(TaskTool::new(Arc::clone(&task_queue))));
    let registry = Arc::new(registry);
    let available_tools = registry.names();

    // ── Pipeline ─────────────────────────────────────────────────────────
    let manager = Arc::new(ConversationManager::new(
        Arc::clone(&router),
        Arc::clone(&brain),
        Arc::clone(&working),
        Arc::clone(&thalamus),
        Arc::clone(&gate),
        Arc::clone(&outbox),
        Arc::clone(&dlq),
        Arc::clone(&state_machine),
        Arc::clone(&registry),
        config.execution.max_iterations,
        tz,
    ));

    // ── Notifier + background fleet ──────────────────────────────────────
    let notifier = Arc::new(QueueNotifier::new());
    let shutdown = CancellationToken::new();
    let (restart_tx, mut restart_rx) = tokio::sync::watch::channel(false);

    let reminder_scheduler = Arc::new(ReminderScheduler::new(
        Arc::clone(&reminders),
        Arc::new(NotifierDelivery(notifier.clone())),
        Arc::clone(&dlq),
    ));
    tokio::spawn(Arc::clone(&reminder_scheduler).run(shutdown.child_token()));

    let mut runner_config = TaskRunnerConfig::new(&data_dir);
    runner_config.retry_attempts = config.execution.retry_attempts;
    runner_config.whatsapp_condensed = config.channels.whatsapp_condensed_reports;
    let runner = Arc::new(TaskRunner::new(
        Arc::clone(&task_queue),
        manager.clone(),
        Arc::clone(&router),
        Arc::clone(&brain),
        Arc::new(steward_tasks::templates::TemplateLibrary::load(
            data_dir.join("task_templates.json"),
        )),
        notifier.clone(),
        config
            .channels
            .whatsapp_condensed_reports
            .then(|| notifier.clone() as Arc<dyn Notifier>),
        available_tools,
        runner_config,
    ));
    tokio::spawn(runner.run(shutdown.child_token()));

    let patterns = Arc::new(PatternDetector::new(
        Arc::clone(&brain),
        Some(Arc::clone(&router)),
        data_dir.join("patterns.json"),
    ));
    tokio::spawn(Arc::clone(&patterns).run(shutdown.child_token()));

    let attention = Arc::new(AttentionEngine::new(
        Arc::clone(&brain),
        Arc::clone(&contacts),
        Arc::clone(&patterns),
        Arc::clone(&router),
        notifier.clone(),
        data_dir.join("attention_log.json"),
        tz,
        "Owner",
    ));
    tokio::spawn(attention.run(shutdown.child_token()));

    let consolidator = Arc::new(MemoryConsolidator::new(Arc::clone(&brain)));
    tokio::spawn(consolidator.run(shutdown.child_token()));

    let digest = Arc::new(DailyDigest::new(
        notifier.clone(),
        Arc::clone(&dlq),
        &config.paths.log_file,
        &data_dir,
        &config.schedule.digest_time,
        tz,
    ));
    tokio::spawn(digest.run(shutdown.child_token()));

    let updater = Arc::new(AutoUpdater::new(
        config.update.clone(),
        notifier.clone(),
        &data_dir,
        restart_tx,
    ));
    tokio::spawn(updater.run(shutdown.child_token()));

    // Daily outbox GC rides its own small ticker.
    {
        let outbox = Arc::clone(&outbox);
        let token = shutdown.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(24 * 3600)) => {
                        outbox.cleanup_old();
                    }
                }
            }
        });
    }

    // ── HTTP surface ─────────────────────────────────────────────────────
    let state = Arc::new(app::AppState {
        allow: AllowList::new(config.channels.allowed_senders.clone()),
        config,
        manager,
        notifier,
        brain,
        reminders,
        tasks: task_queue,
        dlq,
    });
    let router = app::build_router(Arc::clone(&state));

    let addr: SocketAddr =
        format!("{}:{}", state.config.gateway.bind, state.config.gateway.port).parse()?;
    info!(%addr, "steward gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                _ = restart_rx.changed() => info!("restart requested, shutting down for supervisor"),
            }
            shutdown.cancel();
        }
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("steward gateway stopped");
    Ok(())
}

/// Reminder delivery through the notification queue.
struct NotifierDelivery(Arc<QueueNotifier>);

#[async_trait]
impl ReminderDelivery for NotifierDelivery {
    async fn deliver(&self, reminder: &Reminder) -> Result<(), String> {
        self.0
            .notify(&format!("Reminder: {}", reminder.message), NotifyLevel::Info)
            .await;
        Ok(())
    }
}
