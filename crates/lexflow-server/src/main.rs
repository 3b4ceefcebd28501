//! Lexflow - mail automation server entry point

use anyhow::Result;
use lexflow_api::AppState;
use lexflow_common::config::{Config, LoggingConfig, TargetsConfig, WebhookTargetConfig};
use lexflow_common::types::ActionType;
use lexflow_core::executor::{SmtpEmailHandler, WebhookActionHandler};
use lexflow_core::{
    ActionExecutor, ApprovalManager, CaseDirectory, ExpirySweeper, HandlerRegistry,
    HttpCaseDirectory, IngestionWorker, Links, MailProcessor, MemoryCaseDirectory,
    NotificationRenderer, Notifier, RuleStore, Simulator, SmtpNotificationChannel,
    SpoolDirProvider, TokenService,
};
use lexflow_storage::repository::{
    DbBatchRepository, DbExecutionLogRepository, DbMessageRepository, DbRuleRepository,
    DbTokenRepository,
};
use lexflow_storage::DatabasePool;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Lexflow...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;

    // Repositories
    let rules = Arc::new(DbRuleRepository::new(db_pool.clone()));
    let messages = Arc::new(DbMessageRepository::new(db_pool.clone()));
    let batches = Arc::new(DbBatchRepository::new(db_pool.clone()));
    let tokens_repo = Arc::new(DbTokenRepository::new(db_pool.clone()));
    let log = Arc::new(DbExecutionLogRepository::new(db_pool.clone()));

    // Action handlers
    let registry = build_registry(&config)?;
    info!("Registered action handlers: {:?}", registry.registered());
    let executor = Arc::new(ActionExecutor::new(Arc::new(registry), &config.executor));

    // Case directory
    let directory: Arc<dyn CaseDirectory> = match &config.targets.case_directory_url {
        Some(url) => Arc::new(HttpCaseDirectory::new(url.clone())?),
        None => {
            warn!("No case directory configured; directory placeholders stay unresolved");
            Arc::new(MemoryCaseDirectory::default())
        }
    };

    let links = Links::new(config.server.public_base_url.clone());
    let tokens = Arc::new(TokenService::new(
        tokens_repo,
        batches.clone(),
        config.approval.token_bytes,
    ));

    // Approval notifications
    let notifier = if config.notification.enabled {
        let channel = Arc::new(SmtpNotificationChannel::new(&config.notification)?);
        info!(
            "Approval notifications via {}:{}",
            config.notification.smtp_host, config.notification.smtp_port
        );
        Some(Arc::new(Notifier::new(
            NotificationRenderer::new(links.clone(), config.approval.window_minutes),
            channel,
            config.notification.default_approver.clone(),
        )))
    } else {
        info!("Approval notifications disabled");
        None
    };

    let mut approvals = ApprovalManager::new(
        batches.clone(),
        messages.clone(),
        log,
        tokens.clone(),
        executor.clone(),
        links,
    );
    let mut processor = MailProcessor::new(
        rules.clone(),
        messages.clone(),
        batches.clone(),
        directory.clone(),
        tokens,
        config.approval.window_minutes,
    );
    if let Some(notifier) = &notifier {
        approvals = approvals.with_notifier(notifier.clone());
        processor = processor.with_notifier(notifier.clone());
    }
    let processor = Arc::new(processor);

    let simulator = Simulator::new(rules.clone(), messages.clone(), directory, executor);

    // Start expiry sweeper
    let sweeper_handle = {
        let sweeper = ExpirySweeper::new(
            batches,
            messages.clone(),
            chrono::Duration::hours(config.approval.stale_after_hours),
        )
        .with_interval(config.approval.sweep_interval_secs);
        tokio::spawn(async move {
            sweeper.run().await;
        })
    };

    // Start spool ingestion if configured
    let ingest_handle = match &config.ingestion.spool_dir {
        Some(dir) => {
            info!("Polling spool directory {}", dir.display());
            let worker = IngestionWorker::new(
                Arc::new(SpoolDirProvider::new(dir.clone())),
                processor.clone(),
            )
            .with_poll_interval(config.ingestion.poll_interval_secs);
            Some(tokio::spawn(async move {
                worker.run().await;
            }))
        }
        None => {
            info!("Spool ingestion disabled");
            None
        }
    };

    // API server
    let state = Arc::new(AppState {
        approvals: Arc::new(approvals),
        rules: Arc::new(RuleStore::new(rules)),
        processor,
        simulator: Arc::new(simulator),
        messages,
        database: Arc::new(db_pool),
        api_keys: config.api.keys.clone(),
    });
    if state.api_keys.is_empty() {
        warn!("No API keys configured; the operator API will reject every request");
    }

    let app = lexflow_api::create_router(state, &config.api.cors_origins);
    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Lexflow listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    sweeper_handle.abort();
    if let Some(handle) = ingest_handle {
        handle.abort();
    }

    info!("Lexflow shutdown complete");

    Ok(())
}

/// Register a handler for every configured target
fn build_registry(config: &Config) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    if config.notification.enabled {
        registry.register(Arc::new(SmtpEmailHandler::new(&config.notification)?));
    }

    let TargetsConfig {
        tasks,
        billing,
        calendar,
        files,
        alerts,
        ..
    } = &config.targets;
    let webhooks: [(ActionType, &Option<WebhookTargetConfig>); 5] = [
        (ActionType::CreateTask, tasks),
        (ActionType::Billing, billing),
        (ActionType::CalendarEvent, calendar),
        (ActionType::SaveFile, files),
        (ActionType::CreateAlert, alerts),
    ];
    for (action_type, target) in webhooks {
        match target {
            Some(target) => {
                registry.register(Arc::new(WebhookActionHandler::new(action_type, target)?));
            }
            None => warn!("No target for {}; those actions will be skipped", action_type),
        }
    }

    Ok(registry)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},lexflow=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
