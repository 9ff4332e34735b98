use std::sync::Arc;

use textline::ai::{HttpInferenceClient, ReplyGenerator};
use textline::config::AppConfig;
use textline::context::AppContext;
use textline::dispatch::OutboundDispatcher;
use textline::gateway::HttpSmsGateway;
use textline::pipeline::{MessageProcessor, ProcessorDeps};
use textline::policy::PolicyEvaluator;
use textline::store::Database;
use textline::webhook;
use textline::worker::{Orchestrator, RetryPolicy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📨 Textline v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Listening: http://{}", config.bind_addr);
    eprintln!("   Inbound webhook: {}/webhooks/sms", config.public_base_url);
    eprintln!("   Status webhook: {}/webhooks/status", config.public_base_url);
    eprintln!("   Inference: {} ({})", config.inference.base_url, config.inference.model);
    eprintln!("   Workers: {}\n", config.workers);

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(Database::open(&config.db_path).unwrap_or_else(|e| {
        eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
        std::process::exit(1);
    }));

    // ── Pipeline wiring ──────────────────────────────────────────────────
    let gateway = Arc::new(HttpSmsGateway::new(&config.gateway)?);
    let inference = Arc::new(HttpInferenceClient::new(&config.inference)?);
    let generator = Arc::new(ReplyGenerator::new(inference, config.inference.clone()));

    let messages = Arc::new(textline::store::MessageStore::new(db.clone()));
    let clients = Arc::new(textline::store::ClientStore::new(db.clone()));
    let rate_windows = Arc::new(textline::store::RateWindowStore::new(db.clone()));
    let dead_letters = Arc::new(textline::store::DeadLetterStore::new(db.clone()));

    let status_callback = format!(
        "{}/webhooks/status",
        config.public_base_url.trim_end_matches('/')
    );
    let dispatcher = Arc::new(OutboundDispatcher::new(
        messages.clone(),
        gateway,
        Some(status_callback),
    ));
    let policy = Arc::new(PolicyEvaluator::new(
        messages.clone(),
        clients.clone(),
        rate_windows.clone(),
    ));
    let processor = Arc::new(MessageProcessor::new(ProcessorDeps {
        accounts: Arc::new(textline::store::AccountStore::new(db.clone())),
        clients: clients.clone(),
        messages: messages.clone(),
        rules: Arc::new(textline::store::RuleStore::new(db.clone())),
        policy,
        generator,
        dispatcher,
    }));

    // ── Worker pool ──────────────────────────────────────────────────────
    let retry = RetryPolicy {
        max_attempts: config.max_task_attempts,
        ..RetryPolicy::default()
    };
    let (orchestrator, queue) = Orchestrator::spawn(
        processor,
        dead_letters,
        retry,
        config.task_deadline,
        config.workers,
    );

    // ── HTTP server ──────────────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let ctx = Arc::new(AppContext::new(config, db, queue));
    let app = webhook::router(ctx);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            eprintln!("\nShutting down...");
        })
        .await?;

    // The server dropped its queue handle; let in-flight work finish.
    orchestrator.join().await;
    Ok(())
}
