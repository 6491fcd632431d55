use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;
use supportbot::assistant::OpenAiAssistant;
use supportbot::channels::telegram::TelegramApi;
use supportbot::coordinator::TicketCoordinator;
use supportbot::reminder::ReminderScheduler;
use supportbot::shared::config::AppConfig;
use supportbot::shared::state::AppState;
use supportbot::storage::PgTicketStore;
use supportbot::telegram;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::load()?;
    info!("Starting support relay on {}", config.bind_addr);

    let store = Arc::new(PgTicketStore::connect(
        &config.database.url,
        config.database.max_connections,
    )?);
    store.init_schema().await?;

    let transport = Arc::new(TelegramApi::new(&config.bot_token));
    let assistant = Arc::new(OpenAiAssistant::new(config.assistant.clone()));

    let coordinator = Arc::new(TicketCoordinator::new(
        config.clone(),
        store.clone(),
        transport.clone(),
        assistant,
    ));

    let state = Arc::new(AppState::new(
        config.clone(),
        coordinator.clone(),
        transport.clone(),
    ));
    telegram::register_commands(&state).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(ReminderScheduler::new(
        &config,
        coordinator,
        store,
        transport,
    ));
    let scheduler_handle = scheduler.spawn(shutdown_rx);

    let app = telegram::configure().with_state(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Webhook listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("Could not install shutdown handler");
            }
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    info!("Stopped");
    Ok(())
}
