use std::future::IntoFuture;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tgbroker::{auth::WebhookAuth, broker::Broker, config::BrokerConfig, upstream::TelegramApi, webhook};

type StartupError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tgbroker=debug,tg_broker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tg-broker...");

    let config = match BrokerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Broker stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: BrokerConfig) -> Result<(), StartupError> {
    let api = Arc::new(TelegramApi::new(
        &config.api_endpoint,
        &config.token,
        config.upstream_timeout,
    )?);

    if let Some(url) = &config.webhook_url {
        api.set_webhook(url, config.webhook_secret.as_deref()).await?;
    }

    let broker = Arc::new(Broker::new(api, config.write_timeout));

    let client_listener = tokio::net::TcpListener::bind(config.client_bind).await?;
    tracing::info!("Accepting broker clients on {}", config.client_bind);

    let webhook_listener = tokio::net::TcpListener::bind(config.webhook_bind).await?;
    tracing::info!(
        "Listening for webhook updates on http://{}{}",
        config.webhook_bind,
        config.webhook_path
    );

    let auth = Arc::new(WebhookAuth::new(config.webhook_secret.clone()));
    let app = webhook::router(broker.clone(), &config.webhook_path, auth);

    tokio::select! {
        _ = broker.serve(client_listener) => {}
        result = axum::serve(webhook_listener, app).into_future() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
