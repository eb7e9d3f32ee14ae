//! Streams task output events from a Mythic server to stdout.
//!
//! Configuration comes from the environment:
//! - `MYTHIC_URL` (required): server host, e.g. `mythic.example.com:7443`
//! - `MYTHIC_API_TOKEN` or `MYTHIC_USERNAME` / `MYTHIC_PASSWORD`
//! - `MYTHIC_SKIP_TLS_VERIFY`: set to `1` for self-signed deployments

use std::sync::Arc;

use anyhow::{Context, bail};
use mythic_core::Config;
use mythic_executor::{OperationDescriptor, OperationKind, RequestExecutor};
use mythic_session::SessionManager;
use mythic_transport::{HttpTransport, SubscriptionEngine, SubscriptionSpec};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ACTIVE_CALLBACKS: OperationDescriptor = OperationDescriptor {
    name: "callback",
    document: "query ActiveCallbacks {\n  callback(where: {active: {_eq: true}}) {\n    id\n    host\n    user\n  }\n}",
};

const TASK_OUTPUT_SUBSCRIPTION: &str = "subscription TaskOutput {
  response_stream(batch_size: 50, cursor: {initial_value: {id: 0}}) {
    id
    response_text
    task {
      display_id
      command_name
    }
  }
}";

fn config_from_env() -> anyhow::Result<Config> {
    let server_url = std::env::var("MYTHIC_URL").context("MYTHIC_URL is required")?;
    let config = Config {
        username: std::env::var("MYTHIC_USERNAME").ok(),
        password: std::env::var("MYTHIC_PASSWORD").ok(),
        api_token: std::env::var("MYTHIC_API_TOKEN").ok(),
        skip_tls_verify: std::env::var("MYTHIC_SKIP_TLS_VERIFY").is_ok_and(|v| v == "1"),
        ..Config::new(server_url)
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = config_from_env()?;
    let transport = Arc::new(HttpTransport::new(config.clone())?);

    let session = Arc::new(SessionManager::new(&config, transport.clone()));
    session.login().await?;
    let operation = session.current_operation().await;
    tracing::info!(?operation, "authenticated");

    let executor = RequestExecutor::new(Arc::clone(&session), transport);
    let callbacks: Vec<serde_json::Value> = executor
        .execute(OperationKind::Query, &ACTIVE_CALLBACKS, serde_json::Map::new())
        .await?;
    tracing::info!(count = callbacks.len(), "active callbacks");

    let Some(scheme) = session.auth_scheme().await else {
        bail!("no auth scheme after login");
    };
    let engine = SubscriptionEngine::connect(&config, &scheme).await?;
    let mut sub = engine
        .subscribe(SubscriptionSpec::new(TASK_OUTPUT_SUBSCRIPTION))
        .await?;
    tracing::info!("streaming task output, Ctrl-C to stop");

    loop {
        tokio::select! {
            item = sub.next() => {
                match item {
                    Some(Ok(event)) => {
                        println!("{}", serde_json::to_string_pretty(&event.data)?);
                    }
                    Some(Err(error)) => tracing::error!("subscription error: {error}"),
                    None => {
                        tracing::warn!("subscription ended");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    sub.close();
    engine.shutdown();
    session.logout().await;
    Ok(())
}
