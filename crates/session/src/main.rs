//! Headless session probe: runs the guard against the configured backend and
//! exits once the stored session is no longer authorized.

use std::sync::Arc;

use anyhow::Context;
use cvai_session::{
    ChannelNavigator, GuardOptions, RemoteValidator, SessionConfig, SessionGuard, SessionStore,
    SqliteStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cvai_observability::init();

    let config = SessionConfig::from_env().context("invalid session configuration")?;
    tracing::info!(
        api_base = %config.api_base,
        protected = %config.protected_url(),
        interval_secs = config.probe_interval.as_secs(),
        "starting session probe"
    );

    let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::new(config.origin.clone()));
    let validator = RemoteValidator::new(&config)
        .context("failed to build HTTP client")?
        .with_store(store.clone());
    let (navigator, mut redirects) = ChannelNavigator::new();

    let guard = Arc::new(SessionGuard::new(
        store,
        Arc::new(validator),
        Arc::new(navigator),
        GuardOptions::from(&config),
    ));
    let handle = guard.start();

    tokio::select! {
        redirect = redirects.recv() => {
            if let Some(redirect) = redirect {
                tracing::info!(
                    to = %redirect.to,
                    reason = redirect.reason.as_deref().unwrap_or(""),
                    from = redirect.from.as_deref().unwrap_or(""),
                    "session no longer authorized; redirecting"
                );
            }
            handle.join().await;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; stopping session probe");
            handle.shutdown().await;
        }
    }

    Ok(())
}
