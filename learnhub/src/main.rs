// LearnHub - role-based learning management backend
// Entry point and application setup

use learnhub::access;
use learnhub::app::AppState;
use learnhub::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "learnhub=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LearnHub");

    let config = AppConfig::from_env();
    let state = AppState::initialize(config).await?;

    let mut session = state.session.watch();
    tracing::info!("Ready, waiting for sign-ins (Ctrl+C to stop)");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = session.borrow_and_update().clone();
                match current.profile {
                    Some(profile) => {
                        let screens: Vec<&str> = access::nav_items(profile.role)
                            .iter()
                            .map(|item| item.title)
                            .collect();
                        tracing::info!(
                            "Signed in as {} ({}): {}",
                            profile.display_name,
                            profile.role.as_str(),
                            screens.join(", ")
                        );
                    }
                    None if !current.loading => tracing::info!("Signed out"),
                    None => {}
                }
            }
        }
    }

    state.shutdown();
    tracing::info!("LearnHub stopped");

    Ok(())
}
