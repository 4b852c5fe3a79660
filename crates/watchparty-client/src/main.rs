//! Watchparty demo
//!
//! Runs a host and a viewer against one in-memory store and walks through a
//! short shared viewing: create, join, play, seek, chat and react.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watchparty_client::{
    Collaborators, MemoryStore, NavigationContext, PlaybackElement, REACTION_PALETTE,
    SimulatedPlayer, StaticIdentityProvider, UrlNavigation, WatchSession,
};
use watchparty_core::{MemoryPersistence, SessionIdentity, SyncConfig};

const DEFAULT_URL: &str = "https://watch.example/v/big-buck-bunny";

struct Participant {
    session: WatchSession,
    player: Arc<SimulatedPlayer>,
}

fn participant(
    store: &MemoryStore,
    url: &str,
    auth: StaticIdentityProvider,
    config: &SyncConfig,
) -> anyhow::Result<Participant> {
    let player = Arc::new(SimulatedPlayer::new());
    let navigation = UrlNavigation::parse(url).with_context(|| format!("invalid page url {url}"))?;
    let media_id = navigation
        .current_url()
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .unwrap_or("media")
        .to_string();
    let identity = SessionIdentity::load_or_create(&MemoryPersistence::new());

    let collaborators = Collaborators {
        store: Arc::new(store.clone()),
        auth: Arc::new(auth),
        player: player.clone(),
        navigation: Arc::new(navigation),
    };
    Ok(Participant {
        session: WatchSession::new(collaborators, identity, media_id, config.clone()),
        player,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let url = std::env::var("WATCHPARTY_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let config = SyncConfig::from_env();
    let store = MemoryStore::new();

    let mut host = participant(
        &store,
        &url,
        StaticIdentityProvider::signed_in("host-account", Some("Host")),
        &config,
    )?;
    host.session.activate().await.context("host could not open a room")?;
    let invite = host
        .session
        .invite_link()
        .context("host has no room after activation")?;
    tracing::info!(invite = %invite, "Room ready");

    let mut viewer = participant(
        &store,
        invite.as_str(),
        StaticIdentityProvider::anonymous(),
        &config,
    )?;
    viewer.session.activate().await.context("viewer could not join")?;

    host.player.play();
    tokio::time::sleep(Duration::from_millis(100)).await;
    for _ in 0..3 {
        host.player.advance(1.0);
        viewer.player.advance(1.0);
    }
    tokio::time::sleep(config.progress_debounce + Duration::from_millis(100)).await;

    host.player.seek(90.0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!(
        host_time = host.player.current_time(),
        viewer_time = viewer.player.current_time(),
        viewer_playing = viewer.player.is_playing(),
        "Clocks after seek"
    );

    viewer.session.send_message("this scene!").await?;
    viewer.session.send_reaction(REACTION_PALETTE[0]).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    if let Some(active) = host.session.active() {
        for message in active.messaging.messages() {
            tracing::info!(from = %message.display_name, text = %message.text, "Chat");
        }
        tracing::info!(
            watchers = active.presence.watcher_count(),
            reactions = active.reactions.active().len(),
            "Room summary"
        );
    }

    viewer.session.close().await;
    host.session.close().await;
    Ok(())
}
