//! AudioMode simulator - runs the engine against an in-process host.
//!
//! # Overview
//!
//! The engine normally lives inside a browser binding. This binary wires it to
//! [`SimulatedHost`] instead and plays a scripted session, so the whole
//! pipeline (navigation settling, reconciliation, quality enforcement with the
//! menu fallback, usage tracking) can be watched in the logs.
//!
//! # Execution Flow
//!
//! 1. Load `engine.yaml` and open `storage.yaml` from the data directory
//!    (first argument, default `AudioMode Data/`)
//! 2. Initialize logging → `<data dir>/logs/audiomode.<date>`
//! 3. Start the engine on a current-thread tokio runtime, re-reading
//!    `storage.yaml` periodically so edits from other processes apply live
//! 4. Script: watch a video with an uncooperative player, navigate, switch to
//!    filtered mode, let the host drift, toggle from the keyboard
//! 5. Shut down and print the metrics summary

use anyhow::{Context, Result};
use audiomode::engine::{EngineCommand, TOGGLE_COMMAND};
use audiomode::host::sim::{SimBehaviour, SimVideo, SimulatedHost};
use audiomode::models::{FilterRuleSet, OperatingMode, QualityTier, WhitelistRule};
use audiomode::services::NavigationSignal;
use audiomode::storage::{PreferenceStore, StorageKey};
use audiomode::{APP_NAME, ConfigManager, Engine, VERSION};
use camino::Utf8PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = "AudioMode Data";

/// How often `storage.yaml` is re-read for edits made by other processes.
const STORE_RELOAD_INTERVAL: Duration = Duration::from_secs(2);

const ZOO_CHANNEL: &str = "UC4QobU6STFB0P71PMvOGN5A";

fn zoo_video() -> SimVideo {
    SimVideo::new("jNQXAC9IVRw", "Me at the zoo").on_channel(ZOO_CHANNEL, "jawed")
}

fn anthem_video() -> SimVideo {
    SimVideo::new("dQw4w9WgXcQ", "Never Gonna Give You Up")
        .on_channel("UCuAXFkgsw1L7xaCfnd5JJOw", "Rick Astley")
}

fn main() -> Result<()> {
    let data_dir = std::env::args()
        .nth(1)
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATA_DIR));

    let config_manager = ConfigManager::new(&data_dir)?;
    let config = config_manager.load_engine_config()?;

    let _log_guard = audiomode::logging::setup_logging_with_console(
        &data_dir.join("logs"),
        "audiomode",
        config.debug_mode,
        true,
    )?;
    tracing::info!("Starting {} v{} simulator", APP_NAME, VERSION);

    let store = Arc::new(config_manager.open_store()?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    // Long enough for one periodic drift check
    let drift_check_wait =
        config.usage_tick() * config.enforcement_every_ticks.max(1) + Duration::from_secs(1);

    runtime.block_on(async move {
        let reload_task = store.spawn_reload(STORE_RELOAD_INTERVAL);
        let sim = SimulatedHost::with_behaviour(SimBehaviour::uncooperative());
        sim.navigate(&zoo_video());

        let engine = Engine::new(sim.host(), store.clone(), config).start();
        let mut events = engine.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                tracing::info!("[event] {:?}", event);
            }
        });

        // Always mode: the setters are ignored, so the menu fallback runs once
        engine.send_or_default(EngineCommand::ModeChanged(OperatingMode::Always)).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        tracing::info!("Quality after first item: {}", sim.quality());

        // Navigate: quality resets on the new item
        sim.navigate(&anthem_video());
        engine.signal(NavigationSignal::UrlChanged(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
        ));
        tokio::time::sleep(Duration::from_secs(3)).await;

        // Filtered mode with only the first channel whitelisted
        let rules: FilterRuleSet = [WhitelistRule::channel(ZOO_CHANNEL, "jawed", 0)]
            .into_iter()
            .collect();
        match serde_json::to_value(&rules) {
            Ok(value) => {
                if let Err(e) = store.set(StorageKey::Whitelist, value) {
                    tracing::warn!("Could not store whitelist: {}", e);
                }
            }
            Err(e) => tracing::warn!("Could not serialize whitelist: {}", e),
        }
        engine.send_or_default(EngineCommand::ModeChanged(OperatingMode::Filtered)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Back to a whitelisted item, then let the host drift
        sim.navigate(&zoo_video());
        engine.signal(NavigationSignal::HostEvent("yt-navigate-finish".to_string()));
        tokio::time::sleep(Duration::from_secs(3)).await;
        sim.update_behaviour(|behaviour| behaviour.honors_playback_quality = true);
        sim.set_quality(QualityTier::Hd1080);
        tokio::time::sleep(drift_check_wait).await;
        tracing::info!("Quality after drift check: {}", sim.quality());

        let response = engine.keyboard_command(TOGGLE_COMMAND).await;
        tracing::info!("Keyboard toggle answered {:?}", response);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let status = engine.status().await;
        tracing::info!(
            "Final status: enabled={}, mode={} (badge '{}'), quality={}",
            status.enabled,
            status.mode,
            status.mode.badge_text(),
            sim.quality()
        );

        engine.shutdown().await;
        reload_task.abort();
    });

    tracing::info!("Simulator finished");
    Ok(())
}
