//! Integration tests for the engine against the simulated host
//!
//! These tests verify end-to-end scenarios:
//! - Always mode on an uncooperative player (one menu fallback per item)
//! - Navigation during a menu fallback (cancellation with cleanup)
//! - Filtered mode following the whitelist across navigations
//! - Off mode applying the preferred quality on every navigation
//! - Toggle debouncing, keyboard commands and external preference edits
//! - Shutdown leaving the page out of audio mode
//!
//! All tests run on a paused tokio clock, so the settle delays cost nothing.

use audiomode::host::sim::{HostCall, SimBehaviour, SimVideo, SimulatedHost};
use audiomode::models::{
    BackgroundTheme, EngineConfig, EngineStatus, FilterRuleSet, OperatingMode, QualityTier,
    ThemeKind, UsageLedger, WhitelistRule,
};
use audiomode::services::NavigationSignal;
use audiomode::storage::{MemoryStore, PreferenceStore, StorageKey};
use audiomode::{Engine, EngineCommand, EngineError, EngineEvent, EngineHandle, EngineResponse};
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::time::{Duration, sleep};

const CHANNEL_ONE: &str = "UC4QobU6STFB0P71PMvOGN5A";
const CHANNEL_TWO: &str = "UCuAXFkgsw1L7xaCfnd5JJOw";

fn video_a() -> SimVideo {
    SimVideo::new("jNQXAC9IVRw", "Me at the zoo").on_channel(CHANNEL_ONE, "jawed")
}

fn video_b() -> SimVideo {
    SimVideo::new("dQw4w9WgXcQ", "Never Gonna Give You Up").on_channel(CHANNEL_TWO, "Rick Astley")
}

fn test_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn store_with_mode(mode: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(StorageKey::OperatingMode, json!(mode));
    store
}

fn start_engine(
    sim: &SimulatedHost,
    store: &Arc<MemoryStore>,
    config: EngineConfig,
) -> EngineHandle {
    Engine::new(sim.host(), store.clone(), config)
        .with_clock(Arc::new(test_day))
        .start()
}

fn navigate(engine: &EngineHandle, sim: &SimulatedHost, video: &SimVideo) {
    sim.navigate(video);
    engine.signal(NavigationSignal::UrlChanged(format!(
        "https://www.youtube.com/watch?v={}",
        video.id
    )));
}

#[tokio::test(start_paused = true)]
async fn test_always_mode_uncooperative_host_uses_menu_once() {
    let sim = SimulatedHost::with_behaviour(SimBehaviour::uncooperative());
    sim.navigate(&video_a());
    let store = store_with_mode("always");

    let engine = start_engine(&sim, &store, EngineConfig::default());
    sleep(Duration::from_secs(3)).await;

    // Setters were ignored, the menu brought the player down to the lowest tier
    assert_eq!(sim.quality(), QualityTier::Tiny);
    assert_eq!(sim.count(|c| matches!(c, HostCall::OpenSettings)), 1);
    assert_eq!(sim.count(|c| *c == HostCall::SelectOption("144p".to_string())), 1);
    assert!(sim.visual_mounted());
    assert!(sim.surface_hidden());
    assert!(!sim.menu_suppressed());
    assert_eq!(
        engine.state().read(|s| s.saved_quality_before_audio_mode),
        Some(QualityTier::Hd720)
    );

    // The host drifts; the periodic check re-applies through the API only
    sim.set_quality(QualityTier::Hd720);
    let setter_calls = sim.count(|c| matches!(c, HostCall::SetPlaybackQuality(_)));
    sleep(Duration::from_secs(10)).await;

    assert!(sim.count(|c| matches!(c, HostCall::SetPlaybackQuality(_))) > setter_calls);
    assert_eq!(sim.count(|c| matches!(c, HostCall::OpenSettings)), 1);
    assert_eq!(engine.metrics().fallback_runs.load(Ordering::Relaxed), 1);
    assert!(engine.metrics().drift_corrections.load(Ordering::Relaxed) >= 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_navigation_during_menu_fallback_cancels_with_cleanup() {
    let sim = SimulatedHost::with_behaviour(SimBehaviour::uncooperative());
    sim.navigate(&video_a());
    let store = store_with_mode("always");

    // Slow submenu so the navigation lands mid-sequence
    let config = EngineConfig {
        submenu_settle_ms: 2000,
        ..EngineConfig::default()
    };
    let engine = start_engine(&sim, &store, config);

    sleep(Duration::from_millis(1300)).await;
    assert_eq!(sim.count(|c| matches!(c, HostCall::OpenSettings)), 1);
    assert!(sim.menu_suppressed());

    navigate(&engine, &sim, &video_b());
    sleep(Duration::from_secs(8)).await;

    let metrics = engine.metrics();
    assert_eq!(metrics.fallback_cancellations.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.fallback_runs.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.fallback_selections.load(Ordering::Relaxed), 1);

    // Only the new item got a selection, and nothing was left open
    assert_eq!(sim.count(|c| matches!(c, HostCall::SelectOption(_))), 1);
    assert_eq!(sim.quality(), QualityTier::Tiny);
    assert!(!sim.menu_open());
    assert!(!sim.menu_suppressed());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_filtered_mode_follows_whitelist_across_navigation() {
    let sim = SimulatedHost::new();
    sim.navigate(&video_a());
    let store = store_with_mode("filtered");
    let rules: FilterRuleSet = [WhitelistRule::channel(CHANNEL_ONE, "jawed", 0)]
        .into_iter()
        .collect();
    store.seed(StorageKey::Whitelist, serde_json::to_value(&rules).unwrap());

    let engine = start_engine(&sim, &store, EngineConfig::default());
    let mut events = engine.subscribe();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(
        engine.status().await,
        EngineStatus {
            enabled: true,
            mode: OperatingMode::Filtered
        }
    );
    assert_eq!(sim.quality(), QualityTier::Tiny);
    assert!(sim.visual_mounted());
    assert!(sim.surface_hidden());

    // The next item lands on a different tier; restore goes back to the saved one
    sim.update_behaviour(|b| b.quality_on_navigation = Some(QualityTier::Large));
    navigate(&engine, &sim, &video_b());
    sleep(Duration::from_secs(2)).await;

    let status = engine.status().await;
    assert!(!status.enabled);
    assert_eq!(status.mode, OperatingMode::Filtered);
    assert_eq!(sim.quality(), QualityTier::Hd720);
    assert!(!sim.visual_mounted());
    assert!(!sim.surface_hidden());

    let mut enabled = 0;
    let mut disabled = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::AudioModeEnabled { .. } => enabled += 1,
            EngineEvent::AudioModeDisabled => disabled += 1,
            _ => {}
        }
    }
    assert_eq!((enabled, disabled), (1, 1));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_whitelist_edit_reevaluates_current_item() {
    let sim = SimulatedHost::new();
    sim.navigate(&video_b());
    let store = store_with_mode("filtered");

    let engine = start_engine(&sim, &store, EngineConfig::default());
    sleep(Duration::from_secs(5)).await;
    assert!(!engine.status().await.enabled);

    // The popup whitelists the channel of the item on screen
    let rules: FilterRuleSet = [WhitelistRule::channel(CHANNEL_TWO, "Rick Astley", 1)]
        .into_iter()
        .collect();
    store
        .set(StorageKey::Whitelist, serde_json::to_value(&rules).unwrap())
        .unwrap();
    sleep(Duration::from_secs(2)).await;

    assert!(engine.status().await.enabled);
    assert_eq!(sim.quality(), QualityTier::Tiny);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_off_mode_applies_preferred_quality_per_navigation() {
    let sim = SimulatedHost::new();
    sim.navigate(&video_a());
    let store = store_with_mode("off");
    store.seed(StorageKey::PreferredQuality, json!("hd1080"));

    let engine = start_engine(&sim, &store, EngineConfig::default());
    sleep(Duration::from_secs(2)).await;

    assert_eq!(sim.quality(), QualityTier::Hd1080);
    assert_eq!(sim.count(|c| *c == HostCall::SetPlaybackQuality(QualityTier::Hd1080)), 1);

    navigate(&engine, &sim, &video_b());
    sleep(Duration::from_secs(2)).await;

    assert_eq!(sim.quality(), QualityTier::Hd1080);
    assert_eq!(sim.count(|c| *c == HostCall::SetPlaybackQuality(QualityTier::Hd1080)), 2);
    assert_eq!(sim.count(|c| *c == HostCall::MountVisual), 0);
    assert!(!engine.status().await.enabled);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_double_toggle_inside_guard_window_is_one_transition() {
    let sim = SimulatedHost::new();
    sim.navigate(&video_a());
    let store = store_with_mode("off");

    let engine = start_engine(&sim, &store, EngineConfig::default());
    sleep(Duration::from_secs(1)).await;

    let expected = EngineResponse::Status(EngineStatus {
        enabled: true,
        mode: OperatingMode::Always,
    });
    assert_eq!(engine.send(EngineCommand::ToggleAudioMode).await, Ok(expected));
    assert_eq!(engine.send(EngineCommand::ToggleAudioMode).await, Ok(expected));
    sleep(Duration::from_secs(2)).await;

    assert_eq!(sim.count(|c| *c == HostCall::MountVisual), 1);
    assert_eq!(store.value(StorageKey::OperatingMode), Some(json!("always")));
    assert_eq!(sim.quality(), QualityTier::Tiny);

    // Past the guard window the keyboard shortcut flips it back
    let response = engine.keyboard_command(audiomode::engine::TOGGLE_COMMAND).await;
    assert_eq!(
        response,
        Some(EngineResponse::Status(EngineStatus {
            enabled: false,
            mode: OperatingMode::Off
        }))
    );
    sleep(Duration::from_secs(2)).await;

    assert_eq!(sim.quality(), QualityTier::Hd720);
    assert_eq!(store.value(StorageKey::OperatingMode), Some(json!("off")));
    assert_eq!(engine.keyboard_command("open-popup").await, None);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_external_mode_edit_is_reconciled() {
    let sim = SimulatedHost::new();
    sim.navigate(&video_a());
    let store = store_with_mode("always");

    let engine = start_engine(&sim, &store, EngineConfig::default());
    sleep(Duration::from_secs(2)).await;
    assert!(engine.status().await.enabled);

    store.set(StorageKey::OperatingMode, json!("off")).unwrap();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(
        engine.status().await,
        EngineStatus {
            enabled: false,
            mode: OperatingMode::Off
        }
    );
    assert!(!sim.visual_mounted());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_theme_and_language_updates_reach_the_visual() {
    let sim = SimulatedHost::new();
    sim.navigate(&video_a());
    let store = store_with_mode("always");

    let engine = start_engine(&sim, &store, EngineConfig::default());
    sleep(Duration::from_secs(2)).await;
    assert_eq!(sim.visual_language().as_deref(), Some("en"));

    let theme = BackgroundTheme {
        kind: ThemeKind::Gradient,
        value: "linear-gradient(#000, #333)".to_string(),
    };
    assert_eq!(
        engine.send(EngineCommand::UpdateTheme(theme.clone())).await,
        Ok(EngineResponse::Ack)
    );
    assert_eq!(
        engine.send(EngineCommand::UpdateLanguage("de".to_string())).await,
        Ok(EngineResponse::Ack)
    );
    sleep(Duration::from_millis(100)).await;

    assert_eq!(sim.visual_theme(), Some(theme));
    assert_eq!(sim.visual_language().as_deref(), Some("de"));
    assert_eq!(store.value(StorageKey::Language), Some(json!("de")));
    // The store echo of our own write does not apply the theme a second time
    assert_eq!(sim.count(|c| matches!(c, HostCall::SetTheme(_))), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_usage_is_recorded_while_enabled() {
    let sim = SimulatedHost::new();
    sim.navigate(&video_a());
    let store = store_with_mode("always");

    let engine = start_engine(&sim, &store, EngineConfig::default());
    sleep(Duration::from_secs(11)).await;

    let ledger: UsageLedger =
        serde_json::from_value(store.value(StorageKey::UsageStats).unwrap()).unwrap();
    let today = ledger.get(test_day()).unwrap();
    assert_eq!(today.active_seconds, 10);
    assert_eq!(today.listened_seconds, 10);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_does_not_stop_the_engine() {
    let sim = SimulatedHost::new();
    sim.navigate(&video_a());
    let store = store_with_mode("off");
    store.set_fail_writes(true);

    let engine = start_engine(&sim, &store, EngineConfig::default());
    sleep(Duration::from_secs(1)).await;

    let status = engine.send_or_default(EngineCommand::ToggleAudioMode).await;
    assert_eq!(
        status,
        EngineResponse::Status(EngineStatus {
            enabled: true,
            mode: OperatingMode::Always
        })
    );
    sleep(Duration::from_secs(2)).await;

    assert_eq!(sim.quality(), QualityTier::Tiny);
    assert_eq!(store.value(StorageKey::OperatingMode), Some(json!("off")));
    assert!(engine.metrics().storage_errors.load(Ordering::Relaxed) >= 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_audio_mode_and_closes_mailbox() {
    let sim = SimulatedHost::new();
    sim.navigate(&video_a());
    let store = store_with_mode("always");

    let engine = start_engine(&sim, &store, EngineConfig::default());
    sleep(Duration::from_secs(2)).await;
    assert!(sim.visual_mounted());

    engine.shutdown().await;

    assert!(!sim.visual_mounted());
    assert!(!sim.surface_hidden());
    assert_eq!(engine.send(EngineCommand::GetStatus).await, Err(EngineError::Closed));
    assert_eq!(engine.status().await, EngineStatus::default());
}
