//! Menu fallback: drive the host's own quality menu when the programmatic
//! setters did not take effect.
//!
//! The interaction is a small state machine:
//!
//! ```text
//! OpenSettings -> OpenQualityMenu -> SelectOption -> Close -> Cleanup -> Done
//! ```
//!
//! Each step waits a settle delay because the host renders the menu
//! asynchronously. The operation token is checked before every step that
//! touches the menu; once it goes stale the sequence jumps straight to
//! `Cleanup`, which always runs: the menu is closed if it was opened, the
//! suppression styles are removed and playback is resumed if the menu paused it.

use crate::host::{PlayerControl, QualityMenu};
use crate::metrics::Metrics;
use crate::models::{MenuTimings, QualityTier};
use crate::state::OperationToken;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStep {
    OpenSettings,
    OpenQualityMenu,
    SelectOption,
    Close,
    Cleanup,
    Done,
}

impl fmt::Display for FallbackStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FallbackStep::OpenSettings => "open-settings",
            FallbackStep::OpenQualityMenu => "open-quality-menu",
            FallbackStep::SelectOption => "select-option",
            FallbackStep::Close => "close",
            FallbackStep::Cleanup => "cleanup",
            FallbackStep::Done => "done",
        };
        f.write_str(name)
    }
}

/// Which way the operation moves quality. Decides the heuristic used when the
/// exact target label is not rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Lowering,
    Restoring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackResult {
    Selected {
        label: String,
        tier: Option<QualityTier>,
    },
    /// The sequence ran but nothing suitable could be selected.
    NoSelection,
    /// A newer navigation invalidated the sequence before `at` ran.
    Cancelled { at: FallbackStep },
}

/// Pick the menu entry to click for `target`.
///
/// # Arguments
/// * `labels` - Rendered option labels, top to bottom
/// * `target` - Tier the operation wants
/// * `direction` - Lowering falls back to the lowest tier, restoring to "Auto"
///
/// # Returns
/// Index into `labels`, or `None` when no entry is usable
pub fn choose_option(
    labels: &[String],
    target: QualityTier,
    direction: Direction,
) -> Option<usize> {
    let parsed: Vec<Option<QualityTier>> = labels
        .iter()
        .map(|label| QualityTier::from_menu_label(label))
        .collect();

    if let Some(index) = parsed.iter().position(|tier| *tier == Some(target)) {
        return Some(index);
    }

    let concrete = || {
        parsed
            .iter()
            .enumerate()
            .filter_map(|(index, tier)| {
                tier.filter(|t| *t != QualityTier::Auto)
                    .map(|t| (index, t))
            })
    };

    // Unparseable labels: the host lists lowest last, above "Auto".
    let last_non_auto = || {
        labels
            .iter()
            .rposition(|label| !label.trim().to_ascii_lowercase().starts_with("auto"))
    };

    match direction {
        Direction::Lowering => concrete()
            .min_by_key(|(_, tier)| *tier)
            .map(|(index, _)| index)
            .or_else(last_non_auto),
        Direction::Restoring => parsed
            .iter()
            .position(|tier| *tier == Some(QualityTier::Auto))
            .or_else(|| {
                let available: Vec<QualityTier> = concrete().map(|(_, tier)| tier).collect();
                let substitute = QualityTier::restore_substitute(target, &available)?;
                concrete().find(|(_, tier)| *tier == substitute).map(|(index, _)| index)
            })
            .or_else(|| if concrete().next().is_none() { last_non_auto() } else { None }),
    }
}

/// One run of the menu interaction.
pub struct FallbackSequence<'a> {
    menu: Arc<dyn QualityMenu>,
    player: Arc<dyn PlayerControl>,
    token: &'a OperationToken,
    generation: u64,
    timings: MenuTimings,
    metrics: Arc<Metrics>,
}

impl<'a> FallbackSequence<'a> {
    pub fn new(
        menu: Arc<dyn QualityMenu>,
        player: Arc<dyn PlayerControl>,
        token: &'a OperationToken,
        generation: u64,
        timings: MenuTimings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            menu,
            player,
            token,
            generation,
            timings,
            metrics,
        }
    }

    async fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn run(self, target: QualityTier, direction: Direction) -> FallbackResult {
        self.metrics.record_fallback_run();

        let was_playing = self.player.is_playing();
        let position = self.player.current_time();
        self.menu.set_suppressed(true);

        let mut menu_open = false;
        let mut result = FallbackResult::NoSelection;
        let mut step = FallbackStep::OpenSettings;

        loop {
            let touches_menu = matches!(
                step,
                FallbackStep::OpenSettings
                    | FallbackStep::OpenQualityMenu
                    | FallbackStep::SelectOption
            );
            if touches_menu && !self.token.is_current(self.generation) {
                tracing::debug!("Menu fallback superseded before {}", step);
                self.metrics.record_fallback_cancelled();
                result = FallbackResult::Cancelled { at: step };
                step = FallbackStep::Cleanup;
            }

            step = match step {
                FallbackStep::OpenSettings => match self.menu.open_settings() {
                    Ok(()) => {
                        menu_open = true;
                        self.settle(self.timings.open_settings).await;
                        FallbackStep::OpenQualityMenu
                    }
                    Err(e) => {
                        tracing::warn!("Could not open settings menu: {}", e);
                        FallbackStep::Cleanup
                    }
                },
                FallbackStep::OpenQualityMenu => match self.menu.open_quality_submenu() {
                    Ok(()) => {
                        self.settle(self.timings.open_submenu).await;
                        FallbackStep::SelectOption
                    }
                    Err(e) => {
                        tracing::warn!("Could not open quality submenu: {}", e);
                        FallbackStep::Close
                    }
                },
                FallbackStep::SelectOption => {
                    let labels = self.menu.option_labels();
                    match choose_option(&labels, target, direction) {
                        Some(index) => match self.menu.select_option(index) {
                            Ok(()) => {
                                let label = labels[index].clone();
                                tracing::info!("Selected quality option '{}' from menu", label);
                                self.metrics.record_fallback_selection();
                                result = FallbackResult::Selected {
                                    tier: QualityTier::from_menu_label(&label),
                                    label,
                                };
                                self.settle(self.timings.select).await;
                            }
                            Err(e) => tracing::warn!("Selecting quality option failed: {}", e),
                        },
                        None => tracing::warn!(
                            "No usable quality option among {} rendered labels",
                            labels.len()
                        ),
                    }
                    FallbackStep::Close
                }
                FallbackStep::Close => {
                    self.menu.close();
                    menu_open = false;
                    FallbackStep::Cleanup
                }
                FallbackStep::Cleanup => {
                    if menu_open {
                        self.menu.close();
                        menu_open = false;
                    }
                    self.menu.set_suppressed(false);
                    if was_playing && !self.player.is_playing() {
                        tracing::debug!(
                            "Menu interaction paused playback, resuming at {:.1}s",
                            position
                        );
                        if let Err(e) = self.player.seek_to(position) {
                            tracing::debug!("Seek after menu interaction failed: {}", e);
                        }
                        if let Err(e) = self.player.play() {
                            tracing::debug!("Resume after menu interaction failed: {}", e);
                        }
                    }
                    FallbackStep::Done
                }
                FallbackStep::Done => break,
            };
        }

        result
    }
}
