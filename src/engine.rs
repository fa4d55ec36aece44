// Engine - wires the services together and runs them as one actor
//
// The engine owns every per-page component and exposes a cloneable
// EngineHandle to collaborators:
// - Commands (popup messages, the keyboard shortcut) go through a bounded
//   mailbox and are answered over a oneshot channel
// - Navigation signals from the browser binding feed the PageObserver
// - Preference changes from the store are picked up by the actor loop
//
// Long-running reconciliations (filtered-mode extraction retries) run in their
// own tasks so the mailbox keeps answering within the command timeout.

use crate::host::Host;
use crate::metrics::Metrics;
use crate::models::{BackgroundTheme, EngineConfig, EngineStatus, OperatingMode};
use crate::services::{
    Clock, ModeReconciler, NavigationNotice, NavigationSignal, PageObserver, QualityCoordinator,
    QualityEnforcer, VideoInfoExtractor, local_clock,
};
use crate::state::{EngineEvent, PageContext, StateManager};
use crate::storage::{GuardedStore, PreferenceChange, PreferenceStore};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Keyboard command bound to [`EngineCommand::ToggleAudioMode`].
pub const TOGGLE_COMMAND: &str = "toggle-mode";

/// Mailbox capacity.
const MAILBOX_CAPACITY: usize = 100;

/// Messages collaborators send to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    ToggleAudioMode,
    ModeChanged(OperatingMode),
    UpdateTheme(BackgroundTheme),
    UpdateLanguage(String),
    GetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineResponse {
    Ack,
    Status(EngineStatus),
}

impl EngineResponse {
    /// What a sender assumes when the engine does not answer in time.
    pub fn fallback_for(command: &EngineCommand) -> Self {
        match command {
            EngineCommand::ToggleAudioMode | EngineCommand::GetStatus => {
                EngineResponse::Status(EngineStatus::default())
            }
            _ => EngineResponse::Ack,
        }
    }
}

/// Errors returned to command senders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine is not running")]
    Closed,

    #[error("Engine did not reply within {0:?}")]
    Timeout(Duration),
}

enum Message {
    Command {
        command: EngineCommand,
        reply: oneshot::Sender<EngineResponse>,
    },
    Navigated(NavigationNotice),
}

/// Not-yet-started engine.
pub struct Engine {
    host: Host,
    store: Arc<dyn PreferenceStore>,
    config: EngineConfig,
    clock: Clock,
}

impl Engine {
    pub fn new(host: Host, store: Arc<dyn PreferenceStore>, config: EngineConfig) -> Self {
        Self {
            host,
            store,
            config,
            clock: local_clock(),
        }
    }

    /// Replace the calendar used to file usage counters.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the observer and the actor loop on the current tokio runtime.
    ///
    /// # Returns
    /// A handle for sending commands and navigation signals
    pub fn start(self) -> EngineHandle {
        let metrics = Arc::new(Metrics::new());
        let state = StateManager::new();
        let page_ctx = Arc::new(PageContext::new());
        let extractor = Arc::new(VideoInfoExtractor::new());
        let store = Arc::new(GuardedStore::new(self.store, metrics.clone()));

        let enforcer = QualityEnforcer::new(
            self.host.page.clone(),
            page_ctx.clone(),
            state.clone(),
            store.clone(),
            self.config.clone(),
            metrics.clone(),
        );
        let coordinator =
            QualityCoordinator::new(enforcer, state.clone(), metrics.clone(), &self.config);
        let reconciler = Arc::new(ModeReconciler::new(
            self.host.clone(),
            page_ctx.clone(),
            state.clone(),
            store.clone(),
            extractor.clone(),
            coordinator,
            self.config.clone(),
            metrics.clone(),
            self.clock,
        ));

        let initial_mode = store.mode();
        state.update(|state| state.current_operating_mode = initial_mode);
        tracing::info!("Engine starting in {} mode", initial_mode);

        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let observer = PageObserver::new(
            self.host.page.clone(),
            page_ctx,
            extractor,
            self.config.navigation_settle(),
            self.config.navigation_poll(),
            metrics.clone(),
        );
        let navigation_tx = mailbox_tx.clone();
        let observer_task = observer.spawn(signal_rx, move |notice| {
            match navigation_tx.try_send(Message::Navigated(notice)) {
                Ok(_) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Engine mailbox full - dropping navigation, polling will retry");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!("Failed to deliver navigation - engine has stopped");
                }
            }
        });

        let actor_task = tokio::spawn(run_actor(
            reconciler,
            mailbox_rx,
            store.subscribe(),
            shutdown_rx,
        ));

        EngineHandle {
            mailbox: mailbox_tx,
            signals: signal_tx,
            state,
            metrics,
            shutdown: Arc::new(shutdown_tx),
            tasks: Arc::new(Mutex::new(Some(EngineTasks {
                observer: observer_task,
                actor: actor_task,
            }))),
            command_timeout: self.config.command_timeout(),
        }
    }
}

async fn run_actor(
    reconciler: Arc<ModeReconciler<QualityEnforcer>>,
    mut mailbox: mpsc::Receiver<Message>,
    mut preferences: broadcast::Receiver<PreferenceChange>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Engine actor started");
    let mut preferences_open = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::debug!("Engine shutdown requested");
                break;
            }
            message = mailbox.recv() => match message {
                Some(Message::Command { command, reply }) => {
                    let response = handle_command(&reconciler, command);
                    // The sender may have timed out already
                    let _ = reply.send(response);
                }
                Some(Message::Navigated(notice)) => {
                    let reconciler = reconciler.clone();
                    tokio::spawn(async move { reconciler.handle_navigation(notice).await });
                }
                None => break,
            },
            change = preferences.recv(), if preferences_open => match change {
                Ok(change) => {
                    let reconciler = reconciler.clone();
                    tokio::spawn(async move { reconciler.handle_preference_change(change).await });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} preference changes, re-reading mode", skipped);
                    let reconciler = reconciler.clone();
                    tokio::spawn(async move {
                        let mode = reconciler.stored_mode();
                        reconciler.reconcile(mode).await;
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Preference store closed its change feed");
                    preferences_open = false;
                }
            },
        }
    }

    reconciler.coordinator().cancel_pending();
    reconciler.disable();
    tracing::debug!("Engine actor stopped");
}

fn handle_command(
    reconciler: &Arc<ModeReconciler<QualityEnforcer>>,
    command: EngineCommand,
) -> EngineResponse {
    tracing::debug!("Engine command: {:?}", command);
    match command {
        EngineCommand::ToggleAudioMode => EngineResponse::Status(reconciler.toggle()),
        EngineCommand::ModeChanged(mode) => {
            reconciler.record_mode(mode);
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.reconcile(mode).await });
            EngineResponse::Ack
        }
        EngineCommand::UpdateTheme(theme) => {
            reconciler.update_theme(theme);
            EngineResponse::Ack
        }
        EngineCommand::UpdateLanguage(language) => {
            reconciler.update_language(language);
            EngineResponse::Ack
        }
        EngineCommand::GetStatus => EngineResponse::Status(reconciler.status()),
    }
}

struct EngineTasks {
    observer: JoinHandle<()>,
    actor: JoinHandle<()>,
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    mailbox: mpsc::Sender<Message>,
    signals: mpsc::Sender<NavigationSignal>,
    state: StateManager,
    metrics: Arc<Metrics>,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Arc<Mutex<Option<EngineTasks>>>,
    command_timeout: Duration,
}

impl EngineHandle {
    /// Send a command and wait for the reply.
    ///
    /// # Errors
    /// `Closed` if the engine stopped, `Timeout` if it did not answer in time
    pub async fn send(&self, command: EngineCommand) -> Result<EngineResponse, EngineError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(Message::Command { command, reply })
            .await
            .map_err(|_| EngineError::Closed)?;

        match tokio::time::timeout(self.command_timeout, response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(EngineError::Closed),
            Err(_) => Err(EngineError::Timeout(self.command_timeout)),
        }
    }

    /// Like [`send`](Self::send), answering with a default on failure.
    pub async fn send_or_default(&self, command: EngineCommand) -> EngineResponse {
        let fallback = EngineResponse::fallback_for(&command);
        match self.send(command).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("{}, using default response", e);
                fallback
            }
        }
    }

    pub async fn status(&self) -> EngineStatus {
        match self.send_or_default(EngineCommand::GetStatus).await {
            EngineResponse::Status(status) => status,
            EngineResponse::Ack => EngineStatus::default(),
        }
    }

    /// Dispatch a global keyboard command by name.
    ///
    /// # Returns
    /// `None` if the command is not bound to anything
    pub async fn keyboard_command(&self, name: &str) -> Option<EngineResponse> {
        if name != TOGGLE_COMMAND {
            tracing::debug!("Ignoring unknown keyboard command '{}'", name);
            return None;
        }
        Some(self.send_or_default(EngineCommand::ToggleAudioMode).await)
    }

    /// Feed a navigation signal to the page observer.
    pub fn signal(&self, signal: NavigationSignal) {
        match self.signals.try_send(signal) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Navigation signal channel full - skipping signal");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Failed to send navigation signal - observer has stopped");
            }
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Stop the observer and the actor, leaving the page out of audio mode.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner).take();

        if let Some(tasks) = tasks {
            tasks.observer.abort();
            let mut actor = tasks.actor;
            if tokio::time::timeout(self.command_timeout, &mut actor).await.is_err() {
                tracing::warn!("Engine actor did not stop in time, aborting");
                actor.abort();
            }
        }

        self.metrics.log_summary();
    }
}
