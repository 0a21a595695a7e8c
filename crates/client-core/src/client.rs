//! Client composition root and event dispatch
//!
//! [`Client`] wires every component together and owns the one dispatch
//! task that drains the event bus. Handlers run to completion in emission
//! order; only proposal arbitration is spawned off as sibling tasks, with
//! their state-change watchers subscribed synchronously inside the
//! dispatch turn so a racing cancellation can never be missed.
//!
//! Nothing here is a singleton. Construct a [`Client`], call
//! [`start`](Client::start), and tear it down with
//! [`shutdown`](Client::shutdown).

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::arbiter::ProposalArbiter;
use crate::commands::CommandDispatcher;
use crate::config::Settings;
use crate::console::Console;
use crate::engine::SignalingEngine;
use crate::events::{EngineEvent, EventBus, SessionState};
use crate::manager::SessionManager;
use crate::registration::RegistrationTracker;
use crate::renderer::MessageRenderer;
use crate::reporter::Reporter;
use crate::session::SessionContext;
use crate::transfer::{FileTransferReassembler, TransferProgress};

/// The assembled orchestration layer
pub struct Client {
    bus: EventBus,
    manager: Arc<SessionManager>,
    arbiter: Arc<ProposalArbiter>,
    renderer: Arc<MessageRenderer>,
    reporter: Arc<Reporter>,
    registration: Arc<RegistrationTracker>,
    commands: Arc<CommandDispatcher>,
}

impl Client {
    /// Build the full component graph
    pub fn new(
        settings: Settings,
        engine: Arc<dyn SignalingEngine>,
        console: Arc<dyn Console>,
        bus: EventBus,
    ) -> Arc<Self> {
        let progress = TransferProgress::new();
        let ctx = Arc::new(SessionContext {
            engine: engine.clone(),
            console: console.clone(),
            progress: progress.clone(),
            history_root: settings.history_directory.clone(),
            local: settings.account.address(),
        });
        let manager = SessionManager::new(ctx.clone());
        let arbiter = ProposalArbiter::new(ctx.clone(), manager.clone(), settings.accept_timeout());
        let reassembler = Arc::new(FileTransferReassembler::new(
            settings.download_directory.clone(),
            console.clone(),
            progress.clone(),
        ));
        let renderer = MessageRenderer::new(
            console.clone(),
            manager.clone(),
            reassembler,
            progress,
        );
        let reporter = Reporter::new(console);
        let registration = Arc::new(RegistrationTracker::new(engine, bus.clone()));
        let commands = CommandDispatcher::new(ctx, manager.clone());

        Arc::new(Self {
            bus,
            manager,
            arbiter,
            renderer,
            reporter,
            registration,
            commands,
        })
    }

    /// Spawn the dispatch task draining the event bus
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let client = self.clone();
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => client.dispatch(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event dispatch lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Handle one engine event
    ///
    /// This is the dispatch table: one arm per event variant, each calling
    /// the component that declared interest in it.
    pub async fn dispatch(&self, event: EngineEvent) {
        match &event {
            EngineEvent::SessionNewIncoming {
                session,
                caller,
                streams,
            } => {
                // Subscribe inside this dispatch turn; a cancellation
                // emitted right after this event must reach the watcher.
                let watcher = self.bus.subscribe();
                let arbiter = self.arbiter.clone();
                let (session, caller, streams) = (*session, caller.clone(), streams.clone());
                tokio::spawn(async move {
                    let outcome = arbiter
                        .handle_incoming(watcher, session, caller, streams)
                        .await;
                    tracing::debug!(%session, ?outcome, "incoming session arbitrated");
                });
            }
            EngineEvent::SessionGotStreamProposal {
                session,
                proposer,
                streams,
            } => {
                if *proposer != crate::events::Originator::Remote {
                    return;
                }
                let Some(controller) = self.manager.find(*session) else {
                    tracing::debug!(session = %session, "proposal for an untracked session");
                    return;
                };
                let watcher = self.bus.subscribe();
                let arbiter = self.arbiter.clone();
                let streams = streams.clone();
                tokio::spawn(async move {
                    let outcome = arbiter
                        .handle_stream_proposal(watcher, controller, streams)
                        .await;
                    tracing::debug!(?outcome, "stream proposal arbitrated");
                });
            }
            EngineEvent::SessionChangedState { session, state } => {
                if let Some(controller) = self.manager.find(*session) {
                    controller.set_state(*state);
                }
                self.manager.update_prompt();
            }
            EngineEvent::SessionDidStart { session } => {
                if let Some(controller) = self.manager.find(*session) {
                    controller.mark_established();
                    self.reporter
                        .session_started(&controller.remote_party().to_string());
                }
                self.manager.update_prompt();
            }
            EngineEvent::SessionDidEnd {
                session,
                originator,
            } => {
                if let Some(controller) = self.manager.find(*session) {
                    controller.set_state(SessionState::Ended);
                    self.reporter
                        .session_ended(*originator, controller.established_duration());
                    controller.close_history();
                }
                self.manager.remove(*session);
            }
            EngineEvent::SessionDidFail {
                session,
                code,
                reason,
            } => {
                if let Some(controller) = self.manager.find(*session) {
                    controller.set_state(SessionState::Failed);
                    controller.close_history();
                }
                self.reporter.session_failed(*code, reason);
                self.manager.remove(*session);
            }
            EngineEvent::SessionGotStreamsUpdate { session, streams } => {
                if let Some(controller) = self.manager.find(*session) {
                    controller.set_streams(
                        streams.iter().cloned().map(Into::into).collect(),
                    );
                }
                self.manager.update_prompt();
            }
            EngineEvent::SessionGotHoldRequest { originator, .. } => {
                self.reporter.hold_changed(*originator, true);
            }
            EngineEvent::SessionGotUnholdRequest { originator, .. } => {
                self.reporter.hold_changed(*originator, false);
            }
            EngineEvent::ChatGotMessage {
                session,
                stream,
                chunk,
                sender,
                timestamp,
            } => {
                self.renderer
                    .on_chat_message(*session, *stream, chunk, sender.as_ref(), *timestamp);
            }
            EngineEvent::ChatDidDeliverMessage {
                stream, range_end, ..
            } => {
                self.renderer.on_message_delivered(*stream, *range_end);
            }
            EngineEvent::AccountRegistrationDidSucceed {
                account,
                contact,
                expires,
            } => {
                self.registration.handle_event(&event);
                self.reporter
                    .registration_succeeded(account, contact, *expires);
            }
            EngineEvent::AccountRegistrationDidFail {
                account,
                reason,
                retry_in,
            } => {
                self.registration.handle_event(&event);
                self.reporter
                    .registration_failed(account, reason, *retry_in);
            }
            EngineEvent::AccountRegistrationDidEnd { code, reason, .. } => {
                self.registration.handle_event(&event);
                self.reporter
                    .registration_ended(*code, reason.as_deref());
            }
        }
    }

    /// End every session, then drain registrations; both bounded
    pub async fn shutdown(&self) {
        self.manager.close().await;
        self.registration.unregister_all().await;
    }

    /// The session registry
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// The operator command surface
    pub fn commands(&self) -> &Arc<CommandDispatcher> {
        &self.commands
    }

    /// The registration tracker
    pub fn registration(&self) -> &Arc<RegistrationTracker> {
        &self.registration
    }
}
