//! Interactive arbitration of incoming proposals
//!
//! Two proposal shapes share one concurrency pattern: a blocking question
//! to the operator raced against a watcher for a state change on the same
//! session. Whichever finishes first wins and the loser is cancelled, so a
//! remote party hanging up mid-question abandons the proposal without any
//! command being issued. Acceptance of a new session additionally runs
//! under a deadline; an engine that cannot complete the accept in time gets
//! the session terminated instead of a hung client.
//!
//! Every proposal is a fresh instance reaching exactly one terminal
//! [`ProposalOutcome`]; there are no retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::console::CTRL_D;
use crate::engine::{SessionId, SipAddress, StreamInfo, StreamKind};
use crate::events::EngineEvent;
use crate::manager::SessionManager;
use crate::session::{CallDirection, SessionContext, SessionController, Stream};

/// Terminal states of one proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// The operator accepted and the engine confirmed in time
    Accepted,
    /// The operator declined, or the engine could not complete the accept
    Rejected,
    /// The remote party cancelled while the question was pending
    Abandoned,
    /// The accept deadline elapsed; the session was terminated
    TimedOut,
}

/// Mediates incoming-session and stream-add proposals
pub struct ProposalArbiter {
    ctx: Arc<SessionContext>,
    manager: Arc<SessionManager>,
    accept_timeout: Duration,
}

impl ProposalArbiter {
    /// Create an arbiter using the given accept deadline
    pub fn new(
        ctx: Arc<SessionContext>,
        manager: Arc<SessionManager>,
        accept_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            manager,
            accept_timeout,
        })
    }

    /// Arbitrate a new incoming session
    ///
    /// `watcher` must be subscribed to the bus before the triggering event
    /// was dispatched, otherwise a racing cancellation could be missed.
    pub async fn handle_incoming(
        &self,
        mut watcher: broadcast::Receiver<EngineEvent>,
        session: SessionId,
        caller: SipAddress,
        streams: Vec<StreamInfo>,
    ) -> ProposalOutcome {
        let kinds: Vec<StreamKind> = streams.iter().map(|info| info.kind).collect();
        let has_chat = kinds.contains(&StreamKind::Chat);
        let has_audio = kinds.contains(&StreamKind::Audio);

        let mut answers = vec!['y', 'Y', 'n', 'N', CTRL_D];
        let mut answers_text = "y/n".to_string();
        if has_chat && has_audio {
            answers.extend(['a', 'A', 'c', 'C']);
            answers_text.push_str("/a/c");
        }
        let question = format!(
            "Incoming {} request from {}, do you accept? ({}) ",
            describe_offer(&streams),
            caller,
            answers_text
        );

        let answer = tokio::select! {
            answer = self.ctx.console.ask_question(&question, &answers) => {
                match answer {
                    Ok(key) => key,
                    Err(error) => {
                        tracing::debug!(%error, "question aborted, treating as decline");
                        'n'
                    }
                }
            }
            _ = wait_for_state_change(&mut watcher, session) => {
                tracing::debug!(%session, "remote cancelled while the question was pending");
                return ProposalOutcome::Abandoned;
            }
        };

        let chosen: Vec<StreamKind> = match answer {
            'a' | 'A' => kinds.into_iter().filter(|k| *k != StreamKind::Chat).collect(),
            'c' | 'C' => kinds.into_iter().filter(|k| *k != StreamKind::Audio).collect(),
            'y' | 'Y' => kinds,
            _ => {
                if let Err(error) = self.ctx.engine.end_session(session).await {
                    tracing::warn!(%session, %error, "end after decline failed");
                }
                return ProposalOutcome::Rejected;
            }
        };

        match timeout(
            self.accept_timeout,
            self.ctx.engine.accept_session(session, chosen.clone()),
        )
        .await
        {
            Ok(Ok(())) => {
                let accepted: Vec<Stream> = streams
                    .into_iter()
                    .filter(|info| chosen.contains(&info.kind))
                    .map(Stream::from)
                    .collect();
                let controller = SessionController::new(
                    self.ctx.clone(),
                    session,
                    caller,
                    CallDirection::Incoming,
                    accepted,
                );
                self.manager.add(controller, true);
                ProposalOutcome::Accepted
            }
            Ok(Err(error)) => {
                tracing::warn!(%session, %error, "accept failed");
                if let Err(error) = self.ctx.engine.end_session(session).await {
                    tracing::warn!(%session, %error, "end after failed accept failed");
                }
                ProposalOutcome::Rejected
            }
            Err(_) => {
                self.ctx
                    .console
                    .print("Timed out while accepting the session");
                if let Err(error) = self.ctx.engine.end_session(session).await {
                    tracing::warn!(%session, %error, "end after accept timeout failed");
                }
                ProposalOutcome::TimedOut
            }
        }
    }

    /// Arbitrate a stream-add proposal from the remote party
    pub async fn handle_stream_proposal(
        &self,
        mut watcher: broadcast::Receiver<EngineEvent>,
        session: Arc<SessionController>,
        streams: Vec<StreamKind>,
    ) -> ProposalOutcome {
        let titles: Vec<&str> = streams.iter().map(|kind| kind.title()).collect();
        let question = format!(
            "{} wants to add {}, do you accept? (y/n) ",
            session.remote_party(),
            titles.join("/")
        );
        let answers = ['y', 'Y', 'n', 'N', CTRL_D];

        let answer = tokio::select! {
            answer = self.ctx.console.ask_question(&question, &answers) => {
                answer.unwrap_or('n')
            }
            _ = wait_for_state_change(&mut watcher, session.id()) => {
                tracing::debug!(session = %session.id(), "proposal overtaken by state change");
                return ProposalOutcome::Abandoned;
            }
        };

        if matches!(answer, 'y' | 'Y') {
            if let Err(error) = self
                .ctx
                .engine
                .accept_proposal(session.id(), streams)
                .await
            {
                tracing::warn!(session = %session.id(), %error, "proposal accept failed");
                return ProposalOutcome::Rejected;
            }
            ProposalOutcome::Accepted
        } else {
            if let Err(error) = self
                .ctx
                .engine
                .reject_proposal(session.id(), "Proposal rejected by user")
                .await
            {
                tracing::warn!(session = %session.id(), %error, "proposal reject failed");
            }
            ProposalOutcome::Rejected
        }
    }
}

/// Resolve once the watched session reports a state change
async fn wait_for_state_change(
    rx: &mut broadcast::Receiver<EngineEvent>,
    session: SessionId,
) {
    loop {
        match rx.recv().await {
            Ok(EngineEvent::SessionChangedState { session: changed, .. })
                if changed == session =>
            {
                return;
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "state watcher lagged behind the bus");
                continue;
            }
            // Bus gone; nothing will ever fire, stay pending so the
            // question branch decides the outcome.
            Err(broadcast::error::RecvError::Closed) => {
                std::future::pending::<()>().await;
            }
        }
    }
}

fn describe_offer(streams: &[StreamInfo]) -> String {
    if streams.is_empty() {
        return "session".to_string();
    }
    streams
        .iter()
        .map(|info| match &info.selector {
            Some(selector) => selector.to_string(),
            None => info.kind.title().to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}
