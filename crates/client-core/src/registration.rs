//! Registration tracking and registration-aware shutdown
//!
//! [`RegistrationTracker`] follows the account registration events on the
//! bus and keeps the set of accounts currently registered. Its only other
//! job is [`unregister_all`](RegistrationTracker::unregister_all): ask the
//! account layer to stop, then wait (briefly) until a failed/ended event
//! has arrived for every tracked account, so shutdown does not leave stale
//! registrations behind. The wait is best-effort; an expired deadline means
//! shutdown proceeds anyway.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;

use crate::engine::{AccountId, SignalingEngine};
use crate::events::{EngineEvent, EventBus};

/// Default bound on the shutdown drain
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Tracks which accounts hold an active registration
pub struct RegistrationTracker {
    engine: Arc<dyn SignalingEngine>,
    bus: EventBus,
    accounts: Mutex<HashSet<AccountId>>,
    drain_timeout: Duration,
}

impl RegistrationTracker {
    /// Create a tracker with the default drain deadline
    pub fn new(engine: Arc<dyn SignalingEngine>, bus: EventBus) -> Self {
        Self::with_drain_timeout(engine, bus, DRAIN_TIMEOUT)
    }

    /// Create a tracker with a custom drain deadline
    pub fn with_drain_timeout(
        engine: Arc<dyn SignalingEngine>,
        bus: EventBus,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            bus,
            accounts: Mutex::new(HashSet::new()),
            drain_timeout,
        }
    }

    /// Update the tracked set from a registration event
    pub fn handle_event(&self, event: &EngineEvent) {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        match event {
            EngineEvent::AccountRegistrationDidSucceed { account, .. } => {
                accounts.insert(account.clone());
            }
            EngineEvent::AccountRegistrationDidFail { account, .. }
            | EngineEvent::AccountRegistrationDidEnd { account, .. } => {
                accounts.remove(account);
            }
            _ => {}
        }
    }

    /// Accounts currently registered
    pub fn registered_accounts(&self) -> Vec<AccountId> {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn is_drained(&self) -> bool {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Stop the account layer and drain the tracked set
    ///
    /// Subscribes before issuing the stop request so no confirmation event
    /// can slip by. On deadline expiry the remaining accounts are logged
    /// and shutdown proceeds; this is not a failure.
    pub async fn unregister_all(&self) {
        let mut rx = self.bus.subscribe();
        if let Err(error) = self.engine.stop_accounts().await {
            tracing::warn!(%error, "account layer stop request failed");
        }
        let drained = timeout(self.drain_timeout, async {
            while !self.is_drained() {
                match rx.recv().await {
                    Ok(event) => self.handle_event(&event),
                    Err(_) => break,
                }
            }
        })
        .await;
        if drained.is_err() {
            let left = self.registered_accounts();
            tracing::debug!(?left, "unregister drain deadline expired, proceeding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockEngine;
    use std::time::Instant;

    fn account(name: &str) -> AccountId {
        AccountId(format!("{}@example.com", name))
    }

    fn succeeded(name: &str) -> EngineEvent {
        EngineEvent::AccountRegistrationDidSucceed {
            account: account(name),
            contact: format!("sip:{}@192.0.2.1:5060", name),
            expires: 600,
        }
    }

    fn ended(name: &str) -> EngineEvent {
        EngineEvent::AccountRegistrationDidEnd {
            account: account(name),
            code: Some(200),
            reason: None,
        }
    }

    #[tokio::test]
    async fn tracks_registration_lifecycle() {
        let bus = EventBus::new(16);
        let tracker = RegistrationTracker::new(Arc::new(MockEngine::new()), bus);

        tracker.handle_event(&succeeded("alice"));
        tracker.handle_event(&succeeded("bob"));
        assert_eq!(tracker.registered_accounts().len(), 2);

        tracker.handle_event(&ended("alice"));
        assert_eq!(tracker.registered_accounts(), vec![account("bob")]);

        tracker.handle_event(&EngineEvent::AccountRegistrationDidFail {
            account: account("bob"),
            reason: "401 Unauthorized".to_string(),
            retry_in: Some(Duration::from_secs(30)),
        });
        assert!(tracker.registered_accounts().is_empty());
    }

    #[tokio::test]
    async fn unregister_drains_as_events_arrive() {
        let bus = EventBus::new(16);
        let engine = Arc::new(MockEngine::new());
        let tracker = Arc::new(RegistrationTracker::with_drain_timeout(
            engine.clone(),
            bus.clone(),
            Duration::from_secs(5),
        ));
        tracker.handle_event(&succeeded("alice"));

        let emitter = {
            let bus = bus.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                bus.emit(ended("alice"));
            })
        };

        let started = Instant::now();
        tracker.unregister_all().await;
        emitter.await.unwrap();

        assert!(tracker.registered_accounts().is_empty());
        // Returned on the event, well before the 5 second deadline.
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(engine
            .commands()
            .iter()
            .any(|cmd| cmd == "stop_accounts"));
    }

    #[tokio::test]
    async fn unregister_proceeds_on_deadline_expiry() {
        let bus = EventBus::new(16);
        let tracker = RegistrationTracker::with_drain_timeout(
            Arc::new(MockEngine::new()),
            bus,
            Duration::from_millis(50),
        );
        tracker.handle_event(&succeeded("alice"));

        // Nobody confirms; the call still returns.
        tracker.unregister_all().await;
        assert_eq!(tracker.registered_accounts(), vec![account("alice")]);
    }
}
