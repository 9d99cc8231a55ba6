//! Exceed-event handling: count the violation, escalate, and tell the member.

use super::gateway::{send_dm, ModerationGateway};
use super::punishment::{calculate_warnings_until_next, PunishmentEngine, PunishmentOutcome};
use super::tracker::ViolationTracker;
use crate::error::ModerationResult;
use crate::shared::ViolationRecord;
use crate::store::{SettingsStore, ViolationStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info};

const TOO_LOUD_MESSAGE: &str = "You're too loud. Please lower your volume.";

/// One speaker crossing the loudness threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceedEvent {
    pub user_id: String,
    pub guild_id: String,
    pub rms: f64,
    pub timestamp: DateTime<Utc>,
}

/// What handling an exceed event produced.
#[derive(Debug, Clone, PartialEq)]
pub struct HandledExceed {
    /// Record as stored after punishment.
    pub record: ViolationRecord,
    pub outcome: PunishmentOutcome,
}

/// Runs the full exceed pipeline, serialized per (guild, user).
pub struct ExceedHandler {
    settings: Arc<dyn SettingsStore>,
    violations: Arc<dyn ViolationStore>,
    gateway: Arc<dyn ModerationGateway>,
    tracker: ViolationTracker,
    engine: PunishmentEngine,
    member_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ExceedHandler {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        violations: Arc<dyn ViolationStore>,
        gateway: Arc<dyn ModerationGateway>,
    ) -> Self {
        Self {
            tracker: ViolationTracker::new(violations.clone()),
            engine: PunishmentEngine::new(gateway.clone(), violations.clone()),
            settings,
            violations,
            gateway,
            member_locks: DashMap::new(),
        }
    }

    pub fn tracker(&self) -> &ViolationTracker {
        &self.tracker
    }

    /// Handles one event. Returns `Ok(None)` when the member has left the guild;
    /// the violation is still counted in that case.
    pub async fn handle(&self, event: &ExceedEvent) -> ModerationResult<Option<HandledExceed>> {
        let key = ViolationRecord::store_key(&event.guild_id, &event.user_id);
        let lock = self
            .member_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.handle_locked(event).await
        };

        drop(lock);
        self.member_locks
            .remove_if(&key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn handle_locked(&self, event: &ExceedEvent) -> ModerationResult<Option<HandledExceed>> {
        let settings = self.settings.load_or_create_settings(&event.guild_id).await?;
        let mut record = self
            .tracker
            .record_exceed_at(&event.user_id, &event.guild_id, &settings, event.timestamp)
            .await?;

        info!(
            target: "volguard::moderation",
            user_id = %event.user_id,
            guild_id = %event.guild_id,
            rms = event.rms,
            violations = record.violations_count,
            "volume violation recorded"
        );

        let Some(member) = self.gateway.fetch_member(&event.guild_id, &event.user_id).await? else {
            info!(
                target: "volguard::moderation",
                user_id = %event.user_id,
                guild_id = %event.guild_id,
                "member no longer in guild, skipping punishment"
            );
            return Ok(None);
        };

        let outcome = self
            .engine
            .apply_next_punishment(&member, &mut record, &settings)
            .await?;

        let record = self.violations.reload_violation(&record).await?;
        let text = match calculate_warnings_until_next(
            record.violations_count,
            record.punishment_status,
            record.exempt,
            &settings,
        ) {
            Some(warnings) => format!("{TOO_LOUD_MESSAGE}\n{warnings}"),
            None => TOO_LOUD_MESSAGE.to_string(),
        };
        send_dm(self.gateway.as_ref(), &member, &text).await;

        Ok(Some(HandledExceed { record, outcome }))
    }
}

/// Consumes exceed events until the sender side closes. Events for different
/// members run concurrently; failures are logged per event.
pub async fn run_exceed_loop(mut events: mpsc::UnboundedReceiver<ExceedEvent>, handler: Arc<ExceedHandler>) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            next = events.recv() => match next {
                Some(event) => {
                    let handler = handler.clone();
                    tasks.spawn(async move {
                        if let Err(e) = handler.handle(&event).await {
                            error!(
                                target: "volguard::moderation",
                                user_id = %event.user_id,
                                guild_id = %event.guild_id,
                                error = %e,
                                "Error handling threshold exceeded"
                            );
                        }
                    });
                }
                None => break,
            },
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }
    while tasks.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::GuildSettings;
    use crate::shared::{PunishmentKind, PunishmentStatus};
    use crate::error::ModerationError;
    use crate::store::SledModerationStore;
    use crate::test_support::RecordingGateway;

    fn event(user_id: &str) -> ExceedEvent {
        ExceedEvent {
            user_id: user_id.to_string(),
            guild_id: "g1".to_string(),
            rms: 9_000.0,
            timestamp: Utc::now(),
        }
    }

    fn handler(gateway: RecordingGateway) -> (Arc<ExceedHandler>, Arc<RecordingGateway>, Arc<SledModerationStore>) {
        let gateway = Arc::new(gateway);
        let store = Arc::new(SledModerationStore::temporary().unwrap());
        let handler = ExceedHandler::new(store.clone(), store.clone(), gateway.clone());
        (Arc::new(handler), gateway, store)
    }

    #[tokio::test]
    async fn fifth_exceed_mutes_and_warns() {
        let (handler, gateway, _) = handler(RecordingGateway::permissive());

        for _ in 0..4 {
            let handled = handler.handle(&event("u1")).await.unwrap().unwrap();
            assert_eq!(handled.outcome, PunishmentOutcome::NoEscalation);
        }
        let handled = handler.handle(&event("u1")).await.unwrap().unwrap();
        assert_eq!(handled.outcome, PunishmentOutcome::Applied(PunishmentKind::Mute));
        assert_eq!(handled.record.punishment_status, PunishmentStatus::Muted);
        assert_eq!(handled.record.violations_count, 5);

        let dms = gateway.dms();
        assert_eq!(
            dms[0],
            "You're too loud. Please lower your volume.\nYou have 4 more warnings until a server mute."
        );
        assert_eq!(
            dms.last().unwrap(),
            "You're too loud. Please lower your volume.\nYou have 2 more warnings until a server timeout."
        );
    }

    #[tokio::test]
    async fn creates_default_settings_for_new_guild() {
        let (handler, _, store) = handler(RecordingGateway::permissive());
        handler.handle(&event("u1")).await.unwrap();
        let settings = store.get_settings("g1").await.unwrap().unwrap();
        assert_eq!(settings, GuildSettings::new("g1"));
    }

    #[tokio::test]
    async fn departed_member_is_counted_but_not_punished() {
        let mut gateway = RecordingGateway::permissive();
        gateway.member_present = false;
        let (handler, gateway, store) = handler(gateway);

        assert!(handler.handle(&event("u1")).await.unwrap().is_none());
        assert!(gateway.calls().is_empty());
        let record = store.get_violation("u1", "g1").await.unwrap().unwrap();
        assert_eq!(record.violations_count, 1);
    }

    #[tokio::test]
    async fn exempt_member_gets_plain_notice() {
        let (handler, gateway, _) = handler(RecordingGateway::permissive());
        handler.tracker().set_exempt("u1", "g1", true).await.unwrap();

        let handled = handler.handle(&event("u1")).await.unwrap().unwrap();
        assert_eq!(handled.outcome, PunishmentOutcome::Exempt);
        assert_eq!(gateway.dms(), vec!["You're too loud. Please lower your volume."]);
    }

    #[tokio::test]
    async fn concurrent_events_for_one_member_are_all_counted() {
        let (handler, _, store) = handler(RecordingGateway::permissive());
        let mut tasks = JoinSet::new();
        for _ in 0..12 {
            let handler = handler.clone();
            tasks.spawn(async move { handler.handle(&event("u1")).await.map(|_| ()) });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let record = store.get_violation("u1", "g1").await.unwrap().unwrap();
        assert_eq!(record.violations_count, 12);
        assert_eq!(record.punishment_status, PunishmentStatus::TimedOut);
        assert!(handler.member_locks.is_empty());
    }

    #[tokio::test]
    async fn loop_drains_until_sender_closes() {
        let (handler, _, store) = handler(RecordingGateway::permissive());
        let (tx, rx) = mpsc::unbounded_channel();
        for user in ["u1", "u2", "u1"] {
            tx.send(event(user)).unwrap();
        }
        drop(tx);

        run_exceed_loop(rx, handler).await;

        assert_eq!(store.get_violation("u1", "g1").await.unwrap().unwrap().violations_count, 2);
        assert_eq!(store.get_violation("u2", "g1").await.unwrap().unwrap().violations_count, 1);
    }

    /// Violation store whose writes fail for one member.
    struct BrokenDiskFor {
        user_id: &'static str,
        inner: SledModerationStore,
    }

    #[async_trait::async_trait]
    impl ViolationStore for BrokenDiskFor {
        async fn get_violation(
            &self,
            user_id: &str,
            guild_id: &str,
        ) -> ModerationResult<Option<ViolationRecord>> {
            self.inner.get_violation(user_id, guild_id).await
        }

        async fn create_violation(
            &self,
            user_id: &str,
            guild_id: &str,
        ) -> ModerationResult<ViolationRecord> {
            let record = ViolationRecord::new(user_id, guild_id);
            self.save_violation(&record).await?;
            Ok(record)
        }

        async fn save_violation(&self, record: &ViolationRecord) -> ModerationResult<()> {
            if record.user_id == self.user_id {
                let io = std::io::Error::new(std::io::ErrorKind::Other, "no space left on device");
                return Err(ModerationError::Store(sled::Error::Io(io)));
            }
            self.inner.save_violation(record).await
        }
    }

    fn handler_with_broken_disk(user_id: &'static str) -> (Arc<ExceedHandler>, Arc<RecordingGateway>, SledModerationStore) {
        let store = SledModerationStore::temporary().unwrap();
        let gateway = Arc::new(RecordingGateway::permissive());
        let violations = Arc::new(BrokenDiskFor { user_id, inner: store.clone() });
        let handler = ExceedHandler::new(Arc::new(store.clone()), violations, gateway.clone());
        (Arc::new(handler), gateway, store)
    }

    #[tokio::test]
    async fn store_failure_is_returned_before_any_gateway_call() {
        let (handler, gateway, store) = handler_with_broken_disk("u-bad");

        let result = handler.handle(&event("u-bad")).await;
        assert!(matches!(result, Err(ModerationError::Store(_))));
        assert!(gateway.calls().is_empty());
        assert!(store.get_violation("u-bad", "g1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn loop_keeps_counting_others_after_store_failure() {
        let (handler, gateway, store) = handler_with_broken_disk("u-bad");
        let (tx, rx) = mpsc::unbounded_channel();
        for user in ["u-bad", "u-good", "u-bad"] {
            tx.send(event(user)).unwrap();
        }
        drop(tx);

        run_exceed_loop(rx, handler).await;

        assert!(store.get_violation("u-bad", "g1").await.unwrap().is_none());
        let good = store.get_violation("u-good", "g1").await.unwrap().unwrap();
        assert_eq!(good.violations_count, 1);
        assert_eq!(gateway.dms().len(), 1);
    }
}
