//! Violation accumulation with reset-window expiry.

use crate::error::ModerationResult;
use crate::settings::GuildSettings;
use crate::shared::{PunishmentStatus, ViolationRecord};
use crate::store::ViolationStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Loads, resets, increments and persists violation records.
pub struct ViolationTracker {
    store: Arc<dyn ViolationStore>,
}

impl ViolationTracker {
    pub fn new(store: Arc<dyn ViolationStore>) -> Self {
        Self { store }
    }

    /// Records one exceed event for (user, guild) at the current time.
    pub async fn record_exceed(
        &self,
        user_id: &str,
        guild_id: &str,
        settings: &GuildSettings,
    ) -> ModerationResult<ViolationRecord> {
        self.record_exceed_at(user_id, guild_id, settings, Utc::now()).await
    }

    /// Records one exceed event at `now`.
    ///
    /// When resets are enabled and the previous violation is older than the
    /// reset window, count and punishment status start over before the new
    /// event is counted. `exempt` is never touched.
    pub async fn record_exceed_at(
        &self,
        user_id: &str,
        guild_id: &str,
        settings: &GuildSettings,
        now: DateTime<Utc>,
    ) -> ModerationResult<ViolationRecord> {
        let mut record = match self.store.get_violation(user_id, guild_id).await? {
            Some(record) => record,
            None => self.store.create_violation(user_id, guild_id).await?,
        };

        if settings.violation_reset_enabled
            && now - record.last_violation_at > settings.violation_reset.as_duration()
        {
            info!(
                target: "volguard::moderation",
                user_id,
                guild_id,
                previous_count = record.violations_count,
                "violation window expired, resetting record"
            );
            record.violations_count = 0;
            record.punishment_status = PunishmentStatus::None;
        }

        record.violations_count = record.violations_count.saturating_add(1);
        record.last_violation_at = now;
        self.store.save_violation(&record).await?;
        Ok(record)
    }

    /// Sets the exemption flag, creating the record if the member has none.
    pub async fn set_exempt(
        &self,
        user_id: &str,
        guild_id: &str,
        exempt: bool,
    ) -> ModerationResult<ViolationRecord> {
        let mut record = match self.store.get_violation(user_id, guild_id).await? {
            Some(record) => record,
            None => self.store.create_violation(user_id, guild_id).await?,
        };
        record.exempt = exempt;
        self.store.save_violation(&record).await?;
        info!(target: "volguard::moderation", user_id, guild_id, exempt, "exemption updated");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledModerationStore;
    use chrono::Duration;

    fn tracker() -> (ViolationTracker, Arc<SledModerationStore>) {
        let store = Arc::new(SledModerationStore::temporary().unwrap());
        (ViolationTracker::new(store.clone()), store)
    }

    #[tokio::test]
    async fn first_exceed_creates_record_with_count_one() {
        let (tracker, store) = tracker();
        let settings = GuildSettings::new("g1");
        let record = tracker.record_exceed("u1", "g1", &settings).await.unwrap();
        assert_eq!(record.violations_count, 1);
        assert_eq!(record.punishment_status, PunishmentStatus::None);
        assert!(!record.exempt);

        let stored = store.get_violation("u1", "g1").await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn expired_window_resets_count_and_status() {
        let (tracker, store) = tracker();
        let settings = GuildSettings::new("g1"); // 1 day window
        let now = Utc::now();

        let mut old = ViolationRecord::new("u1", "g1");
        old.violations_count = 6;
        old.punishment_status = PunishmentStatus::Muted;
        old.exempt = true;
        old.last_violation_at = now - Duration::hours(25);
        store.save_violation(&old).await.unwrap();

        let record = tracker.record_exceed_at("u1", "g1", &settings, now).await.unwrap();
        assert_eq!(record.violations_count, 1);
        assert_eq!(record.punishment_status, PunishmentStatus::None);
        assert!(record.exempt, "reset leaves exemption alone");
        assert_eq!(record.last_violation_at, now);
    }

    #[tokio::test]
    async fn recent_violation_increments_without_reset() {
        let (tracker, store) = tracker();
        let settings = GuildSettings::new("g1");
        let now = Utc::now();

        let mut recent = ViolationRecord::new("u1", "g1");
        recent.violations_count = 2;
        recent.punishment_status = PunishmentStatus::Muted;
        recent.last_violation_at = now - Duration::seconds(1);
        store.save_violation(&recent).await.unwrap();

        let record = tracker.record_exceed_at("u1", "g1", &settings, now).await.unwrap();
        assert_eq!(record.violations_count, 3);
        assert_eq!(record.punishment_status, PunishmentStatus::Muted);
    }

    #[tokio::test]
    async fn disabled_reset_keeps_accumulating() {
        let (tracker, store) = tracker();
        let mut settings = GuildSettings::new("g1");
        settings.violation_reset_enabled = false;
        let now = Utc::now();

        let mut old = ViolationRecord::new("u1", "g1");
        old.violations_count = 4;
        old.last_violation_at = now - Duration::days(30);
        store.save_violation(&old).await.unwrap();

        let record = tracker.record_exceed_at("u1", "g1", &settings, now).await.unwrap();
        assert_eq!(record.violations_count, 5);
    }

    #[tokio::test]
    async fn set_exempt_creates_missing_record() {
        let (tracker, store) = tracker();
        let record = tracker.set_exempt("u9", "g1", true).await.unwrap();
        assert!(record.exempt);
        assert_eq!(record.violations_count, 0);
        assert!(store.get_violation("u9", "g1").await.unwrap().unwrap().exempt);
    }
}
