//! volguard-core: guild settings, violation records and the punishment
//! escalation engine behind the voice volume monitor.
//!
//! Storage and the chat platform sit behind traits ([`SettingsStore`],
//! [`ViolationStore`], [`ModerationGateway`]) so the daemon and tests can plug
//! in their own implementations.

mod config;
mod error;
mod settings;
mod shared;
mod store;
pub mod moderation;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{AppConfig, DEFAULT_MAINTENANCE_THRESHOLD};
pub use error::{ModerationError, ModerationResult};
pub use settings::{
    rms_threshold_for_sensitivity, GuildSettings, PunishmentRule, ResetWindow,
    DEFAULT_KICK_THRESHOLD, DEFAULT_MUTE_THRESHOLD, DEFAULT_TIMEOUT_DURATION_MINUTES,
    DEFAULT_TIMEOUT_THRESHOLD, DEFAULT_VOLUME_SENSITIVITY, MIN_RMS_THRESHOLD,
    RMS_PER_SENSITIVITY_STEP,
};
pub use shared::{PunishmentKind, PunishmentStatus, ViolationRecord};
pub use store::{SettingsStore, SledModerationStore, ViolationStore};

pub use moderation::{
    calculate_warnings_until_next, next_punishment, run_exceed_loop, ExceedEvent, ExceedHandler,
    HandledExceed, Member, ModerationGateway, PunishmentEngine, PunishmentOutcome, ViolationTracker,
};
