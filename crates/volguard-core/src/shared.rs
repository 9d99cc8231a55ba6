//! Shared moderation types: punishment ladder and the durable violation record.

use crate::error::ModerationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Punishment high-water mark stored on a violation record.
///
/// Ordered by severity so `Muted < TimedOut < Kicked` holds for comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunishmentStatus {
    #[default]
    None = 0,
    Muted = 1,
    TimedOut = 2,
    Kicked = 3,
}

impl PunishmentStatus {
    /// Numeric severity rank (0–3).
    #[inline]
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Creates a status from its rank. Returns None if out of range.
    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Self::None),
            1 => Some(Self::Muted),
            2 => Some(Self::TimedOut),
            3 => Some(Self::Kicked),
            _ => None,
        }
    }

    /// Status used when looking for the next escalation step.
    ///
    /// A kick leaves nothing persistent behind once the member is gone, so a
    /// kicked member who rejoins is evaluated from the timeout level.
    pub fn escalation_base(&self) -> Self {
        match self {
            Self::Kicked => Self::TimedOut,
            other => *other,
        }
    }
}

/// A moderation action the bot can take against a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunishmentKind {
    Mute,
    Timeout,
    Kick,
}

impl PunishmentKind {
    /// All kinds, least severe first.
    pub const ALL: [Self; 3] = [Self::Mute, Self::Timeout, Self::Kick];

    /// Status recorded once this punishment has been applied.
    pub fn status(&self) -> PunishmentStatus {
        match self {
            Self::Mute => PunishmentStatus::Muted,
            Self::Timeout => PunishmentStatus::TimedOut,
            Self::Kick => PunishmentStatus::Kicked,
        }
    }

    #[inline]
    pub fn rank(&self) -> u8 {
        self.status().rank()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Timeout => "timeout",
            Self::Kick => "kick",
        }
    }

    /// Name used in member-facing warning messages.
    pub fn server_label(&self) -> &'static str {
        match self {
            Self::Mute => "server mute",
            Self::Timeout => "server timeout",
            Self::Kick => "server kick",
        }
    }
}

impl std::fmt::Display for PunishmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Durable violation record, unique per (user, guild).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub user_id: String,
    pub guild_id: String,
    /// Exceed events since the last reset.
    #[serde(default)]
    pub violations_count: u32,
    /// Time of the most recent recorded exceed event.
    pub last_violation_at: DateTime<Utc>,
    #[serde(default)]
    pub punishment_status: PunishmentStatus,
    /// Exempt members still accumulate violations but are never punished.
    #[serde(default)]
    pub exempt: bool,
}

impl ViolationRecord {
    /// Fresh record: no violations, no punishment, not exempt.
    pub fn new(user_id: impl Into<String>, guild_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            guild_id: guild_id.into(),
            violations_count: 0,
            last_violation_at: Utc::now(),
            punishment_status: PunishmentStatus::None,
            exempt: false,
        }
    }

    /// Store key: `{guild_id}/{user_id}`.
    pub fn store_key(guild_id: &str, user_id: &str) -> String {
        format!("{}/{}", guild_id, user_id)
    }

    pub fn key(&self) -> String {
        Self::store_key(&self.guild_id, &self.user_id)
    }

    pub fn to_bytes(&self) -> ModerationResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> ModerationResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
