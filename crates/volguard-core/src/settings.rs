//! Per-guild punishment settings and their validating writers.
//!
//! Thresholds of enabled punishments must be strictly increasing with severity
//! (mute < timeout < kick). Writers refuse changes that would break that
//! ordering; `repair` restores the default thresholds when a stored row is
//! already inconsistent.

use crate::error::{ModerationError, ModerationResult};
use crate::shared::PunishmentKind;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MUTE_THRESHOLD: u32 = 5;
pub const DEFAULT_TIMEOUT_THRESHOLD: u32 = 7;
pub const DEFAULT_KICK_THRESHOLD: u32 = 9;
pub const DEFAULT_TIMEOUT_DURATION_MINUTES: u32 = 5;
pub const DEFAULT_VOLUME_SENSITIVITY: u8 = 50;

/// RMS threshold at sensitivity 100 (most sensitive).
pub const MIN_RMS_THRESHOLD: f64 = 2_500.0;
/// RMS added per point of sensitivity below 100; sensitivity 0 maps to 12,500.
pub const RMS_PER_SENSITIVITY_STEP: f64 = 100.0;

/// Maps a 0–100 sensitivity to an RMS threshold. Out-of-range input is clamped.
pub fn rms_threshold_for_sensitivity(sensitivity: u8) -> f64 {
    let sensitivity = sensitivity.min(100);
    MIN_RMS_THRESHOLD + f64::from(100 - sensitivity) * RMS_PER_SENSITIVITY_STEP
}

fn default_true() -> bool {
    true
}

fn default_timeout_duration() -> u32 {
    DEFAULT_TIMEOUT_DURATION_MINUTES
}

fn default_volume_sensitivity() -> u8 {
    DEFAULT_VOLUME_SENSITIVITY
}

/// Enabled flag and activation threshold for one punishment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentRule {
    pub enabled: bool,
    /// Violation count at which this punishment activates.
    pub threshold: u32,
}

/// Violation reset window. Stored as separate units the way moderators set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResetWindow {
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
}

impl ResetWindow {
    /// Builds a window, carrying minutes into hours and hours into days.
    pub fn normalized(days: u32, hours: u32, minutes: u32) -> Self {
        let hours = u64::from(hours) + u64::from(minutes / 60);
        let days = u64::from(days) + hours / 24;
        Self {
            // saturates at u32::MAX days
            days: u32::try_from(days).unwrap_or(u32::MAX),
            hours: (hours % 24) as u32,
            minutes: minutes % 60,
        }
    }

    pub fn as_millis(&self) -> i64 {
        let minutes =
            i64::from(self.days) * 24 * 60 + i64::from(self.hours) * 60 + i64::from(self.minutes);
        minutes * 60_000
    }

    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.as_millis())
    }
}

impl std::fmt::Display for ResetWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} day(s), {} hour(s), {} minute(s)",
            self.days, self.hours, self.minutes
        )
    }
}

/// Punishment configuration for one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: String,
    pub mute: PunishmentRule,
    pub timeout: PunishmentRule,
    pub kick: PunishmentRule,
    #[serde(default = "default_timeout_duration")]
    pub timeout_duration_minutes: u32,
    #[serde(default)]
    pub violation_reset: ResetWindow,
    #[serde(default = "default_true")]
    pub violation_reset_enabled: bool,
    /// 0 = most permissive, 100 = most sensitive.
    #[serde(default = "default_volume_sensitivity")]
    pub volume_sensitivity: u8,
}

impl GuildSettings {
    /// Default row created the first time a guild is seen.
    pub fn new(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            mute: PunishmentRule { enabled: true, threshold: DEFAULT_MUTE_THRESHOLD },
            timeout: PunishmentRule { enabled: true, threshold: DEFAULT_TIMEOUT_THRESHOLD },
            kick: PunishmentRule { enabled: false, threshold: DEFAULT_KICK_THRESHOLD },
            timeout_duration_minutes: DEFAULT_TIMEOUT_DURATION_MINUTES,
            violation_reset: ResetWindow { days: 1, hours: 0, minutes: 0 },
            violation_reset_enabled: true,
            volume_sensitivity: DEFAULT_VOLUME_SENSITIVITY,
        }
    }

    pub fn rule(&self, kind: PunishmentKind) -> &PunishmentRule {
        match kind {
            PunishmentKind::Mute => &self.mute,
            PunishmentKind::Timeout => &self.timeout,
            PunishmentKind::Kick => &self.kick,
        }
    }

    fn rule_mut(&mut self, kind: PunishmentKind) -> &mut PunishmentRule {
        match kind {
            PunishmentKind::Mute => &mut self.mute,
            PunishmentKind::Timeout => &mut self.timeout,
            PunishmentKind::Kick => &mut self.kick,
        }
    }

    /// Enabled punishments with their thresholds, least severe first.
    pub fn enabled_punishments(&self) -> Vec<(PunishmentKind, u32)> {
        PunishmentKind::ALL
            .iter()
            .filter(|kind| self.rule(**kind).enabled)
            .map(|kind| (*kind, self.rule(*kind).threshold))
            .collect()
    }

    /// Checks that enabled thresholds strictly increase with severity.
    pub fn validate(&self) -> ModerationResult<()> {
        let enabled = self.enabled_punishments();
        for (i, (lower, lower_threshold)) in enabled.iter().enumerate() {
            for (higher, higher_threshold) in &enabled[i + 1..] {
                if lower_threshold >= higher_threshold {
                    return Err(ModerationError::InvalidSettings(format!(
                        "{} threshold ({}) must be lower than {} threshold ({})",
                        lower, lower_threshold, higher, higher_threshold
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Resets all thresholds to defaults if the ordering is broken.
    /// Returns true when a repair was made (the caller should persist).
    pub fn repair(&mut self) -> bool {
        if self.is_valid() {
            return false;
        }
        self.mute.threshold = DEFAULT_MUTE_THRESHOLD;
        self.timeout.threshold = DEFAULT_TIMEOUT_THRESHOLD;
        self.kick.threshold = DEFAULT_KICK_THRESHOLD;
        true
    }

    /// Sets the threshold of an enabled punishment, rejecting values that
    /// would break ordering against the other enabled punishments.
    pub fn set_threshold(&mut self, kind: PunishmentKind, threshold: u32) -> ModerationResult<()> {
        if !self.rule(kind).enabled {
            return Err(ModerationError::InvalidSettings(format!(
                "{} is not enabled",
                kind
            )));
        }
        let mut candidate = self.clone();
        candidate.rule_mut(kind).threshold = threshold;
        candidate.validate()?;
        self.rule_mut(kind).threshold = threshold;
        Ok(())
    }

    /// Enables or disables a punishment. Enabling repairs an inconsistent
    /// ordering; the return value reports whether thresholds were reset.
    pub fn set_enabled(&mut self, kind: PunishmentKind, enabled: bool) -> bool {
        self.rule_mut(kind).enabled = enabled;
        enabled && self.repair()
    }

    pub fn set_timeout_duration(&mut self, minutes: u32) -> ModerationResult<()> {
        if minutes < 1 {
            return Err(ModerationError::InvalidSettings(
                "timeout duration must be at least 1 minute".to_string(),
            ));
        }
        self.timeout_duration_minutes = minutes;
        Ok(())
    }

    pub fn set_reset_window(&mut self, days: u32, hours: u32, minutes: u32) {
        self.violation_reset = ResetWindow::normalized(days, hours, minutes);
    }

    pub fn set_volume_sensitivity(&mut self, sensitivity: u8) -> ModerationResult<()> {
        if sensitivity > 100 {
            return Err(ModerationError::InvalidSettings(format!(
                "volume sensitivity must be 0-100, got {}",
                sensitivity
            )));
        }
        self.volume_sensitivity = sensitivity;
        Ok(())
    }

    /// Timeout length in milliseconds.
    pub fn timeout_duration_ms(&self) -> u64 {
        u64::from(self.timeout_duration_minutes) * 60_000
    }

    /// RMS threshold derived from `volume_sensitivity`.
    pub fn rms_threshold(&self) -> f64 {
        rms_threshold_for_sensitivity(self.volume_sensitivity)
    }

    pub fn to_bytes(&self) -> ModerationResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> ModerationResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
