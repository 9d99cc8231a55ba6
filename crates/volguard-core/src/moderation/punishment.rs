//! Punishment escalation: NONE → MUTED → TIMED_OUT → KICKED.
//!
//! Each exceed event applies at most one step. The next step is the least
//! severe enabled punishment ranked above the member's current status whose
//! threshold has been reached. When the bot lacks the capability for that step
//! it falls back to the next lesser enabled punishment it *can* apply.

use super::gateway::{send_dm, Member, ModerationGateway};
use crate::error::ModerationResult;
use crate::settings::GuildSettings;
use crate::shared::{PunishmentKind, PunishmentStatus, ViolationRecord};
use crate::store::ViolationStore;
use std::sync::Arc;
use tracing::{error, info, warn};

const PUNISHMENT_REASON: &str = "Repeated volume violations";
const FALLBACK_REASON: &str = "Repeated volume violations (fallback)";

/// Result of one `apply_next_punishment` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunishmentOutcome {
    /// Member is exempt; nothing evaluated.
    Exempt,
    /// Guild thresholds are out of order; nothing applied until corrected.
    InvalidSettings,
    /// No enabled punishment is due yet.
    NoEscalation,
    Applied(PunishmentKind),
    FallbackApplied {
        intended: PunishmentKind,
        applied: PunishmentKind,
    },
    /// Neither the intended punishment nor any lesser one could be applied.
    Unavailable(PunishmentKind),
    /// The platform rejected the action itself; status left unchanged.
    ActionFailed(PunishmentKind),
}

/// Lesser punishments to try, most severe first, when `kind` is not permitted.
fn fallback_order(kind: PunishmentKind) -> &'static [PunishmentKind] {
    match kind {
        PunishmentKind::Kick => &[PunishmentKind::Timeout, PunishmentKind::Mute],
        PunishmentKind::Timeout => &[PunishmentKind::Mute],
        PunishmentKind::Mute => &[],
    }
}

/// Picks the single next escalation step, if any.
pub fn next_punishment(violation: &ViolationRecord, settings: &GuildSettings) -> Option<PunishmentKind> {
    let current = violation.punishment_status.escalation_base();
    settings
        .enabled_punishments()
        .into_iter()
        .find(|(kind, threshold)| kind.status() > current && *threshold <= violation.violations_count)
        .map(|(kind, _)| kind)
}

/// Advisory "N more warnings until ..." line. Never used to gate escalation.
///
/// Returns None for exempt members and for members already at the kick level.
pub fn calculate_warnings_until_next(
    violations_count: u32,
    punishment_status: PunishmentStatus,
    exempt: bool,
    settings: &GuildSettings,
) -> Option<String> {
    if exempt || punishment_status == PunishmentStatus::Kicked {
        return None;
    }

    let (kind, threshold) = settings
        .enabled_punishments()
        .into_iter()
        .find(|(kind, _)| kind.status() > punishment_status)?;

    let remaining = (i64::from(threshold) - i64::from(violations_count)).max(1);
    let noun = if remaining == 1 { "warning" } else { "warnings" };
    Some(format!(
        "You have {} more {} until a {}.",
        remaining,
        noun,
        kind.server_label()
    ))
}

fn notice(kind: PunishmentKind, member: &Member, settings: &GuildSettings, fallback: bool) -> String {
    let why = if fallback {
        "as a fallback for repeated volume violations"
    } else {
        "for repeated volume violations"
    };
    match kind {
        PunishmentKind::Mute => {
            format!("You will be muted in the server \"{}\" {}.", member.guild_name, why)
        }
        PunishmentKind::Timeout => format!(
            "You will be timed out for {} minute(s) in the server \"{}\" {}.",
            settings.timeout_duration_minutes, member.guild_name, why
        ),
        PunishmentKind::Kick => {
            format!("You will be kicked from the server \"{}\" {}.", member.guild_name, why)
        }
    }
}

/// Applies escalation steps against the moderation gateway.
pub struct PunishmentEngine {
    gateway: Arc<dyn ModerationGateway>,
    store: Arc<dyn ViolationStore>,
}

impl PunishmentEngine {
    pub fn new(gateway: Arc<dyn ModerationGateway>, store: Arc<dyn ViolationStore>) -> Self {
        Self { gateway, store }
    }

    fn can_apply(&self, member: &Member, kind: PunishmentKind) -> bool {
        match kind {
            PunishmentKind::Mute => self.gateway.can_mute(member),
            PunishmentKind::Timeout => self.gateway.can_timeout(member),
            PunishmentKind::Kick => self.gateway.can_kick(member),
        }
    }

    /// Applies at most one escalation step and persists the new status.
    ///
    /// Capability denials and action failures are logged and reported in the
    /// outcome; only persistence errors are returned as `Err`.
    pub async fn apply_next_punishment(
        &self,
        member: &Member,
        violation: &mut ViolationRecord,
        settings: &GuildSettings,
    ) -> ModerationResult<PunishmentOutcome> {
        if violation.exempt {
            return Ok(PunishmentOutcome::Exempt);
        }

        if let Err(e) = settings.validate() {
            warn!(
                target: "volguard::moderation",
                guild_id = %settings.guild_id,
                error = %e,
                "guild settings unusable, skipping punishment"
            );
            return Ok(PunishmentOutcome::InvalidSettings);
        }

        let Some(intended) = next_punishment(violation, settings) else {
            return Ok(PunishmentOutcome::NoEscalation);
        };

        if self.can_apply(member, intended) {
            return Ok(if self.execute(member, violation, intended, settings, false).await? {
                PunishmentOutcome::Applied(intended)
            } else {
                PunishmentOutcome::ActionFailed(intended)
            });
        }

        let fallback = fallback_order(intended)
            .iter()
            .copied()
            .find(|kind| settings.rule(*kind).enabled && self.can_apply(member, *kind));

        match fallback {
            Some(applied) => {
                info!(
                    target: "volguard::moderation",
                    user_id = %member.user_id,
                    intended = %intended,
                    applied = %applied,
                    "missing permission for {}, falling back",
                    intended
                );
                Ok(if self.execute(member, violation, applied, settings, true).await? {
                    PunishmentOutcome::FallbackApplied { intended, applied }
                } else {
                    PunishmentOutcome::ActionFailed(applied)
                })
            }
            None => {
                warn!(
                    target: "volguard::moderation",
                    user_id = %member.user_id,
                    guild_id = %member.guild_id,
                    kind = %intended,
                    "no permitted punishment for {}",
                    member.tag
                );
                Ok(PunishmentOutcome::Unavailable(intended))
            }
        }
    }

    /// Notifies, acts, then records the new status. Returns false when the
    /// platform rejected the action.
    async fn execute(
        &self,
        member: &Member,
        violation: &mut ViolationRecord,
        kind: PunishmentKind,
        settings: &GuildSettings,
        fallback: bool,
    ) -> ModerationResult<bool> {
        send_dm(self.gateway.as_ref(), member, &notice(kind, member, settings, fallback)).await;

        let reason = if fallback { FALLBACK_REASON } else { PUNISHMENT_REASON };
        let action = match kind {
            PunishmentKind::Mute if member.in_voice => self.gateway.mute(member, reason).await,
            PunishmentKind::Mute => Ok(()),
            PunishmentKind::Timeout => {
                self.gateway
                    .timeout(member, settings.timeout_duration_ms(), reason)
                    .await
            }
            PunishmentKind::Kick => self.gateway.kick(member, reason).await,
        };

        if let Err(e) = action {
            error!(
                target: "volguard::moderation",
                user_id = %member.user_id,
                guild_id = %member.guild_id,
                kind = %kind,
                error = %e,
                "Failed to {} {}",
                kind,
                member.tag
            );
            return Ok(false);
        }

        violation.punishment_status = kind.status();
        self.store.save_violation(violation).await?;
        info!(
            target: "volguard::moderation",
            user_id = %member.user_id,
            guild_id = %member.guild_id,
            kind = %kind,
            fallback,
            "Successfully executed punishment {} for {}",
            kind,
            member.tag
        );
        Ok(true)
    }
}
