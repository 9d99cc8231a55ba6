//! Moderation capability seam: member lookup, direct messages, and the three
//! punishment primitives with their permission preconditions.

use crate::error::ModerationResult;

/// Guild member as seen by the moderation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: String,
    pub guild_id: String,
    /// Display tag used in logs (e.g. `name#1234`).
    pub tag: String,
    pub guild_name: String,
    /// True while the member is connected to a voice channel.
    pub in_voice: bool,
}

/// Operations the engine performs against the chat platform.
///
/// `can_*` are precondition queries evaluated before acting; a `false` answer
/// is an expected outcome that triggers fallback, not an error.
#[async_trait::async_trait]
pub trait ModerationGateway: Send + Sync {
    /// Looks up a member. `Ok(None)` means the member is no longer in the guild.
    async fn fetch_member(&self, guild_id: &str, user_id: &str) -> ModerationResult<Option<Member>>;

    /// Sends a direct message. Callers treat failures as best-effort.
    async fn notify(&self, member: &Member, text: &str) -> ModerationResult<()>;

    /// Bot holds the "mute members" permission.
    fn can_mute(&self, member: &Member) -> bool;

    /// Member is moderatable by the bot.
    fn can_timeout(&self, member: &Member) -> bool;

    /// Member is kickable by the bot.
    fn can_kick(&self, member: &Member) -> bool;

    async fn mute(&self, member: &Member, reason: &str) -> ModerationResult<()>;

    async fn timeout(&self, member: &Member, duration_ms: u64, reason: &str) -> ModerationResult<()>;

    async fn kick(&self, member: &Member, reason: &str) -> ModerationResult<()>;
}

/// Sends a DM, logging instead of failing when delivery is refused.
pub async fn send_dm<G: ModerationGateway + ?Sized>(gateway: &G, member: &Member, text: &str) {
    if let Err(e) = gateway.notify(member, text).await {
        tracing::warn!(
            target: "volguard::moderation",
            user_id = %member.user_id,
            guild_id = %member.guild_id,
            error = %e,
            "Failed to send DM to {}",
            member.tag
        );
    }
}
