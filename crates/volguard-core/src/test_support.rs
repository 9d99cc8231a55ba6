//! In-memory gateway that records every call.

use crate::error::{ModerationError, ModerationResult};
use crate::moderation::{Member, ModerationGateway};
use std::sync::Mutex;

pub(crate) struct RecordingGateway {
    allow_mute: bool,
    allow_timeout: bool,
    allow_kick: bool,
    fail_actions: bool,
    fail_dms: bool,
    pub(crate) member_present: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingGateway {
    pub(crate) fn permissive() -> Self {
        Self {
            allow_mute: true,
            allow_timeout: true,
            allow_kick: true,
            fail_actions: false,
            fail_dms: false,
            member_present: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn deny_kick(mut self) -> Self {
        self.allow_kick = false;
        self
    }

    pub(crate) fn deny_timeout(mut self) -> Self {
        self.allow_timeout = false;
        self
    }

    pub(crate) fn failing_actions(mut self) -> Self {
        self.fail_actions = true;
        self
    }

    pub(crate) fn failing_dms(mut self) -> Self {
        self.fail_dms = true;
        self
    }

    pub(crate) fn member(&self, user_id: &str) -> Member {
        Member {
            user_id: user_id.to_string(),
            guild_id: "g1".to_string(),
            tag: format!("{user_id}#0001"),
            guild_name: "Test Guild".to_string(),
            in_voice: true,
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn dms(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("dm:").map(str::to_string))
            .collect()
    }

    pub(crate) fn moderation_actions(&self) -> Vec<String> {
        self.calls().into_iter().filter(|c| !c.starts_with("dm:")).collect()
    }

    fn act(&self, call: String) -> ModerationResult<()> {
        if self.fail_actions {
            return Err(ModerationError::Gateway("missing access".to_string()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ModerationGateway for RecordingGateway {
    async fn fetch_member(&self, _guild_id: &str, user_id: &str) -> ModerationResult<Option<Member>> {
        Ok(self.member_present.then(|| self.member(user_id)))
    }

    async fn notify(&self, _member: &Member, text: &str) -> ModerationResult<()> {
        if self.fail_dms {
            return Err(ModerationError::Gateway("cannot send messages to this user".to_string()));
        }
        self.calls.lock().unwrap().push(format!("dm:{text}"));
        Ok(())
    }

    fn can_mute(&self, _member: &Member) -> bool {
        self.allow_mute
    }

    fn can_timeout(&self, _member: &Member) -> bool {
        self.allow_timeout
    }

    fn can_kick(&self, _member: &Member) -> bool {
        self.allow_kick
    }

    async fn mute(&self, member: &Member, _reason: &str) -> ModerationResult<()> {
        self.act(format!("mute:{}", member.user_id))
    }

    async fn timeout(&self, member: &Member, duration_ms: u64, _reason: &str) -> ModerationResult<()> {
        self.act(format!("timeout:{}:{}", member.user_id, duration_ms))
    }

    async fn kick(&self, member: &Member, _reason: &str) -> ModerationResult<()> {
        self.act(format!("kick:{}", member.user_id))
    }
}
