//! File-backed voice connection and a dry-run moderation gateway.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use volguard_core::{Member, ModerationGateway, ModerationResult};
use volguard_voice::{
    AudioSubscription, ChannelMember, SubscriptionHandle, VoiceConnection, VoiceError, VoiceResult,
};

/// 20 ms of 48 kHz stereo s16le, the size a live decoder hands over.
const CHUNK_BYTES: usize = 3_840;
const REPLAY_BOT_ID: &str = "volguard-replay";

/// Streams each speaker's capture file as if it were live decoded audio.
///
/// `pending` counts readers that have started and not yet finished, so a
/// capture that never gets subscribed cannot hold up [`Self::wait_drained`].
pub struct ReplayConnection {
    captures: HashMap<String, PathBuf>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl ReplayConnection {
    pub fn new(captures: HashMap<String, PathBuf>) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            captures,
            drained: Arc::new(Notify::new()),
        }
    }

    /// Resolves once every subscribed capture has been consumed by its detector.
    /// Call after the registry has started.
    pub async fn wait_drained(&self) {
        let notified = self.drained.notified();
        if self.pending.load(Ordering::SeqCst) == 0 {
            return;
        }
        notified.await;
    }

    fn finish_one(pending: &AtomicUsize, drained: &Notify) {
        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            drained.notify_waiters();
        }
    }
}

struct ReplayHandle {
    speaker_id: String,
    reader: JoinHandle<()>,
}

#[async_trait::async_trait]
impl SubscriptionHandle for ReplayHandle {
    async fn destroy(&mut self) -> VoiceResult<()> {
        self.reader.abort();
        tracing::debug!(target: "volguard::voice", speaker_id = %self.speaker_id, "replay reader stopped");
        Ok(())
    }
}

async fn stream_capture(path: PathBuf, tx: mpsc::Sender<Vec<u8>>) -> VoiceResult<usize> {
    let pcm = tokio::fs::read(&path).await?;
    for chunk in pcm.chunks(CHUNK_BYTES) {
        if tx.send(chunk.to_vec()).await.is_err() {
            break;
        }
    }
    // wait for the detector to take the last chunk
    while !tx.is_closed() && tx.capacity() < tx.max_capacity() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(pcm.len())
}

#[async_trait::async_trait]
impl VoiceConnection for ReplayConnection {
    async fn channel_members(&self) -> VoiceResult<Vec<ChannelMember>> {
        let mut members: Vec<ChannelMember> = self
            .captures
            .keys()
            .map(|id| ChannelMember {
                id: id.clone(),
                tag: id.clone(),
                bot: false,
            })
            .collect();
        members.push(ChannelMember {
            id: REPLAY_BOT_ID.to_string(),
            tag: REPLAY_BOT_ID.to_string(),
            bot: true,
        });
        Ok(members)
    }

    async fn subscribe(&self, speaker_id: &str) -> VoiceResult<AudioSubscription> {
        let path = self
            .captures
            .get(speaker_id)
            .cloned()
            .ok_or_else(|| VoiceError::Subscription(format!("no capture for {speaker_id}")))?;

        let (tx, rx) = mpsc::channel(64);
        self.pending.fetch_add(1, Ordering::SeqCst);
        let pending = self.pending.clone();
        let drained = self.drained.clone();
        let id = speaker_id.to_string();
        let reader = tokio::spawn(async move {
            match stream_capture(path.clone(), tx).await {
                Ok(bytes) => tracing::info!(
                    target: "volguard::voice",
                    speaker_id = %id,
                    bytes,
                    "capture {} replayed",
                    path.display()
                ),
                Err(e) => tracing::warn!(
                    target: "volguard::voice",
                    speaker_id = %id,
                    error = %e,
                    "Failed to replay {}",
                    path.display()
                ),
            }
            Self::finish_one(&pending, &drained);
        });

        Ok(AudioSubscription {
            chunks: rx,
            handle: Box::new(ReplayHandle {
                speaker_id: speaker_id.to_string(),
                reader,
            }),
        })
    }

    async fn disconnect(&self) -> VoiceResult<()> {
        tracing::info!(target: "volguard::voice", "replay connection closed");
        Ok(())
    }
}

/// Gateway that logs what would have happened.
pub struct DryRunGateway {
    guild_name: String,
    allow_timeout: bool,
    allow_kick: bool,
}

impl DryRunGateway {
    pub fn new(guild_name: impl Into<String>, allow_timeout: bool, allow_kick: bool) -> Self {
        Self {
            guild_name: guild_name.into(),
            allow_timeout,
            allow_kick,
        }
    }
}

#[async_trait::async_trait]
impl ModerationGateway for DryRunGateway {
    async fn fetch_member(&self, guild_id: &str, user_id: &str) -> ModerationResult<Option<Member>> {
        Ok(Some(Member {
            user_id: user_id.to_string(),
            guild_id: guild_id.to_string(),
            tag: user_id.to_string(),
            guild_name: self.guild_name.clone(),
            in_voice: true,
        }))
    }

    async fn notify(&self, member: &Member, text: &str) -> ModerationResult<()> {
        tracing::info!(target: "volguard::moderation", user_id = %member.user_id, "[dry-run] DM: {}", text);
        Ok(())
    }

    fn can_mute(&self, _member: &Member) -> bool {
        true
    }

    fn can_timeout(&self, _member: &Member) -> bool {
        self.allow_timeout
    }

    fn can_kick(&self, _member: &Member) -> bool {
        self.allow_kick
    }

    async fn mute(&self, member: &Member, reason: &str) -> ModerationResult<()> {
        tracing::info!(target: "volguard::moderation", user_id = %member.user_id, reason, "[dry-run] mute");
        Ok(())
    }

    async fn timeout(&self, member: &Member, duration_ms: u64, reason: &str) -> ModerationResult<()> {
        tracing::info!(
            target: "volguard::moderation",
            user_id = %member.user_id,
            duration_ms,
            reason,
            "[dry-run] timeout"
        );
        Ok(())
    }

    async fn kick(&self, member: &Member, reason: &str) -> ModerationResult<()> {
        tracing::info!(target: "volguard::moderation", user_id = %member.user_id, reason, "[dry-run] kick");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_is_delivered_in_chunks_then_drains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.pcm");
        std::fs::write(&path, vec![0u8; CHUNK_BYTES * 2 + 100]).unwrap();

        let connection = ReplayConnection::new(HashMap::from([("alice".to_string(), path)]));
        let members = connection.channel_members().await.unwrap();
        assert_eq!(members.iter().filter(|m| !m.bot).count(), 1);

        let mut subscription = connection.subscribe("alice").await.unwrap();
        let mut sizes = Vec::new();
        while let Some(chunk) = subscription.chunks.recv().await {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![CHUNK_BYTES, CHUNK_BYTES, 100]);

        connection.wait_drained().await;
        subscription.handle.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_speaker_cannot_subscribe() {
        let connection = ReplayConnection::new(HashMap::new());
        assert!(connection.subscribe("ghost").await.is_err());
        tokio::time::timeout(Duration::from_secs(1), connection.wait_drained())
            .await
            .expect("failed subscription must not be waited on");
    }

    #[tokio::test]
    async fn unsubscribed_capture_does_not_block_drain() {
        let dir = tempfile::tempdir().unwrap();
        let alice = dir.path().join("alice.pcm");
        let bob = dir.path().join("bob.pcm");
        std::fs::write(&alice, vec![0u8; CHUNK_BYTES]).unwrap();
        std::fs::write(&bob, vec![0u8; CHUNK_BYTES]).unwrap();

        let connection = ReplayConnection::new(HashMap::from([
            ("alice".to_string(), alice),
            ("bob".to_string(), bob),
        ]));
        assert!(connection.subscribe("ghost").await.is_err());
        let mut subscription = connection.subscribe("alice").await.unwrap();
        while subscription.chunks.recv().await.is_some() {}

        tokio::time::timeout(Duration::from_secs(5), connection.wait_drained())
            .await
            .expect("drain must not wait for bob, who was never subscribed");
        subscription.handle.destroy().await.unwrap();
    }
}
