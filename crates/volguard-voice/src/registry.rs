//! Speaker registry: one monitored channel, one detector task per human speaker.
//!
//! The registry owns the monitoring context behind a single async mutex, so
//! start, stop and membership changes never interleave. Audio for each speaker
//! is delivered as messages to a task that owns that speaker's
//! [`LoudnessDetector`]; exceed events are forwarded on the channel returned by
//! [`SpeakerRegistry::new`].

use crate::error::VoiceResult;
use crate::loudness::{Exceeded, LoudnessDetector};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The voice channel being monitored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: String,
    pub guild_id: String,
    pub name: String,
}

/// A member present in a voice channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMember {
    pub id: String,
    pub tag: String,
    pub bot: bool,
}

/// Releases the decoder and subscription behind one speaker's audio.
#[async_trait::async_trait]
pub trait SubscriptionHandle: Send {
    async fn destroy(&mut self) -> VoiceResult<()>;
}

/// Decoded PCM for one speaker plus the handle that tears it down.
pub struct AudioSubscription {
    pub chunks: mpsc::Receiver<Vec<u8>>,
    pub handle: Box<dyn SubscriptionHandle>,
}

/// Active transport connection to a voice channel.
#[async_trait::async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Members currently in the connected channel, bots included.
    async fn channel_members(&self) -> VoiceResult<Vec<ChannelMember>>;

    /// Subscribes to a member's decoded audio.
    async fn subscribe(&self, speaker_id: &str) -> VoiceResult<AudioSubscription>;

    /// Leaves the channel and releases the transport.
    async fn disconnect(&self) -> VoiceResult<()>;
}

/// Presence update for one member. Channel ids are `None` when not in voice.
#[derive(Debug, Clone)]
pub struct VoiceStateChange {
    pub member: ChannelMember,
    pub old_channel: Option<String>,
    pub new_channel: Option<String>,
}

/// What a presence update did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipOutcome {
    Ignored,
    SpeakerAdded(String),
    SpeakerRemoved(String),
    /// Last human left; monitoring stopped and the connection was released.
    /// `released` counts every session torn down by the update.
    ChannelEmptied { released: usize },
}

struct SpeakerSession {
    task: JoinHandle<()>,
    handle: Box<dyn SubscriptionHandle>,
}

struct MonitoringContext {
    connection: Arc<dyn VoiceConnection>,
    channel: ChannelRef,
    threshold: f64,
    sessions: HashMap<String, SpeakerSession>,
}

impl MonitoringContext {
    async fn register(&mut self, member: &ChannelMember, events: &mpsc::UnboundedSender<Exceeded>) -> VoiceResult<bool> {
        if member.bot || self.sessions.contains_key(&member.id) {
            return Ok(false);
        }

        let subscription = self.connection.subscribe(&member.id).await?;
        let detector = LoudnessDetector::new(member.id.clone(), self.channel.guild_id.clone(), self.threshold);
        let task = tokio::spawn(run_detector(detector, subscription.chunks, events.clone()));
        self.sessions.insert(
            member.id.clone(),
            SpeakerSession { task, handle: subscription.handle },
        );
        info!(
            target: "volguard::voice",
            speaker_id = %member.id,
            channel = %self.channel.name,
            "🎙️ Started monitoring {}",
            member.tag
        );
        Ok(true)
    }

    async fn release_all(&mut self) -> usize {
        let sessions: Vec<_> = self.sessions.drain().collect();
        let released = sessions.len();
        for (speaker_id, session) in sessions {
            teardown(&speaker_id, session).await;
        }
        released
    }
}

async fn run_detector(
    mut detector: LoudnessDetector,
    mut chunks: mpsc::Receiver<Vec<u8>>,
    events: mpsc::UnboundedSender<Exceeded>,
) {
    while let Some(chunk) = chunks.recv().await {
        if let Some(exceeded) = detector.feed(&chunk) {
            warn!(
                target: "volguard::voice",
                speaker_id = %exceeded.speaker_id,
                rms = exceeded.rms,
                threshold = detector.threshold(),
                "🔊 Volume threshold exceeded"
            );
            if events.send(exceeded).is_err() {
                break;
            }
        }
    }
    debug!(target: "volguard::voice", speaker_id = %detector.speaker_id(), "audio stream closed");
}

async fn teardown(speaker_id: &str, mut session: SpeakerSession) {
    session.task.abort();
    match session.handle.destroy().await {
        Ok(()) => debug!(target: "volguard::voice", speaker_id, "subscription destroyed"),
        Err(e) => warn!(
            target: "volguard::voice",
            speaker_id,
            error = %e,
            "Failed to destroy audio subscription"
        ),
    }
}

/// Owner of the (at most one) active monitoring context.
pub struct SpeakerRegistry {
    context: Mutex<Option<MonitoringContext>>,
    events: mpsc::UnboundedSender<Exceeded>,
}

impl SpeakerRegistry {
    /// Creates an idle registry and the receiver for its exceed events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Exceeded>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            context: Mutex::new(None),
            events,
        };
        (registry, rx)
    }

    /// Starts monitoring `channel`, replacing any active context.
    ///
    /// Every human member present is subscribed. A member whose subscription
    /// fails is skipped and logged. Returns the number of speakers registered.
    pub async fn start(
        &self,
        connection: Arc<dyn VoiceConnection>,
        channel: ChannelRef,
        threshold: f64,
    ) -> VoiceResult<usize> {
        let mut guard = self.context.lock().await;
        if let Some(mut previous) = guard.take() {
            let released = previous.release_all().await;
            info!(
                target: "volguard::voice",
                channel = %previous.channel.name,
                released,
                "replacing active monitoring context"
            );
        }

        let members = connection.channel_members().await?;
        let mut context = MonitoringContext {
            connection,
            channel,
            threshold,
            sessions: HashMap::new(),
        };

        for member in &members {
            if let Err(e) = context.register(member, &self.events).await {
                warn!(
                    target: "volguard::voice",
                    speaker_id = %member.id,
                    error = %e,
                    "Failed to subscribe to {}",
                    member.tag
                );
            }
        }

        let registered = context.sessions.len();
        info!(
            target: "volguard::voice",
            channel = %context.channel.name,
            guild_id = %context.channel.guild_id,
            threshold,
            speakers = registered,
            "Monitoring voice channel"
        );
        *guard = Some(context);
        Ok(registered)
    }

    /// Tears down every speaker and clears the context. Safe to call when idle;
    /// returns how many speakers were released.
    pub async fn stop(&self) -> usize {
        let Some(mut context) = self.context.lock().await.take() else {
            return 0;
        };
        let released = context.release_all().await;
        info!(
            target: "volguard::voice",
            channel = %context.channel.name,
            released,
            "Stopped monitoring"
        );
        released
    }

    /// Applies a presence update to the monitored channel.
    pub async fn on_voice_state_update(&self, change: &VoiceStateChange) -> VoiceResult<MembershipOutcome> {
        let mut guard = self.context.lock().await;
        let Some(context) = guard.as_mut() else {
            return Ok(MembershipOutcome::Ignored);
        };
        if change.member.bot || change.old_channel == change.new_channel {
            return Ok(MembershipOutcome::Ignored);
        }

        let monitored = Some(context.channel.id.as_str());

        if change.old_channel.as_deref() == monitored {
            let speaker_id = change.member.id.clone();
            let removed = context.sessions.remove(&speaker_id);
            let was_registered = removed.is_some();
            if let Some(session) = removed {
                teardown(&speaker_id, session).await;
                info!(target: "volguard::voice", speaker_id = %speaker_id, "Stopped monitoring {}", change.member.tag);
            }

            let humans_left = match context.connection.channel_members().await {
                Ok(members) => members.iter().any(|m| !m.bot),
                Err(e) => {
                    warn!(target: "volguard::voice", error = %e, "Failed to list channel members");
                    true
                }
            };

            if !humans_left {
                if let Some(mut context) = guard.take() {
                    let released = context.release_all().await + usize::from(was_registered);
                    if let Err(e) = context.connection.disconnect().await {
                        warn!(target: "volguard::voice", error = %e, "Failed to disconnect");
                    }
                    info!(
                        target: "volguard::voice",
                        channel = %context.channel.name,
                        "Channel empty, stopped monitoring and left"
                    );
                    return Ok(MembershipOutcome::ChannelEmptied { released });
                }
            }
            return Ok(MembershipOutcome::SpeakerRemoved(speaker_id));
        }

        if change.new_channel.as_deref() == monitored && context.register(&change.member, &self.events).await? {
            return Ok(MembershipOutcome::SpeakerAdded(change.member.id.clone()));
        }

        Ok(MembershipOutcome::Ignored)
    }

    pub async fn is_monitoring(&self) -> bool {
        self.context.lock().await.is_some()
    }

    pub async fn monitored_channel(&self) -> Option<ChannelRef> {
        self.context.lock().await.as_ref().map(|c| c.channel.clone())
    }

    /// Registered speaker ids, sorted.
    pub async fn speakers(&self) -> Vec<String> {
        let guard = self.context.lock().await;
        let mut ids: Vec<String> = guard
            .as_ref()
            .map(|c| c.sessions.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}
