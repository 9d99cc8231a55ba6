//! # Volguard Voice - loudness monitoring for one voice channel
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     SpeakerRegistry                         │
//! │  VoiceConnection ──subscribe──▶ per-speaker task            │
//! │                                 ┌──────────────────┐        │
//! │  PCM chunks (s16le, 48k, 2ch) ─▶│ LoudnessDetector │        │
//! │                                 │   3 s RMS window │        │
//! │                                 └────────┬─────────┘        │
//! │                                          ▼                  │
//! │                            mpsc::UnboundedSender<Exceeded>  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! This crate knows nothing about punishments; consumers map [`Exceeded`]
//! events onto their moderation pipeline.

pub mod error;
pub mod loudness;
pub mod registry;

pub use error::{VoiceError, VoiceResult};
pub use loudness::{compute_rms, Exceeded, LoudnessDetector, WINDOW_BYTES};
pub use registry::{
    AudioSubscription, ChannelMember, ChannelRef, MembershipOutcome, SpeakerRegistry,
    SubscriptionHandle, VoiceConnection, VoiceStateChange,
};
