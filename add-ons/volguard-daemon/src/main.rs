//! Volguard replay daemon
//!
//! Runs captured PCM through the full monitoring and punishment engine against
//! a dry-run gateway, so thresholds and escalation settings can be tuned
//! without a live voice session.
//!
//! ```text
//! volguard-daemon --guild 1234 --speaker alice=alice.pcm --speaker bob=bob.pcm [--deny-kick] [--deny-timeout]
//! ```

mod replay;

use anyhow::{bail, Context};
use replay::{DryRunGateway, ReplayConnection};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use volguard_core::{
    run_exceed_loop, AppConfig, ExceedEvent, ExceedHandler, SettingsStore, SledModerationStore,
    ViolationStore,
};
use volguard_voice::{ChannelRef, SpeakerRegistry};

#[derive(Debug, PartialEq)]
struct ReplayArgs {
    guild_id: String,
    guild_name: String,
    captures: HashMap<String, PathBuf>,
    allow_timeout: bool,
    allow_kick: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<ReplayArgs> {
    let mut guild_id = None;
    let mut guild_name = None;
    let mut captures = HashMap::new();
    let mut allow_timeout = true;
    let mut allow_kick = true;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--guild" => guild_id = Some(args.next().context("--guild needs a value")?),
            "--guild-name" => guild_name = Some(args.next().context("--guild-name needs a value")?),
            "--speaker" => {
                let pair = args.next().context("--speaker needs USER=PATH")?;
                let Some((user, path)) = pair.split_once('=') else {
                    bail!("expected USER=PATH, got '{}'", pair);
                };
                if user.is_empty() || path.is_empty() {
                    bail!("expected USER=PATH, got '{}'", pair);
                }
                captures.insert(user.to_string(), PathBuf::from(path));
            }
            "--deny-timeout" => allow_timeout = false,
            "--deny-kick" => allow_kick = false,
            other => bail!("unknown argument '{}'", other),
        }
    }

    let guild_id = guild_id.context("--guild is required")?;
    if captures.is_empty() {
        bail!("at least one --speaker USER=PATH is required");
    }
    Ok(ReplayArgs {
        guild_name: guild_name.unwrap_or_else(|| guild_id.clone()),
        guild_id,
        captures,
        allow_timeout,
        allow_kick,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[volguard-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let config = AppConfig::load().context("load AppConfig")?;
    let store_path = config.store_path();
    let store = Arc::new(
        SledModerationStore::open_path(&store_path)
            .with_context(|| format!("open store at {}", store_path.display()))?,
    );

    let settings = store.load_or_create_settings(&args.guild_id).await?;
    let threshold = config.monitor_threshold(&settings);
    tracing::info!(
        app = %config.app_name,
        guild_id = %args.guild_id,
        threshold,
        maintenance_mode = config.maintenance_mode,
        speakers = args.captures.len(),
        "Volguard replay started"
    );

    let gateway = Arc::new(DryRunGateway::new(&args.guild_name, args.allow_timeout, args.allow_kick));
    let handler = Arc::new(ExceedHandler::new(store.clone(), store.clone(), gateway));

    let (registry, mut voice_events) = SpeakerRegistry::new();
    let (exceed_tx, exceed_rx) = mpsc::unbounded_channel();
    let bridge = tokio::spawn(async move {
        while let Some(exceeded) = voice_events.recv().await {
            let event = ExceedEvent {
                user_id: exceeded.speaker_id,
                guild_id: exceeded.guild_id,
                rms: exceeded.rms,
                timestamp: exceeded.timestamp,
            };
            if exceed_tx.send(event).is_err() {
                break;
            }
        }
    });
    let pipeline = tokio::spawn(run_exceed_loop(exceed_rx, handler));

    let mut speakers: Vec<String> = args.captures.keys().cloned().collect();
    speakers.sort();
    let connection = Arc::new(ReplayConnection::new(args.captures));
    let channel = ChannelRef {
        id: "replay".to_string(),
        guild_id: args.guild_id.clone(),
        name: "replay".to_string(),
    };
    registry.start(connection.clone(), channel, threshold).await?;

    tokio::select! {
        _ = connection.wait_drained() => {
            tracing::info!("all captures replayed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("CTRL-C received; stopping replay");
        }
    }

    registry.stop().await;
    drop(registry);
    bridge.await?;
    pipeline.await?;

    for speaker_id in &speakers {
        match store.get_violation(speaker_id, &args.guild_id).await? {
            Some(record) => tracing::info!(
                user_id = %speaker_id,
                violations = record.violations_count,
                status = ?record.punishment_status,
                "replay summary"
            ),
            None => tracing::info!(user_id = %speaker_id, "replay summary: no violations"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> anyhow::Result<ReplayArgs> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_speakers_and_flags() {
        let parsed = args(&["--guild", "g1", "--speaker", "alice=a.pcm", "--speaker", "bob=b.pcm", "--deny-kick"]).unwrap();
        assert_eq!(parsed.guild_id, "g1");
        assert_eq!(parsed.guild_name, "g1");
        assert_eq!(parsed.captures.len(), 2);
        assert_eq!(parsed.captures["bob"], PathBuf::from("b.pcm"));
        assert!(parsed.allow_timeout);
        assert!(!parsed.allow_kick);
    }

    #[test]
    fn rejects_incomplete_invocations() {
        assert!(args(&["--speaker", "alice=a.pcm"]).is_err());
        assert!(args(&["--guild", "g1"]).is_err());
        assert!(args(&["--guild", "g1", "--speaker", "alice"]).is_err());
        assert!(args(&["--guild", "g1", "--speaker", "=a.pcm"]).is_err());
        assert!(args(&["--guild", "g1", "--verbose"]).is_err());
    }
}
