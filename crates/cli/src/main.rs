mod config;

use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use peerlink_core::{CodecPreferences, IceTransportPolicy, SdpType, SessionDescription};
use peerlink_peer::{
    LoopbackNetwork, MediaStream, MediaTrack, PeerConfig, PeerController, PeerEvent,
};
use peerlink_sdp::{is_acceptable_candidate, prepare_for_receiving, prepare_for_sending};
use tokio::{sync::broadcast, time::timeout};
use tracing::{info, warn};
use tracing_subscriber::{fmt::writer::MakeWriter, layer::SubscriberExt, EnvFilter};

use crate::config::{CliOverrides, LogFormat, ToolConfig};

#[derive(Parser, Debug)]
#[command(
    name = "peerlink",
    version,
    about = "SDP codec-preference rewriting and WebRTC negotiation toolkit"
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Args, Debug, Default, Clone)]
struct ConfigArgs {
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
    #[arg(long, global = true)]
    ice_transport_policy: Option<IceTransportPolicy>,
    #[arg(long, global = true)]
    audio_send_codec: Option<String>,
    #[arg(long, global = true)]
    audio_recv_codec: Option<String>,
    #[arg(long, global = true)]
    video_send_codec: Option<String>,
    #[arg(long, global = true)]
    video_recv_codec: Option<String>,
    #[arg(long, global = true)]
    opus_stereo: Option<String>,
    #[arg(long, global = true)]
    opus_fec: Option<String>,
    #[arg(long, global = true)]
    opus_dtx: Option<String>,
    #[arg(long, global = true)]
    opus_max_playback_rate: Option<String>,
    #[arg(long, global = true)]
    audio_send_bitrate: Option<String>,
    #[arg(long, global = true)]
    audio_recv_bitrate: Option<String>,
    #[arg(long, global = true)]
    video_send_bitrate: Option<String>,
    #[arg(long, global = true)]
    video_recv_bitrate: Option<String>,
    #[arg(long, global = true)]
    video_initial_bitrate: Option<String>,
    #[arg(long, global = true)]
    video_fec: Option<String>,
}

impl ConfigArgs {
    fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            log_format: self.log_format,
            ice_transport_policy: self.ice_transport_policy,
            preferences: CodecPreferences {
                audio_send_codec: self.audio_send_codec,
                audio_recv_codec: self.audio_recv_codec,
                video_send_codec: self.video_send_codec,
                video_recv_codec: self.video_recv_codec,
                opus_stereo: self.opus_stereo,
                opus_fec: self.opus_fec,
                opus_dtx: self.opus_dtx,
                opus_max_playback_rate: self.opus_max_playback_rate,
                audio_send_bitrate: self.audio_send_bitrate,
                audio_recv_bitrate: self.audio_recv_bitrate,
                video_send_bitrate: self.video_send_bitrate,
                video_recv_bitrate: self.video_recv_bitrate,
                video_initial_bitrate: self.video_initial_bitrate,
                video_fec: self.video_fec,
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Rewrite an SDP blob with the configured codec preferences.
    Rewrite(RewriteCommand),
    /// Check whether a local candidate would be signaled.
    Candidate(CandidateCommand),
    /// Negotiate two loopback peers and print both descriptions.
    Demo(DemoCommand),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Direction {
    /// Description for the side sending the media it describes.
    Send,
    /// Description this side commits to receive media with.
    Receive,
}

#[derive(Args, Debug)]
struct RewriteCommand {
    #[arg(long, value_enum)]
    direction: Direction,
    /// Read SDP from this file instead of stdin.
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long = "type", default_value = "offer")]
    kind: SdpType,
    /// Print the rewritten description as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CandidateCommand {
    /// Candidate attribute value, e.g. "candidate:1 1 udp ... typ host".
    candidate: String,
}

#[derive(Args, Debug)]
struct DemoCommand {
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = cli.config.clone().into_overrides();
    let mut config = ToolConfig::load()?;
    config.apply_overrides(&overrides)?;

    init_tracing(&config);
    run_command(&config, cli.command).await
}

async fn run_command(config: &ToolConfig, command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Rewrite(cmd) => {
            let raw = read_input(cmd.input.as_ref())?;
            let desc = rewrite(config, cmd.direction, cmd.kind, &raw);
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&desc)?);
            } else {
                print!("{}", desc.sdp);
            }
            Ok(())
        }
        CliCommand::Candidate(cmd) => {
            println!("{}", candidate_verdict(config, &cmd.candidate));
            Ok(())
        }
        CliCommand::Demo(cmd) => {
            let report = run_demo(config, Duration::from_millis(cmd.timeout_ms)).await?;
            println!("# offer\n{}", report.offer.sdp);
            println!("# answer\n{}", report.answer.sdp);
            Ok(())
        }
    }
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read SDP from {}", path.display())),
        None => {
            let mut raw = String::new();
            io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read SDP from stdin")?;
            Ok(raw)
        }
    }
}

/// Files edited by hand usually carry bare `\n`; the rewriter splits on
/// `\r\n` only.
fn normalize_crlf(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\n', "\r\n")
}

fn rewrite(config: &ToolConfig, direction: Direction, kind: SdpType, raw: &str) -> SessionDescription {
    let desc = SessionDescription::new(kind, normalize_crlf(raw));
    let rewritten = match direction {
        Direction::Send => prepare_for_sending(&desc, &config.preferences),
        Direction::Receive => prepare_for_receiving(&desc, &config.preferences),
    };
    info!(
        direction = ?direction,
        kind = %kind,
        changed = rewritten != desc,
        "description rewritten"
    );
    rewritten
}

fn candidate_verdict(config: &ToolConfig, candidate: &str) -> &'static str {
    if is_acceptable_candidate(candidate, config.ice_transport_policy) {
        "accepted"
    } else {
        "rejected"
    }
}

#[derive(Debug)]
struct DemoReport {
    offer: SessionDescription,
    answer: SessionDescription,
}

fn demo_stream(label: &str) -> MediaStream {
    MediaStream::new(format!("{label}-stream"))
        .with_track(MediaTrack::audio(format!("{label}-audio")))
        .with_track(MediaTrack::video(format!("{label}-video")))
}

async fn run_demo(config: &ToolConfig, wait: Duration) -> Result<DemoReport> {
    let network = LoopbackNetwork::new();
    let peer_config = PeerConfig {
        ice_transport_policy: config.ice_transport_policy,
        preferences: config.preferences.clone(),
    };
    let offerer = PeerController::new(
        peer_config.clone(),
        Arc::new(network.factory("offerer", "answerer")),
    )?;
    let answerer = PeerController::new(peer_config, Arc::new(network.factory("answerer", "offerer")))?;
    let mut offerer_events = offerer.subscribe();
    let mut answerer_events = answerer.subscribe();

    offerer.attach_stream(&demo_stream("offerer")).await?;
    answerer.attach_stream(&demo_stream("answerer")).await?;

    let offer = offerer.create_offer().await?;
    let answer = answerer.create_answer(offer.clone()).await?;
    offerer.apply_answer(answer.clone()).await?;

    let ready = timeout(wait, async {
        tokio::try_join!(
            await_ready("offerer", &mut offerer_events),
            await_ready("answerer", &mut answerer_events)
        )
    })
    .await
    .context("timed out waiting for both peers to connect")?;

    offerer.close().await;
    answerer.close().await;
    ready?;

    Ok(DemoReport { offer, answer })
}

async fn await_ready(label: &str, events: &mut broadcast::Receiver<PeerEvent>) -> Result<()> {
    let (mut connected, mut streamed) = (false, false);
    while !(connected && streamed) {
        match events.recv().await {
            Ok(PeerEvent::Connected) => {
                info!(peer = label, "connected");
                connected = true;
            }
            Ok(PeerEvent::RemoteStreamChanged(stream)) => {
                info!(peer = label, stream = %stream.id, tracks = stream.tracks.len(), "remote stream received");
                streamed = true;
            }
            Ok(PeerEvent::Error(message)) => bail!("{label} reported an error: {message}"),
            Ok(PeerEvent::Closed) => bail!("{label} closed during negotiation"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(peer = label, skipped, "event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => bail!("{label} event stream ended"),
        }
    }
    Ok(())
}

fn init_tracing(config: &ToolConfig) {
    // Respect RUST_LOG if set, otherwise default to info for our crates.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,peerlink=info"));

    let json = matches!(config.log_format(), LogFormat::Json);
    let subscriber = build_subscriber(json, env_filter);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

fn build_subscriber(
    json: bool,
    env_filter: EnvFilter,
) -> Box<dyn tracing::Subscriber + Send + Sync> {
    build_subscriber_with_writer(json, env_filter, std::io::stderr)
}

fn build_subscriber_with_writer<W>(
    json: bool,
    env_filter: EnvFilter,
    make_writer: W,
) -> Box<dyn tracing::Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    if json {
        Box::new(
            tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(make_writer),
            ),
        )
    } else {
        Box::new(
            tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(make_writer),
            ),
        )
    }
}
