use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use audition_coach::api::ApiServer;
use audition_coach::realtime::{
    HttpTokenBroker, PlaybackScheduler, SessionController, SessionState, SessionUpdate,
    WsConnector,
};
use audition_coach::voice::{CpalMicrophone, CpalSpeaker, measure_microphone, play_test_tone};
use audition_coach::validation::ALLOWED_MODES;
use audition_coach::{Config, Mode, SessionParams};

/// Audition Coach - realtime voice coaching for acting auditions
#[derive(Parser)]
#[command(name = "audition-coach", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the token backend (default)
    Serve {
        /// Port to listen on
        #[arg(long, env = "COACH_PORT")]
        port: Option<u16>,
    },
    /// Start a live coaching session on the default microphone and speakers
    Coach {
        /// Scene mode (e.g. "Bollywood Romance", "Audition Slate")
        #[arg(short, long, default_value = "Audition Slate", value_parser = parse_mode)]
        mode: Mode,
        /// Take length in seconds (30, 60 or 90)
        #[arg(short, long, default_value = "60")]
        duration: u32,
        /// Difficulty (e.g. Easy, Medium, Hard)
        #[arg(long, default_value = "Medium")]
        difficulty: String,
        /// Token endpoint
        #[arg(long, env = "COACH_TOKEN_URL")]
        token_url: Option<String>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

fn parse_mode(label: &str) -> Result<Mode, String> {
    Mode::from_label(label).ok_or_else(|| format!("expected one of: {}", ALLOWED_MODES.join(", ")))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,audition_coach=info",
        1 => "info,audition_coach=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env();

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.api_server.port = port;
            }
            tracing::info!(
                port = config.api_server.port,
                model = %config.realtime.model,
                voice = %config.realtime.voice,
                "starting coaching backend"
            );
            ApiServer::new(config).run().await?;
            Ok(())
        }
        Command::Coach {
            mode,
            duration,
            difficulty,
            token_url,
        } => {
            if let Some(url) = token_url {
                config.client.token_url = url;
            }
            coach(&config, SessionParams::new(mode, duration, difficulty)).await
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Run one live session until it ends or Ctrl-C
async fn coach(config: &Config, params: SessionParams) -> anyhow::Result<()> {
    let (controller, mut updates) = SessionController::new(
        Box::new(HttpTokenBroker::new(config.client.token_url.clone())),
        Box::new(WsConnector),
        Box::new(CpalMicrophone),
        PlaybackScheduler::new(Box::new(CpalSpeaker), config.client.playback_lookahead),
        &config.client,
    );
    let (handle, task) = controller.spawn();

    println!("Take: {} / {}s / {}", params.mode, params.duration, params.difficulty);
    println!("Press Ctrl-C to stop.\n");
    handle.start(params).await?;

    let mut failed = false;
    let mut last_coach_line = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.stop().await?;
            }
            update = updates.recv() => {
                let Some(update) = update else { break };
                match update {
                    SessionUpdate::Status(status) => println!("[{status}]"),
                    SessionUpdate::Notice(text) => println!("{text}"),
                    SessionUpdate::UserTranscript(text) if !text.is_empty() => println!("you:   {text}"),
                    SessionUpdate::AssistantTranscript(text) => {
                        if text != last_coach_line {
                            println!("coach: {text}");
                            last_coach_line = text;
                        }
                    }
                    SessionUpdate::Failure { message, hint } => {
                        eprintln!("{message}");
                        eprintln!("{hint}");
                        failed = true;
                    }
                    SessionUpdate::State { to: SessionState::Idle, .. } => break,
                    SessionUpdate::State { .. } | SessionUpdate::UserTranscript(_) => {}
                }
            }
        }
    }

    drop(handle);
    let _ = task.await;
    if failed {
        anyhow::bail!("coaching session failed");
    }
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let level = measure_microphone(&CpalMicrophone, Duration::from_secs(duration)).await?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let meter_len = (level.rms * 100.0).min(50.0) as usize;
    let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

    println!("Sample rate: {} Hz", level.sample_rate);
    println!("Blocks: {}", level.blocks);
    println!("RMS: {:.4} | Peak: {:.4} | [{meter}]", level.rms, level.peak);

    if level.blocks == 0 {
        println!("\nNo audio arrived. Check that microphone access is allowed.");
    } else if level.peak < 0.01 {
        println!("\nVery low input. Check the microphone is not muted.");
    } else {
        println!("\nMicrophone working.");
    }
    Ok(())
}

/// Test speaker output
async fn test_speaker() -> anyhow::Result<()> {
    println!("Playing test tone (440 Hz, 1 second)...");
    play_test_tone(&CpalSpeaker, 440.0, Duration::from_secs(1)).await?;
    println!("Done. Did you hear the tone?");
    Ok(())
}
