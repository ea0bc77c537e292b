//! Fushigi3D Companion - headless preview
//!
//! Loads an avatar, optionally speaks an audio file over it, and runs the
//! frame loop without a renderer, logging what the avatar is doing.

use bytes::Bytes;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fushigi3d_companion::{
    config::Config, AvatarController, ControllerState, Screenplay, SpeechCompletion,
};

/// Fushigi3D Companion - headless avatar preview
#[derive(Parser, Debug)]
#[command(name = "fushigi3d-companion", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Avatar model URL or path (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Idle motion URL or path (overrides config)
    #[arg(long)]
    idle: Option<String>,

    /// Audio file to speak once the avatar is ready
    #[arg(short, long)]
    speak: Option<PathBuf>,

    /// Expression preset held while speaking
    #[arg(short, long, default_value = "happy")]
    expression: String,

    /// How long to run the frame loop (seconds)
    #[arg(long, default_value_t = 10.0)]
    seconds: f32,

    /// Frame rate of the preview loop
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!(
        "Starting {} v{}",
        fushigi3d_companion::NAME,
        fushigi3d_companion::VERSION
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args))?;

    info!("Preview stopped");
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    // Load configuration
    let mut config = if let Some(ref path) = args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    // Apply CLI overrides
    if let Some(ref model) = args.model {
        config.avatar.model_url = model.clone();
    }
    if let Some(ref idle) = args.idle {
        config.avatar.idle_motion_url = idle.clone();
    }

    config.validate()?;

    info!("Model: {}", config.avatar.model_url);
    info!(
        "Idle motion: {} ({})",
        config.avatar.idle_motion_url, config.avatar.idle_motion_format
    );
    info!("Playback sink: {:?}", config.lip_sync.sink);

    let model_url = config.avatar.model_url.clone();
    let mut controller = AvatarController::new(config)?;
    controller.load(&model_url).await?;

    if let Err(e) = controller.play_idle_animation().await {
        warn!("Idle animation unavailable: {}", e);
    }

    let mut speech = match args.speak {
        Some(ref path) => {
            let data = tokio::fs::read(path).await?;
            info!("Speaking {} ({} bytes)", path.display(), data.len());
            Some(
                controller
                    .speak(Bytes::from(data), Screenplay::new(args.expression.clone()))
                    .await?,
            )
        }
        None => None,
    };

    let fps = args.fps.clamp(1, 240);
    let delta = 1.0 / fps as f32;
    let total_frames = (args.seconds.max(0.0) * fps as f32) as u64;

    let mut interval = tokio::time::interval(Duration::from_secs_f32(delta));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    for frame in 0..total_frames {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }

        controller.update(delta);
        report_speech(&mut speech);

        if frame % fps as u64 == 0 {
            log_frame(&controller, frame as f32 * delta);
        }
    }

    controller.dispose();
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed never
/// fires.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn report_speech(speech: &mut Option<SpeechCompletion>) {
    let Some(completion) = speech.as_mut() else {
        return;
    };
    match completion.try_result() {
        Some(Ok(())) => {
            info!("Speech finished");
            *speech = None;
        }
        Some(Err(e)) => {
            warn!("Speech ended early: {}", e);
            *speech = None;
        }
        None => {}
    }
}

fn log_frame(controller: &AvatarController, time: f32) {
    let mouth = controller
        .avatar()
        .and_then(|a| a.expression_weight(&controller.config().expression.mouth_channel))
        .unwrap_or(0.0);

    match controller.state() {
        ControllerState::Speaking => info!(
            "[{:6.2}s] speaking as '{}' viseme={:.2} mouth={:.2}",
            time,
            controller.current_expression(),
            controller.viseme_weight(),
            mouth
        ),
        state => info!(
            "[{:6.2}s] {} expression='{}' motion_t={:.2}",
            time,
            state,
            controller.current_expression(),
            controller.motion_player().time()
        ),
    }
}
