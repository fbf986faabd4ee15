//! live_detect - live camera detection client
//!
//! This daemon:
//! 1. Acquires the configured camera
//! 2. Runs the throttled capture → detect → publish loop
//! 3. Shows status and the latest detections on the terminal
//! 4. Serves the latest snapshot on the loopback status API
//! 5. Optionally keeps an annotated PNG of the latest overlay
//!
//! Commands on stdin: `t` toggles detection, `1`/`2`/`5` set the frame rate,
//! `q` quits.

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io::{BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use live_detect::{
    api::{ApiConfig, StatusApi},
    config::ClientConfig,
    overlay::compose_over,
    ui::{Ui, UiMode},
    views::{detail_lines, summary_line},
    CameraSession, DetectionLoop, DetectionStore, FrameCapture, HttpDetectionClient, LoopControl,
    LoopStatus, OverlayRenderer, RasterSurface,
};

const UI_REFRESH: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream camera frames to a detection service")]
struct Args {
    /// Detection service endpoint.
    #[arg(long)]
    service_url: Option<String>,

    /// Camera device: /dev/videoN, http(s):// snapshot URL, or stub://name.
    #[arg(long)]
    camera: Option<String>,

    /// Detection frame rate (1-30).
    #[arg(long)]
    fps: Option<u32>,

    /// Write the latest annotated frame to this PNG.
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Wait for `t` instead of starting detection automatically.
    #[arg(long)]
    no_autostart: bool,

    /// Do not serve the loopback status API.
    #[arg(long)]
    no_api: bool,

    /// Output mode: auto, plain, or pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

enum Event {
    Shutdown,
    Toggle,
    SetFps(u32),
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ClientConfig::load()?;
    if let Some(url) = args.service_url {
        config.service.url = url;
    }
    if let Some(camera) = args.camera {
        config.camera.device = camera;
    }
    if let Some(fps) = args.fps {
        config.detection.fps = fps;
    }
    if let Some(path) = args.overlay {
        config.overlay_path = Some(path);
    }
    if args.no_autostart {
        config.detection.autostart = false;
    }
    config.validate()?;

    let ui = Ui::new(UiMode::parse(Some(&args.ui)), std::io::stderr().is_terminal());
    let mut status_line = ui.status_line();
    let control = LoopControl::new(config.detection.fps)?;
    status_line.update(&control.status().to_string(), "");

    control.set_status(LoopStatus::AccessingCamera);
    status_line.update(&control.status().to_string(), "");
    let camera = Arc::new(CameraSession::for_device(&config.camera.device));
    if let Err(err) = camera.acquire(&config.camera_constraints()) {
        let cause = match &err {
            live_detect::CameraError::PermissionDenied(_) => "permission denied",
            live_detect::CameraError::DeviceUnavailable(_) => "no camera available",
        };
        control.set_status(LoopStatus::CameraError(cause.to_string()));
        status_line.finish(&control.status().to_string());
        return Err(anyhow!(err));
    }
    control.set_status(LoopStatus::CameraReady);

    let (publisher, store) = DetectionStore::new();
    let client = HttpDetectionClient::new(&config.service.url, config.service.timeout)?;
    log::info!(
        "sending frames from {} to {} at {} fps",
        config.camera.device,
        client.url(),
        config.detection.fps
    );
    let capture = FrameCapture::new(camera.clone(), config.capture.clone());
    let loop_handle = DetectionLoop::new(
        capture,
        client,
        publisher,
        control.clone(),
        config.loop_settings(),
    )
    .spawn()?;

    let api_handle = if args.no_api {
        None
    } else {
        let api = StatusApi::new(
            ApiConfig {
                addr: config.api_addr.clone(),
            },
            store.clone(),
        );
        Some(api.spawn()?)
    };

    let (tx, rx) = crossbeam_channel::unbounded();
    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Event::Shutdown);
    })
    .expect("error setting Ctrl-C handler");
    spawn_command_reader(tx)?;

    let result = run_ui(
        &rx,
        &control,
        &store,
        &camera,
        config.overlay_path.as_deref(),
        &mut status_line,
    );

    log::info!("shutting down");
    let stats = loop_handle.stop()?;
    if let Some(api_handle) = api_handle {
        api_handle.stop()?;
    }
    camera.release();
    status_line.finish(&format!(
        "stopped after {} submissions ({} applied, {} failed)",
        stats.submissions, stats.applied, stats.failures
    ));
    result
}

fn run_ui(
    rx: &Receiver<Event>,
    control: &LoopControl,
    store: &DetectionStore,
    camera: &CameraSession,
    overlay_path: Option<&Path>,
    status_line: &mut live_detect::ui::StatusLine,
) -> Result<()> {
    let mut subscription = store.subscribe();
    let mut renderer = OverlayRenderer::new(RasterSurface::new());
    loop {
        match rx.recv_timeout(UI_REFRESH) {
            Ok(Event::Shutdown) => return Ok(()),
            Ok(Event::Toggle) => {
                control.toggle();
            }
            Ok(Event::SetFps(fps)) => {
                if let Err(err) = control.set_fps(fps) {
                    log::warn!("{}", err);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }

        for snapshot in subscription.drain() {
            for line in detail_lines(snapshot.detections()) {
                println!("  {line}");
            }
        }
        let snapshot = subscription.current().clone();
        status_line.update(&control.status().to_string(), &summary_line(&snapshot));

        let Some(path) = overlay_path else {
            continue;
        };
        let video_size = camera.video_size()?;
        if renderer.refresh(video_size, &snapshot).is_some() {
            let frame = camera.current_image()?;
            let annotated = compose_over(&frame, renderer.surface().image());
            if let Err(err) = annotated.save_with_format(path, image::ImageFormat::Png) {
                log::warn!("failed to write overlay {}: {}", path.display(), err);
            }
        }
    }
}

/// Forward stdin commands until EOF. Quitting via stdin is the same as Ctrl-C.
fn spawn_command_reader(tx: Sender<Event>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let event = match line.trim() {
                    "t" | "toggle" => Event::Toggle,
                    "q" | "quit" => Event::Shutdown,
                    other => match other.parse::<u32>() {
                        Ok(fps) => Event::SetFps(fps),
                        Err(_) => {
                            log::warn!("unknown command '{}' (t, q, or a frame rate)", other);
                            continue;
                        }
                    },
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}
