//! detect_snapshot - run one image through the detection service
//!
//! Reads an image file, sends it to the service the same way the live client
//! does, prints the detections, and optionally writes an annotated PNG.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use live_detect::{
    detect::DetectionService,
    overlay::compose_over,
    ui::{Ui, UiMode},
    views::detail_lines,
    Frame, HttpDetectionClient, OverlayRenderer, RasterSurface,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect objects in a single image")]
struct Args {
    /// Image to analyse (any format the image crate decodes).
    input: PathBuf,

    #[arg(long, env = "LIVE_DETECT_SERVICE_URL", default_value = "http://localhost:5000/detect")]
    service_url: String,

    #[arg(long, env = "LIVE_DETECT_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    #[arg(long, env = "LIVE_DETECT_JPEG_QUALITY", default_value_t = 95)]
    jpeg_quality: u8,

    /// Write the image with grid and boxes to this PNG.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print the raw service response as JSON instead of the detail list.
    #[arg(long)]
    json: bool,

    /// Output mode: auto, plain, or pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::new(UiMode::parse(Some(&args.ui)), std::io::stderr().is_terminal());

    let (still, frame) = {
        let _stage = ui.stage("Encoding frame");
        let still = image::open(&args.input)
            .with_context(|| format!("read image {}", args.input.display()))?
            .to_rgb8();
        let frame = Frame::encode(&still, args.jpeg_quality)?;
        (still, frame)
    };

    let result = {
        let _stage = ui.stage("Requesting detections");
        let mut client =
            HttpDetectionClient::new(&args.service_url, Duration::from_millis(args.timeout_ms))?;
        client.send(&frame)?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in detail_lines(&result.detections) {
            println!("{line}");
        }
    }

    if let Some(output) = &args.output {
        let _stage = ui.stage("Rendering overlay");
        let mut renderer = OverlayRenderer::new(RasterSurface::new());
        let report = renderer.draw(still.dimensions(), &result.detections);
        if report.skipped > 0 {
            log::warn!("{} detections had unusable geometry", report.skipped);
        }
        compose_over(&still, renderer.surface().image())
            .save_with_format(output, image::ImageFormat::Png)
            .with_context(|| format!("write {}", output.display()))?;
    }
    Ok(())
}
