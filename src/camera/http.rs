//! Network camera source.
//!
//! Supports cameras that serve either a multipart MJPEG stream or a single
//! JPEG per GET (snapshot endpoints). The first image is decoded while opening
//! so the native resolution is known before any frame is requested.
//!
//! MJPEG cameras push frames faster than detection consumes them, so a reader
//! thread drains the stream and keeps only the latest decoded image.
//!
//! HTTP 401/403 while opening map to `PermissionDenied`; any other failure to
//! reach the camera maps to `DeviceUnavailable`.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{CameraBackend, CameraConstraints, CameraError, VideoStream};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpCamera {
    url: String,
}

impl HttpCamera {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl CameraBackend for HttpCamera {
    fn device(&self) -> &str {
        &self.url
    }

    fn open(&mut self, _: &CameraConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        let response = agent
            .get(&self.url)
            .call()
            .map_err(|err| classify(&self.url, err))?;
        let unavailable =
            |err: anyhow::Error| CameraError::DeviceUnavailable(format!("{}: {:#}", self.url, err));

        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let source = if content_type.contains("multipart") {
            let mut stream = MjpegStream::new(response.into_reader());
            let first = stream
                .read_next_jpeg()
                .and_then(|jpeg| decode_jpeg(&jpeg))
                .map_err(unavailable)?;
            HttpSource::Mjpeg(MjpegReader::spawn(&self.url, stream, first).map_err(unavailable)?)
        } else {
            let mut bytes = Vec::new();
            response
                .into_reader()
                .take(MAX_JPEG_BYTES as u64)
                .read_to_end(&mut bytes)
                .map_err(|err| CameraError::from_io(&self.url, &err))?;
            let first = decode_jpeg(&bytes).map_err(unavailable)?;
            HttpSource::Snapshot {
                agent,
                size: first.dimensions(),
                primed: Some(first),
            }
        };

        let stream = HttpStream {
            url: self.url.clone(),
            source,
        };
        let (width, height) = stream.video_size();
        log::info!(
            "HttpCamera: connected to {} ({}x{})",
            self.url,
            width,
            height
        );
        Ok(Box::new(stream))
    }
}

fn classify(url: &str, err: ureq::Error) -> CameraError {
    match err {
        ureq::Error::Status(code @ (401 | 403), _) => {
            CameraError::PermissionDenied(format!("{}: HTTP {}", url, code))
        }
        ureq::Error::Status(code, _) => {
            CameraError::DeviceUnavailable(format!("{}: HTTP {}", url, code))
        }
        ureq::Error::Transport(transport) => {
            CameraError::DeviceUnavailable(format!("{}: {}", url, transport))
        }
    }
}

fn decode_jpeg(jpeg: &[u8]) -> Result<RgbImage> {
    Ok(image::load_from_memory(jpeg)
        .context("decode camera jpeg")?
        .into_rgb8())
}

enum HttpSource {
    Mjpeg(MjpegReader),
    Snapshot {
        agent: ureq::Agent,
        size: (u32, u32),
        primed: Option<RgbImage>,
    },
    Stopped,
}

struct HttpStream {
    url: String,
    source: HttpSource,
}

impl VideoStream for HttpStream {
    fn video_size(&self) -> (u32, u32) {
        match &self.source {
            HttpSource::Mjpeg(reader) => reader.size(),
            HttpSource::Snapshot { size, .. } => *size,
            HttpSource::Stopped => (0, 0),
        }
    }

    fn current_image(&mut self) -> Result<RgbImage> {
        match &mut self.source {
            HttpSource::Mjpeg(reader) => reader.latest(),
            HttpSource::Snapshot {
                agent,
                size,
                primed,
            } => {
                let image = match primed.take() {
                    Some(image) => image,
                    None => decode_jpeg(&fetch_single_jpeg(agent, &self.url)?)?,
                };
                *size = image.dimensions();
                Ok(image)
            }
            HttpSource::Stopped => Err(anyhow!("camera stream stopped")),
        }
    }

    fn stop(&mut self) {
        if let HttpSource::Mjpeg(reader) = &mut self.source {
            reader.stop();
        }
        self.source = HttpSource::Stopped;
    }
}

struct LatestFrame {
    image: Option<RgbImage>,
    decoded: u64,
    ended: Option<String>,
}

/// Background drain of an MJPEG stream into a single latest-image slot.
struct MjpegReader {
    latest: Arc<Mutex<LatestFrame>>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MjpegReader {
    fn spawn(url: &str, mut stream: MjpegStream, first: RgbImage) -> Result<Self> {
        let latest = Arc::new(Mutex::new(LatestFrame {
            image: Some(first),
            decoded: 1,
            ended: None,
        }));
        let shutdown = Arc::new(AtomicBool::new(false));
        let join = {
            let latest = latest.clone();
            let shutdown = shutdown.clone();
            let url = url.to_string();
            std::thread::Builder::new()
                .name("mjpeg-reader".to_string())
                .spawn(move || read_frames(&url, &mut stream, &latest, &shutdown))
                .context("spawn mjpeg reader")?
        };
        Ok(Self {
            latest,
            shutdown,
            join: Some(join),
        })
    }

    fn size(&self) -> (u32, u32) {
        lock(&self.latest)
            .image
            .as_ref()
            .map(RgbImage::dimensions)
            .unwrap_or((0, 0))
    }

    /// Copy of the most recent complete frame.
    fn latest(&self) -> Result<RgbImage> {
        let latest = lock(&self.latest);
        if let Some(cause) = &latest.ended {
            return Err(anyhow!("mjpeg stream ended: {}", cause));
        }
        latest
            .image
            .clone()
            .ok_or_else(|| anyhow!("no mjpeg frame decoded yet"))
    }

    /// Signal the reader and wait for it. A read in progress finishes first,
    /// bounded by the read timeout.
    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::warn!("HttpCamera: mjpeg reader thread panicked");
            }
        }
    }
}

impl Drop for MjpegReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_frames(
    url: &str,
    stream: &mut MjpegStream,
    latest: &Mutex<LatestFrame>,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let jpeg = match stream.read_newest_jpeg() {
            Ok(jpeg) => jpeg,
            Err(err) => {
                if !shutdown.load(Ordering::SeqCst) {
                    log::warn!("HttpCamera: {} stream ended: {:#}", url, err);
                }
                lock(latest).ended = Some(format!("{:#}", err));
                return;
            }
        };
        match decode_jpeg(&jpeg) {
            Ok(image) => {
                let mut slot = lock(latest);
                slot.image = Some(image);
                slot.decoded += 1;
            }
            Err(err) => log::debug!("HttpCamera: {} dropped frame: {:#}", url, err),
        }
    }
}

fn lock(latest: &Mutex<LatestFrame>) -> MutexGuard<'_, LatestFrame> {
    latest
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn take_buffered_jpeg(&mut self) -> Option<Vec<u8>> {
        let (start, end) = find_jpeg_bounds(&self.buffer)?;
        let frame = self.buffer[start..end].to_vec();
        self.buffer.drain(..end);
        Some(frame)
    }

    /// Next frame, passing over older complete frames already buffered.
    fn read_newest_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut frame = self.read_next_jpeg()?;
        while let Some(newer) = self.take_buffered_jpeg() {
            frame = newer;
        }
        Ok(frame)
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some(frame) = self.take_buffered_jpeg() {
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Locate the first complete SOI..EOI span in a byte buffer.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
