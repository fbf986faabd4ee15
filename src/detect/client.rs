use anyhow::{anyhow, Result};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::detect::result::DetectionResult;
use crate::frame::Frame;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a detection call produced no result.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DetectionRequestError {
    /// The service answered with a non-success status.
    #[error("Detection failed: {0}")]
    Status(u16),
    /// The request never completed (connect, timeout, reset).
    #[error("detection transport failed: {0}")]
    Transport(String),
    /// A success status carried a body that is not a detection result.
    #[error("detection response unreadable: {0}")]
    Decode(String),
}

/// Remote detector seam.
///
/// Implementations perform exactly one call per `send` and never retry;
/// pacing and failure policy belong to the detection loop.
pub trait DetectionService: Send {
    fn send(&mut self, frame: &Frame) -> Result<DetectionResult, DetectionRequestError>;
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: &'a str,
}

/// JSON-over-HTTP detection client.
pub struct HttpDetectionClient {
    agent: ureq::Agent,
    url: String,
}

impl HttpDetectionClient {
    /// `timeout` bounds the whole call (connect, upload, response).
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| anyhow!("invalid detection url {}: {}", url, e))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported detection url scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl DetectionService for HttpDetectionClient {
    fn send(&mut self, frame: &Frame) -> Result<DetectionResult, DetectionRequestError> {
        let image = frame.to_base64();
        let body = serde_json::to_string(&DetectRequest { image: &image })
            .map_err(|e| DetectionRequestError::Transport(e.to_string()))?;

        log::debug!(
            "sending {}x{} frame ({} bytes) to {}",
            frame.width,
            frame.height,
            frame.encoded_len(),
            self.url
        );
        let response = match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(response) => response,
            // Failure bodies are not part of the contract; only the status is kept.
            Err(ureq::Error::Status(code, _)) => return Err(DetectionRequestError::Status(code)),
            Err(ureq::Error::Transport(transport)) => {
                return Err(DetectionRequestError::Transport(transport.to_string()))
            }
        };

        let text = response
            .into_string()
            .map_err(|e| DetectionRequestError::Decode(e.to_string()))?;
        parse_response(text.as_bytes())
    }
}

/// Parse a success body, deriving any quadrant the service left out.
pub fn parse_response(body: &[u8]) -> Result<DetectionResult, DetectionRequestError> {
    let mut result: DetectionResult =
        serde_json::from_slice(body).map_err(|e| DetectionRequestError::Decode(e.to_string()))?;
    result.fill_missing_quadrants();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RESPONSE: &str = r#"{
        "detections": [
            {"class": "cup", "confidence": 0.87, "bbox": [10, 20, 100, 50], "quadrant": "5"},
            {"class": "person", "confidence": 0.64, "bbox": [400, 60, 120, 300]}
        ],
        "performance": {
            "total_detections": 3,
            "filtered_detections": 2,
            "image_size": [640, 480],
            "confidence_threshold": 0.5
        }
    }"#;

    #[test]
    fn parses_service_payload() {
        let result = parse_response(SAMPLE_RESPONSE.as_bytes()).unwrap();
        assert_eq!(result.detections.len(), 2);
        assert_eq!(result.detections[0].class, "cup");
        assert_eq!(result.detections[0].bbox, vec![10.0, 20.0, 100.0, 50.0]);
        assert_eq!(result.detections[0].quadrant, "5");
        // center (460, 210) of a 640x480 image
        assert_eq!(result.detections[1].quadrant, "6");
        assert_eq!(result.performance.total_detections, 3);
        assert_eq!(result.performance.image_size, [640, 480]);
    }

    #[test]
    fn empty_result_is_valid() {
        let result = parse_response(br#"{"detections": []}"#).unwrap();
        assert!(result.detections.is_empty());
        assert_eq!(result.performance.filtered_detections, 0);
    }

    #[test]
    fn garbage_body_is_decode_error() {
        let err = parse_response(b"<html>oops</html>").unwrap_err();
        assert!(matches!(err, DetectionRequestError::Decode(_)));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpDetectionClient::new("ftp://host/detect", DEFAULT_REQUEST_TIMEOUT).is_err());
        assert!(HttpDetectionClient::new("not a url", DEFAULT_REQUEST_TIMEOUT).is_err());
        assert!(
            HttpDetectionClient::new("http://localhost:5000/detect", DEFAULT_REQUEST_TIMEOUT)
                .is_ok()
        );
    }

    #[test]
    fn status_error_reads_like_the_status_line() {
        assert_eq!(
            DetectionRequestError::Status(503).to_string(),
            "Detection failed: 503"
        );
    }
}
