mod client;
mod result;

pub use client::{
    parse_response, DetectionRequestError, DetectionService, HttpDetectionClient,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use result::{quadrant_for, BboxError, BoundingBox, Detection, DetectionResult, Performance};
