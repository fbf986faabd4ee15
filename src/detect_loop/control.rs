use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 30;

/// User-facing loop status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopStatus {
    Initializing,
    AccessingCamera,
    CameraReady,
    Processing,
    Detected(usize),
    DetectionError(String),
    Paused,
    Running,
    CameraError(String),
}

impl LoopStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::DetectionError(_) | Self::CameraError(_))
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => f.write_str("Initializing..."),
            Self::AccessingCamera => f.write_str("Accessing camera..."),
            Self::CameraReady => f.write_str("Camera ready"),
            Self::Processing => f.write_str("Processing..."),
            Self::Detected(n) => write!(f, "Detected {} objects", n),
            // The cause goes to the log; the status line stays short.
            Self::DetectionError(_) => f.write_str("Detection error"),
            Self::Paused => f.write_str("Detection paused"),
            Self::Running => f.write_str("Detection running"),
            Self::CameraError(cause) => write!(f, "Camera error: {}", cause),
        }
    }
}

#[derive(Debug)]
struct ControlState {
    enabled: bool,
    fps: u32,
    status: LoopStatus,
    stopped: bool,
    /// Last submission number handed out.
    issued: u64,
    /// Submission whose response may still be applied.
    live: Option<u64>,
    /// Bumped on every change a parked loop must react to.
    epoch: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ControlState>,
    changed: Condvar,
}

/// Cloneable remote for a detection loop.
#[derive(Clone, Debug)]
pub struct LoopControl {
    shared: Arc<Shared>,
}

impl LoopControl {
    /// Starts disabled.
    pub fn new(fps: u32) -> Result<Self> {
        validate_fps(fps)?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ControlState {
                    enabled: false,
                    fps,
                    status: LoopStatus::Initializing,
                    stopped: false,
                    issued: 0,
                    live: None,
                    epoch: 0,
                }),
                changed: Condvar::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, state: &mut ControlState) {
        state.epoch = state.epoch.wrapping_add(1);
        self.shared.changed.notify_all();
    }

    /// Flip detection on or off; returns the new enabled flag.
    pub fn toggle(&self) -> bool {
        let mut state = self.lock();
        let enabled = !state.enabled;
        self.set_enabled_locked(&mut state, enabled);
        enabled
    }

    pub fn enable(&self) {
        let mut state = self.lock();
        self.set_enabled_locked(&mut state, true);
    }

    /// Stop scheduling ticks. A request already in flight completes, but its
    /// response will not be applied.
    pub fn disable(&self) {
        let mut state = self.lock();
        self.set_enabled_locked(&mut state, false);
    }

    fn set_enabled_locked(&self, state: &mut ControlState, enabled: bool) {
        if state.stopped || state.enabled == enabled {
            return;
        }
        state.enabled = enabled;
        if enabled {
            state.status = LoopStatus::Running;
        } else {
            state.live = None;
            state.status = LoopStatus::Paused;
        }
        log::info!("detection {}", if enabled { "enabled" } else { "paused" });
        self.notify(state);
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn set_fps(&self, fps: u32) -> Result<()> {
        validate_fps(fps)?;
        let mut state = self.lock();
        if state.fps != fps {
            state.fps = fps;
            log::info!("detection frame rate set to {} fps", fps);
            self.notify(&mut state);
        }
        Ok(())
    }

    pub fn fps(&self) -> u32 {
        self.lock().fps
    }

    pub fn status(&self) -> LoopStatus {
        self.lock().status.clone()
    }

    /// Status updates from outside the loop (camera lifecycle).
    pub fn set_status(&self, status: LoopStatus) {
        self.lock().status = status;
    }

    /// Ends the loop; pending responses are dropped.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        state.enabled = false;
        state.live = None;
        self.notify(&mut state);
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Hand out the next submission number, or `None` when disabled.
    pub(crate) fn issue(&self) -> Option<u64> {
        let mut state = self.lock();
        if !state.enabled || state.stopped {
            return None;
        }
        state.issued += 1;
        state.live = Some(state.issued);
        state.status = LoopStatus::Processing;
        Some(state.issued)
    }

    /// Run `apply` and set `status` only if `seq` is still the live
    /// submission. Holding the lock across `apply` keeps a concurrent
    /// disable from interleaving with the publish.
    pub(crate) fn apply_if_current<F: FnOnce()>(
        &self,
        seq: u64,
        status: LoopStatus,
        apply: F,
    ) -> bool {
        let mut state = self.lock();
        if state.stopped || state.live != Some(seq) {
            return false;
        }
        apply();
        state.status = status;
        true
    }

    /// Block until something changes after `since`, the timeout passes, or
    /// the loop is stopped. `None` waits for a change only.
    pub(crate) fn park(&self, since: u64, timeout: Option<Duration>) {
        let state = self.lock();
        let unchanged = |s: &mut ControlState| !s.stopped && s.epoch == since;
        let _state = match timeout {
            Some(timeout) => {
                self.shared
                    .changed
                    .wait_timeout_while(state, timeout, unchanged)
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
            }
            None => self
                .shared
                .changed
                .wait_while(state, unchanged)
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        };
    }

    /// Sleep for `delay` unless stopped first. Returns false when stopped.
    pub(crate) fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(state, delay, |s| !s.stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !state.stopped
    }
}

fn validate_fps(fps: u32) -> Result<()> {
    if !(MIN_FPS..=MAX_FPS).contains(&fps) {
        return Err(anyhow!(
            "frame rate {} out of range ({}..={})",
            fps,
            MIN_FPS,
            MAX_FPS
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn status_strings() {
        let cases = [
            (LoopStatus::Initializing, "Initializing..."),
            (LoopStatus::AccessingCamera, "Accessing camera..."),
            (LoopStatus::CameraReady, "Camera ready"),
            (LoopStatus::Processing, "Processing..."),
            (LoopStatus::Detected(3), "Detected 3 objects"),
            (
                LoopStatus::DetectionError("Detection failed: 500".into()),
                "Detection error",
            ),
            (LoopStatus::Paused, "Detection paused"),
            (LoopStatus::Running, "Detection running"),
            (
                LoopStatus::CameraError("permission denied".into()),
                "Camera error: permission denied",
            ),
        ];
        for (status, text) in cases {
            assert_eq!(status.to_string(), text);
        }
    }

    #[test]
    fn disable_invalidates_live_submission() {
        let control = LoopControl::new(2).unwrap();
        assert!(control.issue().is_none());

        control.enable();
        let seq = control.issue().unwrap();
        control.disable();
        let mut applied = false;
        assert!(!control.apply_if_current(seq, LoopStatus::Detected(1), || applied = true));
        assert!(!applied);
        assert_eq!(control.status(), LoopStatus::Paused);

        control.enable();
        assert!(!control.apply_if_current(seq, LoopStatus::Detected(1), || {}));
        let next = control.issue().unwrap();
        assert!(next > seq);
        assert!(control.apply_if_current(next, LoopStatus::Detected(1), || {}));
        assert_eq!(control.status(), LoopStatus::Detected(1));
    }

    #[test]
    fn toggle_flips_and_reports() {
        let control = LoopControl::new(2).unwrap();
        assert!(control.toggle());
        assert_eq!(control.status(), LoopStatus::Running);
        assert!(!control.toggle());
        assert_eq!(control.status(), LoopStatus::Paused);
    }

    #[test]
    fn fps_is_range_checked() {
        assert!(LoopControl::new(0).is_err());
        let control = LoopControl::new(5).unwrap();
        assert!(control.set_fps(31).is_err());
        control.set_fps(1).unwrap();
        assert_eq!(control.fps(), 1);
    }

    #[test]
    fn park_wakes_on_change() {
        let control = LoopControl::new(2).unwrap();
        let since = control.epoch();
        let remote = control.clone();
        let toggler = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.toggle();
        });
        let started = Instant::now();
        control.park(since, Some(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        toggler.join().unwrap();
    }

    #[test]
    fn park_returns_at_once_if_already_changed() {
        let control = LoopControl::new(2).unwrap();
        let since = control.epoch();
        control.enable();
        let started = Instant::now();
        control.park(since, None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stopped_control_ignores_enable() {
        let control = LoopControl::new(2).unwrap();
        control.stop();
        control.enable();
        assert!(!control.is_enabled());
        assert!(!control.sleep_unless_stopped(Duration::from_secs(10)));
    }
}
