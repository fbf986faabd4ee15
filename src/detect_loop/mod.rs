//! The capture → detect → publish loop.
//!
//! One tick walks `Idle → Capturing → Sending → Applying → Idle`. The loop is
//! strictly sequential: the remote call is the only blocking step and nothing
//! else is captured while it runs. Responses carry the submission number they
//! were issued under and are dropped if detection was paused (or the loop
//! stopped) in the meantime.

mod control;
mod throttle;

pub use control::{LoopControl, LoopStatus, MAX_FPS, MIN_FPS};
pub use throttle::{interval_for_fps, Throttle, DEFAULT_MAX_BACKOFF};

use anyhow::{anyhow, Result};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{DetectionRequestError, DetectionService};
use crate::frame::FrameSource;
use crate::store::DetectionPublisher;

pub const DEFAULT_AUTOSTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Upper bound for the failure backoff interval.
    pub max_backoff: Duration,
    /// Enable detection this long after the loop thread starts. `None` leaves
    /// it to the caller.
    pub autostart_delay: Option<Duration>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_backoff: DEFAULT_MAX_BACKOFF,
            autostart_delay: Some(DEFAULT_AUTOSTART_DELAY),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Capturing,
    Sending,
    Applying,
}

/// What a single tick did.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Stopped,
    Disabled,
    /// Too early; try again after the given wait.
    Throttled(Duration),
    /// No usable frame this tick.
    Skipped,
    /// Detections published.
    Applied(usize),
    /// Response arrived after detection was paused.
    Discarded,
    Failed(DetectionRequestError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub submissions: u64,
    pub applied: u64,
    pub discarded: u64,
    pub failures: u64,
    pub skipped: u64,
}

pub struct DetectionLoop<C, S> {
    capture: C,
    service: S,
    publisher: DetectionPublisher,
    control: LoopControl,
    settings: LoopSettings,
    throttle: Throttle,
    fps: u32,
    state: LoopState,
    stats: LoopStats,
}

impl<C, S> DetectionLoop<C, S>
where
    C: FrameSource,
    S: DetectionService,
{
    pub fn new(
        capture: C,
        service: S,
        publisher: DetectionPublisher,
        control: LoopControl,
        settings: LoopSettings,
    ) -> Self {
        let fps = control.fps();
        Self {
            capture,
            service,
            publisher,
            control,
            throttle: Throttle::new(fps, settings.max_backoff),
            settings,
            fps,
            state: LoopState::Idle,
            stats: LoopStats::default(),
        }
    }

    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// Run at most one capture/submit cycle at `now`.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.control.is_stopped() {
            return TickOutcome::Stopped;
        }
        let fps = self.control.fps();
        if fps != self.fps {
            self.fps = fps;
            self.throttle.set_fps(fps);
        }
        if !self.control.is_enabled() {
            return TickOutcome::Disabled;
        }
        if !self.throttle.ready(now) {
            return TickOutcome::Throttled(self.throttle.remaining(now));
        }

        self.state = LoopState::Capturing;
        let frame = match self.capture.capture_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return self.skip(),
            Err(err) => {
                log::warn!("frame capture failed: {:#}", err);
                return self.skip();
            }
        };

        let Some(seq) = self.control.issue() else {
            self.state = LoopState::Idle;
            return TickOutcome::Disabled;
        };
        self.throttle.begin(now);
        self.stats.submissions += 1;

        self.state = LoopState::Sending;
        let response = self.service.send(&frame);
        drop(frame);

        self.state = LoopState::Applying;
        let outcome = match response {
            Ok(result) => {
                self.throttle.finish(true);
                let count = result.detections.len();
                let publisher = &self.publisher;
                let detections = result.detections;
                if self
                    .control
                    .apply_if_current(seq, LoopStatus::Detected(count), || {
                        publisher.publish(detections);
                    })
                {
                    log::debug!("submission #{} applied: {} detections", seq, count);
                    self.stats.applied += 1;
                    TickOutcome::Applied(count)
                } else {
                    log::debug!("submission #{} no longer current, dropping response", seq);
                    self.stats.discarded += 1;
                    TickOutcome::Discarded
                }
            }
            Err(err) => {
                self.throttle.finish(false);
                self.stats.failures += 1;
                log::warn!(
                    "submission #{} failed: {} (retry in {:?})",
                    seq,
                    err,
                    self.throttle.effective_interval()
                );
                self.control
                    .apply_if_current(seq, LoopStatus::DetectionError(err.to_string()), || {});
                TickOutcome::Failed(err)
            }
        };
        self.state = LoopState::Idle;
        outcome
    }

    fn skip(&mut self) -> TickOutcome {
        self.stats.skipped += 1;
        self.state = LoopState::Idle;
        TickOutcome::Skipped
    }

    /// How long to wait after `outcome` before ticking again. `None` means
    /// wait for a control change.
    pub fn next_delay(&self, outcome: &TickOutcome, now: Instant) -> Option<Duration> {
        match outcome {
            TickOutcome::Stopped | TickOutcome::Disabled => None,
            TickOutcome::Throttled(wait) => Some(*wait),
            TickOutcome::Skipped => Some(self.throttle.target_interval()),
            TickOutcome::Applied(_) | TickOutcome::Discarded | TickOutcome::Failed(_) => {
                Some(self.throttle.remaining(now))
            }
        }
    }

    /// Drive the loop on the current thread until stopped.
    pub fn run(mut self) -> LoopStats {
        loop {
            let since = self.control.epoch();
            let outcome = self.tick(Instant::now());
            if outcome == TickOutcome::Stopped {
                break;
            }
            let delay = self.next_delay(&outcome, Instant::now());
            if delay.is_some_and(|d| d.is_zero()) {
                continue;
            }
            self.control.park(since, delay);
        }
        log::info!(
            "detection loop stopped: {} submissions, {} applied, {} discarded, {} failed",
            self.stats.submissions,
            self.stats.applied,
            self.stats.discarded,
            self.stats.failures
        );
        self.stats
    }
}

impl<C, S> DetectionLoop<C, S>
where
    C: FrameSource + 'static,
    S: DetectionService + 'static,
{
    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> Result<LoopHandle> {
        let control = self.control.clone();
        let autostart = self.settings.autostart_delay;
        let join = std::thread::Builder::new()
            .name("detection-loop".to_string())
            .spawn(move || {
                if let Some(delay) = autostart {
                    if self.control.sleep_unless_stopped(delay) {
                        self.control.enable();
                    }
                }
                self.run()
            })?;
        Ok(LoopHandle {
            control,
            join: Some(join),
        })
    }
}

/// Owner of a spawned loop thread. Dropping it stops the loop.
#[derive(Debug)]
pub struct LoopHandle {
    control: LoopControl,
    join: Option<JoinHandle<LoopStats>>,
}

impl LoopHandle {
    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    /// Stop ticking and wait for the current cycle to finish.
    pub fn stop(mut self) -> Result<LoopStats> {
        self.control.stop();
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("detection loop thread panicked")),
            None => Ok(LoopStats::default()),
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            self.control.stop();
            let _ = join.join();
        }
    }
}
