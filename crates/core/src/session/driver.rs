use std::num::NonZeroU64;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::TrackingSession;
use crate::{hint::SceneHintSource, motion::Bitmap, MotionAudioError, Result};

/// Extra audio rendered after the last tick so one-shots can ring out.
const TAIL_SECS: f64 = 0.5;

/// Produces RGBA snapshots of the media at requested timestamps.
#[async_trait]
pub trait BitmapSource: Send {
    /// Frame at `timestamp` seconds, or `None` once the media has ended.
    async fn frame_at(&mut self, timestamp: f64) -> Result<Option<Bitmap>>;
}

/// Counters reported by [`run_tracking`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub directives: u64,
    pub hints: u64,
    pub fallback_hints: u64,
    /// Media time covered, in seconds.
    pub duration_secs: f64,
    pub cancelled: bool,
}

enum Pace {
    Realtime(tokio::time::Interval),
    Offline,
}

impl Pace {
    /// Waits for the next tick. Returns `false` when cancelled.
    async fn next(&mut self, cancel: &CancellationToken) -> bool {
        match self {
            Self::Realtime(ticker) => {
                tokio::select! {
                    _ = ticker.tick() => true,
                    _ = cancel.cancelled() => false,
                }
            }
            Self::Offline => {
                tokio::task::yield_now().await;
                !cancel.is_cancelled()
            }
        }
    }
}

/// Drives `session` over `frames` on one task until the media ends or
/// `cancel` fires.
///
/// Every tick samples a frame, optionally asks `hints` for a scene hint
/// (bounded by the configured timeout; failures fall back), feeds the frame
/// to the session and renders audio up to the next tick. Tracking is
/// stopped before returning, also on error. A zero tick interval is
/// rejected before tracking starts.
pub async fn run_tracking<S, H>(
    session: &mut TrackingSession,
    frames: &mut S,
    hints: Option<&H>,
    cancel: CancellationToken,
) -> Result<RunSummary>
where
    S: BitmapSource + ?Sized,
    H: SceneHintSource + ?Sized,
{
    if session.config().tracking.tick_interval_ms == 0 {
        return Err(MotionAudioError::invalid_input("tick interval must be at least 1ms"));
    }
    session.start_tracking()?;
    let result = drive(session, frames, hints, &cancel).await;
    let stopped = session.stop_tracking();

    let summary = result?;
    stopped?;
    session.advance_audio_to(summary.duration_secs + TAIL_SECS)?;

    tracing::info!(
        ticks = summary.ticks,
        directives = summary.directives,
        hints = summary.hints,
        cancelled = summary.cancelled,
        "tracking run finished"
    );
    Ok(summary)
}

async fn drive<S, H>(
    session: &mut TrackingSession,
    frames: &mut S,
    hints: Option<&H>,
    cancel: &CancellationToken,
) -> Result<RunSummary>
where
    S: BitmapSource + ?Sized,
    H: SceneHintSource + ?Sized,
{
    let tracking = session.config().tracking.clone();
    let period = tracking.tick_secs();
    // Zero turns scene hints off.
    let hint_every = NonZeroU64::new(u64::from(tracking.hint_every_ticks));
    let hint_timeout = Duration::from_millis(tracking.hint_timeout_ms);

    let mut pace = if tracking.realtime {
        let mut ticker = tokio::time::interval(Duration::from_millis(tracking.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Pace::Realtime(ticker)
    } else {
        Pace::Offline
    };

    let mut summary = RunSummary::default();
    let mut timestamp = 0.0;

    loop {
        if !pace.next(cancel).await {
            tracing::info!(timestamp, "tracking cancelled");
            summary.cancelled = true;
            break;
        }

        let Some(frame) = frames.frame_at(timestamp).await? else {
            break;
        };

        if let (Some(source), Some(every)) = (hints, hint_every) {
            if summary.ticks % every.get() == 0 {
                let described = source.describe(&frame, timestamp);
                let hint = match tokio::time::timeout(hint_timeout, described).await {
                    Ok(result) => result,
                    Err(_) => Err(MotionAudioError::collaborator_unavailable(format!(
                        "scene hint timed out after {}ms",
                        hint_timeout.as_millis()
                    ))),
                };
                if matches!(hint, Err(MotionAudioError::CollaboratorUnavailable(_))) {
                    summary.fallback_hints += 1;
                }
                session.submit_scene_hint(hint)?;
                summary.hints += 1;
            }
        }

        if session.tick(timestamp, frame)?.is_some() {
            summary.directives += 1;
        }
        summary.ticks += 1;

        timestamp += period;
        summary.duration_secs = timestamp;
        session.advance_audio_to(timestamp)?;
    }

    Ok(summary)
}
