//! Tracking state machine tying motion, hints, mapping and audio together.

mod driver;

pub use driver::{run_tracking, BitmapSource, RunSummary};

use serde::{Deserialize, Serialize};

use crate::{
    audio::{AnalysisTap, ApplyReport, AudioOutput, AudioScheduler},
    config::AppConfig,
    hint::{SceneDigest, SceneHint},
    mapping::{AudioDirective, AudioParameterMapper, Evaluation, MappingInput},
    motion::{Bitmap, MotionSample, MotionSummary, MotionTracker},
    MotionAudioError, Result,
};

/// Lifecycle of a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Idle,
    Tracking,
    Stopped,
}

/// Emitted every time a directive reaches the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveApplied {
    pub timestamp: f64,
    pub evaluation: Evaluation,
    pub sample: MotionSample,
    pub summary: MotionSummary,
    pub directive: AudioDirective,
    pub report: ApplyReport,
}

type Listener = Box<dyn FnMut(&DirectiveApplied) + Send>;

/// One motion-to-audio session over a single piece of media.
///
/// Transitions: `Idle -> Tracking` on [`TrackingSession::start_tracking`],
/// `Tracking -> Stopped` on [`TrackingSession::stop_tracking`], and
/// `Stopped -> Tracking` when tracking is started again.
pub struct TrackingSession {
    config: AppConfig,
    state: TrackingState,
    tracker: MotionTracker,
    mapper: AudioParameterMapper,
    scheduler: AudioScheduler,
    latest_hint: Option<SceneHint>,
    hint_fresh: bool,
    evaluated: bool,
    digest: SceneDigest,
    listeners: Vec<Listener>,
}

impl TrackingSession {
    pub fn new(config: AppConfig, output: AudioOutput) -> Self {
        Self {
            tracker: MotionTracker::new(&config.motion),
            mapper: AudioParameterMapper::new(config.mapping.clone()),
            scheduler: AudioScheduler::new(&config.audio, output),
            config,
            state: TrackingState::Idle,
            latest_hint: None,
            hint_fresh: false,
            evaluated: false,
            digest: SceneDigest::default(),
            listeners: Vec::new(),
        }
    }

    /// Starts the audio side and begins accepting ticks. Fails with
    /// `OutputUnavailable` if the output cannot be opened, leaving the
    /// session where it was.
    pub fn start_tracking(&mut self) -> Result<()> {
        if self.state == TrackingState::Tracking {
            return Ok(());
        }

        self.scheduler.start()?;
        self.tracker.reset();
        self.mapper.reset();
        self.latest_hint = None;
        self.hint_fresh = false;
        self.evaluated = false;
        self.state = TrackingState::Tracking;
        tracing::info!("tracking started");
        Ok(())
    }

    /// Stops every continuous sound. Only already sounding one-shots keep
    /// ringing after this returns.
    pub fn stop_tracking(&mut self) -> Result<()> {
        if self.state != TrackingState::Tracking {
            return Ok(());
        }
        self.scheduler.stop()?;
        self.state = TrackingState::Stopped;
        tracing::info!("tracking stopped");
        Ok(())
    }

    /// Stops tracking and closes the audio output for good.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop_tracking()?;
        self.scheduler.shutdown()
    }

    /// Registers a callback that sees every applied directive.
    pub fn on_directive_applied<F>(&mut self, listener: F)
    where
        F: FnMut(&DirectiveApplied) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Records the outcome of a scene-hint request. A collaborator failure
    /// is replaced by the low-confidence fallback hint; any other error is
    /// returned to the caller.
    pub fn submit_scene_hint(&mut self, hint: Result<SceneHint>) -> Result<()> {
        let hint = match hint {
            Ok(hint) => hint,
            Err(MotionAudioError::CollaboratorUnavailable(reason)) => {
                tracing::warn!(%reason, "scene hint unavailable, using fallback");
                SceneHint::fallback()
            }
            Err(err) => return Err(err),
        };

        tracing::debug!(
            mood = %hint.mood,
            scene = %hint.scene_type,
            confidence = hint.confidence,
            "scene hint received"
        );
        self.digest.record(&hint);
        self.latest_hint = Some(hint);
        self.hint_fresh = true;
        Ok(())
    }

    /// Measures `frame` and, once a sample exists, maps it to a directive
    /// and applies it.
    ///
    /// The first sample triggers the initial evaluation. Later ticks only
    /// re-evaluate while the scheduler is playing.
    pub fn tick(&mut self, timestamp: f64, frame: Bitmap) -> Result<Option<DirectiveApplied>> {
        if self.state != TrackingState::Tracking {
            return Err(MotionAudioError::invalid_input(format!(
                "tick at {timestamp:.3}s while {:?}",
                self.state
            )));
        }

        let Some(sample) = self.tracker.observe(timestamp, frame)? else {
            return Ok(None);
        };
        tracing::debug!(
            timestamp,
            intensity = sample.intensity,
            class = sample.classification.as_str(),
            "motion sample"
        );

        let evaluation = if self.evaluated {
            Evaluation::Periodic
        } else {
            Evaluation::Initial
        };
        if evaluation == Evaluation::Periodic && !self.scheduler.is_playing() {
            return Ok(None);
        }

        let Some(summary) = self.tracker.summary() else {
            return Ok(None);
        };

        let directive = self.mapper.evaluate(MappingInput {
            sample: &sample,
            summary: &summary,
            hint: self.latest_hint.as_ref(),
            fresh_hint: self.hint_fresh,
            evaluation,
        })?;
        self.hint_fresh = false;
        self.evaluated = true;

        let report = self.scheduler.apply_directive(&directive)?;
        let applied = DirectiveApplied {
            timestamp,
            evaluation,
            sample,
            summary,
            directive,
            report,
        };

        for listener in &mut self.listeners {
            listener(&applied);
        }
        Ok(Some(applied))
    }

    /// Renders audio up to `time` on the output clock.
    pub fn advance_audio_to(&mut self, time: f64) -> Result<()> {
        self.scheduler.advance_to(time)
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// Returns the configuration the session was built with.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns the motion tracker and its history.
    pub fn tracker(&self) -> &MotionTracker {
        &self.tracker
    }

    /// Returns the scheduler that owns playback.
    pub fn scheduler(&self) -> &AudioScheduler {
        &self.scheduler
    }

    /// Returns the shared audio output.
    pub fn output(&self) -> &AudioOutput {
        self.scheduler.output()
    }

    /// Read-only spectrum view of the master output.
    pub fn analysis_tap(&self) -> AnalysisTap {
        self.scheduler.output().analysis()
    }

    /// Returns the most recent scene hint of this run, fallbacks included.
    pub fn latest_hint(&self) -> Option<&SceneHint> {
        self.latest_hint.as_ref()
    }

    /// Returns the running tally of every hint received.
    pub fn scene_digest(&self) -> &SceneDigest {
        &self.digest
    }
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("state", &self.state)
            .field("scheduler", &self.scheduler)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        audio::{AudioSink, MemorySink, NullSink},
        mapping::TriggerKind,
    };

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 8_000;
        config.audio.seed = Some(5);
        config
    }

    fn session() -> TrackingSession {
        let config = config();
        let output = AudioOutput::new(&config.audio, NullSink).unwrap();
        TrackingSession::new(config, output)
    }

    fn frame(offset: u32) -> Bitmap {
        let mut frame = Bitmap::filled(80, 60, [0, 0, 0, 255]).unwrap();
        frame.fill_rect(offset, 10, 20, 20, [255, 255, 255, 255]);
        frame
    }

    #[test]
    fn ticks_require_tracking() {
        let mut session = session();
        assert!(matches!(
            session.tick(0.0, frame(0)).unwrap_err(),
            MotionAudioError::InvalidInput(_)
        ));
    }

    #[test]
    fn first_sample_gets_the_initial_evaluation() {
        let mut session = session();
        session.start_tracking().unwrap();

        assert!(session.tick(0.0, frame(0)).unwrap().is_none());
        let first = session.tick(0.2, frame(20)).unwrap().unwrap();
        let second = session.tick(0.4, frame(40)).unwrap().unwrap();

        assert_eq!(first.evaluation, Evaluation::Initial);
        assert_eq!(second.evaluation, Evaluation::Periodic);
    }

    #[test]
    fn collaborator_failure_falls_back() {
        let mut session = session();
        session.start_tracking().unwrap();
        session
            .submit_scene_hint(Err(MotionAudioError::collaborator_unavailable("timeout")))
            .unwrap();

        let hint = session.latest_hint().unwrap();
        assert!(hint.is_fallback);
        assert_eq!(session.scene_digest().fallbacks(), 1);

        assert!(session
            .submit_scene_hint(Err(MotionAudioError::msg("boom")))
            .is_err());
    }

    #[test]
    fn one_shots_from_a_hint_fire_once() {
        let mut session = session();
        session.start_tracking().unwrap();
        let hint = SceneHint::from_response_text(
            r#"{"mood":"energetic","scene_type":"indoor","key_objects":[],
                "motion_analysis":{"primary_action":"standing","movement_intensity":0.5,
                "gesture_detected":"clapping","collision_events":false},"confidence":0.9}"#,
        )
        .unwrap();
        session.submit_scene_hint(Ok(hint)).unwrap();

        session.tick(0.0, frame(0)).unwrap();
        let first = session.tick(0.2, frame(10)).unwrap().unwrap();
        let second = session.tick(0.4, frame(20)).unwrap().unwrap();

        assert!(first.report.fired.contains(&TriggerKind::Clap));
        assert!(!second.report.fired.contains(&TriggerKind::Clap));
    }

    #[test]
    fn listeners_see_every_directive() {
        let mut session = session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.on_directive_applied(move |applied| {
            sink.lock().unwrap().push(applied.timestamp);
        });

        session.start_tracking().unwrap();
        for (i, offset) in [0, 10, 20, 30].into_iter().enumerate() {
            session.tick(i as f64 * 0.2, frame(offset)).unwrap();
        }

        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn broken_output_keeps_session_idle() {
        struct Unplugged;

        impl AudioSink for Unplugged {
            fn open(&mut self, _sample_rate: u32, _channels: u16) -> Result<()> {
                Err(MotionAudioError::msg("unplugged"))
            }

            fn write(&mut self, _interleaved: &[f32]) -> Result<()> {
                Ok(())
            }

            fn close(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let config = config();
        let output = AudioOutput::new(&config.audio, Unplugged).unwrap();
        let mut session = TrackingSession::new(config, output);

        let err = session.start_tracking().unwrap_err();
        assert!(matches!(err, MotionAudioError::OutputUnavailable(_)));
        assert_eq!(session.state(), TrackingState::Idle);
    }

    #[test]
    fn stop_then_restart_resets_motion() {
        let config = config();
        let sink = MemorySink::new();
        let output = AudioOutput::new(&config.audio, sink.clone()).unwrap();
        let mut session = TrackingSession::new(config, output);

        session.start_tracking().unwrap();
        session.tick(0.0, frame(0)).unwrap();
        session.tick(0.2, frame(20)).unwrap();
        session.advance_audio_to(0.4).unwrap();
        session.stop_tracking().unwrap();
        assert_eq!(session.state(), TrackingState::Stopped);
        assert_eq!(session.scheduler().process_count(), 0);

        session.start_tracking().unwrap();
        assert!(session.tracker().history().is_empty());
        assert!(session.tick(0.6, frame(0)).unwrap().is_none());
        assert_eq!(sink.samples().unwrap().len(), 2 * 3_200);
    }
}
