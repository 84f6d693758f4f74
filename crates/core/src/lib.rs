//! Core library for turning video motion into live sound.
//!
//! Frames are differenced into motion samples ([`motion`]), summarised over a
//! short history, combined with optional scene hints ([`hint`]) and mapped to
//! audio directives ([`mapping`]). The [`audio`] scheduler realises those
//! directives on a single shared output graph, and [`session`] ties the
//! pieces into one tracking state machine driven by a periodic tick.

pub mod audio;
pub mod config;
pub mod error;
pub mod hint;
pub mod mapping;
pub mod motion;
pub mod session;

pub use audio::{
    AnalysisFrame, AnalysisTap, ApplyReport, AudioOutput, AudioScheduler, AudioSink,
    ContinuousKind, MemorySink, NullSink, OutputState, SchedulerState,
};
pub use config::{AppConfig, AudioConfig, MappingConfig, MotionConfig, TrackingConfig};
pub use error::{MotionAudioError, Result};
pub use hint::{ReplayHints, SceneDigest, SceneHint, SceneHintSource};
pub use mapping::{AudioDirective, AudioParameterMapper, MasterLevel, Trigger, TriggerKind};
pub use motion::{
    Bitmap, Direction, FrameDiffEstimator, Hotspot, MotionClass, MotionHistory, MotionPattern,
    MotionSample, MotionSummary, MotionTracker, MotionVector,
};
pub use session::{
    run_tracking, BitmapSource, DirectiveApplied, RunSummary, TrackingSession, TrackingState,
};
