use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{voice::Voice, AudioOutput, VoiceId};
use crate::{
    config::AudioConfig,
    mapping::{
        AudioDirective, FootstepCadence, MasterLevel, RainDensity, TempoChange, Trigger,
        TriggerKind,
    },
    MotionAudioError, Result,
};

/// One-shots fire in this order within a single directive.
const ONE_SHOT_ORDER: [TriggerKind; 3] = [
    TriggerKind::GestureSwoosh,
    TriggerKind::Clap,
    TriggerKind::Impact,
];

/// Whether the scheduler is allowed to touch the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Playing,
    Stopped,
}

/// Effects that persist across directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuousKind {
    Footsteps,
    Rain,
}

impl ContinuousKind {
    pub const ALL: [ContinuousKind; 2] = [ContinuousKind::Footsteps, ContinuousKind::Rain];
}

/// Stable reference to a running continuous process.
///
/// Handles are generational: once the process stops, its handle never
/// resolves again even if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    index: usize,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cadence {
    Footsteps(FootstepCadence),
    Rain(RainDensity),
}

impl Cadence {
    fn kind(&self) -> ContinuousKind {
        match self {
            Self::Footsteps(_) => ContinuousKind::Footsteps,
            Self::Rain(_) => ContinuousKind::Rain,
        }
    }

    fn interval_secs(&self) -> f64 {
        match self {
            Self::Footsteps(cadence) => cadence.interval_ms / 1000.0,
            Self::Rain(density) => density.burst_interval_ms / 1000.0,
        }
    }

    /// True when switching to `other` moves the onset grid.
    fn retunes_to(&self, other: &Cadence) -> bool {
        match (self, other) {
            (Self::Footsteps(a), Self::Footsteps(b)) => {
                a.interval_ms != b.interval_ms || a.jitter_ms != b.jitter_ms
            }
            (Self::Rain(a), Self::Rain(b)) => a != b,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingVoice {
    id: VoiceId,
    start: f64,
    /// Nominal cycle onset the voice belongs to.
    onset: f64,
}

/// Runtime state of one continuous effect: a loop of short enveloped
/// voices laid out ahead of the output clock.
#[derive(Debug, Clone)]
pub struct ScheduledSoundProcess {
    cadence: Cadence,
    next_onset: f64,
    last_started_onset: Option<f64>,
    pending: Vec<PendingVoice>,
    occurrences: u64,
}

impl ScheduledSoundProcess {
    fn new(cadence: Cadence, first_onset: f64) -> Self {
        Self {
            cadence,
            next_onset: first_onset,
            last_started_onset: None,
            pending: Vec::new(),
            occurrences: 0,
        }
    }

    pub fn kind(&self) -> ContinuousKind {
        self.cadence.kind()
    }

    /// Nominal interval between occurrences in milliseconds.
    pub fn interval_ms(&self) -> f64 {
        self.cadence.interval_secs() * 1000.0
    }

    /// Onset of the next occurrence that has not been laid out yet.
    pub fn next_onset(&self) -> f64 {
        self.next_onset
    }

    pub fn last_started_onset(&self) -> Option<f64> {
        self.last_started_onset
    }

    /// Occurrences laid out since the process started.
    pub fn occurrences(&self) -> u64 {
        self.occurrences
    }

    /// Forgets voices that already started; they can no longer be cancelled.
    fn settle(&mut self, now: f64) {
        let mut latest = self.last_started_onset;
        self.pending.retain(|voice| {
            if voice.start <= now {
                latest = Some(latest.map_or(voice.onset, |t: f64| t.max(voice.onset)));
                false
            } else {
                true
            }
        });
        self.last_started_onset = latest;
    }

    /// Cancels every voice that has not started yet.
    fn cancel_pending(&mut self, output: &AudioOutput, now: f64) -> Result<usize> {
        self.settle(now);
        let mut cancelled = 0;
        for voice in self.pending.drain(..) {
            if output.cancel_pending(voice.id)? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    process: Option<ScheduledSoundProcess>,
}

/// Arena of running continuous processes.
#[derive(Debug, Default)]
struct ProcessRegistry {
    slots: Vec<Slot>,
}

impl ProcessRegistry {
    fn insert(&mut self, process: ScheduledSoundProcess) -> ProcessHandle {
        if let Some(index) = self.slots.iter().position(|slot| slot.process.is_none()) {
            let slot = &mut self.slots[index];
            slot.generation += 1;
            slot.process = Some(process);
            return ProcessHandle {
                index,
                generation: slot.generation,
            };
        }

        self.slots.push(Slot {
            generation: 0,
            process: Some(process),
        });
        ProcessHandle {
            index: self.slots.len() - 1,
            generation: 0,
        }
    }

    fn get(&self, handle: ProcessHandle) -> Option<&ScheduledSoundProcess> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.process.as_ref())
    }

    fn get_mut(&mut self, handle: ProcessHandle) -> Option<&mut ScheduledSoundProcess> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.process.as_mut())
    }

    fn remove(&mut self, handle: ProcessHandle) -> Option<ScheduledSoundProcess> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.process.take())
    }

    fn find(&self, kind: ContinuousKind) -> Option<ProcessHandle> {
        self.handles()
            .into_iter()
            .find(|handle| self.get(*handle).map(|p| p.kind()) == Some(kind))
    }

    fn handles(&self) -> Vec<ProcessHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.process.is_some())
            .map(|(index, slot)| ProcessHandle {
                index,
                generation: slot.generation,
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.process.is_some()).count()
    }
}

/// What a single [`AudioScheduler::apply_directive`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub started: Vec<ContinuousKind>,
    pub retuned: Vec<ContinuousKind>,
    pub stopped: Vec<ContinuousKind>,
    pub fired: Vec<TriggerKind>,
    pub pan: Option<f32>,
    pub tempo_change: Option<TempoChange>,
}

/// Turns directives into voices on the shared output.
///
/// Continuous effects live in a registry keyed by kind, so re-applying a
/// directive never doubles a loop. Their occurrences are laid out at most
/// `lookahead` seconds ahead of the output clock; [`AudioScheduler::advance_to`]
/// alternates laying out and rendering so loops never run dry.
pub struct AudioScheduler {
    output: AudioOutput,
    state: SchedulerState,
    registry: ProcessRegistry,
    rng: StdRng,
    tempo: Option<f32>,
    lookahead: f64,
}

impl AudioScheduler {
    pub fn new(config: &AudioConfig, output: AudioOutput) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            output,
            state: SchedulerState::Idle,
            registry: ProcessRegistry::default(),
            rng,
            tempo: None,
            lookahead: config.lookahead_secs.max(0.01),
        }
    }

    /// Opens the output if needed. Fails with `OutputUnavailable` when the
    /// sink cannot be initialised.
    pub fn start(&mut self) -> Result<()> {
        if self.state == SchedulerState::Playing {
            return Ok(());
        }
        self.output.ensure_started()?;
        self.state = SchedulerState::Playing;
        tracing::info!("scheduler playing");
        Ok(())
    }

    /// Cancels every continuous process. Voices that already started,
    /// one-shots included, decay naturally; occurrences laid out ahead of
    /// the clock are dropped.
    pub fn stop(&mut self) -> Result<()> {
        let now = self.output.current_time()?;
        for handle in self.registry.handles() {
            if let Some(mut process) = self.registry.remove(handle) {
                let cancelled = process.cancel_pending(&self.output, now)?;
                tracing::debug!(kind = ?process.kind(), cancelled, "continuous process stopped");
            }
        }
        if self.state == SchedulerState::Playing {
            tracing::info!("scheduler stopped");
        }
        self.state = SchedulerState::Stopped;
        Ok(())
    }

    /// Stops and closes the output for good.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop()?;
        self.output.close()
    }

    /// Returns the current playback state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Returns `true` while directives are being applied.
    pub fn is_playing(&self) -> bool {
        self.state == SchedulerState::Playing
    }

    /// Returns the tempo of the last applied directive.
    pub fn tempo(&self) -> Option<f32> {
        self.tempo
    }

    /// Returns the output this scheduler drives.
    pub fn output(&self) -> &AudioOutput {
        &self.output
    }

    /// Returns how many continuous processes are live.
    pub fn process_count(&self) -> usize {
        self.registry.len()
    }

    /// Returns the handle of the live process of `kind`, if any.
    pub fn process_handle(&self, kind: ContinuousKind) -> Option<ProcessHandle> {
        self.registry.find(kind)
    }

    /// Returns the live process of `kind`, if any.
    pub fn process(&self, kind: ContinuousKind) -> Option<&ScheduledSoundProcess> {
        self.registry
            .find(kind)
            .and_then(|handle| self.registry.get(handle))
    }

    /// Applies a directive at the current output time.
    ///
    /// Master level and tempo go first, then continuous processes are
    /// started, retuned or stopped, then pan, and finally one-shots fire in
    /// gesture, clap, impact order.
    pub fn apply_directive(&mut self, directive: &AudioDirective) -> Result<ApplyReport> {
        if !self.is_playing() {
            return Err(MotionAudioError::output_unavailable(format!(
                "scheduler is {:?}",
                self.state
            )));
        }

        let now = self.output.current_time()?;
        let mut report = ApplyReport {
            tempo_change: directive.tempo_change(),
            ..Default::default()
        };

        match directive.master() {
            MasterLevel::Set { value } => self.output.set_master_gain(value)?,
            MasterLevel::Ramp {
                target,
                duration_secs,
            } => self.output.ramp_master_gain(target, duration_secs)?,
        }

        if let Some(change) = directive.tempo_change() {
            tracing::info!(from = change.from, to = change.to, "tempo retuned");
        }
        self.tempo = Some(directive.tempo());

        for kind in ContinuousKind::ALL {
            let requested = match kind {
                ContinuousKind::Footsteps => directive.footsteps().map(Cadence::Footsteps),
                ContinuousKind::Rain => directive.rain().map(Cadence::Rain),
            };
            self.reconcile(kind, requested, now, &mut report)?;
        }

        if let Some(pan) = directive.pan() {
            self.output.set_pan(pan)?;
            report.pan = Some(pan);
        }

        let velocity = 0.5 + 0.5 * directive.energy();
        for kind in ONE_SHOT_ORDER {
            let Some(trigger) = directive.trigger(kind) else {
                continue;
            };
            let voice = match *trigger {
                Trigger::GestureSwoosh => Voice::gesture_swoosh(now, velocity, &mut self.rng)?,
                Trigger::Clap => Voice::clap(now, velocity, &mut self.rng)?,
                Trigger::Impact { strength } => Voice::impact(now, strength, &mut self.rng)?,
                _ => continue,
            };
            self.output.schedule(&voice)?;
            report.fired.push(kind);
        }

        self.pump()?;
        Ok(report)
    }

    /// Lays out continuous occurrences up to the lookahead horizon.
    pub fn pump(&mut self) -> Result<()> {
        if !self.is_playing() {
            return Ok(());
        }
        let now = self.output.current_time()?;
        let horizon = now + self.lookahead;

        for handle in self.registry.handles() {
            let Some(process) = self.registry.get_mut(handle) else {
                continue;
            };
            process.settle(now);
            while process.next_onset < horizon {
                let onset = process.next_onset;
                let interval = process.cadence.interval_secs();
                match process.cadence {
                    Cadence::Footsteps(cadence) => {
                        let voice = Voice::footstep(onset, cadence.intensity, &mut self.rng)?;
                        let id = self.output.schedule(&voice)?;
                        process.pending.push(PendingVoice {
                            id,
                            start: onset,
                            onset,
                        });

                        let jitter = if cadence.jitter_ms > 0.0 {
                            self.rng.gen_range(-cadence.jitter_ms..=cadence.jitter_ms) / 1000.0
                        } else {
                            0.0
                        };
                        process.next_onset = onset + interval + jitter;
                    }
                    Cadence::Rain(density) => {
                        for _ in 0..density.drops_per_burst {
                            let start = onset + self.rng.gen_range(0.0..interval);
                            let voice = Voice::rain_drop(start, &mut self.rng)?;
                            let id = self.output.schedule(&voice)?;
                            process.pending.push(PendingVoice { id, start, onset });
                        }
                        process.next_onset = onset + interval;
                    }
                }
                process.occurrences += 1;
            }
        }
        Ok(())
    }

    /// Renders the output up to `time`, laying out continuous occurrences
    /// ahead of the clock as it goes.
    pub fn advance_to(&mut self, time: f64) -> Result<()> {
        loop {
            let now = self.output.current_time()?;
            if now >= time {
                return Ok(());
            }
            self.pump()?;
            self.output.advance_to(time.min(now + self.lookahead))?;
            if self.output.current_time()? <= now {
                // Less than one frame left.
                return Ok(());
            }
        }
    }

    fn reconcile(
        &mut self,
        kind: ContinuousKind,
        requested: Option<Cadence>,
        now: f64,
        report: &mut ApplyReport,
    ) -> Result<()> {
        let existing = self.registry.find(kind);
        match (existing, requested) {
            (None, None) => {}
            (None, Some(cadence)) => {
                let handle = self
                    .registry
                    .insert(ScheduledSoundProcess::new(cadence, now));
                tracing::info!(
                    ?kind,
                    ?handle,
                    interval_ms = cadence.interval_secs() * 1000.0,
                    "continuous process started"
                );
                report.started.push(kind);
            }
            (Some(handle), Some(cadence)) => {
                let Some(process) = self.registry.get_mut(handle) else {
                    return Ok(());
                };
                if !process.cadence.retunes_to(&cadence) {
                    // Loudness tweaks apply from the next occurrence on.
                    process.cadence = cadence;
                    return Ok(());
                }

                let cancelled = process.cancel_pending(&self.output, now)?;
                let interval = cadence.interval_secs();
                process.cadence = cadence;
                process.next_onset = process
                    .last_started_onset
                    .map_or(now, |last| last + interval)
                    .max(now);
                tracing::debug!(
                    ?kind,
                    interval_ms = interval * 1000.0,
                    next_onset = process.next_onset,
                    cancelled,
                    "continuous process retuned"
                );
                report.retuned.push(kind);
            }
            (Some(handle), None) => {
                if let Some(mut process) = self.registry.remove(handle) {
                    process.cancel_pending(&self.output, now)?;
                    tracing::info!(?kind, "continuous process stopped");
                    report.stopped.push(kind);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AudioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioScheduler")
            .field("state", &self.state)
            .field("processes", &self.registry.len())
            .field("tempo", &self.tempo)
            .field("lookahead", &self.lookahead)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::audio::{NullSink, SoundKind};

    fn config() -> AudioConfig {
        AudioConfig {
            sample_rate: 8_000,
            block_size: 256,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn scheduler() -> AudioScheduler {
        let config = config();
        let output = AudioOutput::new(&config, NullSink).unwrap();
        let mut scheduler = AudioScheduler::new(&config, output);
        scheduler.start().unwrap();
        scheduler
    }

    fn steps(interval_ms: f64) -> Trigger {
        Trigger::Footsteps(FootstepCadence {
            interval_ms,
            jitter_ms: 50.0,
            intensity: 0.6,
        })
    }

    fn directive(triggers: Vec<Trigger>) -> AudioDirective {
        AudioDirective::new(MasterLevel::Set { value: 0.5 }, 100.0, 0.5, triggers, None).unwrap()
    }

    /// Steps the output and records every footstep onset it ever saw.
    fn footstep_onsets(scheduler: &mut AudioScheduler, until: f64) -> Vec<f64> {
        let mut seen = BTreeMap::new();
        let mut time = scheduler.output().current_time().unwrap();
        loop {
            for voice in scheduler.output().scheduled_voices().unwrap() {
                if voice.kind == SoundKind::Footstep {
                    seen.insert(voice.id, voice.start);
                }
            }
            if time >= until {
                break;
            }
            time += 0.1;
            scheduler.advance_to(time).unwrap();
        }
        let mut onsets: Vec<f64> = seen.into_values().collect();
        onsets.sort_by(f64::total_cmp);
        onsets
    }

    #[test]
    fn directives_require_a_started_scheduler() {
        let config = config();
        let output = AudioOutput::new(&config, NullSink).unwrap();
        let mut scheduler = AudioScheduler::new(&config, output);
        let err = scheduler.apply_directive(&directive(vec![])).unwrap_err();
        assert!(matches!(err, MotionAudioError::OutputUnavailable(_)));
    }

    #[test]
    fn reapplying_a_directive_keeps_one_process_per_kind() {
        let mut scheduler = scheduler();
        let directive = directive(vec![steps(500.0), Trigger::Rain(RainDensity::default())]);

        let first = scheduler.apply_directive(&directive).unwrap();
        let handle = scheduler.process_handle(ContinuousKind::Footsteps).unwrap();
        let second = scheduler.apply_directive(&directive).unwrap();

        assert_eq!(first.started, vec![ContinuousKind::Footsteps, ContinuousKind::Rain]);
        assert!(second.started.is_empty());
        assert!(second.retuned.is_empty());
        assert_eq!(scheduler.process_count(), 2);
        assert_eq!(scheduler.process_handle(ContinuousKind::Footsteps), Some(handle));
    }

    #[test]
    fn one_shots_fire_once_per_call_in_order() {
        let mut scheduler = scheduler();
        let directive = directive(vec![
            Trigger::Impact { strength: 0.8 },
            Trigger::Clap,
            Trigger::GestureSwoosh,
        ]);

        let report = scheduler.apply_directive(&directive).unwrap();
        assert_eq!(
            report.fired,
            vec![TriggerKind::GestureSwoosh, TriggerKind::Clap, TriggerKind::Impact]
        );
        assert_eq!(scheduler.output().scheduled_voices().unwrap().len(), 3);
    }

    #[test]
    fn footstep_cadence_stays_within_jitter() {
        let mut scheduler = scheduler();
        scheduler.apply_directive(&directive(vec![steps(300.0)])).unwrap();

        let onsets = footstep_onsets(&mut scheduler, 3.0);
        assert!(onsets.len() >= 8);
        for pair in onsets.windows(2) {
            let gap_ms = (pair[1] - pair[0]) * 1000.0;
            assert!((250.0 - 1e-6..=350.0 + 1e-6).contains(&gap_ms), "gap {gap_ms}");
        }
    }

    #[test]
    fn retune_waits_for_the_cycle_boundary() {
        let mut scheduler = scheduler();
        scheduler.apply_directive(&directive(vec![steps(700.0)])).unwrap();
        let handle = scheduler.process_handle(ContinuousKind::Footsteps).unwrap();
        scheduler.advance_to(1.0).unwrap();

        let before: Vec<_> = scheduler.output().scheduled_voices().unwrap();
        let report = scheduler.apply_directive(&directive(vec![steps(300.0)])).unwrap();
        let after = scheduler.output().scheduled_voices().unwrap();

        assert_eq!(report.retuned, vec![ContinuousKind::Footsteps]);
        assert_eq!(scheduler.process_handle(ContinuousKind::Footsteps), Some(handle));

        // Nothing that already started was cut.
        for voice in before.iter().filter(|v| v.start <= 1.0) {
            assert!(after.iter().any(|v| v.id == voice.id));
        }

        let process = scheduler.process(ContinuousKind::Footsteps).unwrap();
        let last = process.last_started_onset().unwrap();
        assert_eq!(process.interval_ms(), 300.0);

        // The next step lands one new interval after the last one heard.
        let first_new = after
            .iter()
            .filter(|v| v.kind == SoundKind::Footstep && v.start >= 1.0)
            .map(|v| v.start)
            .fold(f64::INFINITY, f64::min);
        assert!((first_new - (last + 0.3).max(1.0)).abs() < 1e-9);
    }

    #[test]
    fn dropping_a_trigger_stops_its_process() {
        let mut scheduler = scheduler();
        scheduler
            .apply_directive(&directive(vec![Trigger::Rain(RainDensity::default())]))
            .unwrap();
        let report = scheduler.apply_directive(&directive(vec![])).unwrap();

        assert_eq!(report.stopped, vec![ContinuousKind::Rain]);
        assert_eq!(scheduler.process_count(), 0);
        // Drops were laid out ahead of the clock and are gone again.
        assert!(scheduler.output().scheduled_voices().unwrap().is_empty());
    }

    #[test]
    fn stop_cancels_loops_but_lets_one_shots_ring() {
        let mut scheduler = scheduler();
        scheduler
            .apply_directive(&directive(vec![steps(300.0), Trigger::Impact { strength: 1.0 }]))
            .unwrap();
        scheduler.advance_to(0.05).unwrap();
        scheduler.stop().unwrap();

        let voices = scheduler.output().scheduled_voices().unwrap();
        assert!(voices.iter().any(|v| v.kind == SoundKind::Impact));
        assert!(voices.iter().all(|v| v.start <= 0.05));
        assert!(!scheduler.is_playing());
        assert!(scheduler.apply_directive(&directive(vec![])).is_err());
    }

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut registry = ProcessRegistry::default();
        let cadence = Cadence::Rain(RainDensity::default());
        let first = registry.insert(ScheduledSoundProcess::new(cadence, 0.0));
        registry.remove(first);
        let second = registry.insert(ScheduledSoundProcess::new(cadence, 0.0));

        assert_eq!(first.index, second.index);
        assert!(registry.get(first).is_none());
        assert!(registry.get(second).is_some());
    }
}
