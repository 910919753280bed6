//! Loop playback scheduling.
//!
//! Playback runs on two independent clocks. Audio triggers are handed to the
//! [`SampleLibrary`] up front, stamped with times on the library's own
//! monotonic clock, so they stay drift-free. Visual ticks and the finish
//! notification are deferred tasks on the device-side [`PlaybackClock`] and
//! fire when [`Scheduler::advance`] moves that clock past them. The audio bias
//! (0.05 s by default) is assumed to cover the jitter between the two clocks
//! under normal load; it is a soft real-time margin, not a guarantee.
//!
//! Every deferred task lives in a [`TaskRegistry`] arena addressed by
//! generational [`TaskId`]s, so cancelling a session is one bulk removal and
//! stale handles from earlier sessions can never hit a newer task.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

use crate::{
    assets::{SampleLibrary, VoiceId},
    config::{AUDIO_TRIGGER_BIAS_SECONDS, CURRENT_REPEAT_COUNT},
    level::LevelRuntimeState,
    GameConfig, Result, RhythmError,
};

/// Device-side clock that drives visual callbacks.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    pub time_seconds: f64,
}

impl PlaybackClock {
    pub fn advance(&mut self, delta: f64) {
        self.time_seconds = (self.time_seconds + delta).max(self.time_seconds);
    }
}

/// One step of a playback plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledStep {
    /// Seconds from session start.
    pub offset: f64,
    pub bar: u32,
    pub step: usize,
    /// Samples that sound on this step.
    pub samples: Vec<String>,
}

/// Every tick, trigger and the finish time for one loop traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackPlan {
    pub repeat_count: u32,
    pub beat_duration: f64,
    pub bar_duration: f64,
    pub audio_bias: f64,
    pub steps: Vec<ScheduledStep>,
    pub finish_offset: f64,
}

impl PlaybackPlan {
    pub fn build(
        level: &LevelRuntimeState,
        tempo_multiplier: f64,
        repeat_count: u32,
        audio_bias: f64,
    ) -> Self {
        let beat_duration = level.beat_duration(tempo_multiplier);
        let bar_duration = level.bar_duration(tempo_multiplier);
        let amount_of_steps = level.amount_of_steps();

        let mut steps = Vec::with_capacity(repeat_count as usize * amount_of_steps);
        for bar in 0..repeat_count {
            for step in 0..amount_of_steps {
                let samples = level
                    .tracks()
                    .iter()
                    .filter(|track| track.is_hit(step))
                    .map(|track| track.name.clone())
                    .collect();
                steps.push(ScheduledStep {
                    offset: bar as f64 * bar_duration + step as f64 * beat_duration,
                    bar,
                    step,
                    samples,
                });
            }
        }

        Self {
            repeat_count,
            beat_duration,
            bar_duration,
            audio_bias,
            steps,
            finish_offset: repeat_count as f64 * bar_duration,
        }
    }

    /// Audio-clock offset for a step's samples.
    pub fn trigger_offset(&self, step: &ScheduledStep) -> f64 {
        self.audio_bias + step.offset
    }

    pub fn trigger_count(&self) -> usize {
        self.steps.iter().map(|step| step.samples.len()).sum()
    }
}

/// Generational handle into a [`TaskRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

/// Identifies one playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

/// Anything a session scheduled that can still be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelHandle {
    Timer(TaskId),
    Voice(VoiceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskAction {
    Tick(usize),
    Finish,
}

#[derive(Debug, Clone)]
struct Task {
    session: SessionId,
    due: f64,
    action: TaskAction,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    task: Option<Task>,
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    due: f64,
    seq: u64,
    id: TaskId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .total_cmp(&other.due)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

/// Arena of deferred tasks ordered by due time.
///
/// Tasks due at the same time come out in insertion order.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
    live: usize,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn insert(&mut self, task: Task) -> TaskId {
        let due = task.due;
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.task = Some(task);
                TaskId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    task: Some(task),
                });
                TaskId {
                    index,
                    generation: 0,
                }
            }
        };

        self.queue.push(Reverse(QueueEntry {
            due,
            seq: self.next_seq,
            id,
        }));
        self.next_seq += 1;
        self.live += 1;
        id
    }

    fn release(&mut self, index: u32) -> Option<Task> {
        let slot = self.slots.get_mut(index as usize)?;
        let task = slot.task.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.live -= 1;
        Some(task)
    }

    /// Removes a pending task. Returns false if it already ran or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let current = self
            .slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.generation == id.generation && slot.task.is_some());
        current && self.release(id.index).is_some()
    }

    /// Removes every pending task that belongs to `session`.
    pub fn cancel_session(&mut self, session: SessionId) -> usize {
        let indices: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.task
                    .as_ref()
                    .is_some_and(|task| task.session == session)
            })
            .map(|(index, _)| index as u32)
            .collect();

        let released = indices
            .into_iter()
            .filter_map(|index| self.release(index))
            .count();
        if released > 0 {
            self.compact();
        }
        released
    }

    /// Drops queue entries whose task was cancelled.
    fn compact(&mut self) {
        let slots = &self.slots;
        self.queue.retain(|Reverse(entry)| {
            slots
                .get(entry.id.index as usize)
                .is_some_and(|slot| slot.generation == entry.id.generation && slot.task.is_some())
        });
    }

    pub fn pending_for(&self, session: SessionId) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.task.as_ref())
            .filter(|task| task.session == session)
            .count()
    }

    fn pop_due(&mut self, now: f64) -> Option<Task> {
        while let Some(Reverse(entry)) = self.queue.peek().copied() {
            if entry.due > now {
                return None;
            }
            self.queue.pop();

            let current = self
                .slots
                .get(entry.id.index as usize)
                .is_some_and(|slot| slot.generation == entry.id.generation);
            if current {
                if let Some(task) = self.release(entry.id.index) {
                    return Some(task);
                }
            }
        }
        None
    }
}

/// The live traversal of a level loop.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub id: SessionId,
    /// Device clock time the session started at.
    pub start_clock_time: f64,
    /// Library clock time the session started at.
    pub audio_start_time: f64,
    pub repeat_count: u32,
    pub beat_duration: f64,
    pub bar_duration: f64,
    pub scheduled_handles: Vec<CancelHandle>,
}

/// Proof that [`Scheduler::play_loop`] started a session.
///
/// Another session cannot start until this one finishes or is stopped.
#[must_use = "the session must be stopped before another can start"]
#[derive(Debug, PartialEq, Eq)]
pub struct SessionHandle {
    id: SessionId,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

struct ActiveSession {
    session: PlaybackSession,
    on_tick: Box<dyn FnMut(usize)>,
    on_finish: Option<Box<dyn FnOnce()>>,
}

/// Schedules level loops against a [`SampleLibrary`] and the device clock.
pub struct Scheduler<L> {
    library: L,
    clock: PlaybackClock,
    registry: TaskRegistry,
    active: Option<ActiveSession>,
    next_session: u64,
    repeat_count: u32,
    audio_bias: f64,
}

impl<L: SampleLibrary> Scheduler<L> {
    pub fn new(library: L) -> Self {
        Self {
            library,
            clock: PlaybackClock::default(),
            registry: TaskRegistry::new(),
            active: None,
            next_session: 0,
            repeat_count: CURRENT_REPEAT_COUNT,
            audio_bias: AUDIO_TRIGGER_BIAS_SECONDS,
        }
    }

    pub fn with_config(library: L, config: &GameConfig) -> Self {
        let mut scheduler = Self::new(library);
        scheduler.repeat_count = config.repeat_count();
        scheduler.audio_bias = config.schedule.audio_bias_seconds;
        scheduler
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut L {
        &mut self.library
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.active.as_ref().map(|active| &active.session)
    }

    /// Timer tasks still waiting to fire.
    pub fn pending_tasks(&self) -> usize {
        self.registry.len()
    }

    /// Builds the plan [`Self::play_loop`] would schedule for `level`.
    pub fn plan(&self, level: &LevelRuntimeState, tempo_multiplier: f64) -> PlaybackPlan {
        PlaybackPlan::build(level, tempo_multiplier, self.repeat_count, self.audio_bias)
    }

    /// Schedules the level's loop `repeat_count` times.
    ///
    /// Returns `Ok(None)` without scheduling anything when the sample library
    /// is not ready, [`RhythmError::SessionActive`] while an earlier
    /// session is still running and [`RhythmError::InvalidTempoMultiplier`]
    /// for a zero, negative or non-finite tempo. Every handle scheduled is passed to
    /// `register_cancelable` and recorded on the session.
    pub fn play_loop(
        &mut self,
        level: &LevelRuntimeState,
        tempo_multiplier: f64,
        on_tick: impl FnMut(usize) + 'static,
        on_finish: impl FnOnce() + 'static,
        mut register_cancelable: impl FnMut(CancelHandle),
    ) -> Result<Option<SessionHandle>> {
        if self.active.is_some() {
            return Err(RhythmError::SessionActive);
        }
        if !(tempo_multiplier.is_finite() && tempo_multiplier > 0.0) {
            return Err(RhythmError::InvalidTempoMultiplier(tempo_multiplier));
        }
        if !self.library.is_ready() {
            tracing::info!(level = level.name(), "sample library not ready, playback skipped");
            return Ok(None);
        }

        let plan = self.plan(level, tempo_multiplier);
        let id = SessionId(self.next_session);
        self.next_session += 1;

        let start_clock_time = self.clock.time_seconds;
        let audio_start_time = self.library.now();
        let mut handles = Vec::with_capacity(plan.steps.len() + plan.trigger_count() + 1);

        for step in &plan.steps {
            let timer = self.registry.insert(Task {
                session: id,
                due: start_clock_time + step.offset,
                action: TaskAction::Tick(step.step),
            });
            handles.push(CancelHandle::Timer(timer));

            let at_time = audio_start_time + plan.trigger_offset(step);
            for sample in &step.samples {
                let voice = self.library.play(sample, at_time, 1.0);
                tracing::debug!(sample = %sample, at_time, "scheduled trigger");
                handles.push(CancelHandle::Voice(voice));
            }
        }

        let finish = self.registry.insert(Task {
            session: id,
            due: start_clock_time + plan.finish_offset,
            action: TaskAction::Finish,
        });
        handles.push(CancelHandle::Timer(finish));

        for handle in &handles {
            register_cancelable(*handle);
        }

        tracing::info!(
            level = level.name(),
            tempo_multiplier,
            repeat_count = plan.repeat_count,
            steps = plan.steps.len(),
            "playback started"
        );

        self.active = Some(ActiveSession {
            session: PlaybackSession {
                id,
                start_clock_time,
                audio_start_time,
                repeat_count: plan.repeat_count,
                beat_duration: plan.beat_duration,
                bar_duration: plan.bar_duration,
                scheduled_handles: handles,
            },
            on_tick: Box::new(on_tick),
            on_finish: Some(Box::new(on_finish)),
        });

        Ok(Some(SessionHandle { id }))
    }

    /// Moves the device clock forward and fires every task now due.
    ///
    /// Returns the number of callbacks invoked.
    pub fn advance(&mut self, delta: f64) -> usize {
        self.clock.advance(delta);
        self.run_due()
    }

    fn run_due(&mut self) -> usize {
        let now = self.clock.time_seconds;
        let mut fired = 0;

        while let Some(task) = self.registry.pop_due(now) {
            let Some(active) = self
                .active
                .as_mut()
                .filter(|active| active.session.id == task.session)
            else {
                continue;
            };

            match task.action {
                TaskAction::Tick(step) => {
                    (active.on_tick)(step);
                }
                TaskAction::Finish => {
                    let on_finish = active.on_finish.take();
                    self.end_session(task.session);
                    tracing::info!("playback finished");
                    if let Some(on_finish) = on_finish {
                        on_finish();
                    }
                }
            }
            fired += 1;
        }

        fired
    }

    fn end_session(&mut self, id: SessionId) {
        self.registry.cancel_session(id);
        self.active = None;
    }

    /// Cancels one scheduled handle. Repeated calls are harmless.
    pub fn cancel(&mut self, handle: CancelHandle) {
        match handle {
            CancelHandle::Timer(id) => {
                self.registry.cancel(id);
            }
            CancelHandle::Voice(voice) => self.library.cancel(voice),
        }
    }

    /// Stops the active session, cancelling all of its timers and triggers.
    ///
    /// Returns false when nothing was playing.
    pub fn stop(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        let session = active.session;
        let timers = self.registry.cancel_session(session.id);
        for handle in &session.scheduled_handles {
            if let CancelHandle::Voice(voice) = handle {
                self.library.cancel(*voice);
            }
        }
        tracing::info!(cancelled_timers = timers, "playback stopped");
        true
    }

    /// Stops the session `handle` refers to, if it is still the active one.
    pub fn stop_session(&mut self, handle: SessionHandle) -> bool {
        let is_current = self
            .active
            .as_ref()
            .is_some_and(|active| active.session.id == handle.id);
        is_current && self.stop()
    }
}

impl<L: std::fmt::Debug> std::fmt::Debug for Scheduler<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("library", &self.library)
            .field("clock", &self.clock)
            .field("pending_tasks", &self.registry.len())
            .field("active", &self.active.as_ref().map(|a| a.session.id))
            .finish()
    }
}
