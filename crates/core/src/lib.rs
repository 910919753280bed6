//! Core library for the Rhythm Recall game.
//!
//! The crate holds everything between the level data and the front end: level
//! validation, loop playback scheduling against an external sample library,
//! pattern matching, the scoring state machine and progress persistence. Each
//! module owns one subsystem, and [`Game`] wires them together for a single
//! player's run through the level list.

pub mod assets;
pub mod config;
pub mod error;
pub mod game;
pub mod level;
pub mod matcher;
pub mod progress;
pub mod scoring;
pub mod timeline;

pub use assets::{
    InstrumentCatalogue, InstrumentSample, SampleLibrary, SampleTrigger, VirtualSampleLibrary,
    VoiceId,
};
pub use config::{GameConfig, RuleVariant, ScheduleConfig, ScoringConfig};
pub use error::{Result, RhythmError};
pub use game::{Game, ToggleOutcome};
pub use level::{LevelDefinition, LevelRuntimeState, LevelStore, Track, ValidationIssue};
pub use matcher::{can_advance, is_correct_pattern, MatchPolicy, UserPattern};
pub use progress::{
    restore_progress, JsonFileProgressStore, MemoryProgressStore, ProgressRecord, ProgressStore,
};
pub use scoring::{LevelPhase, ScoreState};
pub use timeline::{
    CancelHandle, PlaybackClock, PlaybackPlan, PlaybackSession, ScheduledStep, Scheduler,
    SessionHandle, SessionId, TaskId, TaskRegistry,
};
