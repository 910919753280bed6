/// Result alias that carries the custom [`RhythmError`] type.
pub type Result<T> = std::result::Result<T, RhythmError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum RhythmError {
    /// Free-form failure that does not warrant its own variant.
    #[error("{0}")]
    Message(String),
    /// The level source contained no levels at all.
    #[error("level list is empty")]
    NoLevels,
    /// A level was defined without a `pattern` grid.
    #[error("level `{level}` has no pattern configured")]
    MissingPattern { level: String },
    /// A level declared a tempo that cannot drive playback.
    #[error("level `{level}` has invalid bpm {bpm}")]
    InvalidTempo { level: String, bpm: f64 },
    /// Lookup past the end of the level list.
    #[error("level index {index} out of range (have {len} levels)")]
    LevelOutOfRange { index: usize, len: usize },
    /// The level has not been unlocked yet.
    #[error("level {index} is still locked")]
    LevelLocked { index: usize },
    /// A toggle addressed a step outside the level's grid.
    #[error("step {step} is outside a {len}-step grid")]
    StepOutOfRange { step: usize, len: usize },
    /// A configuration value is outside the range the engine can use.
    #[error("config value `{field}` is invalid: {value}")]
    InvalidConfig { field: &'static str, value: f64 },
    /// Playback was asked for a tempo multiplier that cannot time a loop.
    #[error("tempo multiplier {0} must be finite and positive")]
    InvalidTempoMultiplier(f64),
    /// A playback session is still running and must be stopped first.
    #[error("a playback session is already active")]
    SessionActive,
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON (de)serialisation errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl RhythmError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<String> for RhythmError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
