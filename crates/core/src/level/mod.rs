//! Level definitions and the store that serves them.
//!
//! A [`LevelDefinition`] is the immutable record read from `levels.json`.
//! Loading one through [`LevelStore::load`] validates it and produces a
//! [`LevelRuntimeState`], which carries the derived step count and any
//! non-fatal [`ValidationIssue`]s alongside a working copy of the definition.

use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::{assets::InstrumentCatalogue, Result, RhythmError};

/// Steps per visual group when a level does not specify one.
pub const DEFAULT_GROUP_SIZE: usize = 4;

/// One instrument's step sequence within a level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub steps: Vec<u8>,
}

impl Track {
    pub fn new(name: impl Into<String>, steps: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Whether the track sounds at `step`.
    pub fn is_hit(&self, step: usize) -> bool {
        self.steps.get(step) == Some(&1)
    }

    pub fn hit_count(&self) -> usize {
        self.steps.iter().filter(|&&step| step == 1).count()
    }
}

/// A level exactly as it is stored in the level source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDefinition {
    pub name: String,
    pub bpm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps per beat; `None` means one step per beat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
    #[serde(default)]
    pub pattern: Option<Vec<Track>>,
}

impl LevelDefinition {
    pub fn new(name: impl Into<String>, bpm: f64, pattern: Vec<Track>) -> Self {
        Self {
            name: name.into(),
            bpm,
            group_size: None,
            description: None,
            resolution: None,
            pattern: Some(pattern),
        }
    }
}

/// Recoverable problems found while loading a level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("track `{track}` has {found} steps, expected {expected}")]
    StepCountMismatch {
        track: String,
        expected: usize,
        found: usize,
    },
    #[error("track `{track}` appears more than once")]
    DuplicateTrack { track: String },
    #[error("track `{track}` does not match a known instrument")]
    UnknownInstrument { track: String },
    #[error("track `{track}` has value {value} at step {step}")]
    InvalidStepValue { track: String, step: usize, value: u8 },
}

/// A validated level together with the values derived at load time.
#[derive(Debug, Clone)]
pub struct LevelRuntimeState {
    index: usize,
    definition: LevelDefinition,
    amount_of_steps: usize,
    issues: Vec<ValidationIssue>,
}

impl LevelRuntimeState {
    /// Validates `definition` and derives its runtime values.
    ///
    /// The first track's length becomes the step count. Tracks that disagree
    /// are reported as [`ValidationIssue::StepCountMismatch`] and left as-is.
    pub fn new(
        index: usize,
        definition: &LevelDefinition,
        catalogue: Option<&InstrumentCatalogue>,
    ) -> Result<Self> {
        let tracks = match definition.pattern.as_deref() {
            Some(tracks) if !tracks.is_empty() => tracks,
            _ => {
                return Err(RhythmError::MissingPattern {
                    level: definition.name.clone(),
                })
            }
        };

        let internal_bpm = definition.bpm * definition.resolution.unwrap_or(1.0);
        if !internal_bpm.is_finite() || internal_bpm <= 0.0 {
            return Err(RhythmError::InvalidTempo {
                level: definition.name.clone(),
                bpm: internal_bpm,
            });
        }

        let amount_of_steps = tracks[0].steps.len();
        let issues = validate_tracks(tracks, amount_of_steps, catalogue);
        for issue in &issues {
            tracing::warn!(level = %definition.name, %issue, "level validation issue");
        }
        tracing::info!(
            level = %definition.name,
            index,
            amount_of_steps,
            "initialised level"
        );

        Ok(Self {
            index,
            definition: definition.clone(),
            amount_of_steps,
            issues,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn definition(&self) -> &LevelDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> Option<&str> {
        self.definition.description.as_deref()
    }

    pub fn bpm(&self) -> f64 {
        self.definition.bpm
    }

    pub fn resolution(&self) -> f64 {
        self.definition.resolution.unwrap_or(1.0)
    }

    pub fn group_size(&self) -> usize {
        self.definition
            .group_size
            .filter(|&size| size > 0)
            .unwrap_or(DEFAULT_GROUP_SIZE)
    }

    /// Whether `step` opens a new visual group (never the first step).
    pub fn is_group_start(&self, step: usize) -> bool {
        step > 0 && step % self.group_size() == 0
    }

    pub fn tracks(&self) -> &[Track] {
        self.definition.pattern.as_deref().unwrap_or_default()
    }

    pub fn track(&self, name: &str) -> Option<&Track> {
        self.tracks().iter().find(|track| track.name == name)
    }

    pub fn amount_of_steps(&self) -> usize {
        self.amount_of_steps
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Whether the target pattern has a hit for `track` at `step`.
    pub fn is_required(&self, track: &str, step: usize) -> bool {
        self.track(track).is_some_and(|track| track.is_hit(step))
    }

    /// Number of hits the player has to reproduce across all tracks.
    pub fn required_tick_count(&self) -> usize {
        self.tracks().iter().map(Track::hit_count).sum()
    }

    /// Seconds per step at the given tempo multiplier.
    pub fn beat_duration(&self, tempo_multiplier: f64) -> f64 {
        let effective_bpm = self.bpm() * tempo_multiplier;
        let internal_bpm = effective_bpm * self.resolution();
        60.0 / internal_bpm
    }

    /// Seconds per full traversal of the pattern.
    pub fn bar_duration(&self, tempo_multiplier: f64) -> f64 {
        self.beat_duration(tempo_multiplier) * self.amount_of_steps as f64
    }
}

fn validate_tracks(
    tracks: &[Track],
    amount_of_steps: usize,
    catalogue: Option<&InstrumentCatalogue>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for track in tracks {
        if !seen.insert(track.name.as_str()) {
            issues.push(ValidationIssue::DuplicateTrack {
                track: track.name.clone(),
            });
        }
        if let Some(catalogue) = catalogue {
            if !catalogue.is_playable_instrument(&track.name) {
                issues.push(ValidationIssue::UnknownInstrument {
                    track: track.name.clone(),
                });
            }
        }
        if track.steps.len() != amount_of_steps {
            issues.push(ValidationIssue::StepCountMismatch {
                track: track.name.clone(),
                expected: amount_of_steps,
                found: track.steps.len(),
            });
        }
        if let Some((step, &value)) = track.steps.iter().enumerate().find(|&(_, &v)| v > 1) {
            issues.push(ValidationIssue::InvalidStepValue {
                track: track.name.clone(),
                step,
                value,
            });
        }
    }

    issues
}

/// Ordered collection of level definitions.
#[derive(Debug, Clone)]
pub struct LevelStore {
    levels: Vec<LevelDefinition>,
}

impl LevelStore {
    pub fn new(levels: Vec<LevelDefinition>) -> Result<Self> {
        if levels.is_empty() {
            return Err(RhythmError::NoLevels);
        }
        Ok(Self { levels })
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let levels: Vec<LevelDefinition> = serde_json::from_str(source)?;
        Self::new(levels)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let store = Self::from_json_str(&source)?;
        tracing::info!(path = %path.display(), levels = store.len(), "loaded levels");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    pub fn get(&self, index: usize) -> Option<&LevelDefinition> {
        self.levels.get(index)
    }

    pub fn levels(&self) -> &[LevelDefinition] {
        &self.levels
    }

    /// Validates the level at `index` and returns its runtime state.
    pub fn load(
        &self,
        index: usize,
        catalogue: Option<&InstrumentCatalogue>,
    ) -> Result<LevelRuntimeState> {
        let definition = self.get(index).ok_or(RhythmError::LevelOutOfRange {
            index,
            len: self.len(),
        })?;
        LevelRuntimeState::new(index, definition, catalogue)
    }
}
