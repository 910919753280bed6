use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{level::LevelRuntimeState, Result, RhythmError};

/// Rule used to decide whether the player's grid clears a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Every cell must equal the target, zeros included.
    Exact,
    /// Every target hit must be ticked; extra ticks are allowed.
    RequiredSubset,
}

impl MatchPolicy {
    pub fn matches(self, level: &LevelRuntimeState, user: &UserPattern) -> bool {
        match self {
            Self::Exact => is_correct_pattern(level, user),
            Self::RequiredSubset => can_advance(level, user),
        }
    }
}

/// The grid as entered by the player, keyed by track name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPattern {
    tracks: BTreeMap<String, Vec<u8>>,
}

impl UserPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// A blank grid with one all-zero row per level track.
    pub fn empty_for(level: &LevelRuntimeState) -> Self {
        let mut pattern = Self::new();
        for track in level.tracks() {
            pattern.set(&track.name, vec![0; level.amount_of_steps()]);
        }
        pattern
    }

    /// The level's own target grid.
    pub fn from_level(level: &LevelRuntimeState) -> Self {
        let mut pattern = Self::new();
        for track in level.tracks() {
            pattern.set(&track.name, track.steps.clone());
        }
        pattern
    }

    /// Parses `Kick=1010,Snare=0010` style grids.
    pub fn parse(source: &str) -> Result<Self> {
        let mut pattern = Self::new();
        for row in source.split(',').map(str::trim).filter(|row| !row.is_empty()) {
            let (name, cells) = row
                .split_once('=')
                .ok_or_else(|| format!("grid row `{row}` is missing `=`"))?;
            let steps = cells
                .trim()
                .chars()
                .map(|cell| match cell {
                    '1' | 'x' | 'X' => Ok(1),
                    '0' | '.' | '-' => Ok(0),
                    other => Err(RhythmError::msg(format!(
                        "unexpected cell `{other}` in grid row `{name}`"
                    ))),
                })
                .collect::<Result<Vec<u8>>>()?;
            pattern.set(name.trim(), steps);
        }
        Ok(pattern)
    }

    pub fn set(&mut self, track: &str, steps: Vec<u8>) {
        self.tracks.insert(track.to_string(), steps);
    }

    pub fn steps(&self, track: &str) -> Option<&[u8]> {
        self.tracks.get(track).map(Vec::as_slice)
    }

    pub fn is_ticked(&self, track: &str, step: usize) -> bool {
        self.steps(track)
            .and_then(|steps| steps.get(step))
            .is_some_and(|&cell| cell == 1)
    }

    /// Flips one cell and returns whether it is now ticked.
    ///
    /// Rows and cells that do not exist yet are created as needed.
    pub fn toggle(&mut self, track: &str, step: usize) -> bool {
        let steps = self.tracks.entry(track.to_string()).or_default();
        if steps.len() <= step {
            steps.resize(step + 1, 0);
        }
        steps[step] = if steps[step] == 1 { 0 } else { 1 };
        steps[step] == 1
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.tracks
            .iter()
            .map(|(name, steps)| (name.as_str(), steps.as_slice()))
    }
}

/// Exact comparison of every level track against the player's grid.
pub fn is_correct_pattern(level: &LevelRuntimeState, user: &UserPattern) -> bool {
    level
        .tracks()
        .iter()
        .all(|track| user.steps(&track.name) == Some(track.steps.as_slice()))
}

/// Whether every target hit is present in the player's grid.
pub fn can_advance(level: &LevelRuntimeState, user: &UserPattern) -> bool {
    level.tracks().iter().all(|track| match user.steps(&track.name) {
        Some(entered) => track
            .steps
            .iter()
            .enumerate()
            .filter(|&(_, &target)| target == 1)
            .all(|(step, _)| entered.get(step) == Some(&1)),
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::{LevelDefinition, Track};

    fn level() -> LevelRuntimeState {
        let definition = LevelDefinition::new(
            "Backbeat",
            120.0,
            vec![
                Track::new("Kick", vec![1, 0, 1, 0]),
                Track::new("Snare", vec![0, 1, 0, 1]),
            ],
        );
        LevelRuntimeState::new(0, &definition, None).unwrap()
    }

    #[test]
    fn exact_match_is_reflexive() {
        let level = level();
        assert!(is_correct_pattern(&level, &UserPattern::from_level(&level)));
    }

    #[test]
    fn exact_match_rejects_any_single_flip() {
        let level = level();
        for track in level.tracks() {
            for step in 0..level.amount_of_steps() {
                let mut user = UserPattern::from_level(&level);
                user.toggle(&track.name, step);
                assert!(
                    !is_correct_pattern(&level, &user),
                    "flip at {}:{step} still matched",
                    track.name
                );
            }
        }
    }

    #[test]
    fn required_subset_allows_extra_ticks() {
        let level = level();
        let mut user = UserPattern::from_level(&level);
        assert!(can_advance(&level, &user));

        user.toggle("Kick", 1);
        user.toggle("Snare", 0);
        assert!(can_advance(&level, &user));
        assert!(!is_correct_pattern(&level, &user));
    }

    #[test]
    fn required_subset_is_monotonic() {
        let level = level();
        let base = UserPattern::from_level(&level);
        for track in level.tracks() {
            for step in 0..level.amount_of_steps() {
                let mut superset = base.clone();
                if !superset.is_ticked(&track.name, step) {
                    superset.toggle(&track.name, step);
                }
                assert!(can_advance(&level, &superset));
            }
        }
    }

    #[test]
    fn required_subset_needs_every_hit() {
        let level = level();
        let mut user = UserPattern::from_level(&level);
        user.toggle("Snare", 3);
        assert!(!can_advance(&level, &user));
    }

    #[test]
    fn missing_tracks_never_match() {
        let level = level();
        let mut user = UserPattern::new();
        user.set("Kick", vec![1, 0, 1, 0]);
        user.set("Cowbell", vec![1, 1, 1, 1]);

        assert!(!is_correct_pattern(&level, &user));
        assert!(!can_advance(&level, &user));
        assert!(!MatchPolicy::Exact.matches(&level, &UserPattern::new()));
    }

    #[test]
    fn parses_compact_grids() {
        let user = UserPattern::parse("Kick=1010, Snare=.x.x").unwrap();
        assert_eq!(user.steps("Kick"), Some(&[1, 0, 1, 0][..]));
        assert_eq!(user.steps("Snare"), Some(&[0, 1, 0, 1][..]));
        assert!(UserPattern::parse("Kick=10?0").is_err());
        assert!(UserPattern::parse("Kick").is_err());
    }

    #[test]
    fn toggle_grows_short_rows() {
        let mut user = UserPattern::new();
        assert!(user.toggle("Kick", 2));
        assert_eq!(user.steps("Kick"), Some(&[0, 0, 1][..]));
        assert!(!user.toggle("Kick", 2));
    }
}
