use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{assets::InstrumentSample, matcher::MatchPolicy, Result, RhythmError};

/// Number of times a bar is looped in the current rule set.
pub const CURRENT_REPEAT_COUNT: u32 = 3;
/// Number of times a bar was looped by the classic rule set.
pub const CLASSIC_REPEAT_COUNT: u32 = 2;
/// Delay added to every audio trigger relative to its visual tick.
pub const AUDIO_TRIGGER_BIAS_SECONDS: f64 = 0.05;

/// Top-level configuration structure for the game engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub rules: RuleVariant,
    pub schedule: ScheduleConfig,
    pub scoring: ScoringConfig,
    pub instruments: Vec<InstrumentSample>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rules: RuleVariant::default(),
            schedule: ScheduleConfig::default(),
            scoring: ScoringConfig::default(),
            instruments: InstrumentSample::defaults(),
        }
    }
}

impl GameConfig {
    pub fn from_json_str(source: &str) -> Result<Self> {
        let mut config: GameConfig = serde_json::from_str(source)?;
        if config.instruments.is_empty() {
            config.instruments = InstrumentSample::defaults();
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make timing or tempo arithmetic meaningless.
    pub fn validate(&self) -> Result<()> {
        let scoring = &self.scoring;
        let non_negative = |field: &'static str, value: f64| -> Result<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(RhythmError::InvalidConfig { field, value })
            }
        };

        if !(scoring.min_tempo.is_finite() && scoring.min_tempo > 0.0) {
            return Err(RhythmError::InvalidConfig {
                field: "scoring.min_tempo",
                value: scoring.min_tempo,
            });
        }
        if !(scoring.max_tempo.is_finite() && scoring.max_tempo >= scoring.min_tempo) {
            return Err(RhythmError::InvalidConfig {
                field: "scoring.max_tempo",
                value: scoring.max_tempo,
            });
        }
        non_negative("scoring.stuck_after_seconds", scoring.stuck_after_seconds)?;
        non_negative("scoring.forgiveness_step", scoring.forgiveness_step)?;
        non_negative("schedule.audio_bias_seconds", self.schedule.audio_bias_seconds)?;
        Ok(())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json_str(&source)
    }

    /// Configuration matching the earliest builds of the game.
    pub fn classic() -> Self {
        Self {
            rules: RuleVariant::Classic,
            ..Self::default()
        }
    }

    /// Bars per playback session after applying any override.
    pub fn repeat_count(&self) -> u32 {
        self.schedule
            .repeat_count
            .unwrap_or_else(|| self.rules.repeat_count())
    }

    pub fn match_policy(&self) -> MatchPolicy {
        self.rules.match_policy()
    }

    /// Whether running out of mistakes loses the level.
    pub fn loss_on_mistakes(&self) -> bool {
        self.scoring
            .loss_on_mistakes
            .unwrap_or_else(|| self.rules.loss_on_mistakes())
    }

    /// Flat bonus granted when a level is cleared.
    pub fn completion_bonus(&self) -> i32 {
        match self.match_policy() {
            MatchPolicy::RequiredSubset => self.scoring.completion_bonus,
            MatchPolicy::Exact => 0,
        }
    }
}

/// Which historical rule set the engine follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleVariant {
    /// Required-subset advancement, three bars, mistakes can lose the level.
    #[default]
    Current,
    /// Exact-match advancement, two bars, no loss condition.
    Classic,
}

impl RuleVariant {
    pub fn repeat_count(self) -> u32 {
        match self {
            Self::Current => CURRENT_REPEAT_COUNT,
            Self::Classic => CLASSIC_REPEAT_COUNT,
        }
    }

    pub fn match_policy(self) -> MatchPolicy {
        match self {
            Self::Current => MatchPolicy::RequiredSubset,
            Self::Classic => MatchPolicy::Exact,
        }
    }

    pub fn loss_on_mistakes(self) -> bool {
        matches!(self, Self::Current)
    }
}

/// Configuration specific to the playback scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub audio_bias_seconds: f64,
    /// Overrides the rule variant's bar count when set.
    pub repeat_count: Option<u32>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            audio_bias_seconds: AUDIO_TRIGGER_BIAS_SECONDS,
            repeat_count: None,
        }
    }
}

/// Point values and thresholds for the scoring state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub hit_points: i32,
    pub wrong_tick_penalty: i32,
    pub correction_refund: i32,
    pub completion_bonus: i32,
    pub stuck_mistakes: u32,
    pub stuck_after_seconds: f64,
    pub forgiveness_step: f64,
    pub min_tempo: f64,
    pub max_tempo: f64,
    /// Overrides the rule variant's loss condition when set.
    pub loss_on_mistakes: Option<bool>,
    /// Credit forgiveness automatically when a wrong tick is removed.
    pub auto_forgiveness: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            hit_points: 15,
            wrong_tick_penalty: 5,
            correction_refund: 3,
            completion_bonus: 100,
            stuck_mistakes: 3,
            stuck_after_seconds: 45.0,
            forgiveness_step: 0.5,
            min_tempo: 0.6,
            max_tempo: 1.0,
            loss_on_mistakes: None,
            auto_forgiveness: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_variants_pick_their_repeat_counts() {
        assert_eq!(GameConfig::default().repeat_count(), 3);
        assert_eq!(GameConfig::classic().repeat_count(), 2);

        let mut config = GameConfig::classic();
        config.schedule.repeat_count = Some(5);
        assert_eq!(config.repeat_count(), 5);
    }

    #[test]
    fn classic_rules_have_no_loss_or_bonus() {
        let config = GameConfig::classic();
        assert!(!config.loss_on_mistakes());
        assert_eq!(config.completion_bonus(), 0);
        assert_eq!(config.match_policy(), MatchPolicy::Exact);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            GameConfig::from_json_str(r#"{ "rules": "classic", "scoring": { "hit_points": 20 } }"#)
                .unwrap();
        assert_eq!(config.rules, RuleVariant::Classic);
        assert_eq!(config.scoring.hit_points, 20);
        assert_eq!(config.scoring.wrong_tick_penalty, 5);
        assert_eq!(config.schedule.audio_bias_seconds, AUDIO_TRIGGER_BIAS_SECONDS);
        assert!(config.instruments.iter().any(|i| i.name == "Kick"));
    }

    #[test]
    fn rejects_unusable_tempo_bounds() {
        for source in [
            r#"{ "scoring": { "min_tempo": 1.2 } }"#,
            r#"{ "scoring": { "min_tempo": 0.0 } }"#,
            r#"{ "scoring": { "max_tempo": 0.5 } }"#,
        ] {
            let err = GameConfig::from_json_str(source).unwrap_err();
            assert!(matches!(err, RhythmError::InvalidConfig { .. }), "{source}");
        }
    }

    #[test]
    fn rejects_negative_durations() {
        let err = GameConfig::from_json_str(r#"{ "scoring": { "stuck_after_seconds": -1.0 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            RhythmError::InvalidConfig { field: "scoring.stuck_after_seconds", .. }
        ));

        let err = GameConfig::from_json_str(r#"{ "schedule": { "audio_bias_seconds": -0.05 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            RhythmError::InvalidConfig { field: "schedule.audio_bias_seconds", .. }
        ));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(GameConfig::default().validate().is_ok());
        assert!(GameConfig::classic().validate().is_ok());
    }
}
