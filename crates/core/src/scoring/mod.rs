use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{config::ScoringConfig, level::LevelRuntimeState, GameConfig};

/// Where the current level attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelPhase {
    Idle,
    LevelActive,
    LevelCleared,
}

/// Live score, tempo and mistake bookkeeping for one level attempt.
///
/// Saved per-level scores outlive individual attempts and are the part that
/// gets persisted with the player's progress.
#[derive(Debug, Clone)]
pub struct ScoreState {
    config: ScoringConfig,
    loss_on_mistakes: bool,
    phase: LevelPhase,
    current_score: i32,
    level_scores: BTreeMap<usize, i32>,
    tempo_multiplier: f64,
    mistake_count: u32,
    mistake_forgiveness: f64,
    level_started_at: Instant,
}

impl ScoreState {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            config: config.scoring.clone(),
            loss_on_mistakes: config.loss_on_mistakes(),
            phase: LevelPhase::Idle,
            current_score: 0,
            level_scores: BTreeMap::new(),
            tempo_multiplier: config.scoring.max_tempo,
            mistake_count: 0,
            mistake_forgiveness: 0.0,
            level_started_at: Instant::now(),
        }
    }

    pub fn phase(&self) -> LevelPhase {
        self.phase
    }

    pub fn current_score(&self) -> i32 {
        self.current_score
    }

    pub fn level_scores(&self) -> &BTreeMap<usize, i32> {
        &self.level_scores
    }

    /// Replaces the saved scores, typically with a restored progress record.
    pub fn restore_level_scores(&mut self, scores: BTreeMap<usize, i32>) {
        self.level_scores = scores;
    }

    pub fn reset_score(&mut self) {
        self.current_score = 0;
        self.phase = LevelPhase::LevelActive;
    }

    pub fn reset_mistake_count(&mut self) {
        self.reset_mistake_count_at(Instant::now());
    }

    pub fn reset_mistake_count_at(&mut self, now: Instant) {
        self.mistake_count = 0;
        self.mistake_forgiveness = 0.0;
        self.level_started_at = now;
        self.phase = LevelPhase::LevelActive;
    }

    /// Score delta for toggling `step` on `track`. Does not mutate anything.
    pub fn calculate_score_change(
        &self,
        level: &LevelRuntimeState,
        track: &str,
        step: usize,
        is_adding: bool,
    ) -> i32 {
        let required = level.is_required(track, step);
        let hit = self.hit_points();
        match (is_adding, required) {
            (true, true) => hit,
            (true, false) => -self.config.wrong_tick_penalty,
            (false, true) => -hit,
            (false, false) => self.config.correction_refund,
        }
    }

    fn hit_points(&self) -> i32 {
        (self.config.hit_points as f64 * self.tempo_multiplier).round() as i32
    }

    pub fn update_score(&mut self, delta: i32) {
        self.current_score += delta;
    }

    /// Computes and applies the delta for one toggle, counting it as a mistake
    /// when it costs points.
    pub fn apply_toggle(
        &mut self,
        level: &LevelRuntimeState,
        track: &str,
        step: usize,
        is_adding: bool,
    ) -> i32 {
        let delta = self.calculate_score_change(level, track, step, is_adding);
        self.update_score(delta);
        if delta < 0 {
            self.record_mistake();
        } else if !is_adding && self.config.auto_forgiveness {
            self.record_mistake_correction();
        }
        delta
    }

    pub fn record_mistake(&mut self) {
        self.mistake_count += 1;
    }

    pub fn record_mistake_correction(&mut self) {
        self.mistake_forgiveness += self.config.forgiveness_step;
    }

    pub fn mistake_count(&self) -> u32 {
        self.mistake_count
    }

    pub fn mistake_forgiveness(&self) -> f64 {
        self.mistake_forgiveness
    }

    pub fn effective_mistakes(&self) -> u32 {
        let forgiven = self.mistake_forgiveness.floor() as u32;
        self.mistake_count.saturating_sub(forgiven)
    }

    /// Mistakes allowed before the level is lost.
    pub fn calculate_max_mistakes(&self, level: &LevelRuntimeState) -> u32 {
        let scaled = 3 + level.required_tick_count() as u32 / 5;
        let base = scaled.max(3);
        if self.tempo_multiplier < self.config.max_tempo {
            base + 1
        } else {
            base
        }
    }

    /// Always false when the loss rule is disabled.
    pub fn has_lost_level(&self, level: &LevelRuntimeState) -> bool {
        self.loss_on_mistakes && self.effective_mistakes() >= self.calculate_max_mistakes(level)
    }

    pub fn loss_on_mistakes(&self) -> bool {
        self.loss_on_mistakes
    }

    pub fn set_loss_on_mistakes(&mut self, enabled: bool) {
        self.loss_on_mistakes = enabled;
    }

    pub fn is_stuck(&self) -> bool {
        self.is_stuck_at(Instant::now())
    }

    /// Whether the player has made too many mistakes or taken too long.
    pub fn is_stuck_at(&self, now: Instant) -> bool {
        self.mistake_count >= self.config.stuck_mistakes
            || self.elapsed_at(now).as_secs_f64() >= self.config.stuck_after_seconds
    }

    pub fn level_started_at(&self) -> Instant {
        self.level_started_at
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.level_started_at)
    }

    /// Adds `bonus` to the live score and saves it as the level's score.
    ///
    /// The saved value replaces any earlier one, even a higher one.
    pub fn complete_level(&mut self, level_index: usize, bonus: i32) -> i32 {
        self.current_score += bonus;
        self.level_scores.insert(level_index, self.current_score);
        self.phase = LevelPhase::LevelCleared;
        self.current_score
    }

    /// Saved scores of every earlier level plus the live score.
    pub fn total_score(&self, current_level_index: usize) -> i32 {
        let prior: i32 = self
            .level_scores
            .range(..current_level_index)
            .map(|(_, score)| score)
            .sum();
        prior + self.current_score
    }

    pub fn tempo_multiplier(&self) -> f64 {
        self.tempo_multiplier
    }

    /// Sets the tempo multiplier, clamped to the configured range.
    ///
    /// NaN falls back to the maximum tempo. An inverted range resolves to
    /// `max_tempo` instead of panicking.
    pub fn set_tempo(&mut self, multiplier: f64) -> f64 {
        let clamped = if multiplier.is_nan() {
            self.config.max_tempo
        } else {
            multiplier.max(self.config.min_tempo).min(self.config.max_tempo)
        };
        self.tempo_multiplier = clamped;
        clamped
    }

    pub fn reset_tempo(&mut self) {
        self.tempo_multiplier = self.config.max_tempo;
    }
}
