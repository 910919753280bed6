use crate::{
    assets::{InstrumentCatalogue, SampleLibrary, VoiceId, VICTORY_SAMPLE, VICTORY_VOLUME},
    level::{LevelRuntimeState, LevelStore},
    matcher::UserPattern,
    progress::{restore_progress, ProgressRecord, ProgressStore},
    scoring::{LevelPhase, ScoreState},
    timeline::{CancelHandle, Scheduler, SessionHandle},
    GameConfig, Result, RhythmError,
};

/// What a single grid toggle did to the level attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    /// Whether the cell is ticked after the toggle.
    pub ticked: bool,
    pub delta: i32,
    pub score: i32,
    /// Whether the grid satisfies the active match policy.
    pub matched: bool,
    /// Saved score when this toggle cleared the level.
    pub cleared: Option<i32>,
    pub lost: bool,
    pub stuck: bool,
}

/// One player's run through the level list.
///
/// Owns the level store, the playback scheduler and the scoring state, and
/// writes progress back through the injected [`ProgressStore`].
pub struct Game<L, P> {
    config: GameConfig,
    catalogue: InstrumentCatalogue,
    levels: LevelStore,
    scheduler: Scheduler<L>,
    scores: ScoreState,
    progress_store: P,
    progress: ProgressRecord,
    current: LevelRuntimeState,
    entered: UserPattern,
}

impl<L: SampleLibrary, P: ProgressStore> Game<L, P> {
    /// Restores saved progress and enters the level the player was on.
    pub fn new(config: GameConfig, levels: LevelStore, library: L, progress_store: P) -> Result<Self> {
        let catalogue = InstrumentCatalogue::from_samples(config.instruments.iter().cloned());
        let progress = restore_progress(&progress_store, levels.len());
        let current = levels.load(progress.current_level_index, Some(&catalogue))?;

        let mut scores = ScoreState::new(&config);
        scores.restore_level_scores(progress.level_scores.clone());

        let mut game = Self {
            scheduler: Scheduler::with_config(library, &config),
            entered: UserPattern::empty_for(&current),
            config,
            catalogue,
            levels,
            scores,
            progress_store,
            progress,
            current,
        };
        game.enter_current_level();
        Ok(game)
    }

    fn enter_current_level(&mut self) {
        self.entered = UserPattern::empty_for(&self.current);
        self.scores.reset_score();
        self.scores.reset_mistake_count();
        self.scores.reset_tempo();
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn levels(&self) -> &LevelStore {
        &self.levels
    }

    pub fn current_level(&self) -> &LevelRuntimeState {
        &self.current
    }

    pub fn current_level_index(&self) -> usize {
        self.current.index()
    }

    pub fn progress(&self) -> &ProgressRecord {
        &self.progress
    }

    pub fn scores(&self) -> &ScoreState {
        &self.scores
    }

    pub fn scores_mut(&mut self) -> &mut ScoreState {
        &mut self.scores
    }

    pub fn entered_pattern(&self) -> &UserPattern {
        &self.entered
    }

    pub fn scheduler(&self) -> &Scheduler<L> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler<L> {
        &mut self.scheduler
    }

    pub fn progress_store(&self) -> &P {
        &self.progress_store
    }

    pub fn is_ready(&self) -> bool {
        self.scheduler.library().is_ready()
    }

    pub fn has_next_level(&self) -> bool {
        self.current.index() < self.levels.last_index()
    }

    /// Moves to the following level if it exists and has been unlocked.
    pub fn next_level(&mut self) -> Result<bool> {
        if !self.has_next_level() {
            tracing::error!("there is no next level");
            return Ok(false);
        }
        let next = self.current.index() + 1;
        if !self.progress.is_unlocked(next) {
            tracing::warn!(next, "next level is still locked");
            return Ok(false);
        }
        self.load_level(next)?;
        Ok(true)
    }

    /// Enters an unlocked level, stopping any playback first.
    pub fn load_level(&mut self, index: usize) -> Result<()> {
        if index >= self.levels.len() {
            return Err(RhythmError::LevelOutOfRange {
                index,
                len: self.levels.len(),
            });
        }
        if !self.progress.is_unlocked(index) {
            return Err(RhythmError::LevelLocked { index });
        }

        let level = self.levels.load(index, Some(&self.catalogue))?;
        self.scheduler.stop();
        self.current = level;
        self.enter_current_level();

        self.progress.current_level_index = index;
        self.save_progress();
        Ok(())
    }

    /// Flips one cell of the player's grid and scores it.
    pub fn toggle_step(&mut self, track: &str, step: usize) -> Result<ToggleOutcome> {
        let len = self.current.amount_of_steps();
        if step >= len {
            return Err(RhythmError::StepOutOfRange { step, len });
        }

        let ticked = self.entered.toggle(track, step);
        let delta = self.scores.apply_toggle(&self.current, track, step, ticked);
        if ticked {
            self.play_track_sample_once(track);
        }

        let matched = self
            .config
            .match_policy()
            .matches(&self.current, &self.entered);
        let cleared = if matched && self.scores.phase() == LevelPhase::LevelActive {
            Some(self.complete_current_level())
        } else {
            None
        };

        Ok(ToggleOutcome {
            ticked,
            delta,
            score: self.scores.current_score(),
            matched,
            cleared,
            lost: self.scores.has_lost_level(&self.current),
            stuck: self.scores.is_stuck(),
        })
    }

    fn complete_current_level(&mut self) -> i32 {
        let index = self.current.index();
        let saved = self
            .scores
            .complete_level(index, self.config.completion_bonus());
        tracing::info!(level = self.current.name(), score = saved, "level cleared");

        self.progress.level_scores = self.scores.level_scores().clone();
        if self.has_next_level() {
            self.progress.unlock(index + 1);
        }
        self.save_progress();
        self.play_victory_sound();
        saved
    }

    fn save_progress(&mut self) {
        if let Err(err) = self.progress_store.save(&self.progress) {
            tracing::warn!(error = %err, "could not save progress");
        }
    }

    /// Plays the current level's loop at the live tempo multiplier.
    pub fn play_current_level_loop(
        &mut self,
        on_tick: impl FnMut(usize) + 'static,
        on_finish: impl FnOnce() + 'static,
        register_cancelable: impl FnMut(CancelHandle),
    ) -> Result<Option<SessionHandle>> {
        let tempo = self.scores.tempo_multiplier();
        self.scheduler
            .play_loop(&self.current, tempo, on_tick, on_finish, register_cancelable)
    }

    pub fn stop_playback(&mut self) -> bool {
        self.scheduler.stop()
    }

    /// Advances the device clock and fires due playback callbacks.
    pub fn advance(&mut self, delta: f64) -> usize {
        self.scheduler.advance(delta)
    }

    /// Changes the tempo multiplier. Running playback is stopped, since the
    /// scheduler cannot retime a session; callers restart it to hear the change.
    pub fn set_tempo(&mut self, multiplier: f64) -> f64 {
        if self.scheduler.stop() {
            tracing::info!("playback stopped for tempo change");
        }
        self.scores.set_tempo(multiplier)
    }

    /// Plays a track's sample immediately, as feedback for a tick.
    pub fn play_track_sample_once(&mut self, track: &str) -> Option<VoiceId> {
        let library = self.scheduler.library_mut();
        if !library.is_ready() {
            return None;
        }
        let now = library.now();
        Some(library.play(track, now, 1.0))
    }

    pub fn play_victory_sound(&mut self) -> Option<VoiceId> {
        let library = self.scheduler.library_mut();
        if !library.is_ready() {
            return None;
        }
        let now = library.now();
        Some(library.play(VICTORY_SAMPLE, now, VICTORY_VOLUME))
    }

    pub fn total_score(&self) -> i32 {
        self.scores.total_score(self.current.index())
    }

    pub fn is_stuck(&self) -> bool {
        self.scores.is_stuck()
    }

    pub fn max_mistakes(&self) -> u32 {
        self.scores.calculate_max_mistakes(&self.current)
    }

    pub fn has_lost_level(&self) -> bool {
        self.scores.has_lost_level(&self.current)
    }

    /// Clears the grid and restarts scoring for the current level.
    pub fn restart_level(&mut self) {
        self.scheduler.stop();
        self.enter_current_level();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::VirtualSampleLibrary,
        level::{LevelDefinition, Track},
        progress::MemoryProgressStore,
    };

    fn store() -> LevelStore {
        LevelStore::new(vec![
            LevelDefinition::new("One", 120.0, vec![Track::new("Kick", vec![1, 0])]),
            LevelDefinition::new(
                "Two",
                100.0,
                vec![
                    Track::new("Kick", vec![1, 0, 0, 0]),
                    Track::new("Snare", vec![0, 0, 1, 0]),
                ],
            ),
        ])
        .unwrap()
    }

    fn game(config: GameConfig) -> Game<VirtualSampleLibrary, MemoryProgressStore> {
        Game::new(
            config,
            store(),
            VirtualSampleLibrary::with_default_kit(),
            MemoryProgressStore::new(),
        )
        .unwrap()
    }

    #[test]
    fn clearing_a_level_unlocks_and_saves() {
        let mut game = game(GameConfig::default());
        assert_eq!(game.progress_store().saves(), 0);
        let outcome = game.toggle_step("Kick", 0).unwrap();

        assert_eq!(outcome.delta, 15);
        assert_eq!(outcome.cleared, Some(115));
        assert_eq!(game.progress().max_unlocked_level_index, 1);
        assert_eq!(game.progress().level_scores.get(&0), Some(&115));
        assert_eq!(game.progress_store().record(), Some(game.progress()));
        assert_eq!(game.progress_store().saves(), 1);

        let played: Vec<&str> = game
            .scheduler()
            .library()
            .pending()
            .iter()
            .map(|t| t.sample.as_str())
            .collect();
        assert_eq!(played, vec!["Kick", VICTORY_SAMPLE]);

        game.toggle_step("Kick", 0).unwrap();
        let again = game.toggle_step("Kick", 0).unwrap();
        assert_eq!(again.cleared, None);
        assert_eq!(game.progress_store().saves(), 1);

        assert!(game.next_level().unwrap());
        assert_eq!(game.progress_store().saves(), 2);
    }

    #[test]
    fn next_level_requires_an_unlock() {
        let mut game = game(GameConfig::default());
        assert!(!game.next_level().unwrap());
        assert!(matches!(
            game.load_level(1),
            Err(RhythmError::LevelLocked { index: 1 })
        ));

        game.toggle_step("Kick", 0).unwrap();
        assert!(game.next_level().unwrap());
        assert_eq!(game.current_level_index(), 1);
        assert!(!game.has_next_level());
        assert!(!game.next_level().unwrap());
    }

    #[test]
    fn total_score_spans_levels() {
        let mut game = game(GameConfig::default());
        game.toggle_step("Kick", 1).unwrap();
        game.toggle_step("Kick", 0).unwrap();
        assert_eq!(game.scores().level_scores().get(&0), Some(&110));

        game.next_level().unwrap();
        game.toggle_step("Kick", 0).unwrap();
        game.toggle_step("Kick", 1).unwrap();
        assert_eq!(game.total_score(), 110 + 15 - 5);
    }

    #[test]
    fn classic_rules_need_an_exact_grid() {
        let mut game = game(GameConfig::classic());
        game.toggle_step("Kick", 1).unwrap();
        let outcome = game.toggle_step("Kick", 0).unwrap();
        assert!(!outcome.matched);
        assert_eq!(outcome.cleared, None);

        let outcome = game.toggle_step("Kick", 1).unwrap();
        assert!(outcome.matched);
        assert_eq!(outcome.cleared, Some(15 - 5 + 3));
    }

    #[test]
    fn tempo_change_stops_playback() {
        let mut game = game(GameConfig::default());
        let _session = game
            .play_current_level_loop(|_| {}, || {}, |_| {})
            .unwrap()
            .unwrap();
        assert!(game.scheduler().is_active());

        assert_eq!(game.set_tempo(0.1), 0.6);
        assert!(!game.scheduler().is_active());
        assert!(game.scheduler().library().pending().is_empty());
    }

    #[test]
    fn rejects_steps_outside_the_grid() {
        let mut game = game(GameConfig::default());
        assert!(matches!(
            game.toggle_step("Kick", 2),
            Err(RhythmError::StepOutOfRange { step: 2, len: 2 })
        ));
    }

    #[test]
    fn level_entry_resets_tempo_and_mistakes() {
        let mut game = game(GameConfig::default());
        game.set_tempo(0.7);
        game.toggle_step("Kick", 1).unwrap();
        game.toggle_step("Kick", 0).unwrap();
        game.next_level().unwrap();

        assert_eq!(game.scores().tempo_multiplier(), 1.0);
        assert_eq!(game.scores().mistake_count(), 0);
        assert_eq!(game.scores().current_score(), 0);
        assert_eq!(game.entered_pattern().steps("Snare"), Some(&[0, 0, 0, 0][..]));
    }

    #[test]
    fn resumes_from_saved_progress() {
        let saved = ProgressRecord {
            current_level_index: 1,
            max_unlocked_level_index: 1,
            level_scores: [(0, 120)].into_iter().collect(),
        };
        let game = Game::new(
            GameConfig::default(),
            store(),
            VirtualSampleLibrary::with_default_kit(),
            MemoryProgressStore::with_record(saved),
        )
        .unwrap();

        assert_eq!(game.current_level().name(), "Two");
        assert_eq!(game.total_score(), 120);
    }
}
