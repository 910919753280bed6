use std::{cell::RefCell, path::PathBuf, rc::Rc};

use rhythm_recall_core::{
    Game, GameConfig, JsonFileProgressStore, LevelStore, ProgressStore, SampleLibrary,
    VirtualSampleLibrary,
};

fn bundled_levels() -> LevelStore {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../levels.json");
    LevelStore::from_path(path).expect("bundled levels should load")
}

#[test]
fn bundled_levels_validate_cleanly() {
    let store = bundled_levels();
    let kit = rhythm_recall_core::InstrumentCatalogue::from_samples(
        rhythm_recall_core::InstrumentSample::defaults(),
    );
    for index in 0..store.len() {
        let level = store.load(index, Some(&kit)).unwrap();
        assert!(level.issues().is_empty(), "{}: {:?}", level.name(), level.issues());
    }
}

#[test]
fn plays_listens_and_clears_the_first_level() {
    let dir = tempfile::tempdir().unwrap();
    let progress_path = dir.path().join("progress.json");
    let mut game = Game::new(
        GameConfig::default(),
        bundled_levels(),
        VirtualSampleLibrary::with_default_kit(),
        JsonFileProgressStore::new(&progress_path),
    )
    .unwrap();

    let ticks = Rc::new(RefCell::new(Vec::new()));
    let finished = Rc::new(RefCell::new(false));
    let tick_sink = ticks.clone();
    let finish_sink = finished.clone();

    let _session = game
        .play_current_level_loop(
            move |step| tick_sink.borrow_mut().push(step),
            move || *finish_sink.borrow_mut() = true,
            |_| {},
        )
        .unwrap()
        .expect("virtual library is ready");

    // 8 steps at 120 bpm loop three times over 12 seconds.
    for _ in 0..130 {
        game.advance(0.1);
        game.scheduler_mut().library_mut().advance(0.1);
    }
    assert_eq!(ticks.borrow().len(), 24);
    assert!(*finished.borrow());
    assert_eq!(game.scheduler().library().played().len(), 6);

    game.toggle_step("Kick", 0).unwrap();
    let outcome = game.toggle_step("Kick", 4).unwrap();
    assert_eq!(outcome.cleared, Some(15 + 15 + 100));

    let saved = JsonFileProgressStore::new(&progress_path).load().unwrap().unwrap();
    assert_eq!(saved.max_unlocked_level_index, 1);
    assert_eq!(saved.level_scores.get(&0), Some(&130));

    assert!(game.next_level().unwrap());
    assert_eq!(game.current_level().name(), "Backbeat");
}

#[test]
fn progress_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let progress_path = dir.path().join("progress.json");

    {
        let mut game = Game::new(
            GameConfig::default(),
            bundled_levels(),
            VirtualSampleLibrary::with_default_kit(),
            JsonFileProgressStore::new(&progress_path),
        )
        .unwrap();
        game.toggle_step("Kick", 0).unwrap();
        game.toggle_step("Kick", 4).unwrap();
        game.next_level().unwrap();
    }

    let game = Game::new(
        GameConfig::default(),
        bundled_levels(),
        VirtualSampleLibrary::with_default_kit(),
        JsonFileProgressStore::new(&progress_path),
    )
    .unwrap();
    assert_eq!(game.current_level_index(), 1);
    assert_eq!(game.total_score(), 130);
}

#[test]
fn unready_library_turns_play_into_a_no_op() {
    let mut library = VirtualSampleLibrary::with_default_kit();
    library.set_ready(false);
    let mut game = Game::new(
        GameConfig::default(),
        bundled_levels(),
        library,
        rhythm_recall_core::MemoryProgressStore::new(),
    )
    .unwrap();

    assert!(!game.is_ready());
    let session = game.play_current_level_loop(|_| {}, || {}, |_| {}).unwrap();
    assert!(session.is_none());
    assert!(!game.scheduler().library().is_ready());
    assert_eq!(game.scheduler().pending_tasks(), 0);
}
