use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use rhythm_recall_core::{
    restore_progress, GameConfig, InstrumentCatalogue, JsonFileProgressStore, LevelStore,
    MatchPolicy, Scheduler, ScoreState, UserPattern, VirtualSampleLibrary,
};
use tracing_subscriber::EnvFilter;

const FRAME: Duration = Duration::from_millis(10);

fn main() -> rhythm_recall_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GameConfig::from_path(path)?,
        None => GameConfig::default(),
    };

    match cli.command {
        Commands::Levels { levels } => run_levels(&levels, &config),
        Commands::Play {
            levels,
            level,
            tempo,
        } => run_play(&levels, level, tempo, &config),
        Commands::Check {
            levels,
            level,
            grid,
            tempo,
        } => run_check(&levels, level, &grid, tempo, &config),
        Commands::Progress { path, levels } => run_progress(&path, levels.as_deref()),
    }
}

fn catalogue(config: &GameConfig) -> InstrumentCatalogue {
    InstrumentCatalogue::from_samples(config.instruments.iter().cloned())
}

fn run_levels(levels: &Path, config: &GameConfig) -> rhythm_recall_core::Result<()> {
    let store = LevelStore::from_path(levels)?;
    let kit = catalogue(config);

    for (index, definition) in store.levels().iter().enumerate() {
        match store.load(index, Some(&kit)) {
            Ok(level) => {
                println!(
                    "{index:>3}  {:<24} {:>5} bpm  {:>2} steps  {} hits",
                    level.name(),
                    level.bpm(),
                    level.amount_of_steps(),
                    level.required_tick_count()
                );
                for issue in level.issues() {
                    println!("       ! {issue}");
                }
            }
            Err(err) => println!("{index:>3}  {:<24} unusable: {err}", definition.name),
        }
    }
    Ok(())
}

fn run_play(
    levels: &Path,
    index: usize,
    tempo: f64,
    config: &GameConfig,
) -> rhythm_recall_core::Result<()> {
    let store = LevelStore::from_path(levels)?;
    let library = VirtualSampleLibrary::new(catalogue(config));
    let level = store.load(index, Some(library.catalogue()))?;

    let mut scores = ScoreState::new(config);
    let tempo = scores.set_tempo(tempo);
    let mut scheduler = Scheduler::with_config(library, config);
    tracing::info!(level = level.name(), tempo, "starting playback");

    let group_starts: Vec<bool> = (0..level.amount_of_steps())
        .map(|step| level.is_group_start(step))
        .collect();
    let finished = Rc::new(RefCell::new(false));
    let finish_flag = finished.clone();
    let _session = scheduler.play_loop(
        &level,
        tempo,
        move |step| {
            let separator = if group_starts.get(step).copied().unwrap_or(false) {
                "| "
            } else {
                ""
            };
            println!("{separator}step {step}");
        },
        move || *finish_flag.borrow_mut() = true,
        |_| {},
    )?;

    let mut last = Instant::now();
    while !*finished.borrow() && scheduler.is_active() {
        std::thread::sleep(FRAME);
        let now = Instant::now();
        let delta = now.duration_since(last).as_secs_f64();
        last = now;

        scheduler.advance(delta);
        for trigger in scheduler.library_mut().advance(delta) {
            println!(
                "    {:<12} at {:>7.3}s  vol {:.2}",
                trigger.sample, trigger.at_time, trigger.volume
            );
        }
    }
    Ok(())
}

fn run_check(
    levels: &Path,
    index: usize,
    grid: &str,
    tempo: f64,
    config: &GameConfig,
) -> rhythm_recall_core::Result<()> {
    let store = LevelStore::from_path(levels)?;
    let level = store.load(index, Some(&catalogue(config)))?;
    let entered = UserPattern::parse(grid)?;

    let mut scores = ScoreState::new(config);
    scores.reset_score();
    scores.reset_mistake_count();
    scores.set_tempo(tempo);
    for (track, steps) in entered.tracks() {
        for (step, _) in steps.iter().enumerate().filter(|&(_, &cell)| cell == 1) {
            scores.apply_toggle(&level, track, step, true);
        }
    }

    let exact = MatchPolicy::Exact.matches(&level, &entered);
    let subset = MatchPolicy::RequiredSubset.matches(&level, &entered);
    let cleared = config.match_policy().matches(&level, &entered);

    println!("level         {}", level.name());
    println!("exact match   {exact}");
    println!("can advance   {subset}");
    println!("score         {}", scores.current_score());
    println!(
        "mistakes      {} of {}",
        scores.effective_mistakes(),
        scores.calculate_max_mistakes(&level)
    );
    if cleared {
        println!("with bonus    {}", scores.current_score() + config.completion_bonus());
    }
    if scores.has_lost_level(&level) {
        println!("level lost");
    }
    Ok(())
}

fn run_progress(path: &Path, levels: Option<&Path>) -> rhythm_recall_core::Result<()> {
    let level_count = match levels {
        Some(levels) => LevelStore::from_path(levels)?.len(),
        None => usize::MAX,
    };
    let store = JsonFileProgressStore::new(path);
    let record = restore_progress(&store, level_count);

    println!("current level   {}", record.current_level_index);
    println!("unlocked up to  {}", record.max_unlocked_level_index);
    for (index, score) in &record.level_scores {
        println!("  level {index:>3}  {score}");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Hear a drum loop, then rebuild it", long_about = None)]
struct Cli {
    /// Optional JSON file overriding rules, scoring and the instrument kit.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every level with its tempo, size and validation issues.
    Levels {
        /// Path to the level definitions.
        levels: PathBuf,
    },
    /// Play a level's loop in real time, printing ticks and triggers.
    Play {
        levels: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        level: usize,
        /// Tempo multiplier, clamped to the configured range.
        #[arg(short, long, default_value_t = 1.0)]
        tempo: f64,
    },
    /// Score a grid such as `Kick=10001000,Snare=00100010` against a level.
    Check {
        levels: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        level: usize,
        #[arg(short, long)]
        grid: String,
        #[arg(short, long, default_value_t = 1.0)]
        tempo: f64,
    },
    /// Show a saved progress record.
    Progress {
        /// Path to the progress file.
        path: PathBuf,
        /// Level definitions used to clamp the record.
        #[arg(long)]
        levels: Option<PathBuf>,
    },
}
