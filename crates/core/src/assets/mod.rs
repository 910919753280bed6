use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Name of the jingle played when a level is cleared.
pub const VICTORY_SAMPLE: &str = "Win";
/// Gain applied on top of the jingle's own volume.
pub const VICTORY_VOLUME: f64 = 0.2;

/// Descriptor for a drum sample that levels can reference by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSample {
    pub name: String,
    pub file: String,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

fn default_volume() -> f64 {
    1.0
}

impl InstrumentSample {
    pub fn new(name: impl Into<String>, file: impl Into<String>, volume: f64) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            volume,
        }
    }

    /// The stock drum kit shipped with the game.
    pub fn defaults() -> Vec<Self> {
        [
            ("Snare", "snare.wav"),
            ("Kick", "kick.wav"),
            ("Hi-Hat", "hihat_closed.wav"),
            ("Open Hi-Hat", "hihat_open.wav"),
            ("Crash", "crash.wav"),
            ("Cowbell", "cowbell.wav"),
            ("Stick", "stick.wav"),
            (VICTORY_SAMPLE, "win.wav"),
        ]
        .into_iter()
        .map(|(name, file)| Self::new(name, file, 0.5))
        .collect()
    }
}

/// Registry for all samples that levels and the engine refer to.
#[derive(Debug, Default, Clone)]
pub struct InstrumentCatalogue {
    samples: HashMap<String, InstrumentSample>,
}

impl InstrumentCatalogue {
    pub fn new() -> Self {
        Self {
            samples: HashMap::new(),
        }
    }

    pub fn from_samples(samples: impl IntoIterator<Item = InstrumentSample>) -> Self {
        let mut catalogue = Self::new();
        for sample in samples {
            catalogue.register(sample);
        }
        catalogue
    }

    pub fn register(&mut self, sample: InstrumentSample) {
        self.samples.insert(sample.name.clone(), sample);
    }

    pub fn sample(&self, name: &str) -> Option<&InstrumentSample> {
        self.samples.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.samples.contains_key(name)
    }

    /// Instruments a level track may use; the victory jingle is excluded.
    pub fn is_playable_instrument(&self, name: &str) -> bool {
        name != VICTORY_SAMPLE && self.contains(name)
    }

    /// Combines the sample's configured volume with a requested gain.
    pub fn final_volume(&self, name: &str, volume: f64) -> Option<f64> {
        self.sample(name).map(|sample| sample.volume * volume)
    }
}

/// Identifier of one trigger handed to a [`SampleLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

/// Decodes and plays audio samples against its own monotonic clock.
///
/// Implementations schedule audio ahead of time, so every trigger returns a
/// [`VoiceId`] that can later be cancelled before it sounds.
pub trait SampleLibrary {
    /// Whether every sample has finished loading.
    fn is_ready(&self) -> bool;

    /// Current time on the audio clock, in seconds.
    fn now(&self) -> f64;

    /// Schedules `sample` to start at `at_time` on the audio clock.
    fn play(&mut self, sample: &str, at_time: f64, volume: f64) -> VoiceId;

    /// Cancels a pending trigger. Unknown or already-played voices are ignored.
    fn cancel(&mut self, voice: VoiceId);
}

/// A trigger recorded by [`VirtualSampleLibrary`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTrigger {
    pub voice: VoiceId,
    pub sample: String,
    pub at_time: f64,
    pub volume: f64,
}

/// In-memory [`SampleLibrary`] with a manually advanced clock.
///
/// Nothing is decoded: triggers are queued until the clock passes their start
/// time, at which point they move to the `played` log.
#[derive(Debug, Default)]
pub struct VirtualSampleLibrary {
    catalogue: InstrumentCatalogue,
    ready: bool,
    now: f64,
    next_voice: u64,
    pending: Vec<SampleTrigger>,
    played: Vec<SampleTrigger>,
}

impl VirtualSampleLibrary {
    pub fn new(catalogue: InstrumentCatalogue) -> Self {
        Self {
            catalogue,
            ready: true,
            ..Self::default()
        }
    }

    pub fn with_default_kit() -> Self {
        Self::new(InstrumentCatalogue::from_samples(InstrumentSample::defaults()))
    }

    pub fn catalogue(&self) -> &InstrumentCatalogue {
        &self.catalogue
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Moves the audio clock forward and returns the triggers that started.
    pub fn advance(&mut self, delta: f64) -> Vec<SampleTrigger> {
        self.now = (self.now + delta).max(self.now);
        let now = self.now;
        let (due, pending): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|trigger| trigger.at_time <= now);
        self.pending = pending;
        self.played.extend(due.iter().cloned());
        due
    }

    /// Triggers still waiting for their start time, in scheduling order.
    pub fn pending(&self) -> &[SampleTrigger] {
        &self.pending
    }

    pub fn played(&self) -> &[SampleTrigger] {
        &self.played
    }
}

impl SampleLibrary for VirtualSampleLibrary {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn now(&self) -> f64 {
        self.now
    }

    fn play(&mut self, sample: &str, at_time: f64, volume: f64) -> VoiceId {
        let voice = VoiceId(self.next_voice);
        self.next_voice += 1;

        let Some(volume) = self.catalogue.final_volume(sample, volume) else {
            tracing::warn!(sample, "sample not found, trigger dropped");
            return voice;
        };

        self.pending.push(SampleTrigger {
            voice,
            sample: sample.to_string(),
            at_time,
            volume,
        });
        voice
    }

    fn cancel(&mut self, voice: VoiceId) {
        self.pending.retain(|trigger| trigger.voice != voice);
    }
}
