//! Process-wide mood
//!
//! The mood is a lazily advanced timer: nothing runs in the background.
//! Each consultation checks whether the time since the last transition has
//! passed a threshold drawn uniformly from the configured window (30 to 60
//! minutes by default). When it has, a new mood is picked uniformly from all
//! five (the current one included) and a fresh threshold is drawn.
//!
//! The mood is not persisted; a restart begins at [`Mood::Normal`].

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

const DEFAULT_MIN_PERIOD: Duration = Duration::from_secs(30 * 60);
const DEFAULT_MAX_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Bias state affecting reply modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Chatty,
    Lazy,
    Excited,
    Sleepy,
    #[default]
    Normal,
}

impl Mood {
    pub const ALL: [Mood; 5] = [
        Mood::Chatty,
        Mood::Lazy,
        Mood::Excited,
        Mood::Sleepy,
        Mood::Normal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Chatty => "chatty",
            Mood::Lazy => "lazy",
            Mood::Excited => "excited",
            Mood::Sleepy => "sleepy",
            Mood::Normal => "normal",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the mood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MoodSnapshot {
    pub mood: Mood,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct MoodState {
    mood: Mood,
    since: Instant,
    changed_at: DateTime<Utc>,
    threshold: Duration,
}

/// Timed mood state machine shared by every conversation
#[derive(Debug)]
pub struct MoodProcess {
    state: Mutex<MoodState>,
    min_period: Duration,
    max_period: Duration,
}

impl Default for MoodProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl MoodProcess {
    /// Start at `normal` with the default 30-60 minute window
    pub fn new() -> Self {
        Self::with_period(DEFAULT_MIN_PERIOD, DEFAULT_MAX_PERIOD)
    }

    /// Start at `normal` with a custom transition window
    pub fn with_period(min_period: Duration, max_period: Duration) -> Self {
        Self::starting_at(Mood::Normal, Instant::now(), min_period, max_period)
    }

    /// Start from an explicit mood and instant
    pub fn starting_at(
        mood: Mood,
        now: Instant,
        min_period: Duration,
        max_period: Duration,
    ) -> Self {
        let threshold = draw_threshold(min_period, max_period, &mut rand::thread_rng());
        Self {
            state: Mutex::new(MoodState {
                mood,
                since: now,
                changed_at: Utc::now(),
                threshold,
            }),
            min_period,
            max_period,
        }
    }

    /// Current mood, advancing the timer first
    pub fn consult(&self) -> Mood {
        self.consult_at(Instant::now(), &mut rand::thread_rng())
    }

    /// Current mood as of `now`, drawing randomness from `rng`
    pub fn consult_at<R: Rng + ?Sized>(&self, now: Instant, rng: &mut R) -> Mood {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now.saturating_duration_since(state.since) > state.threshold {
            let previous = state.mood;
            state.mood = Mood::ALL[rng.gen_range(0..Mood::ALL.len())];
            state.since = now;
            state.changed_at = Utc::now();
            state.threshold = draw_threshold(self.min_period, self.max_period, rng);

            info!(from = %previous, to = %state.mood, "Mood changed");
        }

        state.mood
    }

    /// Current mood without advancing the timer
    pub fn snapshot(&self) -> MoodSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        MoodSnapshot {
            mood: state.mood,
            changed_at: state.changed_at,
        }
    }
}

fn draw_threshold<R: Rng + ?Sized>(min: Duration, max: Duration, rng: &mut R) -> Duration {
    if max <= min {
        return min;
    }
    Duration::from_secs_f64(rng.gen_range(min.as_secs_f64()..max.as_secs_f64()))
}
