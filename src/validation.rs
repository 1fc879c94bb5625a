//! Coaching parameter validation shared by the token backend and its clients

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scene modes the coach knows how to direct
pub const ALLOWED_MODES: [&str; 5] = [
    "Bollywood Romance",
    "Intense Drama",
    "Comedy/Timing",
    "Audition Slate",
    "Commercial/Brand Read",
];

/// Take lengths in seconds
pub const ALLOWED_DURATIONS: [u32; 3] = [30, 60, 90];

/// Scene mode for a coaching run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    BollywoodRomance,
    IntenseDrama,
    ComedyTiming,
    AuditionSlate,
    CommercialBrandRead,
}

impl Mode {
    /// Display label, identical to the wire value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BollywoodRomance => ALLOWED_MODES[0],
            Self::IntenseDrama => ALLOWED_MODES[1],
            Self::ComedyTiming => ALLOWED_MODES[2],
            Self::AuditionSlate => ALLOWED_MODES[3],
            Self::CommercialBrandRead => ALLOWED_MODES[4],
        }
    }

    /// Parse a display label
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        [
            Self::BollywoodRomance,
            Self::IntenseDrama,
            Self::ComedyTiming,
            Self::AuditionSlate,
            Self::CommercialBrandRead,
        ]
        .into_iter()
        .find(|m| m.as_str() == label)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one coaching run, as sent to the token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub mode: String,
    pub duration: u32,
    pub difficulty: String,
}

impl SessionParams {
    /// Build parameters from typed values
    #[must_use]
    pub fn new(mode: Mode, duration: u32, difficulty: impl Into<String>) -> Self {
        Self {
            mode: mode.as_str().to_string(),
            duration,
            difficulty: difficulty.into(),
        }
    }

    /// Check every constraint, returning all violations
    ///
    /// # Errors
    ///
    /// Returns the list of violated constraints
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut details = Vec::new();
        check_mode(Some(&self.mode), &mut details);
        check_duration(Some(self.duration), &mut details);
        check_difficulty(Some(&self.difficulty), &mut details);
        if details.is_empty() { Ok(()) } else { Err(details) }
    }
}

/// Validate an untyped request body
///
/// Duration may arrive as a number or a numeric string.
///
/// # Errors
///
/// Returns the list of violated constraints
pub fn validate_token_request(body: &Value) -> std::result::Result<SessionParams, Vec<String>> {
    let mut details = Vec::new();
    if !body.is_object() {
        details.push("Body must be a JSON object.".to_string());
    }

    let mode = body.get("mode").and_then(Value::as_str);
    let duration = body.get("duration").and_then(duration_value);
    let difficulty = body.get("difficulty").and_then(Value::as_str);

    check_mode(mode, &mut details);
    check_duration(duration, &mut details);
    check_difficulty(difficulty, &mut details);

    match (mode, duration, difficulty) {
        (Some(mode), Some(duration), Some(difficulty)) if details.is_empty() => Ok(SessionParams {
            mode: mode.to_string(),
            duration,
            difficulty: difficulty.to_string(),
        }),
        _ => Err(details),
    }
}

fn duration_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => match n.as_u64() {
            Some(v) => u32::try_from(v).ok(),
            None => n.as_f64().and_then(whole_seconds),
        },
        Value::String(s) => s.trim().parse().ok().and_then(whole_seconds),
        _ => None,
    }
}

/// Accept `60.0` as well as `60`
fn whole_seconds(value: f64) -> Option<u32> {
    if value.fract() != 0.0 || !(0.0..=f64::from(u32::MAX)).contains(&value) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let seconds = value as u32;
    Some(seconds)
}

fn check_mode(mode: Option<&str>, details: &mut Vec<String>) {
    if !mode.is_some_and(|m| ALLOWED_MODES.contains(&m)) {
        details.push(format!("mode must be one of: {}", ALLOWED_MODES.join(", ")));
    }
}

fn check_duration(duration: Option<u32>, details: &mut Vec<String>) {
    if !duration.is_some_and(|d| ALLOWED_DURATIONS.contains(&d)) {
        details.push("duration must be 30, 60, or 90.".to_string());
    }
}

fn check_difficulty(difficulty: Option<&str>, details: &mut Vec<String>) {
    if !difficulty.is_some_and(|d| d.chars().count() >= 2) {
        details.push("difficulty must be a string (e.g., Easy/Medium/Hard).".to_string());
    }
}
