//! Syncable entity kinds and their typed payloads.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity carried by a sync operation.
///
/// The set is closed: operations naming any other kind are rejected at the
/// boundary, and the applier dispatches on this enum exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A URL the browser extension blocks during focus sessions.
    SiteBlocker,
    /// A pomodoro timer configuration.
    PomodoroTimer,
    /// A saved soundscape mix.
    SoundscapePreset,
}

impl EntityKind {
    /// Every kind, in processing order.
    pub const ALL: [EntityKind; 3] = [
        EntityKind::SiteBlocker,
        EntityKind::PomodoroTimer,
        EntityKind::SoundscapePreset,
    ];

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::SiteBlocker => "site_blocker",
            EntityKind::PomodoroTimer => "pomodoro_timer",
            EntityKind::SoundscapePreset => "soundscape_preset",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEntityKind(s.to_string()))
    }
}

/// Category a blocked site is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteCategory {
    /// Social networks.
    Social,
    /// News outlets.
    News,
    /// Video and streaming.
    Entertainment,
    /// Online stores.
    Shopping,
    /// Games.
    Gaming,
    /// Anything else.
    Other,
}

/// A blocked site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SiteBlocker {
    /// URL or bare host to block.
    pub url: String,
    /// Category of the site.
    pub category: SiteCategory,
}

impl SiteBlocker {
    /// Maximum accepted URL length.
    pub const MAX_URL_LEN: usize = 2048;

    /// Creates a site blocker entry.
    pub fn new(url: impl Into<String>, category: SiteCategory) -> Self {
        Self {
            url: url.into(),
            category,
        }
    }

    fn validate(&self) -> ProtocolResult<()> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ProtocolError::invalid_field("url", "must not be empty"));
        }
        if url.chars().count() > Self::MAX_URL_LEN {
            return Err(ProtocolError::invalid_field(
                "url",
                format!("must be at most {} characters", Self::MAX_URL_LEN),
            ));
        }
        if url.chars().any(char::is_whitespace) {
            return Err(ProtocolError::invalid_field("url", "must not contain whitespace"));
        }
        if url.contains("://") && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProtocolError::invalid_field(
                "url",
                "only http and https URLs can be blocked",
            ));
        }
        Ok(())
    }
}

/// A pomodoro timer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PomodoroTimer {
    /// Display label.
    pub label: String,
    /// Focus interval length.
    pub focus_minutes: u16,
    /// Short break length.
    pub short_break_minutes: u16,
    /// Long break length.
    pub long_break_minutes: u16,
    /// Focus rounds before a long break.
    pub rounds_before_long_break: u8,
}

impl PomodoroTimer {
    fn validate(&self) -> ProtocolResult<()> {
        check_len("label", &self.label, 1, 80)?;
        check_range("focusMinutes", self.focus_minutes, 1, 180)?;
        check_range("shortBreakMinutes", self.short_break_minutes, 1, 60)?;
        check_range("longBreakMinutes", self.long_break_minutes, 1, 120)?;
        check_range("roundsBeforeLongBreak", self.rounds_before_long_break, 1, 12)
    }
}

impl Default for PomodoroTimer {
    fn default() -> Self {
        Self {
            label: "Classic".to_string(),
            focus_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            rounds_before_long_break: 4,
        }
    }
}

/// One sound in a soundscape mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SoundLayer {
    /// Sound identifier from the catalogue (e.g. `rain`).
    pub sound: String,
    /// Volume between 0.0 and 1.0.
    pub volume: f32,
}

/// A saved soundscape mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SoundscapePreset {
    /// Preset name.
    pub name: String,
    /// Layers mixed together.
    pub layers: Vec<SoundLayer>,
}

impl SoundscapePreset {
    /// Maximum number of layers in one preset.
    pub const MAX_LAYERS: usize = 8;

    fn validate(&self) -> ProtocolResult<()> {
        check_len("name", &self.name, 1, 80)?;
        if self.layers.is_empty() || self.layers.len() > Self::MAX_LAYERS {
            return Err(ProtocolError::invalid_field(
                "layers",
                format!("must hold between 1 and {} layers", Self::MAX_LAYERS),
            ));
        }
        for layer in &self.layers {
            check_len("layers.sound", &layer.sound, 1, 64)?;
            if !(0.0..=1.0).contains(&layer.volume) {
                return Err(ProtocolError::invalid_field(
                    "layers.volume",
                    "must be between 0.0 and 1.0",
                ));
            }
        }
        Ok(())
    }
}

/// Typed payload of a syncable entity.
///
/// Serialized without a tag: the kind travels next to the payload
/// (`entityKind` on operations, `kind` on entities). Decoding at the
/// boundary goes through [`EntityPayload::from_json`], which is directed by
/// the declared kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityPayload {
    /// Site blocker payload.
    SiteBlocker(SiteBlocker),
    /// Pomodoro timer payload.
    PomodoroTimer(PomodoroTimer),
    /// Soundscape preset payload.
    SoundscapePreset(SoundscapePreset),
}

impl EntityPayload {
    /// Decodes and validates a payload of the given kind.
    pub fn from_json(kind: EntityKind, value: serde_json::Value) -> ProtocolResult<Self> {
        let malformed = |e: serde_json::Error| ProtocolError::MalformedPayload {
            kind,
            message: e.to_string(),
        };
        let payload = match kind {
            EntityKind::SiteBlocker => {
                EntityPayload::SiteBlocker(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityKind::PomodoroTimer => {
                EntityPayload::PomodoroTimer(serde_json::from_value(value).map_err(malformed)?)
            }
            EntityKind::SoundscapePreset => {
                EntityPayload::SoundscapePreset(serde_json::from_value(value).map_err(malformed)?)
            }
        };
        payload.validate()?;
        Ok(payload)
    }

    /// Returns the kind of this payload.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::SiteBlocker(_) => EntityKind::SiteBlocker,
            EntityPayload::PomodoroTimer(_) => EntityKind::PomodoroTimer,
            EntityPayload::SoundscapePreset(_) => EntityKind::SoundscapePreset,
        }
    }

    /// Checks value constraints of the payload.
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            EntityPayload::SiteBlocker(p) => p.validate(),
            EntityPayload::PomodoroTimer(p) => p.validate(),
            EntityPayload::SoundscapePreset(p) => p.validate(),
        }
    }
}

impl From<SiteBlocker> for EntityPayload {
    fn from(value: SiteBlocker) -> Self {
        EntityPayload::SiteBlocker(value)
    }
}

impl From<PomodoroTimer> for EntityPayload {
    fn from(value: PomodoroTimer) -> Self {
        EntityPayload::PomodoroTimer(value)
    }
}

impl From<SoundscapePreset> for EntityPayload {
    fn from(value: SoundscapePreset) -> Self {
        EntityPayload::SoundscapePreset(value)
    }
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> ProtocolResult<()> {
    let len = value.trim().chars().count();
    if len < min || len > max {
        return Err(ProtocolError::invalid_field(
            field,
            format!("length must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

fn check_range<T>(field: &str, value: T, min: T, max: T) -> ProtocolResult<()>
where
    T: PartialOrd + fmt::Display,
{
    if value < min || value > max {
        return Err(ProtocolError::invalid_field(
            field,
            format!("must be between {} and {}, got {}", min, max, value),
        ));
    }
    Ok(())
}
