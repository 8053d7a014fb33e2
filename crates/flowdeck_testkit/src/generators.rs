//! Property-based test generators.
//!
//! Strategies only produce values that pass payload validation.

use crate::fixtures::t0;
use chrono::{DateTime, Duration, Utc};
use flowdeck_sync_protocol::{
    EntityKind, EntityPayload, PomodoroTimer, SiteBlocker, SiteCategory, SoundLayer,
    SoundscapePreset,
};
use proptest::prelude::*;

/// Generates an entity kind.
pub fn kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(EntityKind::ALL.to_vec())
}

/// Generates a site category.
pub fn category_strategy() -> impl Strategy<Value = SiteCategory> {
    prop::sample::select(vec![
        SiteCategory::Social,
        SiteCategory::News,
        SiteCategory::Entertainment,
        SiteCategory::Shopping,
        SiteCategory::Gaming,
        SiteCategory::Other,
    ])
}

/// Generates a site blocker.
pub fn site_blocker_strategy() -> impl Strategy<Value = SiteBlocker> {
    ("[a-z]{1,20}\\.(com|org|net)", category_strategy())
        .prop_map(|(url, category)| SiteBlocker::new(url, category))
}

/// Generates a pomodoro timer.
pub fn pomodoro_strategy() -> impl Strategy<Value = PomodoroTimer> {
    ("[A-Za-z]{1,20}", 1u16..=120, 1u16..=30, 1u16..=60, 1u8..=8).prop_map(
        |(label, focus, short_break, long_break, rounds)| PomodoroTimer {
            label,
            focus_minutes: focus,
            short_break_minutes: short_break,
            long_break_minutes: long_break,
            rounds_before_long_break: rounds,
        },
    )
}

/// Generates a soundscape preset.
pub fn soundscape_strategy() -> impl Strategy<Value = SoundscapePreset> {
    let layer =
        ("[a-z]{1,10}", 0.0f32..=1.0).prop_map(|(sound, volume)| SoundLayer { sound, volume });
    ("[A-Za-z]{1,20}", prop::collection::vec(layer, 1..=8))
        .prop_map(|(name, layers)| SoundscapePreset { name, layers })
}

/// Generates a payload of the given kind.
pub fn payload_strategy(kind: EntityKind) -> BoxedStrategy<EntityPayload> {
    match kind {
        EntityKind::SiteBlocker => site_blocker_strategy().prop_map(EntityPayload::from).boxed(),
        EntityKind::PomodoroTimer => pomodoro_strategy().prop_map(EntityPayload::from).boxed(),
        EntityKind::SoundscapePreset => {
            soundscape_strategy().prop_map(EntityPayload::from).boxed()
        }
    }
}

/// Generates a payload of any kind.
pub fn any_payload_strategy() -> impl Strategy<Value = EntityPayload> {
    kind_strategy().prop_flat_map(payload_strategy)
}

/// Generates a client id.
pub fn client_id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9-]{0,31}"
}

/// Generates a client timestamp within a day of [`t0`], millisecond precision.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    let day = Duration::days(1).num_milliseconds();
    (-day..=day).prop_map(|offset| t0() + Duration::milliseconds(offset))
}
