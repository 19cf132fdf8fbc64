// ── Device state mirror ──
//
// Every field is independently unknown until first observed. Floats are
// compared with a small tolerance so wire rounding never shows up as a
// change.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use soundlight_api::{Hsb, Sound, StateFragment};
use strum::{Display, EnumIter, EnumString};

/// Float values closer than this are the same value.
pub const FLOAT_TOLERANCE: f32 = 1e-4;

/// Addressable state fields.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Power,
    Brightness,
    /// Degrees.
    Hue,
    Saturation,
    LightEnabled,
    Volume,
    Sound,
    SoundList,
    /// °C.
    Temperature,
    /// Percent.
    Humidity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Float(f32),
    Sound(Sound),
    Tracks(Vec<String>),
}

impl FieldValue {
    /// Equality with float tolerance.
    pub fn approx_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => (a - b).abs() < FLOAT_TOLERANCE,
            (a, b) => a == b,
        }
    }

    /// [`approx_eq`](Self::approx_eq) that knows `field`'s geometry: hue
    /// wraps, so 0° and 360° are the same color.
    pub fn same_as(&self, other: &Self, field: Field) -> bool {
        match (field, self, other) {
            (Field::Hue, Self::Float(a), Self::Float(b)) => {
                let d = (a - b).rem_euclid(360.0);
                d.min(360.0 - d) < FLOAT_TOLERANCE
            }
            _ => self.approx_eq(other),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            Self::Float(v) => write!(f, "{v:.2}"),
            Self::Sound(s) => write!(f, "{s}"),
            Self::Tracks(t) => f.write_str(&t.join(", ")),
        }
    }
}

/// Fields whose value changed, with their new value (`None` = unknown).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StateChanges(BTreeMap<Field, Option<FieldValue>>);

impl StateChanges {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: Field) -> Option<&Option<FieldValue>> {
        self.0.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, Option<&FieldValue>)> {
        self.0.iter().map(|(f, v)| (*f, v.as_ref()))
    }

    pub(crate) fn record(&mut self, field: Field, value: Option<FieldValue>) {
        self.0.insert(field, value);
    }
}

/// Canonical per-device state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    pub power: Option<bool>,
    pub brightness: Option<f32>,
    pub hue: Option<f32>,
    pub saturation: Option<f32>,
    /// Light on while the unit is powered (`noColor` inverted).
    pub light_enabled: Option<bool>,
    pub volume: Option<f32>,
    pub sound: Option<Sound>,
    /// Track names the device reports as available.
    pub sound_list: Option<Vec<String>>,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
}

impl DeviceState {
    pub fn get(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Power => self.power.map(FieldValue::Bool),
            Field::Brightness => self.brightness.map(FieldValue::Float),
            Field::Hue => self.hue.map(FieldValue::Float),
            Field::Saturation => self.saturation.map(FieldValue::Float),
            Field::LightEnabled => self.light_enabled.map(FieldValue::Bool),
            Field::Volume => self.volume.map(FieldValue::Float),
            Field::Sound => self.sound.map(FieldValue::Sound),
            Field::SoundList => self.sound_list.clone().map(FieldValue::Tracks),
            Field::Temperature => self.temperature.map(FieldValue::Float),
            Field::Humidity => self.humidity.map(FieldValue::Float),
        }
    }

    /// Store `value` and record it in `changes` if it differs from the
    /// current one. A value of the wrong shape for `field` is ignored.
    pub(crate) fn apply(
        &mut self,
        field: Field,
        value: Option<FieldValue>,
        changes: &mut StateChanges,
    ) {
        let current = self.get(field);
        let same = match (&current, &value) {
            (Some(a), Some(b)) => a.same_as(b, field),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }
        if self.store(field, value.clone()) {
            changes.record(field, value);
        }
    }

    fn store(&mut self, field: Field, value: Option<FieldValue>) -> bool {
        match (field, value) {
            (Field::Power, Some(FieldValue::Bool(v))) => self.power = Some(v),
            (Field::LightEnabled, Some(FieldValue::Bool(v))) => self.light_enabled = Some(v),
            (Field::Brightness, Some(FieldValue::Float(v))) => self.brightness = Some(v),
            (Field::Hue, Some(FieldValue::Float(v))) => self.hue = Some(v),
            (Field::Saturation, Some(FieldValue::Float(v))) => self.saturation = Some(v),
            (Field::Volume, Some(FieldValue::Float(v))) => self.volume = Some(v),
            (Field::Temperature, Some(FieldValue::Float(v))) => self.temperature = Some(v),
            (Field::Humidity, Some(FieldValue::Float(v))) => self.humidity = Some(v),
            (Field::Sound, Some(FieldValue::Sound(v))) => self.sound = Some(v),
            (Field::SoundList, Some(FieldValue::Tracks(v))) => self.sound_list = Some(v),
            (field, None) => self.clear(field),
            (field, Some(other)) => {
                tracing::debug!(%field, ?other, "ignoring value of the wrong shape");
                return false;
            }
        }
        true
    }

    fn clear(&mut self, field: Field) {
        match field {
            Field::Power => self.power = None,
            Field::Brightness => self.brightness = None,
            Field::Hue => self.hue = None,
            Field::Saturation => self.saturation = None,
            Field::LightEnabled => self.light_enabled = None,
            Field::Volume => self.volume = None,
            Field::Sound => self.sound = None,
            Field::SoundList => self.sound_list = None,
            Field::Temperature => self.temperature = None,
            Field::Humidity => self.humidity = None,
        }
    }

    /// Current color, once hue, saturation, and brightness are all known.
    pub fn hsb(&self) -> Option<Hsb> {
        Some(Hsb {
            hue: self.hue?,
            saturation: self.saturation?,
            brightness: self.brightness?,
        })
    }
}

/// The fields a fragment mentions, in `Field` order.
pub fn fragment_fields(fragment: &StateFragment) -> Vec<(Field, FieldValue)> {
    let mut fields = Vec::new();
    let mut push = |field, value: Option<FieldValue>| {
        if let Some(v) = value {
            fields.push((field, v));
        }
    };
    push(Field::Power, fragment.power.map(FieldValue::Bool));
    push(Field::Brightness, fragment.brightness.map(FieldValue::Float));
    push(Field::Hue, fragment.hue.map(FieldValue::Float));
    push(Field::Saturation, fragment.saturation.map(FieldValue::Float));
    push(
        Field::LightEnabled,
        fragment.light_enabled.map(FieldValue::Bool),
    );
    push(Field::Volume, fragment.volume.map(FieldValue::Float));
    push(Field::Sound, fragment.sound.map(FieldValue::Sound));
    push(
        Field::SoundList,
        fragment.sound_list.clone().map(FieldValue::Tracks),
    );
    push(
        Field::Temperature,
        fragment.temperature.map(FieldValue::Float),
    );
    push(Field::Humidity, fragment.humidity.map(FieldValue::Float));
    fields
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn apply_records_only_real_changes() {
        let mut state = DeviceState::default();
        let mut changes = StateChanges::default();

        state.apply(Field::Volume, Some(FieldValue::Float(0.5)), &mut changes);
        assert_eq!(changes.len(), 1);

        let mut again = StateChanges::default();
        state.apply(Field::Volume, Some(FieldValue::Float(0.500_01)), &mut again);
        assert!(again.is_empty());
        assert_eq!(state.volume, Some(0.5));
    }

    #[test]
    fn hue_wraps_at_full_circle() {
        let mut state = DeviceState {
            hue: Some(0.0),
            ..DeviceState::default()
        };
        let mut changes = StateChanges::default();
        state.apply(Field::Hue, Some(FieldValue::Float(360.0)), &mut changes);
        assert!(changes.is_empty());

        // Only hue wraps.
        let a = FieldValue::Float(0.0);
        let b = FieldValue::Float(360.0);
        assert!(a.same_as(&b, Field::Hue));
        assert!(!a.same_as(&b, Field::Temperature));
        assert!(FieldValue::Float(360.0 - FLOAT_TOLERANCE / 2.0).same_as(&FieldValue::Float(0.0), Field::Hue));
        assert!(!FieldValue::Float(359.0).same_as(&FieldValue::Float(0.0), Field::Hue));
    }

    #[test]
    fn clearing_a_field_is_a_change() {
        let mut state = DeviceState {
            power: Some(true),
            ..DeviceState::default()
        };
        let mut changes = StateChanges::default();
        state.apply(Field::Power, None, &mut changes);
        assert_eq!(state.power, None);
        assert_eq!(changes.get(Field::Power), Some(&None));
    }

    #[test]
    fn wrong_shape_is_ignored() {
        let mut state = DeviceState::default();
        let mut changes = StateChanges::default();
        state.apply(Field::Power, Some(FieldValue::Float(1.0)), &mut changes);
        assert!(changes.is_empty());
        assert_eq!(state.power, None);
    }

    #[test]
    fn fragment_fields_lists_present_fields() {
        let fragment = StateFragment {
            power: Some(true),
            volume: Some(0.3),
            sound: Some(Sound::Rain),
            ..StateFragment::default()
        };
        let fields: Vec<Field> = fragment_fields(&fragment).into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec![Field::Power, Field::Volume, Field::Sound]);
    }

    #[test]
    fn hsb_requires_all_components() {
        let mut state = DeviceState {
            hue: Some(120.0),
            saturation: Some(0.5),
            ..DeviceState::default()
        };
        assert!(state.hsb().is_none());
        state.brightness = Some(0.7);
        let hsb = state.hsb().unwrap_or(Hsb {
            hue: 0.0,
            saturation: 0.0,
            brightness: 0.0,
        });
        assert!((hsb.hue - 120.0).abs() < FLOAT_TOLERANCE);
    }
}
