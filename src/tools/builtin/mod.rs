//! Built-in onboarding tools: reference definitions, profile, boat, journey.

pub mod boat;
pub mod journey;
pub mod profile;
pub mod reference;

use serde_json::Value;

use crate::onboarding::normalize::decode_nested;

/// First present, non-null argument among `keys` (canonical name first,
/// then aliases the model tends to use).
pub(crate) fn field<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| params.get(*k))
        .find(|v| !v.is_null())
}

/// Arguments as an object, even when the whole payload arrived encoded.
pub(crate) fn as_object(params: Value) -> Value {
    match decode_nested(&params) {
        obj @ Value::Object(_) => obj,
        _ => Value::Object(serde_json::Map::new()),
    }
}

/// Overwrite `slot` when `new` is present and different. Returns whether it
/// changed.
pub(crate) fn merge<T: PartialEq>(slot: &mut Option<T>, new: Option<T>) -> bool {
    match new {
        Some(value) if slot.as_ref() != Some(&value) => {
            *slot = Some(value);
            true
        }
        _ => false,
    }
}
