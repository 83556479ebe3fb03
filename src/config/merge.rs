//! Shallow merge of parameter maps.
//!
//! Param sets are merged key by key at the top level only: a key present in
//! the overlay replaces the base value entirely, lists and dicts included.

use serde_yaml::{Mapping, Value};

/// Merge `overlay` into `base`; keys of `overlay` win.
///
/// # Example
/// ```
/// use buildconf::config::shallow_merge;
/// use serde_yaml::Mapping;
///
/// let mut base: Mapping = serde_yaml::from_str("{flags: {a: 1}, libs: [m]}").unwrap();
/// let overlay: Mapping = serde_yaml::from_str("{flags: {b: 2}}").unwrap();
/// shallow_merge(&mut base, &overlay);
/// // Result: {flags: {b: 2}, libs: [m]}
/// ```
pub fn shallow_merge(base: &mut Mapping, overlay: &Mapping) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

/// Merge `overlay` into `base` one level deeper than [`shallow_merge`]:
/// a dict in `overlay` updates the dict under the same key in `base`
/// instead of replacing it. Anything else replaces.
///
/// Sections a sub-config inherits from its parent are merged this way.
pub fn merge_one_level(base: &mut Mapping, overlay: &Mapping) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Mapping(inner)), Value::Mapping(update)) => shallow_merge(inner, update),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}
