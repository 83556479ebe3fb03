//! Shorthand declarations rewritten into overlay rules.
//!
//! Top-level `configure` and `install` lists carry their own `for`,
//! `not-for` and `if` keys per item. Items sharing the same condition are
//! gathered into one rule that sets `configure` or `install-files`.

use super::types::{OverlayRule, condition_identity};
use crate::error::Result;
use serde_yaml::{Mapping, Value};
use tracing::debug;

/// Sugar keys and the task param their items end up in, in processing order.
pub const SUGAR_KEYS: &[(&str, &str)] = &[("configure", "configure"), ("install", "install-files")];

const CONDITION_KEYS: [&str; 3] = ["for", "not-for", "if"];

struct Group {
    identity: u64,
    for_: Value,
    not_for: Value,
    if_: Value,
    items: Vec<Value>,
}

/// Turn sugar items into overlay rules setting `target_key`.
///
/// Items without `for` apply to all tasks. Rules come out in the order their
/// condition first appears.
pub fn expand(items: &[Value], target_key: &str, path: &str) -> Result<Vec<OverlayRule>> {
    let mut groups: Vec<Group> = Vec::new();

    for item in items {
        let mut item = item.clone();
        let [for_, not_for, if_] = match &mut item {
            Value::Mapping(map) => CONDITION_KEYS.map(|key| map.remove(key)),
            _ => [None, None, None],
        };
        let for_ = for_.unwrap_or_else(|| Value::String("all".to_string()));
        let not_for = not_for.unwrap_or_else(|| Value::Mapping(Mapping::new()));
        let if_ = if_.unwrap_or(Value::Null);

        let identity = condition_identity(&for_, &not_for, &if_);
        match groups.iter_mut().find(|g| g.identity == identity) {
            Some(group) => group.items.push(item),
            None => groups.push(Group {
                identity,
                for_,
                not_for,
                if_,
                items: vec![item],
            }),
        }
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(i, group)| {
            let mut set = Mapping::new();
            set.insert(target_key.into(), Value::Sequence(group.items));
            OverlayRule::new(
                &group.for_,
                &group.not_for,
                &group.if_,
                set,
                &format!("{path}.[{i}]"),
            )
        })
        .collect()
}

/// Expand every sugar key of `attrs` in front of `rules` and remove the keys.
pub fn apply(attrs: &mut Mapping, rules: &mut Vec<OverlayRule>) -> Result<()> {
    for (key, target) in SUGAR_KEYS {
        let Some(value) = attrs.remove(*key) else {
            continue;
        };
        let items = match value {
            Value::Sequence(items) => items,
            Value::Null => continue,
            other => vec![other],
        };
        let expanded = expand(&items, target, key)?;
        debug!(key, items = items.len(), rules = expanded.len(), "expanded sugar");
        let tail = std::mem::replace(rules, expanded);
        rules.extend(tail);
    }
    Ok(())
}
