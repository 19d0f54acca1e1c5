//! `key!` and `key/` list filters.
//!
//! `sources!: ['a.c']` removes exact matches from `sources`. `sources/: [['exclude', '_win\\.c$'],
//! ['include', 'foo_win\\.c$']]` applies regex rules in order, later rules overriding earlier
//! ones. Removed items are collected under `sources_excluded`.

use gypsum_syntax::{Mapping, Value};
use itertools::{Either, Itertools};
use regex::Regex;
use tracing::trace;

use crate::errors::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FilterAction {
    Exclude,
    Include,
}

fn filter_error(key: &str, message: impl Into<String>) -> anyhow::Error {
    EngineError::ListFilter {
        key: key.to_string(),
        message: message.into(),
    }
    .into()
}

fn item_text(item: &Value) -> String {
    item.to_text().unwrap_or_default()
}

/// Apply every list filter in `mapping` and, recursively, in the mappings it contains.
pub fn process_list_filters(mapping: &mut Mapping) -> EngineResult<()> {
    let mut lists = vec![];
    let mut orphans = vec![];

    for (key, value) in mapping.iter() {
        let Some(base) = key.strip_suffix(['!', '/']) else {
            continue;
        };
        if !matches!(value, Value::Sequence(_)) {
            return Err(filter_error(
                key,
                format!("must be a list, not a {}", value.kind_name()),
            ));
        }
        match mapping.get(base) {
            None => orphans.push(key.clone()),
            Some(Value::Sequence(_)) => {
                if !lists.iter().any(|l| l == base) {
                    lists.push(base.to_string());
                }
            }
            Some(other) => {
                return Err(filter_error(
                    key,
                    format!("filters {base}, which is a {}, not a list", other.kind_name()),
                ));
            }
        }
    }

    for orphan in orphans {
        mapping.shift_remove(&orphan);
    }

    for list_key in lists {
        filter_list(mapping, &list_key)?;
    }

    for value in mapping.values_mut() {
        match value {
            Value::Mapping(child) => process_list_filters(child)?,
            Value::Sequence(items) => process_list_filters_in_list(items)?,
            _ => {}
        }
    }

    Ok(())
}

fn process_list_filters_in_list(items: &mut [Value]) -> EngineResult<()> {
    for item in items {
        match item {
            Value::Mapping(child) => process_list_filters(child)?,
            Value::Sequence(nested) => process_list_filters_in_list(nested)?,
            _ => {}
        }
    }
    Ok(())
}

fn filter_list(mapping: &mut Mapping, list_key: &str) -> EngineResult<()> {
    let len = mapping
        .get(list_key)
        .and_then(Value::as_sequence)
        .map_or(0, Vec::len);
    // None: no rule has matched the item yet
    let mut actions: Vec<Option<FilterAction>> = vec![None; len];

    let exclude_key = format!("{list_key}!");
    let regex_key = format!("{list_key}/");
    let excluded_key = format!("{list_key}_excluded");

    let items = mapping
        .get(list_key)
        .and_then(Value::as_sequence)
        .cloned()
        .unwrap_or_default();

    if let Some(Value::Sequence(excludes)) = mapping.shift_remove(&exclude_key) {
        for (index, item) in items.iter().enumerate() {
            if excludes.contains(item) {
                actions[index] = Some(FilterAction::Exclude);
            }
        }
    }

    if let Some(Value::Sequence(rules)) = mapping.shift_remove(&regex_key) {
        for rule in &rules {
            let (action, pattern) = match rule.as_sequence().map(Vec::as_slice) {
                Some([Value::String(action), Value::String(pattern)]) => (action, pattern),
                _ => return Err(filter_error(&regex_key, format!("invalid rule {rule}"))),
            };
            let action = match action.as_str() {
                "exclude" => FilterAction::Exclude,
                "include" => FilterAction::Include,
                other => {
                    return Err(filter_error(
                        &regex_key,
                        format!("unrecognized action {other:?}"),
                    ));
                }
            };
            let regex = Regex::new(pattern)
                .map_err(|e| filter_error(&regex_key, format!("invalid pattern: {e}")))?;

            for (index, item) in items.iter().enumerate() {
                if actions[index] != Some(action) && regex.is_match(&item_text(item)) {
                    actions[index] = Some(action);
                }
            }
        }
    }

    if mapping.contains_key(&excluded_key) {
        return Err(filter_error(
            &excluded_key,
            format!("must not be present before filters for {list_key} are applied"),
        ));
    }

    let mut excluded = vec![];
    if let Some(Value::Sequence(list)) = mapping.get_mut(list_key) {
        let (kept, removed): (Vec<_>, Vec<_>) =
            list.drain(..).enumerate().partition_map(|(index, item)| {
                match actions[index] {
                    Some(FilterAction::Exclude) => Either::Right(item),
                    _ => Either::Left(item),
                }
            });
        *list = kept;
        excluded = removed;
    }

    if !excluded.is_empty() {
        trace!(list_key, count = excluded.len(), "excluded list items");
        mapping.insert(excluded_key, Value::Sequence(excluded));
    }

    Ok(())
}
