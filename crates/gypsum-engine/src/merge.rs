//! Merging of one mapping into another.
//!
//! Scalars overwrite, mappings merge recursively and sequences follow the operator suffix on
//! their key:
//!
//! | key         | effect                                                  |
//! |-------------|---------------------------------------------------------|
//! | `sources`   | append, skipping singletons that are already present    |
//! | `sources+`  | prepend, moving singletons that are already present     |
//! | `sources=`  | replace                                                 |
//! | `sources?`  | set only if `sources` does not exist yet                |
//!
//! String items under path-valued keys are rewritten so they stay relative to the unit that
//! receives them.

use gypsum_syntax::{Mapping, Value};
use gypsum_util::paths::{dirname, join, normalize, relative_path};
use gypsum_util::split::split_key_suffix;
use tracing::trace;

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};

const LIST_POLICY_SUFFIXES: &[char] = &['=', '+', '?'];

/// Whether a sequence item may appear at most once when merging.
///
/// Strings starting with `-` are treated as flags that may legitimately repeat (`-framework A
/// -framework B`).
fn is_singleton(item: &Value) -> bool {
    match item {
        Value::String(s) => !s.starts_with('-'),
        Value::Integer(_) => true,
        _ => false,
    }
}

pub struct Merger<'a> {
    config: &'a EngineConfig,
}

impl<'a> Merger<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Merger { config }
    }

    /// Rewrite `item` from being relative to `from_unit` to being relative to `to_unit`.
    fn fix_path(&self, item: &str, to_unit: &str, from_unit: &str) -> String {
        if to_unit == from_unit || item.starts_with(['/', '$', '-', '<', '>']) {
            return item.to_string();
        }

        let prefix = relative_path(dirname(from_unit), dirname(to_unit));
        if prefix.is_empty() {
            return item.to_string();
        }

        let mut fixed = normalize(&join(&prefix, item));
        if item.ends_with('/') && !fixed.ends_with('/') {
            fixed.push('/');
        }
        fixed
    }

    /// Deep copy `value`, rewriting paths when `is_path` is set.
    fn copy_value(
        &self,
        value: &Value,
        is_path: bool,
        to_unit: &str,
        from_unit: &str,
    ) -> EngineResult<Value> {
        Ok(match value {
            Value::String(s) if is_path => Value::String(self.fix_path(s, to_unit, from_unit)),
            Value::Mapping(m) => {
                let mut copy = Mapping::new();
                self.merge_into(&mut copy, m, to_unit, from_unit)?;
                Value::Mapping(copy)
            }
            Value::Sequence(items) => {
                let mut copy = vec![];
                self.merge_lists(&mut copy, items, to_unit, from_unit, is_path, true)?;
                Value::Sequence(copy)
            }
            other => other.clone(),
        })
    }

    /// Merge the items of `from` into `to`, appending or (with `append == false`) prepending.
    pub fn merge_lists(
        &self,
        to: &mut Vec<Value>,
        from: &[Value],
        to_unit: &str,
        from_unit: &str,
        is_path: bool,
        append: bool,
    ) -> EngineResult<()> {
        let mut prepend_index = 0;

        for item in from {
            let singleton = is_singleton(item);
            let item = self.copy_value(item, is_path, to_unit, from_unit)?;

            if append {
                if !(singleton && to.contains(&item)) {
                    to.push(item);
                }
            } else {
                if singleton {
                    // Moving an item ahead of the insertion point shifts the point back by one
                    while let Some(pos) = to.iter().position(|x| x == &item) {
                        to.remove(pos);
                        if pos < prepend_index {
                            prepend_index -= 1;
                        }
                    }
                }
                let index = prepend_index.min(to.len());
                to.insert(index, item);
                prepend_index = index + 1;
            }
        }

        Ok(())
    }

    /// Merge `from` into `to`. `to_unit` is the unit `to` belongs to and `from_unit` the unit
    /// `from` was written in.
    pub fn merge_into(
        &self,
        to: &mut Mapping,
        from: &Mapping,
        to_unit: &str,
        from_unit: &str,
    ) -> EngineResult<()> {
        for (key, value) in from {
            match value {
                Value::String(_) | Value::Integer(_) | Value::Boolean(_) => {
                    if let Some(existing) = to.get(key)
                        && !existing.is_scalar()
                    {
                        return Err(EngineError::TypeMismatch {
                            key: key.clone(),
                            existing: existing.kind_name(),
                            incoming: value.kind_name(),
                        }
                        .into());
                    }
                    let is_path = self.config.is_path_section(key);
                    let copy = self.copy_value(value, is_path, to_unit, from_unit)?;
                    to.insert(key.clone(), copy);
                }
                Value::Mapping(m) => match to.get_mut(key) {
                    Some(Value::Mapping(existing)) => {
                        self.merge_into(existing, m, to_unit, from_unit)?
                    }
                    Some(existing) => {
                        return Err(EngineError::TypeMismatch {
                            key: key.clone(),
                            existing: existing.kind_name(),
                            incoming: value.kind_name(),
                        }
                        .into());
                    }
                    None => {
                        let mut copy = Mapping::new();
                        self.merge_into(&mut copy, m, to_unit, from_unit)?;
                        to.insert(key.clone(), Value::Mapping(copy));
                    }
                },
                Value::Sequence(items) => {
                    self.merge_sequence_key(to, from, key, items, to_unit, from_unit)?
                }
            }
        }

        Ok(())
    }

    fn merge_sequence_key(
        &self,
        to: &mut Mapping,
        from: &Mapping,
        key: &str,
        items: &[Value],
        to_unit: &str,
        from_unit: &str,
    ) -> EngineResult<()> {
        let (base, policy) = split_key_suffix(key, LIST_POLICY_SUFFIXES);

        // Only one spelling of a list key may appear in a single source mapping
        let spellings = std::iter::once(base.to_string())
            .chain(LIST_POLICY_SUFFIXES.iter().map(|c| format!("{base}{c}")));
        for other in spellings {
            if other != key && from.contains_key(&other) {
                return Err(EngineError::IncompatibleListPolicy {
                    key: key.to_string(),
                    other,
                }
                .into());
            }
        }

        let mut append = true;
        match policy {
            Some('=') => {
                to.insert(base.to_string(), Value::Sequence(vec![]));
            }
            Some('+') => append = false,
            Some('?') if to.contains_key(base) => return Ok(()),
            _ => {}
        }

        let is_path = self.config.is_path_section(base);
        let existing = match to
            .entry(base.to_string())
            .or_insert_with(|| Value::Sequence(vec![]))
        {
            Value::Sequence(existing) => existing,
            other => {
                return Err(EngineError::TypeMismatch {
                    key: key.to_string(),
                    existing: other.kind_name(),
                    incoming: "sequence",
                }
                .into());
            }
        };

        trace!(key, count = items.len(), append, "merging list");
        self.merge_lists(existing, items, to_unit, from_unit, is_path, append)
    }
}
