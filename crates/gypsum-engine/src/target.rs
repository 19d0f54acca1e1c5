use std::fmt::{Display, Formatter};

use gypsum_syntax::{Mapping, Value};
use gypsum_util::paths::{dirname, join_normalized};
use indexmap::IndexMap;
use itertools::Itertools;
use tracing::trace;

use crate::errors::{EngineError, EngineResult};
use crate::expand::canonical_integer;
use crate::filter::process_list_filters;

/// Keys holding references to other targets.
pub const DEPENDENCY_SECTIONS: &[&str] = &["dependencies", "export_dependent_settings"];

/// A target identified by its unit and its `target_name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    pub unit: String,
    pub name: String,
}

impl Display for QualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.unit, self.name)
    }
}

impl QualifiedName {
    pub fn new<U: Into<String>, N: Into<String>>(unit: U, name: N) -> Self {
        QualifiedName {
            unit: unit.into(),
            name: name.into(),
        }
    }

    /// Split an already qualified `unit:name` reference.
    pub fn parse(reference: &str) -> Option<Self> {
        let (unit, name) = reference.rsplit_once(':')?;
        Some(QualifiedName::new(unit, name))
    }

    /// Resolve `reference` as written in `referrer_unit`. `name` refers to a target in the same
    /// unit and `path:name` to a target in `path`, relative to the referrer's directory.
    pub fn resolve(referrer_unit: &str, reference: &str) -> Self {
        match reference.rsplit_once(':') {
            Some((unit, name)) => QualifiedName::new(
                join_normalized(dirname(referrer_unit), unit),
                name,
            ),
            None => QualifiedName::new(referrer_unit, reference),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.name == "*"
    }
}

/// Interpret an optional integer-like flag (`suppress_wildcard`, `dependencies_traverse`, ...).
pub fn flag_value(value: Option<&Value>) -> Option<bool> {
    Some(match value? {
        Value::Integer(i) => *i != 0,
        Value::Boolean(b) => *b,
        Value::String(s) => canonical_integer(s).map_or(!s.is_empty(), |i| i != 0),
        other => other.is_truthy(),
    })
}

/// The qualified dependency list stored under `key`, if any.
pub fn dependency_list(target: &Mapping, key: &str) -> Vec<QualifiedName> {
    target
        .get(key)
        .and_then(Value::as_sequence)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(QualifiedName::parse)
                .collect()
        })
        .unwrap_or_default()
}

fn dependency_keys() -> impl Iterator<Item = String> {
    DEPENDENCY_SECTIONS
        .iter()
        .cartesian_product(["", "!", "/"])
        .map(|(section, op)| format!("{section}{op}"))
}

/// Rewrite every target reference in the dependency sections (and their `!`/`/` variants) to
/// `unit:name` form.
pub fn qualify_dependencies(targets: &mut IndexMap<QualifiedName, Mapping>) -> EngineResult<()> {
    for (name, target) in targets.iter_mut() {
        for key in dependency_keys() {
            let Some(value) = target.get_mut(&key) else {
                continue;
            };
            let Value::Sequence(items) = value else {
                return Err(EngineError::InvalidTarget {
                    target: name.to_string(),
                    message: format!("{key} must be a list"),
                }
                .into());
            };
            for item in items.iter_mut() {
                if let Value::String(reference) = item {
                    let qualified = QualifiedName::resolve(&name.unit, reference);
                    trace!(%name, reference = reference.as_str(), %qualified, "qualified dependency");
                    *item = Value::String(qualified.to_string());
                }
            }
        }
    }
    Ok(())
}

/// Replace `unit:*` references with every target of `unit` that is neither a group (`type:
/// none`) nor marked `suppress_wildcard`.
pub fn expand_wildcard_dependencies(
    targets: &mut IndexMap<QualifiedName, Mapping>,
) -> EngineResult<()> {
    let candidates = targets
        .iter()
        .filter(|(_, t)| !flag_value(t.get("suppress_wildcard")).unwrap_or(false))
        .filter(|(_, t)| t.get("type").and_then(Value::as_str) != Some("none"))
        .map(|(name, _)| name.clone())
        .into_group_map_by(|name| name.unit.clone());

    for (name, target) in targets.iter_mut() {
        for section in DEPENDENCY_SECTIONS {
            let Some(Value::Sequence(items)) = target.get_mut(*section) else {
                continue;
            };

            let mut expanded = Vec::with_capacity(items.len());
            for item in items.drain(..) {
                let wildcard = item
                    .as_str()
                    .and_then(QualifiedName::parse)
                    .filter(QualifiedName::is_wildcard);
                let Some(wildcard) = wildcard else {
                    expanded.push(item);
                    continue;
                };

                if wildcard.unit == name.unit {
                    return Err(EngineError::SelfWildcard {
                        dependency: wildcard.to_string(),
                        target: name.to_string(),
                    }
                    .into());
                }

                let matches = candidates.get(&wildcard.unit).map_or(&[][..], Vec::as_slice);
                trace!(%name, %wildcard, count = matches.len(), "expanded wildcard");
                expanded.extend(matches.iter().map(|m| Value::String(m.to_string())));
            }
            *items = expanded;
        }
    }
    Ok(())
}

/// Apply `!` and `/` list filters to the dependency sections of every target.
pub fn filter_dependency_sections(
    targets: &mut IndexMap<QualifiedName, Mapping>,
) -> EngineResult<()> {
    for target in targets.values_mut() {
        let mut sections = Mapping::new();
        for key in dependency_keys() {
            if let Some(value) = target.shift_remove(&key) {
                sections.insert(key, value);
            }
        }
        process_list_filters(&mut sections)?;
        target.extend(sections);
    }
    Ok(())
}

/// Drop repeated entries from the dependency sections, keeping first occurrences.
pub fn remove_duplicate_dependencies(targets: &mut IndexMap<QualifiedName, Mapping>) {
    for target in targets.values_mut() {
        for section in DEPENDENCY_SECTIONS {
            if let Some(Value::Sequence(items)) = target.get_mut(*section) {
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in items.drain(..) {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                *items = unique;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gypsum_syntax::parse_value_from_str;
    use pretty_assertions::assert_eq;

    fn targets(defs: &[(&str, &str)]) -> IndexMap<QualifiedName, Mapping> {
        defs.iter()
            .map(|(name, text)| {
                let Value::Mapping(m) = parse_value_from_str(text).unwrap() else {
                    panic!("not a mapping");
                };
                (QualifiedName::parse(name).unwrap(), m)
            })
            .collect()
    }

    fn deps(targets: &IndexMap<QualifiedName, Mapping>, name: &str) -> Vec<String> {
        dependency_list(&targets[&QualifiedName::parse(name).unwrap()], "dependencies")
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn resolve() {
        assert_eq!(
            QualifiedName::resolve("a/b.gyp", "c"),
            QualifiedName::new("a/b.gyp", "c")
        );
        assert_eq!(
            QualifiedName::resolve("a/b.gyp", "../x/y.gyp:z"),
            QualifiedName::new("x/y.gyp", "z")
        );
        assert_eq!(QualifiedName::new("u.gyp", "t").to_string(), "u.gyp:t");
    }

    #[test]
    fn qualify() {
        let mut t = targets(&[(
            "src/a.gyp:a",
            "{'dependencies': ['b', '../lib/l.gyp:l'], 'dependencies!': ['b'],
              'dependencies/': [['exclude', 'x']]}",
        )]);
        qualify_dependencies(&mut t).unwrap();
        let a = &t[0];
        assert_eq!(
            a["dependencies"],
            Value::from(vec!["src/a.gyp:b", "lib/l.gyp:l"])
        );
        assert_eq!(a["dependencies!"], Value::from(vec!["src/a.gyp:b"]));
        assert_eq!(
            a["dependencies/"],
            Value::Sequence(vec![Value::from(vec!["exclude", "x"])])
        );
    }

    #[test]
    fn wildcards() {
        let mut t = targets(&[
            ("u1.gyp:x", "{'type': 'static_library'}"),
            ("u1.gyp:y", "{'type': 'static_library', 'suppress_wildcard': 1}"),
            ("u1.gyp:z", "{'type': 'executable'}"),
            ("u1.gyp:g", "{'type': 'none'}"),
            (
                "u2.gyp:t",
                "{'type': 'executable', 'dependencies': ['u2.gyp:w', 'u1.gyp:*']}",
            ),
            ("u2.gyp:w", "{'type': 'none'}"),
        ]);
        expand_wildcard_dependencies(&mut t).unwrap();
        assert_eq!(
            deps(&t, "u2.gyp:t"),
            vec!["u2.gyp:w", "u1.gyp:x", "u1.gyp:z"]
        );
    }

    #[test]
    fn self_wildcard() {
        let mut t = targets(&[("u1.gyp:x", "{'dependencies': ['u1.gyp:*']}")]);
        let err = expand_wildcard_dependencies(&mut t).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::SelfWildcard { .. })
        ));
    }

    #[test]
    fn filters_and_duplicates() {
        let mut t = targets(&[(
            "u.gyp:t",
            "{'dependencies': ['u.gyp:a', 'u.gyp:b', 'u.gyp:a', 'u.gyp:c_test'],
              'dependencies!': ['u.gyp:b'],
              'dependencies/': [['exclude', '_test$']]}",
        )]);
        filter_dependency_sections(&mut t).unwrap();
        remove_duplicate_dependencies(&mut t);
        assert_eq!(deps(&t, "u.gyp:t"), vec!["u.gyp:a"]);
        assert_eq!(
            t[0]["dependencies_excluded"],
            Value::from(vec!["u.gyp:b", "u.gyp:c_test"])
        );
    }

    #[test]
    fn flags() {
        assert_eq!(flag_value(None), None);
        assert_eq!(flag_value(Some(&Value::from("0"))), Some(false));
        assert_eq!(flag_value(Some(&Value::Integer(1))), Some(true));
        assert_eq!(flag_value(Some(&Value::Boolean(false))), Some(false));
    }
}
