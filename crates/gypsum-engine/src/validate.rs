use std::iter;

use fxhash::FxHashMap;
use gypsum_syntax::{Mapping, Value};
use tracing::trace;

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::target::{QualifiedName, flag_value};

pub const VALID_TARGET_TYPES: &[&str] = &[
    "executable",
    "loadable_module",
    "none",
    "shared_library",
    "static_library",
];

fn invalid_target(name: &QualifiedName, message: impl Into<String>) -> anyhow::Error {
    EngineError::InvalidTarget {
        target: name.to_string(),
        message: message.into(),
    }
    .into()
}

fn invalid_rule(name: &QualifiedName, message: impl Into<String>) -> anyhow::Error {
    EngineError::InvalidRule {
        target: name.to_string(),
        message: message.into(),
    }
    .into()
}

/// The extension of the last path component, without its dot. Leading dots do not start an
/// extension (`.gitignore` has none).
fn extension(path: &str) -> &str {
    let base = path.rsplit_once('/').map_or(path, |(_, base)| base);
    let stem = base.trim_start_matches('.');
    stem.rfind('.').map_or("", |dot| &stem[dot + 1..])
}

fn string_field<'m>(mapping: &'m Mapping, key: &str) -> Option<&'m str> {
    mapping.get(key).and_then(Value::as_str)
}

/// Check a fully processed target and fill in each rule's `rule_sources`.
pub fn validate_target(
    name: &QualifiedName,
    target: &mut Mapping,
    config: &EngineConfig,
) -> EngineResult<()> {
    validate_type(name, target)?;
    validate_rules(name, target, config)?;
    validate_run_as(name, target)?;
    validate_actions(name, target)
}

fn validate_type(name: &QualifiedName, target: &Mapping) -> EngineResult<()> {
    let kind = string_field(target, "type").unwrap_or_default();
    if !VALID_TARGET_TYPES.contains(&kind) {
        return Err(invalid_target(
            name,
            format!(
                "type {kind:?} is not one of {}",
                VALID_TARGET_TYPES.join(", ")
            ),
        ));
    }
    if flag_value(target.get("standalone_static_library")).unwrap_or(false)
        && kind != "static_library"
    {
        return Err(invalid_target(
            name,
            "standalone_static_library is only valid on static libraries",
        ));
    }
    Ok(())
}

fn validate_rules(
    name: &QualifiedName,
    target: &mut Mapping,
    config: &EngineConfig,
) -> EngineResult<()> {
    let sources: Vec<String> = iter::once("sources")
        .chain(config.extra_sources_for_rules.iter().map(String::as_str))
        .filter_map(|key| target.get(key).and_then(Value::as_sequence))
        .flatten()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect();

    let Some(rules) = target.get_mut("rules") else {
        return Ok(());
    };
    let Value::Sequence(rules) = rules else {
        return Err(invalid_rule(name, "rules must be a list"));
    };

    let mut rule_names: FxHashMap<String, usize> = FxHashMap::default();
    let mut extensions: FxHashMap<String, String> = FxHashMap::default();

    for (index, rule) in rules.iter_mut().enumerate() {
        let Value::Mapping(rule) = rule else {
            return Err(invalid_rule(name, format!("rule {index} is not a mapping")));
        };

        let Some(rule_name) = string_field(rule, "rule_name").map(String::from) else {
            return Err(invalid_rule(name, format!("rule {index} has no rule_name")));
        };
        if rule_names.insert(rule_name.clone(), index).is_some() {
            return Err(invalid_rule(name, format!("rule {rule_name} exists in duplicate")));
        }

        let Some(ext) = string_field(rule, "extension") else {
            return Err(invalid_rule(name, format!("rule {rule_name} has no extension")));
        };
        let ext = ext.strip_prefix('.').unwrap_or(ext).to_string();
        if let Some(other) = extensions.insert(ext.clone(), rule_name.clone()) {
            return Err(invalid_rule(
                name,
                format!("extension {ext} is associated with rules {other} and {rule_name}"),
            ));
        }

        if rule.contains_key("rule_sources") {
            return Err(invalid_rule(
                name,
                format!("rule_sources must not be set in rule {rule_name}"),
            ));
        }

        let matched: Vec<Value> = sources
            .iter()
            .filter(|source| extension(source) == ext)
            .map(|source| Value::String(source.clone()))
            .collect();
        if !matched.is_empty() {
            trace!(%name, rule_name, count = matched.len(), "rule sources");
            rule.insert(String::from("rule_sources"), Value::Sequence(matched));
        }
    }

    Ok(())
}

fn validate_run_as(name: &QualifiedName, target: &Mapping) -> EngineResult<()> {
    let Some(run_as) = target.get("run_as") else {
        return Ok(());
    };
    let Value::Mapping(run_as) = run_as else {
        return Err(invalid_target(name, "run_as must be a mapping"));
    };
    if !matches!(run_as.get("action"), Some(Value::Sequence(_))) {
        return Err(invalid_target(name, "run_as must have an action list"));
    }
    if run_as
        .get("working_directory")
        .is_some_and(|v| !matches!(v, Value::String(_)))
    {
        return Err(invalid_target(name, "run_as working_directory must be a string"));
    }
    if run_as
        .get("environment")
        .is_some_and(|v| !matches!(v, Value::Mapping(_)))
    {
        return Err(invalid_target(name, "run_as environment must be a mapping"));
    }
    Ok(())
}

fn validate_actions(name: &QualifiedName, target: &Mapping) -> EngineResult<()> {
    let Some(actions) = target.get("actions") else {
        return Ok(());
    };
    let Value::Sequence(actions) = actions else {
        return Err(invalid_rule(name, "actions must be a list"));
    };

    for (index, action) in actions.iter().enumerate() {
        let Value::Mapping(action) = action else {
            return Err(invalid_rule(name, format!("action {index} is not a mapping")));
        };
        let action_name = match string_field(action, "action_name") {
            Some(n) if !n.is_empty() => n,
            _ => {
                return Err(invalid_rule(
                    name,
                    format!("action {index} has no action_name"),
                ));
            }
        };
        if !matches!(action.get("inputs"), Some(Value::Sequence(_))) {
            return Err(invalid_rule(
                name,
                format!("action {action_name} has no inputs"),
            ));
        }
        let command = action
            .get("action")
            .and_then(Value::as_sequence)
            .and_then(|c| c.first());
        if command.is_none_or(|c| c.to_text().unwrap_or_default().is_empty()) {
            return Err(invalid_rule(
                name,
                format!("action {action_name} has an empty command"),
            ));
        }
    }

    Ok(())
}
