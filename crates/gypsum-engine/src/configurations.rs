//! Splitting of a target into one mapping per build configuration.
//!
//! A configuration starts as a copy of every target key that is not target-scope-only, then
//! receives its `inherit_from` parents and finally its own settings. Configurations marked
//! `abstract` only exist to be inherited from and are dropped afterwards.

use fxhash::FxHashSet;
use gypsum_syntax::{Mapping, Value};
use gypsum_util::split::trim_key_suffixes;
use itertools::Itertools;
use tracing::trace;

use crate::config::{EngineConfig, KEY_OPERATOR_SUFFIXES};
use crate::errors::{EngineError, EngineResult};
use crate::merge::Merger;
use crate::target::{QualifiedName, flag_value};

/// Keys that make no sense once a target has been split into configurations.
pub const INVALID_CONFIGURATION_KEYS: &[&str] = &[
    "actions",
    "all_dependent_settings",
    "configurations",
    "dependencies",
    "direct_dependent_settings",
    "libraries",
    "link_settings",
    "sources",
    "standalone_static_library",
    "target_name",
    "type",
];

fn configuration_error(name: &QualifiedName, message: impl Into<String>) -> anyhow::Error {
    EngineError::Configuration {
        target: name.to_string(),
        message: message.into(),
    }
    .into()
}

fn is_abstract(configuration: &Mapping) -> bool {
    flag_value(configuration.get("abstract")).unwrap_or(false)
}

struct Partitioner<'a> {
    name: &'a QualifiedName,
    configurations: &'a Mapping,
    merger: &'a Merger<'a>,
}

impl Partitioner<'_> {
    fn configuration(&self, configuration: &str) -> EngineResult<&Mapping> {
        match self.configurations.get(configuration) {
            Some(Value::Mapping(m)) => Ok(m),
            Some(other) => Err(configuration_error(
                self.name,
                format!("configuration {configuration} is a {}", other.kind_name()),
            )),
            None => Err(configuration_error(
                self.name,
                format!("configuration {configuration} does not exist"),
            )),
        }
    }

    /// Merge `configuration` into `into`, its parents first.
    fn merge_with_parents(
        &self,
        into: &mut Mapping,
        configuration: &str,
        visited: &mut FxHashSet<String>,
    ) -> EngineResult<()> {
        if !visited.insert(configuration.to_string()) {
            return Ok(());
        }

        let settings = self.configuration(configuration)?;
        if let Some(parents) = settings.get("inherit_from") {
            let Value::Sequence(parents) = parents else {
                return Err(configuration_error(
                    self.name,
                    format!("inherit_from of {configuration} must be a list"),
                ));
            };
            for parent in parents {
                let Value::String(parent) = parent else {
                    return Err(configuration_error(
                        self.name,
                        format!("inherit_from of {configuration} must list names"),
                    ));
                };
                trace!(name = %self.name, configuration, parent, "inheriting configuration");
                self.merge_with_parents(into, parent, visited)?;
            }
        }

        let unit = self.name.unit.as_str();
        self.merger.merge_into(into, settings, unit, unit)
    }
}

/// Replace `target`'s settings with fully merged per-configuration mappings.
pub fn set_up_configurations(
    name: &QualifiedName,
    target: &mut Mapping,
    config: &EngineConfig,
    merger: &Merger<'_>,
) -> EngineResult<()> {
    if target.contains_key("variants") && !config.handles_variants {
        return Err(configuration_error(
            name,
            "variants are not supported by this generator",
        ));
    }

    let configurations = match target.get("configurations") {
        None => Mapping::from_iter([(String::from("Default"), Value::Mapping(Mapping::new()))]),
        Some(Value::Mapping(m)) => m.clone(),
        Some(other) => {
            return Err(configuration_error(
                name,
                format!("configurations must be a mapping, not a {}", other.kind_name()),
            ));
        }
    };

    let partitioner = Partitioner {
        name,
        configurations: &configurations,
        merger,
    };

    let mut concrete = vec![];
    for configuration in configurations.keys() {
        if !is_abstract(partitioner.configuration(configuration)?) {
            concrete.push(configuration.clone());
        }
    }

    let default = match target.get("default_configuration") {
        None => concrete.iter().sorted().next().cloned().ok_or_else(|| {
            configuration_error(name, "there is no concrete configuration")
        })?,
        Some(Value::String(default)) => {
            if !concrete.contains(default) {
                return Err(configuration_error(
                    name,
                    format!("default_configuration {default} is not a concrete configuration"),
                ));
            }
            default.clone()
        }
        Some(other) => {
            return Err(configuration_error(
                name,
                format!("default_configuration must be a string, not a {}", other.kind_name()),
            ));
        }
    };

    let inherited: Mapping = target
        .iter()
        .filter(|(key, _)| !config.is_non_configuration_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let mut merged = Mapping::new();
    for configuration in &concrete {
        let mut settings = inherited.clone();
        let mut visited = FxHashSet::default();
        partitioner.merge_with_parents(&mut settings, configuration, &mut visited)?;
        settings.shift_remove("abstract");
        settings.shift_remove("inherit_from");

        if let Some(key) = settings
            .keys()
            .find(|k| INVALID_CONFIGURATION_KEYS.contains(&trim_key_suffixes(k, KEY_OPERATOR_SUFFIXES)))
        {
            return Err(configuration_error(
                name,
                format!("{key} is not allowed in configuration {configuration}"),
            ));
        }

        merged.insert(configuration.clone(), Value::Mapping(settings));
    }

    target.retain(|key, _| config.is_non_configuration_key(key));
    target.insert(String::from("configurations"), Value::Mapping(merged));
    target.insert(String::from("default_configuration"), Value::String(default));
    Ok(())
}
