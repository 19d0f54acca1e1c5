use anyhow::Context;
use gypsum_syntax::{Mapping, Value};
use gypsum_util::paths::{dirname, normalize, relative_path};
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use crate::command::CommandRunner;
use crate::config::EngineConfig;
use crate::configurations::set_up_configurations;
use crate::errors::{EngineError, EngineResult};
use crate::evaluate::Evaluator;
use crate::expand::Phase;
use crate::filter::process_list_filters;
use crate::graph::{DependencyGraph, Targets, check_unit_cycles};
use crate::loader::{Loader, Unit, UnitSource, contributing_units};
use crate::merge::Merger;
use crate::scope::VariableScope;
use crate::settings::propagate_dependent_settings;
use crate::static_deps::adjust_static_dependencies;
use crate::target::{
    QualifiedName, expand_wildcard_dependencies, filter_dependency_sections,
    qualify_dependencies, remove_duplicate_dependencies,
};
use crate::validate::validate_target;

/// What to evaluate.
#[derive(Clone, Debug, Default)]
pub struct LoadRequest {
    /// Target units to start from. Units they depend on are loaded as well.
    pub units: Vec<String>,
    /// Variables visible everywhere, e.g. from `-D name=value`.
    pub variables: Mapping,
    /// Units merged into every target unit ahead of its own `includes`.
    pub includes: Vec<String>,
    /// Directory the `DEPTH` variable is computed against.
    pub depth: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoadOutput {
    /// Every target, dependencies before dependents.
    pub flat_list: Vec<QualifiedName>,
    /// Fully processed targets, in `flat_list` order.
    pub targets: Targets,
    /// Every unit read during the run. Target units hold their processed top-level data without
    /// `targets`; included units hold their merged data.
    pub units: IndexMap<String, Unit>,
}

impl LoadOutput {
    /// `path` and every unit it included, transitively.
    pub fn contributing_units(&self, path: &str) -> Vec<String> {
        contributing_units(&self.units, path)
    }
}

/// Turn every integer into its decimal string.
fn stringify_integers(value: &mut Value) {
    match value {
        Value::Integer(i) => *value = Value::String(i.to_string()),
        Value::Sequence(items) => items.iter_mut().for_each(stringify_integers),
        Value::Mapping(m) => m.values_mut().for_each(stringify_integers),
        Value::String(_) | Value::Boolean(_) => {}
    }
}

fn stringify_mapping(mapping: &mut Mapping) {
    mapping.values_mut().for_each(stringify_integers);
}

struct Session<'a> {
    request: &'a LoadRequest,
    config: &'a EngineConfig,
    loader: Loader<'a>,
    evaluator: Evaluator<'a>,
    variables: VariableScope,
    visited: IndexSet<String>,
    /// Target units after the early phase, in load order
    target_units: IndexMap<String, Mapping>,
}

impl Session<'_> {
    /// The request's variables plus `DEPTH` for `unit`.
    fn unit_scope(&self, unit: &str) -> VariableScope {
        let mut scope = self.variables.clone();
        if let Some(depth) = &self.request.depth {
            let relative = relative_path(depth, dirname(unit));
            let relative = if relative.is_empty() {
                String::from(".")
            } else {
                relative
            };
            scope.insert("DEPTH", Value::String(relative));
        }
        scope
    }

    /// Load `path` as a target unit, then every unit its targets depend on.
    fn load_target_unit(&mut self, path: &str) -> EngineResult<()> {
        if !self.visited.insert(path.to_string()) {
            return Ok(());
        }
        debug!(path, "loading target unit");

        let mut data = self.loader.load_unit(path, &self.request.includes)?;

        if data.contains_key("included_files") {
            anyhow::bail!("{path} must not contain an included_files key");
        }
        let included = self
            .loader
            .contributing_units(path)
            .iter()
            .map(|unit| Value::String(relative_path(unit, dirname(path))))
            .collect();
        data.insert(String::from("included_files"), Value::Sequence(included));

        let scope = self.unit_scope(path);
        self.evaluator
            .process_mapping(&mut data, Phase::Early, &scope, path, None)?;

        self.apply_target_defaults(&mut data, path)?;
        let dependencies = unit_dependencies(&data, path);
        self.target_units.insert(path.to_string(), data);

        for dependency in dependencies {
            self.load_target_unit(&dependency)
                .with_context(|| format!("while loading dependencies of {path}"))?;
        }
        Ok(())
    }

    /// Late phase, configurations, list filters and validation for one target.
    fn finish_target(
        &self,
        name: &QualifiedName,
        target: &mut Mapping,
        merger: &Merger<'_>,
    ) -> EngineResult<()> {
        let scope = self.unit_scope(&name.unit);
        self.evaluator
            .process_mapping(target, Phase::Late, &scope, &name.unit, None)?;
        set_up_configurations(name, target, self.config, merger)?;
        process_list_filters(target)?;
        validate_target(name, target, self.config)
    }

    /// Replace each target with `target_defaults` merged with the target.
    fn apply_target_defaults(&self, data: &mut Mapping, path: &str) -> EngineResult<()> {
        let Some(defaults) = data.shift_remove("target_defaults") else {
            return Ok(());
        };
        let Value::Mapping(defaults) = defaults else {
            anyhow::bail!("target_defaults in {path} must be a mapping");
        };
        let Some(Value::Sequence(targets)) = data.get_mut("targets") else {
            anyhow::bail!("{path} has target_defaults but no targets list");
        };

        let merger = self.evaluator.merger();
        for target in targets.iter_mut() {
            let Value::Mapping(own) = target else {
                continue;
            };
            let mut merged = defaults.clone();
            merger.merge_into(&mut merged, own, path, path)?;
            *own = merged;
        }
        Ok(())
    }
}

/// Units referenced from the `dependencies` of `data`'s targets.
fn unit_dependencies(data: &Mapping, path: &str) -> Vec<String> {
    let mut units = IndexSet::new();
    let targets = data
        .get("targets")
        .and_then(Value::as_sequence)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for target in targets.iter().filter_map(Value::as_mapping) {
        let Some(dependencies) = target.get("dependencies").and_then(Value::as_sequence) else {
            continue;
        };
        for dependency in dependencies.iter().filter_map(Value::as_str) {
            units.insert(QualifiedName::resolve(path, dependency).unit);
        }
    }
    units.into_iter().collect()
}

/// Pull the targets out of every target unit, keyed by qualified name.
fn collect_targets(target_units: &mut IndexMap<String, Mapping>) -> EngineResult<Targets> {
    let mut targets = Targets::new();
    for (unit, data) in target_units.iter_mut() {
        let Some(list) = data.shift_remove("targets") else {
            continue;
        };
        let Value::Sequence(list) = list else {
            anyhow::bail!("targets in {unit} must be a list");
        };

        for (index, target) in list.into_iter().enumerate() {
            let Value::Mapping(target) = target else {
                anyhow::bail!("target {index} in {unit} is not a mapping");
            };
            let Some(target_name) = target.get("target_name").and_then(Value::as_str) else {
                return Err(EngineError::InvalidTarget {
                    target: format!("{unit}:#{index}"),
                    message: String::from("missing 'target_name' field"),
                }
                .into());
            };

            let name = QualifiedName::new(unit.as_str(), target_name);
            if targets.contains_key(&name) {
                return Err(EngineError::DuplicateTarget {
                    name: name.to_string(),
                }
                .into());
            }
            targets.insert(name, target);
        }
    }
    Ok(targets)
}

/// Evaluate the units named in `request` and everything they depend on into an ordered,
/// fully processed set of targets.
pub fn load(
    request: &LoadRequest,
    config: &EngineConfig,
    source: &dyn UnitSource,
    runner: &dyn CommandRunner,
) -> EngineResult<LoadOutput> {
    let merger = Merger::new(config);
    let mut variables = VariableScope::new();
    for (name, value) in &request.variables {
        variables.insert(name.clone(), value.clone());
    }

    let mut session = Session {
        request,
        config,
        loader: Loader::new(source, &merger),
        evaluator: Evaluator::new(config, runner),
        variables,
        visited: IndexSet::new(),
        target_units: IndexMap::new(),
    };

    for unit in &request.units {
        session.load_target_unit(&normalize(unit))?;
    }

    let mut targets = collect_targets(&mut session.target_units)?;
    info!(
        units = session.target_units.len(),
        targets = targets.len(),
        "loaded target units"
    );

    qualify_dependencies(&mut targets)?;
    expand_wildcard_dependencies(&mut targets)?;
    filter_dependency_sections(&mut targets)?;
    remove_duplicate_dependencies(&mut targets);

    if config.check_unit_cycles {
        check_unit_cycles(&targets)?;
    }

    let graph = DependencyGraph::build(&targets)?;
    let flat_list = graph.flatten()?;

    propagate_dependent_settings(&mut targets, &flat_list, &graph, &merger)?;
    adjust_static_dependencies(&mut targets, &flat_list, &graph, config.sort_dependencies)?;

    let mut ordered = Targets::with_capacity(targets.len());
    for name in &flat_list {
        let Some(mut target) = targets.shift_remove(name) else {
            continue;
        };

        session
            .finish_target(name, &mut target, &merger)
            .with_context(|| format!("while processing target {name}"))?;
        stringify_mapping(&mut target);
        ordered.insert(name.clone(), target);
    }

    let Session {
        loader,
        target_units,
        ..
    } = session;
    let mut units = loader.into_units();
    for (path, data) in target_units {
        if let Some(unit) = units.get_mut(&path) {
            unit.data = data;
        }
    }
    for unit in units.values_mut() {
        stringify_mapping(&mut unit.data);
    }

    Ok(LoadOutput {
        flat_list,
        targets: ordered,
        units,
    })
}
