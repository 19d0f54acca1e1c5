use std::cell::RefCell;

use fxhash::FxHashMap;
use gypsum_syntax::{Mapping, Value};

use crate::command::CommandRunner;
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::expand::Phase;
use crate::merge::Merger;
use crate::scope::VariableScope;

/// Expands variables and applies conditions over unit data.
pub struct Evaluator<'a> {
    pub(crate) config: &'a EngineConfig,
    pub(crate) runner: &'a dyn CommandRunner,
    pub(crate) merger: Merger<'a>,
    /// Command output keyed by (working directory, command)
    pub(crate) command_cache: RefCell<FxHashMap<(String, String), String>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(config: &'a EngineConfig, runner: &'a dyn CommandRunner) -> Self {
        Evaluator {
            config,
            runner,
            merger: Merger::new(config),
            command_cache: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn merger(&self) -> &Merger<'a> {
        &self.merger
    }

    /// The scope seen by the children of `mapping`: `parent` plus its automatic variables and
    /// its `variables` block.
    fn mapping_scope(
        parent: &VariableScope,
        mapping: &Mapping,
        mapping_key: Option<&str>,
    ) -> VariableScope {
        let mut scope = parent.clone();
        scope.load_automatic_variables(mapping);
        scope.load_variables_block(mapping, mapping_key);
        scope
    }

    /// Expand variables and apply conditions of `phase` throughout `mapping`.
    ///
    /// `mapping_key` is the key `mapping` is stored under in its parent, if any.
    pub fn process_mapping(
        &self,
        mapping: &mut Mapping,
        phase: Phase,
        scope: &VariableScope,
        unit: &str,
        mapping_key: Option<&str>,
    ) -> EngineResult<()> {
        let mut local = scope.clone();
        local.load_automatic_variables(mapping);

        if let Some(Value::Mapping(variables)) = mapping.get_mut("variables") {
            // Every local variable is visible while the block itself is expanded, so entries can
            // refer to each other
            for (key, value) in variables.iter() {
                local.insert(key.clone(), value.clone());
            }
            self.process_mapping(variables, phase, &local, unit, Some("variables"))?;
        }
        local.load_variables_block(mapping, mapping_key);

        for (key, value) in mapping.iter_mut() {
            if key == "variables" {
                continue;
            }
            if let Value::String(text) = value {
                let expanded = self.expand(text, phase, &local, unit)?;
                if !matches!(expanded, Value::String(_) | Value::Integer(_)) {
                    return Err(EngineError::InvalidExpansion {
                        context: format!("value of {key}"),
                        found: expanded.kind_name(),
                    }
                    .into());
                }
                *value = expanded;
            }
        }

        // Expansion may have changed automatic variables
        let local = Self::mapping_scope(scope, mapping, mapping_key);
        self.apply_conditions(mapping, phase, &local, unit)?;

        // And so may the conditions
        let local = Self::mapping_scope(scope, mapping, mapping_key);
        for (key, value) in mapping.iter_mut() {
            if key == "variables" {
                continue;
            }
            match value {
                Value::Mapping(child) => {
                    self.process_mapping(child, phase, &local, unit, Some(key.as_str()))?
                }
                Value::Sequence(items) => self.process_list(items, phase, &local, unit)?,
                _ => {}
            }
        }

        Ok(())
    }

    /// Expand the items of `items` in place. A string expanding to a sequence is spliced in.
    pub fn process_list(
        &self,
        items: &mut Vec<Value>,
        phase: Phase,
        scope: &VariableScope,
        unit: &str,
    ) -> EngineResult<()> {
        let mut index = 0;
        while index < items.len() {
            match &mut items[index] {
                Value::Mapping(child) => self.process_mapping(child, phase, scope, unit, None)?,
                Value::Sequence(nested) => self.process_list(nested, phase, scope, unit)?,
                Value::String(text) => match self.expand(text, phase, scope, unit)? {
                    Value::Sequence(expanded) => {
                        let count = expanded.len();
                        items.splice(index..=index, expanded);
                        index += count;
                        continue;
                    }
                    scalar => items[index] = scalar,
                },
                Value::Integer(_) | Value::Boolean(_) => {}
            }
            index += 1;
        }

        Ok(())
    }
}
