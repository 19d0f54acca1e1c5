use anyhow::Context;
use gypsum_syntax::{Mapping, Value};
use tracing::trace;

use crate::errors::{EngineError, EngineResult};
use crate::evaluate::Evaluator;
use crate::expand::Phase;
use crate::expr::evaluate_condition;
use crate::scope::VariableScope;

fn invalid(message: impl Into<String>) -> anyhow::Error {
    EngineError::InvalidCondition(message.into()).into()
}

impl Evaluator<'_> {
    /// Remove the conditions block for `phase` from `mapping` and merge in the branch chosen by
    /// each entry.
    ///
    /// An entry is `[expr, mapping]`, `[expr, mapping, else_mapping]`, or a longer chain
    /// `[expr, mapping, expr, mapping, ..., else_mapping]` where the first true expression wins.
    pub fn apply_conditions(
        &self,
        mapping: &mut Mapping,
        phase: Phase,
        scope: &VariableScope,
        unit: &str,
    ) -> EngineResult<()> {
        let key = phase.conditions_key();
        let Some(conditions) = mapping.shift_remove(key) else {
            return Ok(());
        };
        let conditions = match conditions {
            Value::Sequence(conditions) => conditions,
            other => {
                return Err(invalid(format!(
                    "{key} must be a list, found {}",
                    other.kind_name()
                )));
            }
        };

        for condition in conditions {
            let Some(mut branch) = self.select_branch(&condition, phase, scope, unit)? else {
                continue;
            };

            self.process_mapping(&mut branch, phase, scope, unit, None)?;
            self.merger.merge_into(mapping, &branch, unit, unit)?;
        }

        Ok(())
    }

    /// Evaluate one condition entry, returning a copy of the chosen branch.
    fn select_branch(
        &self,
        condition: &Value,
        phase: Phase,
        scope: &VariableScope,
        unit: &str,
    ) -> EngineResult<Option<Mapping>> {
        let Value::Sequence(entry) = condition else {
            return Err(invalid(format!(
                "{} must be a list, found {}",
                phase.conditions_key(),
                condition.kind_name()
            )));
        };
        if entry.len() < 2 {
            return Err(invalid(format!("{condition} has fewer than two items")));
        }

        let mut i = 0;
        while i < entry.len() {
            let Value::String(expression) = &entry[i] else {
                return Err(invalid(format!(
                    "expected an expression at position {i} of {condition}"
                )));
            };
            let Some(Value::Mapping(branch)) = entry.get(i + 1) else {
                return Err(invalid(format!(
                    "expected a mapping at position {} of {condition}",
                    i + 1
                )));
            };

            let expanded = self.expand(expression, phase, scope, unit)?;
            let expanded = match expanded {
                Value::String(s) => s,
                Value::Integer(i) => i.to_string(),
                other => {
                    return Err(EngineError::InvalidExpansion {
                        context: format!("condition {expression:?}"),
                        found: other.kind_name(),
                    }
                    .into());
                }
            };

            let matched = evaluate_condition(&expanded, scope, unit)
                .with_context(|| format!("while evaluating condition {expression:?} in {unit}"))?;
            trace!(condition = %expanded, matched, "condition");
            if matched {
                return Ok(Some(branch.clone()));
            }

            match entry.get(i + 2) {
                // Another expression: an else-if link
                Some(Value::String(_)) => i += 2,
                Some(Value::Mapping(otherwise)) if i + 3 == entry.len() => {
                    return Ok(Some(otherwise.clone()));
                }
                Some(_) => {
                    return Err(invalid(format!(
                        "unexpected item at position {} of {condition}",
                        i + 2
                    )));
                }
                None => return Ok(None),
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::SystemCommandRunner;
    use crate::config::EngineConfig;
    use gypsum_syntax::parse_value_from_str;
    use pretty_assertions::assert_eq;

    fn mapping(text: &str) -> Mapping {
        match parse_value_from_str(text).unwrap() {
            Value::Mapping(m) => m,
            other => panic!("not a mapping: {other:?}"),
        }
    }

    fn process(text: &str, phase: Phase) -> EngineResult<Mapping> {
        let config = EngineConfig::default();
        let evaluator = Evaluator::new(&config, &SystemCommandRunner);
        let scope: VariableScope = [
            ("OS", Value::from("linux")),
            ("component", Value::from("shared_library")),
        ]
        .into_iter()
        .collect();
        let mut m = mapping(text);
        evaluator.process_mapping(&mut m, phase, &scope, "u.gyp", None)?;
        Ok(m)
    }

    #[test]
    fn true_and_false_branches() {
        let out = process(
            r#"{
                'defines': ['BASE'],
                'conditions': [
                    ['OS=="linux"', {'defines': ['LINUX']}, {'defines': ['OTHER']}],
                    ['OS=="win"', {'defines': ['WIN']}],
                    ['OS=="mac"', {'defines': ['MAC']}, {'defines': ['NOT_MAC']}],
                ],
            }"#,
            Phase::Early,
        )
        .unwrap();
        assert_eq!(
            out,
            mapping("{'defines': ['BASE', 'LINUX', 'NOT_MAC']}")
        );
    }

    #[test]
    fn else_if_chain() {
        let out = process(
            r#"{'conditions': [
                ['OS=="win"', {'x': 'win'}, 'OS=="linux"', {'x': 'linux'}, {'x': 'other'}],
            ]}"#,
            Phase::Early,
        )
        .unwrap();
        assert_eq!(out, mapping("{'x': 'linux'}"));
    }

    #[test]
    fn nested_and_expanded() {
        let out = process(
            r#"{
                'conditions': [
                    ['"<(component)"=="shared_library"', {
                        'variables': {'suffix': 'so'},
                        'product': 'lib.<(suffix)',
                        'conditions': [['OS=="linux"', {'ldflags': ['-shared']}]],
                    }],
                ],
            }"#,
            Phase::Early,
        )
        .unwrap();
        assert_eq!(out["product"], Value::from("lib.so"));
        assert_eq!(out["ldflags"], Value::from(vec!["-shared"]));
        assert!(!out.contains_key("conditions"));
    }

    #[test]
    fn late_conditions_wait() {
        let text = r#"{'target_conditions': [['OS=="linux"', {'a': 1}]]}"#;
        let early = process(text, Phase::Early).unwrap();
        assert!(early.contains_key("target_conditions"));
        let late = process(text, Phase::Late).unwrap();
        assert_eq!(late, mapping("{'a': 1}"));
    }

    #[test]
    fn deterministic() {
        let text = r#"{'conditions': [['OS=="linux" and component!="static_library"',
                        {'l': ['a']}, {'l': ['b']}]]}"#;
        assert_eq!(
            process(text, Phase::Early).unwrap(),
            process(text, Phase::Early).unwrap()
        );
    }

    #[test]
    fn malformed_entries() {
        for text in [
            "{'conditions': [['OS==\"linux\"']]}",
            "{'conditions': [['OS==\"linux\"', ['not a mapping']]]}",
            "{'conditions': [[1, {}]]}",
            "{'conditions': ['OS']}",
        ] {
            let err = process(text, Phase::Early).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<EngineError>(),
                    Some(EngineError::InvalidCondition(_))
                ),
                "{text}: {err:#}"
            );
        }
    }

    #[test]
    fn bad_expression_has_context() {
        let err = process("{'conditions': [['OS==', {}]]}", Phase::Early).unwrap_err();
        assert!(format!("{err:#}").contains("while evaluating condition"));
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::ConditionSyntax { .. })
        ));
    }
}
