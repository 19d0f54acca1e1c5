use gypsum_syntax::{Mapping, Value};
use im_rc::HashMap;

/// Variable bindings visible while processing one mapping.
///
/// Backed by a persistent map, so cloning is cheap and a child scope can be extended without
/// the parent (or any sibling) observing the change.
#[derive(Clone, Debug, Default)]
pub struct VariableScope {
    vars: HashMap<String, Value>,
}

fn is_variable_value(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Integer(_) | Value::Sequence(_)
    )
}

impl VariableScope {
    pub fn new() -> Self {
        VariableScope::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Bind `_<key>` for every string, integer or sequence value of `mapping`.
    pub fn load_automatic_variables(&mut self, mapping: &Mapping) {
        for (key, value) in mapping {
            if is_variable_value(value) {
                self.vars.insert(format!("_{key}"), value.clone());
            }
        }
    }

    /// Bind the entries of `mapping`'s `variables` block.
    ///
    /// A name ending in `%` is a default: it is skipped when the variable already exists. When
    /// `mapping` is itself a `variables` block (`mapping_key` is `variables`) and also sets the
    /// plain name, that plain value wins over the default.
    pub fn load_variables_block(&mut self, mapping: &Mapping, mapping_key: Option<&str>) {
        let Some(Value::Mapping(variables)) = mapping.get("variables") else {
            return;
        };

        for (key, value) in variables {
            if !is_variable_value(value) {
                continue;
            }

            let (name, value) = match key.strip_suffix('%') {
                Some(name) if self.vars.contains_key(name) => continue,
                Some(name) => match mapping.get(name) {
                    Some(own) if mapping_key == Some("variables") => (name, own),
                    _ => (name, value),
                },
                None => (key.as_str(), value),
            };
            self.vars.insert(name.to_string(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for VariableScope {
    fn from_iter<T: IntoIterator<Item = (S, Value)>>(iter: T) -> Self {
        VariableScope {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gypsum_syntax::parse_value_from_str;
    use pretty_assertions::assert_eq;

    fn mapping(text: &str) -> Mapping {
        match parse_value_from_str(text).unwrap() {
            Value::Mapping(m) => m,
            other => panic!("not a mapping: {other:?}"),
        }
    }

    #[test]
    fn automatic_variables() {
        let mut scope = VariableScope::new();
        scope.load_automatic_variables(&mapping(
            "{'target_name': 'foo', 'sources': ['a.c'], 'nested': {}, 'flag': True}",
        ));
        assert_eq!(scope.get("_target_name"), Some(&Value::from("foo")));
        assert_eq!(scope.get("_sources"), Some(&Value::from(vec!["a.c"])));
        assert!(!scope.contains("_nested"));
        assert!(!scope.contains("_flag"));
    }

    #[test]
    fn defaults_do_not_override() {
        let mut scope: VariableScope = [("os", Value::from("linux"))].into_iter().collect();
        scope.load_variables_block(
            &mapping("{'variables': {'os%': 'win', 'arch%': 'x64', 'mode': 'debug'}}"),
            None,
        );
        assert_eq!(scope.get("os"), Some(&Value::from("linux")));
        assert_eq!(scope.get("arch"), Some(&Value::from("x64")));
        assert_eq!(scope.get("mode"), Some(&Value::from("debug")));
    }

    #[test]
    fn plain_name_in_variables_block_beats_default() {
        let mut scope = VariableScope::new();
        scope.load_variables_block(
            &mapping("{'variables': {'arch%': 'x64'}, 'arch': 'arm'}"),
            Some("variables"),
        );
        assert_eq!(scope.get("arch"), Some(&Value::from("arm")));
    }

    #[test]
    fn clones_are_independent() {
        let mut parent = VariableScope::new();
        parent.insert("a", Value::Integer(1));
        let mut child = parent.clone();
        child.insert("b", Value::Integer(2));
        assert!(!parent.contains("b"));
        assert_eq!(child.len(), 2);
    }
}
