//! Variable and command substitution.
//!
//! A token is a phase symbol (`<` for the early pass, `>` for the late pass) followed by an
//! optional `!` (run a command) and/or `@` (list context), and a parenthesized body:
//!
//! * `<(name)` substitutes a variable.
//! * `<!(cmd)` substitutes the trimmed stdout of `cmd`. `<!(['argv', ...])` runs without a shell.
//! * `<@(name)` and `<!@(cmd)` do the same, but when the token is the whole string the result is
//!   a list rather than a string.
//!
//! Tokens are replaced right to left and the output is expanded again until it stops changing.

use gypsum_syntax::{Value, parse_value_from_str};
use gypsum_util::paths::dirname;
use gypsum_util::shell::split_posix_shell_words;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::command::CommandLine;
use crate::errors::{EngineError, EngineResult};
use crate::evaluate::Evaluator;
use crate::scope::VariableScope;

static EARLY_EXPANSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:!@|@!|!|@)?\(").unwrap());

static LATE_EXPANSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">(?:!@|@!|!|@)?\(").unwrap());

/// Expansion deeper than this is assumed to be a variable that refers to itself.
pub const MAX_EXPANSION_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `<` tokens and `conditions`, evaluated when a unit is loaded.
    Early,
    /// `>` tokens and `target_conditions`, evaluated after dependent settings are applied.
    Late,
}

impl Phase {
    pub fn symbol(&self) -> char {
        match self {
            Phase::Early => '<',
            Phase::Late => '>',
        }
    }

    pub fn conditions_key(&self) -> &'static str {
        match self {
            Phase::Early => "conditions",
            Phase::Late => "target_conditions",
        }
    }

    fn regex(&self) -> &'static Regex {
        match self {
            Phase::Early => &EARLY_EXPANSION_REGEX,
            Phase::Late => &LATE_EXPANSION_REGEX,
        }
    }
}

/// The integer `text` spells, if it is written the way the integer would print itself
/// (no sign on zero, no `+`, no leading zeros).
pub fn canonical_integer(text: &str) -> Option<i64> {
    text.parse::<i64>()
        .ok()
        .filter(|i| i.to_string() == text)
}

fn scalar_or_string(text: String) -> Value {
    match canonical_integer(&text) {
        Some(i) => Value::Integer(i),
        None => Value::String(text),
    }
}

/// Byte offset of the bracket closing the one `text` starts with.
fn find_closing_bracket(text: &str) -> Option<usize> {
    let mut stack = vec![];
    for (i, c) in text.char_indices() {
        match c {
            '(' => stack.push(')'),
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ')' | ']' | '}' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

impl Evaluator<'_> {
    /// Expand every token of `phase` in `text`.
    ///
    /// The result is a String, an Integer (when the result is a canonical integer) or, for a
    /// lone list-context token, a Sequence.
    pub fn expand(
        &self,
        text: &str,
        phase: Phase,
        scope: &VariableScope,
        unit: &str,
    ) -> EngineResult<Value> {
        self.expand_at_depth(text, phase, scope, unit, 0)
    }

    fn expand_at_depth(
        &self,
        text: &str,
        phase: Phase,
        scope: &VariableScope,
        unit: &str,
        depth: usize,
    ) -> EngineResult<Value> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(EngineError::RecursiveExpansion {
                text: text.to_string(),
                depth,
            }
            .into());
        }

        if !text.contains(phase.symbol()) {
            return Ok(scalar_or_string(text.to_string()));
        }

        // Outermost tokens only, with spans taken from the unmodified input. Nested tokens are
        // expanded along with the body that holds them.
        let mut spans = vec![];
        let mut covered = 0;
        for token in phase.regex().find_iter(text) {
            if token.start() < covered {
                continue;
            }
            let open = token.end() - 1;
            let end = find_closing_bracket(&text[open..])
                .map(|i| open + i + 1)
                .ok_or_else(|| EngineError::MalformedExpansion {
                    text: text.to_string(),
                })?;
            covered = end;
            spans.push((token.as_str(), token.start(), open, end));
        }
        if spans.is_empty() {
            return Ok(scalar_or_string(text.to_string()));
        }

        let mut output = text.to_string();
        let mut list_output = None;

        for &(kind, start, open, end) in spans.iter().rev() {
            let run_command = kind.contains('!');
            let list_context = kind.contains('@') && start == 0 && end == text.len();

            // The body may itself contain tokens
            let body = self.expand_at_depth(&text[open + 1..end - 1], phase, scope, unit, depth + 1)?;
            let body = self.render(&body);

            let replacement = if run_command {
                Value::String(self.run_command(&body, unit)?)
            } else {
                self.lookup(&body, phase, scope, unit)?
            };
            trace!(token = &text[start..end], %replacement, "expanded");

            if list_context {
                list_output = Some(match replacement {
                    Value::Sequence(items) => items,
                    other => split_posix_shell_words(&self.render(&other))?
                        .into_iter()
                        .map(Value::String)
                        .collect(),
                });
                // A list-context token spans the whole input, so it is the last one
                break;
            }

            output.replace_range(start..end, &self.render(&replacement));
        }

        if let Some(items) = list_output {
            let mut expanded = vec![];
            for item in items {
                match item {
                    Value::String(s) => match self.expand_at_depth(&s, phase, scope, unit, depth + 1)? {
                        Value::Sequence(nested) => expanded.extend(nested),
                        other => expanded.push(other),
                    },
                    other => expanded.push(other),
                }
            }
            return Ok(Value::Sequence(expanded));
        }

        if output == text {
            debug!(text, unit, "expansion reproduced its input, leaving it unexpanded");
            return Ok(scalar_or_string(output));
        }

        // Replacements may contain further tokens
        self.expand_at_depth(&output, phase, scope, unit, depth + 1)
    }

    /// String-context rendering of an expansion result.
    fn render(&self, value: &Value) -> String {
        match value {
            Value::Sequence(items) => {
                let items = items.iter().filter_map(Value::to_text).collect_vec();
                (self.config.list_encoder)(&items)
            }
            other => other.to_text().unwrap_or_default(),
        }
    }

    fn lookup(
        &self,
        name: &str,
        phase: Phase,
        scope: &VariableScope,
        unit: &str,
    ) -> EngineResult<Value> {
        let Some(value) = scope.get(name) else {
            if name.ends_with(['!', '/']) {
                return Ok(Value::Sequence(vec![]));
            }
            return Err(EngineError::MissingVariable {
                name: name.to_string(),
                unit: unit.to_string(),
            }
            .into());
        };

        match value {
            Value::Sequence(items) => {
                if !name.ends_with('/')
                    && let Some(bad) = items
                        .iter()
                        .find(|i| !matches!(i, Value::String(_) | Value::Integer(_)))
                {
                    return Err(EngineError::InvalidExpansion {
                        context: format!("variable {name}"),
                        found: bad.kind_name(),
                    }
                    .into());
                }
                let mut items = items.clone();
                self.process_list(&mut items, phase, scope, unit)?;
                Ok(Value::Sequence(items))
            }
            Value::Mapping(_) => Err(EngineError::InvalidExpansion {
                context: format!("variable {name}"),
                found: value.kind_name(),
            }
            .into()),
            scalar => Ok(scalar.clone()),
        }
    }

    fn run_command(&self, body: &str, unit: &str) -> EngineResult<String> {
        let command = if body.trim_start().starts_with('[') {
            let argv = match parse_value_from_str(body) {
                Ok(Value::Sequence(items)) => items,
                _ => {
                    return Err(EngineError::MalformedExpansion {
                        text: body.to_string(),
                    }
                    .into());
                }
            };
            CommandLine::Argv(argv.iter().map(|a| self.render(a)).collect())
        } else {
            CommandLine::Shell(body.to_string())
        };

        let cwd = dirname(unit).to_string();
        let cache_key = (cwd.clone(), command.to_string());
        if let Some(cached) = self.command_cache.borrow().get(&cache_key) {
            trace!(%command, "using cached command output");
            return Ok(cached.clone());
        }

        debug!(%command, cwd, "running command substitution");
        let output = self.runner.run(&command, &cwd)?;
        if output.status != Some(0) || !output.stderr.is_empty() {
            return Err(EngineError::CommandSubstitution {
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr,
            }
            .into());
        }

        let stdout = output.stdout.trim_end().to_string();
        self.command_cache
            .borrow_mut()
            .insert(cache_key, stdout.clone());
        Ok(stdout)
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use super::*;
    use crate::command::{CommandOutput, CommandRunner};
    use crate::config::EngineConfig;
    use pretty_assertions::assert_eq;

    /// Answers commands from a fixed table and records what was run.
    struct FakeRunner {
        outputs: Vec<(&'static str, CommandOutput)>,
        calls: RefCell<Vec<(String, String)>>,
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, command: &CommandLine, cwd: &str) -> EngineResult<CommandOutput> {
            self.calls
                .borrow_mut()
                .push((command.to_string(), cwd.to_string()));
            Ok(self
                .outputs
                .iter()
                .find(|(cmd, _)| *cmd == command.to_string())
                .map(|(_, out)| out.clone())
                .unwrap_or_else(|| CommandOutput {
                    status: Some(127),
                    stdout: String::new(),
                    stderr: String::from("not found"),
                }))
        }
    }

    fn runner() -> FakeRunner {
        FakeRunner {
            outputs: vec![
                ("echo hi", CommandOutput::success("hi\n")),
                ("list", CommandOutput::success("a 'b c'\n")),
                (r#"["tool", "x y"]"#, CommandOutput::success("argv\n")),
                ("warn", CommandOutput {
                    status: Some(0),
                    stdout: String::from("out"),
                    stderr: String::from("warning"),
                }),
            ],
            calls: RefCell::new(vec![]),
        }
    }

    fn scope() -> VariableScope {
        [
            ("name", Value::from("world")),
            ("num", Value::Integer(42)),
            ("list", Value::from(vec!["a", "b c"])),
            ("indirect", Value::from("<(name)")),
            ("which", Value::from("name")),
            ("self", Value::from("x<(self)")),
            ("nested_list", Value::from(vec!["<@(list)", "d"])),
            ("paren", Value::from("a)")),
            ("prea)", Value::from("hit")),
            ("same", Value::from("<(same)")),
        ]
        .into_iter()
        .collect()
    }

    fn expand(text: &str) -> EngineResult<Value> {
        let config = EngineConfig::default();
        let runner = runner();
        Evaluator::new(&config, &runner).expand(text, Phase::Early, &scope(), "dir/u.gyp")
    }

    #[test]
    fn variables() {
        assert_eq!(expand("hello <(name)!").unwrap(), Value::from("hello world!"));
        assert_eq!(expand("<(num)").unwrap(), Value::Integer(42));
        assert_eq!(expand("<(indirect)").unwrap(), Value::from("world"));
        assert_eq!(expand("<(<(which))").unwrap(), Value::from("world"));
        assert_eq!(expand("plain").unwrap(), Value::from("plain"));
        assert_eq!(expand("007").unwrap(), Value::from("007"));
        assert_eq!(expand("-3").unwrap(), Value::Integer(-3));
        assert_eq!(expand(">(late)").unwrap(), Value::from(">(late)"));
    }

    #[test]
    fn nested_token_spans_come_from_the_input() {
        assert_eq!(expand("<(pre<(paren))").unwrap(), Value::from("hit"));
        assert_eq!(
            expand("[<(pre<(paren))] <(name)").unwrap(),
            Value::from("[hit] world")
        );
    }

    #[test]
    fn value_reproducing_its_token_is_left_alone() {
        assert_eq!(expand("<(same)").unwrap(), Value::from("<(same)"));
    }

    #[test]
    fn lists() {
        assert_eq!(expand("<@(list)").unwrap(), Value::from(vec!["a", "b c"]));
        assert_eq!(expand("x <@(list)").unwrap(), Value::from("x a \"b c\""));
        assert_eq!(expand("<(list)").unwrap(), Value::from("a \"b c\""));
        assert_eq!(expand("<@(name)").unwrap(), Value::from(vec!["world"]));
        assert_eq!(
            expand("<@(nested_list)").unwrap(),
            Value::from(vec!["a", "b c", "d"])
        );
    }

    #[test]
    fn optional_names() {
        assert_eq!(expand("<@(missing!)").unwrap(), Value::Sequence(vec![]));
        assert_eq!(expand("<(missing/)").unwrap(), Value::from(""));
        let err = expand("<(missing)").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::MissingVariable { name, unit }) if name == "missing" && unit == "dir/u.gyp"
        ));
    }

    #[test]
    fn commands() {
        let config = EngineConfig::default();
        let runner = runner();
        let evaluator = Evaluator::new(&config, &runner);
        let scope = scope();

        assert_eq!(
            evaluator
                .expand("<!(echo hi)", Phase::Early, &scope, "dir/u.gyp")
                .unwrap(),
            Value::from("hi")
        );
        assert_eq!(
            evaluator
                .expand("<!@(list)", Phase::Early, &scope, "dir/u.gyp")
                .unwrap(),
            Value::from(vec!["a", "b c"])
        );
        assert_eq!(
            evaluator
                .expand("<!(['tool', 'x y'])", Phase::Early, &scope, "dir/u.gyp")
                .unwrap(),
            Value::from("argv")
        );
        // Cached per directory
        evaluator
            .expand("<!(echo hi)", Phase::Early, &scope, "dir/other.gyp")
            .unwrap();
        assert_eq!(
            *runner.calls.borrow(),
            vec![
                (String::from("echo hi"), String::from("dir")),
                (String::from("list"), String::from("dir")),
                (String::from(r#"["tool", "x y"]"#), String::from("dir")),
            ]
        );
    }

    #[test]
    fn command_failures() {
        for text in ["<!(false)", "<!(warn)"] {
            let err = expand(text).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<EngineError>(),
                    Some(EngineError::CommandSubstitution { .. })
                ),
                "{text}"
            );
        }
    }

    #[test]
    fn malformed_and_recursive() {
        assert!(matches!(
            expand("<(name").unwrap_err().downcast_ref::<EngineError>(),
            Some(EngineError::MalformedExpansion { .. })
        ));
        assert!(matches!(
            expand("<(self)").unwrap_err().downcast_ref::<EngineError>(),
            Some(EngineError::RecursiveExpansion { .. })
        ));
    }

    #[test]
    fn late_phase() {
        let config = EngineConfig::default();
        let runner = runner();
        let evaluator = Evaluator::new(&config, &runner);
        assert_eq!(
            evaluator
                .expand(">(name) <(name)", Phase::Late, &scope(), "u.gyp")
                .unwrap(),
            Value::from("world <(name)")
        );
    }

    #[test]
    fn canonical_integers() {
        assert_eq!(canonical_integer("12"), Some(12));
        assert_eq!(canonical_integer("-0"), None);
        assert_eq!(canonical_integer("+1"), None);
        assert_eq!(canonical_integer("01"), None);
    }
}
