use std::fmt::{Display, Formatter};
use std::path::Path;
use std::process::Command;

use itertools::Itertools;
use tracing::debug;

use crate::errors::EngineResult;

/// A command requested by a `<!(...)` substitution.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandLine {
    /// Run through `sh -c`.
    Shell(String),
    /// Run directly, without a shell.
    Argv(Vec<String>),
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandLine::Shell(cmd) => f.write_str(cmd),
            CommandLine::Argv(argv) => {
                write!(f, "[{}]", argv.iter().map(|a| format!("{a:?}")).join(", "))
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success<S: Into<String>>(stdout: S) -> Self {
        CommandOutput {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Runs command substitutions on behalf of the expander.
pub trait CommandRunner {
    /// Run `command` with `cwd` as its working directory. Failing to start the command is an
    /// error; a non-zero exit is reported through [`CommandOutput::status`].
    fn run(&self, command: &CommandLine, cwd: &str) -> EngineResult<CommandOutput>;
}

/// Runs commands as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, command: &CommandLine, cwd: &str) -> EngineResult<CommandOutput> {
        let mut process = match command {
            CommandLine::Shell(cmd) => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(cmd);
                c
            }
            CommandLine::Argv(argv) => {
                let Some((program, args)) = argv.split_first() else {
                    anyhow::bail!("empty argument vector");
                };
                let mut c = Command::new(program);
                c.args(args);
                c
            }
        };

        if !cwd.is_empty() {
            process.current_dir(Path::new(cwd));
        }

        debug!(%command, cwd, "running command");
        let output = process.output()?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shell_command() {
        let out = SystemCommandRunner
            .run(&CommandLine::Shell(String::from("echo hi; echo err >&2")), "")
            .unwrap();
        assert_eq!(out.status, Some(0));
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[test]
    fn argv_command() {
        let out = SystemCommandRunner
            .run(
                &CommandLine::Argv(vec![String::from("echo"), String::from("a b")]),
                "",
            )
            .unwrap();
        assert_eq!(out.stdout, "a b\n");
    }

    #[test]
    fn exit_status() {
        let out = SystemCommandRunner
            .run(&CommandLine::Shell(String::from("exit 3")), "")
            .unwrap();
        assert_eq!(out.status, Some(3));
    }

    #[test]
    fn display() {
        assert_eq!(
            CommandLine::Argv(vec![String::from("a"), String::from("b c")]).to_string(),
            r#"["a", "b c"]"#
        );
    }
}
