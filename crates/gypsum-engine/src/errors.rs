use gypsum_syntax::ParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unable to parse {path}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error("unit {path} could not be read")]
    UnitNotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not contain a mapping at the top level")]
    NotAMapping { path: String },

    #[error("inclusion cycle: {}", .chain.join(" -> "))]
    InclusionCycle { chain: Vec<String> },

    #[error("duplicate target definition {name}")]
    DuplicateTarget { name: String },

    #[error("undefined variable {name} in {unit}")]
    MissingVariable { name: String, unit: String },

    #[error("list {key} conflicts with {other} in the same source mapping")]
    IncompatibleListPolicy { key: String, other: String },

    #[error("cannot merge {incoming} into {existing} for key {key}")]
    TypeMismatch {
        key: String,
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("wildcard dependency {dependency} in {target} refers to its own unit")]
    SelfWildcard { dependency: String, target: String },

    #[error("dependency cycle detected among: {}", .unreached.join(", "))]
    Cycle { unreached: Vec<String> },

    #[error("dependency cycle detected between units: {}", .units.join(", "))]
    UnitCycle { units: Vec<String> },

    #[error("command {command:?} failed with status {status:?}: {stderr}")]
    CommandSubstitution {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("dependency {dependency} of {target} is not a known target")]
    MissingDependencyTarget { dependency: String, target: String },

    #[error("syntax error in condition {expression:?} at offset {position}: {message}")]
    ConditionSyntax {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("invalid condition entry: {0}")]
    InvalidCondition(String),

    #[error("expansion of {text:?} did not settle after {depth} rounds")]
    RecursiveExpansion { text: String, depth: usize },

    #[error("{context} must expand to a string, an integer or a list of those, found {found}")]
    InvalidExpansion {
        context: String,
        found: &'static str,
    },

    #[error("unbalanced expansion in {text:?}")]
    MalformedExpansion { text: String },

    #[error("invalid target {target}: {message}")]
    InvalidTarget { target: String, message: String },

    #[error("invalid configuration in {target}: {message}")]
    Configuration { target: String, message: String },

    #[error("invalid list filter {key}: {message}")]
    ListFilter { key: String, message: String },

    #[error("invalid rule or action in {target}: {message}")]
    InvalidRule { target: String, message: String },
}

pub type EngineResult<T> = anyhow::Result<T>;
