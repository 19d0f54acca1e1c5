//!
//! ## Introduction
//! `gypsum-engine` turns a set of build description units into a resolved, ordered list of
//! targets. Generators that emit an actual build system consume its output; the engine itself
//! never writes anything.
//!
//! ## Terminology
//!
//! ### Units and targets
//! A **unit** is one description file. Its top level is a mapping, and its `targets` list holds
//! the **targets**:
//!
//! ```text
//! {
//!   'includes': ['../build/common.gypi'],
//!   'targets': [
//!     {
//!       'target_name': 'net',
//!       'type': 'static_library',
//!       'dependencies': ['../base/base.gyp:base'],
//!       'sources': ['socket.c'],
//!     },
//!   ],
//! }
//! ```
//!
//! A target is known by its **qualified name**, `unit:target_name`, for example
//! `net/net.gyp:net`. A dependency written as `base` refers to a target of the same unit;
//! `../base/base.gyp:base` is resolved against the directory of the referring unit.
//!
//! ### Phases
//! Evaluation happens in two phases. The **early** phase runs right after a unit is read: `<(var)`
//! references are substituted and `conditions` are applied. The **late** phase runs once the
//! dependency graph is known, substituting `>(var)` and applying `target_conditions`. Both phases
//! share one syntax:
//!
//! | token       | meaning                                                     |
//! |-------------|-------------------------------------------------------------|
//! | `<(name)`   | value of `name`                                             |
//! | `<@(name)`  | list value of `name`, spliced into the enclosing list       |
//! | `<!(cmd)`   | output of running `cmd` in the unit's directory             |
//! | `<!@(cmd)`  | output of `cmd` split into shell words, spliced             |
//!
//! ### Merging
//! Includes, `target_defaults`, condition branches, dependent settings and configurations are all
//! combined by the same merge (see [`merge`]). The suffix on a list key picks the policy:
//! `sources+` prepends, `sources=` replaces, `sources?` only sets a missing list and a plain
//! `sources` appends.
//!
//! ### Dependent settings
//! A target can publish settings to the targets that depend on it:
//! `all_dependent_settings` reaches every transitive dependent, `direct_dependent_settings`
//! reaches direct dependents (and whoever re-exports it through `export_dependent_settings`), and
//! `link_settings` reaches the targets that link it.
//!
//! ## Entry point
//! [`load`] drives the whole pipeline. Reading files and running commands go through the
//! [`UnitSource`] and [`CommandRunner`] traits so tests can work entirely in memory.

pub mod command;
pub mod condition;
pub mod config;
pub mod configurations;
pub mod errors;
pub mod evaluate;
pub mod expand;
pub mod expr;
pub mod filter;
pub mod graph;
pub mod load;
pub mod loader;
pub mod merge;
pub mod scope;
pub mod settings;
pub mod static_deps;
pub mod target;
pub mod validate;

pub use command::{CommandLine, CommandOutput, CommandRunner, SystemCommandRunner};
pub use config::EngineConfig;
pub use errors::{EngineError, EngineResult};
pub use load::{LoadOutput, LoadRequest, load};
pub use loader::{FsSource, MemorySource, Unit, UnitSource};
pub use target::QualifiedName;
