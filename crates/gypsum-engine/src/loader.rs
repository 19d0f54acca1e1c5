use std::cell::RefCell;
use std::io;

use anyhow::Context;
use gypsum_syntax::{Mapping, Value, parse_value_from_str};
use gypsum_util::paths::{dirname, join_normalized, normalize};
use indexmap::IndexMap;
use scopeguard::defer;
use tracing::debug;

use crate::errors::{EngineError, EngineResult};
use crate::merge::Merger;

/// Where unit text comes from.
pub trait UnitSource {
    fn read(&self, path: &str) -> EngineResult<String>;
}

/// Reads units from the filesystem. Relative paths are resolved against the current directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSource;

impl UnitSource for FsSource {
    fn read(&self, path: &str) -> EngineResult<String> {
        std::fs::read_to_string(path).map_err(|source| {
            EngineError::UnitNotFound {
                path: path.to_string(),
                source,
            }
            .into()
        })
    }
}

/// Units held in memory, keyed by normalized path.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    units: IndexMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource::default()
    }

    pub fn insert<P: AsRef<str>, T: Into<String>>(&mut self, path: P, text: T) {
        self.units.insert(normalize(path.as_ref()), text.into());
    }

    pub fn with<P: AsRef<str>, T: Into<String>>(mut self, path: P, text: T) -> Self {
        self.insert(path, text);
        self
    }
}

impl UnitSource for MemorySource {
    fn read(&self, path: &str) -> EngineResult<String> {
        self.units.get(path).cloned().ok_or_else(|| {
            EngineError::UnitNotFound {
                path: path.to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }
            .into()
        })
    }
}

/// A loaded unit, with its includes merged in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    pub path: String,
    pub data: Mapping,
    /// Units merged into this one, directly or inside nested mappings, in merge order.
    pub included: Vec<String>,
}

/// Reads, parses and include-merges units, each at most once.
pub struct Loader<'a> {
    source: &'a dyn UnitSource,
    merger: &'a Merger<'a>,
    units: RefCell<IndexMap<String, Unit>>,
    /// Units currently being loaded, outermost first
    stack: RefCell<Vec<String>>,
}

impl<'a> Loader<'a> {
    pub fn new(source: &'a dyn UnitSource, merger: &'a Merger<'a>) -> Self {
        Loader {
            source,
            merger,
            units: RefCell::new(IndexMap::new()),
            stack: RefCell::new(vec![]),
        }
    }

    /// Load `path` (already normalized), merging `extra_includes` ahead of its own `includes`.
    /// Returns the merged top-level mapping.
    pub fn load_unit(&self, path: &str, extra_includes: &[String]) -> EngineResult<Mapping> {
        if let Some(unit) = self.units.borrow().get(path) {
            return Ok(unit.data.clone());
        }

        {
            let mut stack = self.stack.borrow_mut();
            if let Some(pos) = stack.iter().position(|p| p == path) {
                let mut chain = stack[pos..].to_vec();
                chain.push(path.to_string());
                return Err(EngineError::InclusionCycle { chain }.into());
            }
            stack.push(path.to_string());
        }
        defer! {
            self.stack.borrow_mut().pop();
        }

        debug!(path, "loading unit");
        let text = self.source.read(path)?;
        let mut data = match parse_value_from_str(&text) {
            Ok(Value::Mapping(m)) => m,
            Ok(_) => {
                return Err(EngineError::NotAMapping {
                    path: path.to_string(),
                }
                .into());
            }
            Err(source) => {
                return Err(EngineError::Parse {
                    path: path.to_string(),
                    source,
                }
                .into());
            }
        };

        let mut included = vec![];
        if !data.get("skip_includes").is_some_and(Value::is_truthy) {
            self.merge_includes(&mut data, path, extra_includes, &mut included)
                .with_context(|| format!("while reading includes of {path}"))?;
        }

        self.units.borrow_mut().insert(
            path.to_string(),
            Unit {
                path: path.to_string(),
                data: data.clone(),
                included,
            },
        );
        Ok(data)
    }

    fn merge_includes(
        &self,
        mapping: &mut Mapping,
        unit: &str,
        extra_includes: &[String],
        included: &mut Vec<String>,
    ) -> EngineResult<()> {
        let mut includes = extra_includes.to_vec();
        if let Some(own) = mapping.shift_remove("includes") {
            let Value::Sequence(items) = own else {
                anyhow::bail!("includes in {unit} must be a list");
            };
            for item in items {
                let Value::String(include) = item else {
                    anyhow::bail!("includes in {unit} must be a list of strings");
                };
                includes.push(join_normalized(dirname(unit), &include));
            }
        }

        for include in includes {
            debug!(unit, include, "merging include");
            let data = self.load_unit(&include, &[])?;
            self.merger.merge_into(mapping, &data, unit, &include)?;
            included.push(include);
        }

        for value in mapping.values_mut() {
            match value {
                Value::Mapping(child) => self.merge_includes(child, unit, &[], included)?,
                Value::Sequence(items) => self.merge_includes_in_list(items, unit, included)?,
                _ => {}
            }
        }

        Ok(())
    }

    fn merge_includes_in_list(
        &self,
        items: &mut [Value],
        unit: &str,
        included: &mut Vec<String>,
    ) -> EngineResult<()> {
        for item in items {
            match item {
                Value::Mapping(child) => self.merge_includes(child, unit, &[], included)?,
                Value::Sequence(nested) => self.merge_includes_in_list(nested, unit, included)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn contributing_units(&self, path: &str) -> Vec<String> {
        contributing_units(&self.units.borrow(), path)
    }

    pub fn into_units(self) -> IndexMap<String, Unit> {
        self.units.into_inner()
    }
}

/// `path` followed by every unit it includes, transitively, depth first, each once.
pub fn contributing_units(units: &IndexMap<String, Unit>, path: &str) -> Vec<String> {
    fn visit(units: &IndexMap<String, Unit>, path: &str, out: &mut Vec<String>) {
        if out.iter().any(|p| p == path) {
            return;
        }
        out.push(path.to_string());
        if let Some(unit) = units.get(path) {
            for include in &unit.included {
                visit(units, include, out);
            }
        }
    }

    let mut out = vec![];
    visit(units, path, &mut out);
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::EngineConfig;
    use pretty_assertions::assert_eq;

    fn mapping(text: &str) -> Mapping {
        match parse_value_from_str(text).unwrap() {
            Value::Mapping(m) => m,
            other => panic!("not a mapping: {other:?}"),
        }
    }

    #[test]
    fn includes_merge_with_path_rewriting() {
        let source = MemorySource::new()
            .with(
                "app/app.gyp",
                "{'includes': ['../common/common.gypi'], 'targets': [{'target_name': 'app'}]}",
            )
            .with(
                "common/common.gypi",
                "{'includes': ['flags.gypi'], 'target_defaults': {'include_dirs': ['inc']}}",
            )
            .with("common/flags.gypi", "{'target_defaults': {'cflags': ['-O2']}}");
        let config = EngineConfig::default();
        let merger = Merger::new(&config);
        let loader = Loader::new(&source, &merger);

        let data = loader.load_unit("app/app.gyp", &[]).unwrap();
        assert_eq!(
            data,
            mapping(
                "{'targets': [{'target_name': 'app'}],
                  'target_defaults': {'cflags': ['-O2'], 'include_dirs': ['../common/inc']}}"
            )
        );

        let units = loader.into_units();
        assert_eq!(units["app/app.gyp"].included, vec!["common/common.gypi"]);
        assert_eq!(
            contributing_units(&units, "app/app.gyp"),
            vec!["app/app.gyp", "common/common.gypi", "common/flags.gypi"]
        );
    }

    #[test]
    fn extra_includes_come_first() {
        let source = MemorySource::new()
            .with("a.gyp", "{'includes': ['own.gypi'], 'l': ['a']}")
            .with("own.gypi", "{'l': ['own']}")
            .with("cmd.gypi", "{'l': ['cmd']}");
        let config = EngineConfig::default();
        let merger = Merger::new(&config);
        let loader = Loader::new(&source, &merger);

        let data = loader
            .load_unit("a.gyp", &[String::from("cmd.gypi")])
            .unwrap();
        assert_eq!(data["l"], Value::from(vec!["a", "cmd", "own"]));
    }

    #[test]
    fn nested_includes() {
        let source = MemorySource::new()
            .with(
                "a.gyp",
                "{'targets': [{'target_name': 't', 'includes': ['sub/t.gypi']}]}",
            )
            .with("sub/t.gypi", "{'sources': ['x.c']}");
        let config = EngineConfig::default();
        let merger = Merger::new(&config);
        let loader = Loader::new(&source, &merger);

        let data = loader.load_unit("a.gyp", &[]).unwrap();
        assert_eq!(
            data,
            mapping("{'targets': [{'target_name': 't', 'sources': ['sub/x.c']}]}")
        );
    }

    #[test]
    fn inclusion_cycle() {
        let source = MemorySource::new()
            .with("a.gyp", "{'includes': ['b.gypi']}")
            .with("b.gypi", "{'includes': ['c.gypi']}")
            .with("c.gypi", "{'includes': ['b.gypi']}");
        let config = EngineConfig::default();
        let merger = Merger::new(&config);
        let loader = Loader::new(&source, &merger);

        let err = loader.load_unit("a.gyp", &[]).unwrap_err();
        match err.downcast_ref::<EngineError>() {
            Some(EngineError::InclusionCycle { chain }) => {
                assert_eq!(chain, &vec!["b.gypi", "c.gypi", "b.gypi"])
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let source = MemorySource::new()
            .with("a.gyp", "{'includes': ['b.gypi', 'c.gypi']}")
            .with("b.gypi", "{'includes': ['d.gypi']}")
            .with("c.gypi", "{'includes': ['d.gypi']}")
            .with("d.gypi", "{'l': ['d']}");
        let config = EngineConfig::default();
        let merger = Merger::new(&config);
        let loader = Loader::new(&source, &merger);

        let data = loader.load_unit("a.gyp", &[]).unwrap();
        assert_eq!(data["l"], Value::from(vec!["d"]));
    }

    #[test]
    fn errors() {
        let source = MemorySource::new()
            .with("list.gyp", "['not', 'a', 'mapping']")
            .with("bad.gyp", "{'a': }")
            .with("missing.gyp", "{'includes': ['nowhere.gypi']}");
        let config = EngineConfig::default();
        let merger = Merger::new(&config);
        let loader = Loader::new(&source, &merger);

        let err = loader.load_unit("list.gyp", &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NotAMapping { .. })
        ));

        let err = loader.load_unit("bad.gyp", &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Parse { path, source }) if path == "bad.gyp" && source.line == 1
        ));

        let err = loader.load_unit("missing.gyp", &[]).unwrap_err();
        assert!(format!("{err:#}").contains("while reading includes of missing.gyp"));
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::UnitNotFound { path, .. }) if path == "nowhere.gypi"
        ));
    }
}
