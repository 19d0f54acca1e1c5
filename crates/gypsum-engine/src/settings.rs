use anyhow::Context;
use gypsum_syntax::Value;
use tracing::{debug, trace};

use crate::errors::{EngineError, EngineResult};
use crate::graph::{DependencyGraph, Targets};
use crate::merge::Merger;
use crate::target::{QualifiedName, flag_value};

/// Settings blocks published by a target to the targets that depend on it, in the order they are
/// propagated.
pub const DEPENDENT_SETTINGS_KEYS: &[&str] = &[
    "all_dependent_settings",
    "direct_dependent_settings",
    "link_settings",
];

fn recipients(
    key: &str,
    name: &QualifiedName,
    targets: &Targets,
    graph: &DependencyGraph,
) -> EngineResult<Vec<QualifiedName>> {
    match key {
        "all_dependent_settings" => graph.deep_dependencies(name),
        "direct_dependent_settings" => graph.direct_and_imported_dependencies(name, targets),
        _ => {
            let include_shared_libraries = targets
                .get(name)
                .and_then(|t| flag_value(t.get("allow_sharedlib_linksettings_propagation")))
                .unwrap_or(true);
            graph.link_dependencies(name, targets, include_shared_libraries)
        }
    }
}

/// Merge every dependent settings block into the targets that depend on its owner, then remove
/// the blocks. `flat_list` must be in dependency order.
pub fn propagate_dependent_settings(
    targets: &mut Targets,
    flat_list: &[QualifiedName],
    graph: &DependencyGraph,
    merger: &Merger<'_>,
) -> EngineResult<()> {
    for key in DEPENDENT_SETTINGS_KEYS.iter().copied() {
        debug!(key, "propagating dependent settings");

        for name in flat_list {
            let dependencies = recipients(key, name, targets, graph)?;

            for dependency in dependencies {
                let block = match targets.get(&dependency).and_then(|t| t.get(key)) {
                    None => continue,
                    Some(Value::Mapping(block)) => block.clone(),
                    Some(other) => {
                        return Err(EngineError::InvalidTarget {
                            target: dependency.to_string(),
                            message: format!("{key} must be a mapping, not a {}", other.kind_name()),
                        }
                        .into());
                    }
                };

                trace!(key, %name, %dependency, "merging dependent settings");
                let Some(target) = targets.get_mut(name) else {
                    continue;
                };
                merger
                    .merge_into(target, &block, &name.unit, &dependency.unit)
                    .with_context(|| format!("while merging {key} of {dependency} into {name}"))?;
            }
        }

        for target in targets.values_mut() {
            target.shift_remove(key);
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::EngineConfig;
    use gypsum_syntax::{Mapping, parse_value_from_str};
    use pretty_assertions::assert_eq;

    fn targets(defs: &[(&str, &str)]) -> Targets {
        defs.iter()
            .map(|(name, text)| {
                let Value::Mapping(m) = parse_value_from_str(text).unwrap() else {
                    panic!("not a mapping");
                };
                (QualifiedName::parse(name).unwrap(), m)
            })
            .collect()
    }

    fn propagated(defs: &[(&str, &str)]) -> Targets {
        let mut t = targets(defs);
        let graph = DependencyGraph::build(&t).unwrap();
        let flat = graph.flatten().unwrap();
        let config = EngineConfig::default();
        let merger = Merger::new(&config);
        propagate_dependent_settings(&mut t, &flat, &graph, &merger).unwrap();
        t
    }

    fn get<'t>(t: &'t Targets, name: &str) -> &'t Mapping {
        &t[&QualifiedName::parse(name).unwrap()]
    }

    #[test]
    fn all_and_direct() {
        let t = propagated(&[
            (
                "app/app.gyp:app",
                "{'type': 'executable', 'dependencies': ['lib/lib.gyp:lib']}",
            ),
            (
                "lib/lib.gyp:lib",
                "{'type': 'static_library', 'dependencies': ['base/base.gyp:base'],
                  'direct_dependent_settings': {'include_dirs': ['include']}}",
            ),
            (
                "base/base.gyp:base",
                "{'type': 'static_library',
                  'all_dependent_settings': {'defines': ['BASE']},
                  'direct_dependent_settings': {'defines': ['BASE_DIRECT']}}",
            ),
        ]);

        let app = get(&t, "app/app.gyp:app");
        assert_eq!(app["defines"], Value::from(vec!["BASE"]));
        assert_eq!(app["include_dirs"], Value::from(vec!["../lib/include"]));

        let lib = get(&t, "lib/lib.gyp:lib");
        assert_eq!(lib["defines"], Value::from(vec!["BASE", "BASE_DIRECT"]));

        for target in t.values() {
            for key in DEPENDENT_SETTINGS_KEYS {
                assert!(!target.contains_key(*key));
            }
        }
    }

    #[test]
    fn exported_settings() {
        let t = propagated(&[
            ("u.gyp:app", "{'type': 'executable', 'dependencies': ['u.gyp:wrapper']}"),
            (
                "u.gyp:wrapper",
                "{'type': 'static_library', 'dependencies': ['u.gyp:core'],
                  'export_dependent_settings': ['u.gyp:core']}",
            ),
            (
                "u.gyp:core",
                "{'type': 'static_library', 'direct_dependent_settings': {'defines': ['CORE']}}",
            ),
        ]);
        assert_eq!(get(&t, "u.gyp:app")["defines"], Value::from(vec!["CORE"]));
    }

    #[test]
    fn link_settings() {
        let t = propagated(&[
            (
                "u.gyp:app",
                "{'type': 'executable', 'dependencies': ['u.gyp:lib', 'u.gyp:tool'],
                  'link_settings': {'libraries': ['-lapp']}}",
            ),
            (
                "u.gyp:lib",
                "{'type': 'static_library', 'link_settings': {'libraries': ['-lz']}}",
            ),
            (
                "u.gyp:tool",
                "{'type': 'executable', 'link_settings': {'libraries': ['-ltool']}}",
            ),
        ]);
        assert_eq!(
            get(&t, "u.gyp:app")["libraries"],
            Value::from(vec!["-lapp", "-lz"])
        );
        // Not linkable, so nothing is merged into it
        assert!(!get(&t, "u.gyp:lib").contains_key("libraries"));
    }

    #[test]
    fn block_must_be_a_mapping() {
        let mut t = targets(&[
            ("u.gyp:a", "{'type': 'none', 'dependencies': ['u.gyp:b']}"),
            ("u.gyp:b", "{'type': 'none', 'all_dependent_settings': ['x']}"),
        ]);
        let graph = DependencyGraph::build(&t).unwrap();
        let flat = graph.flatten().unwrap();
        let config = EngineConfig::default();
        let merger = Merger::new(&config);
        let err = propagate_dependent_settings(&mut t, &flat, &graph, &merger).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidTarget { .. })
        ));
    }
}
