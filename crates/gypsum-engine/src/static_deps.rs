use gypsum_syntax::Value;
use itertools::Itertools;
use tracing::trace;

use crate::errors::EngineResult;
use crate::graph::{DependencyGraph, LINKABLE_TYPES, Targets, target_type};
use crate::target::{QualifiedName, dependency_list, flag_value};

fn to_values(names: &[QualifiedName]) -> Value {
    Value::Sequence(names.iter().map(|n| Value::String(n.to_string())).collect())
}

/// Rewrite `dependencies` to reflect what has to be present at link time.
///
/// A static library keeps only its hard static-library dependencies and its direct non-static
/// ones; the original list is kept under `dependencies_original`. A linkable target gains every
/// target it links against. With `sort` set, the dependencies of linkable targets are ordered
/// from dependents to dependencies.
pub fn adjust_static_dependencies(
    targets: &mut Targets,
    flat_list: &[QualifiedName],
    graph: &DependencyGraph,
    sort: bool,
) -> EngineResult<()> {
    for name in flat_list {
        let kind = target_type(targets, name)?.to_string();

        if kind == "static_library" {
            let Some(original) = targets[name].get("dependencies").cloned() else {
                continue;
            };
            let declared = dependency_list(&targets[name], "dependencies");

            let mut dependencies = graph.direct_and_imported_dependencies(name, targets)?;
            let mut kept = Vec::with_capacity(dependencies.len());
            for dependency in dependencies.drain(..) {
                let dependency_type = target_type(targets, &dependency)?;
                let hard = flag_value(targets[&dependency].get("hard_dependency")).unwrap_or(false);
                let drop = if dependency_type == "static_library" {
                    !hard
                } else {
                    !declared.contains(&dependency)
                };
                if drop {
                    trace!(%name, %dependency, "dropping static library dependency");
                } else {
                    kept.push(dependency);
                }
            }

            let Some(target) = targets.get_mut(name) else {
                continue;
            };
            target.insert(String::from("dependencies_original"), original);
            if kept.is_empty() {
                target.shift_remove("dependencies");
            } else {
                target.insert(String::from("dependencies"), to_values(&kept));
            }
        } else if LINKABLE_TYPES.contains(&kind.as_str()) {
            let link = graph.link_dependencies(name, targets, true)?;
            let mut dependencies = dependency_list(&targets[name], "dependencies");
            for dependency in link {
                if dependency != *name && !dependencies.contains(&dependency) {
                    trace!(%name, %dependency, "adding link dependency");
                    dependencies.push(dependency);
                }
            }

            if sort {
                dependencies = flat_list
                    .iter()
                    .rev()
                    .filter(|n| dependencies.contains(n))
                    .cloned()
                    .collect_vec();
            }

            if let Some(target) = targets.get_mut(name)
                && !dependencies.is_empty()
            {
                target.insert(String::from("dependencies"), to_values(&dependencies));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use gypsum_syntax::parse_value_from_str;
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

    fn adjusted(defs: &[(&str, &str)], sort: bool) -> Targets {
        let mut t = targets(defs);
        let graph = DependencyGraph::build(&t).unwrap();
        let flat = graph.flatten().unwrap();
        adjust_static_dependencies(&mut t, &flat, &graph, sort).unwrap();
        t
    }

    fn deps(t: &Targets, name: &str) -> Vec<String> {
        dependency_list(&t[&QualifiedName::parse(name).unwrap()], "dependencies")
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn static_chain() {
        let t = adjusted(
            &[
                ("u:a", "{'type': 'static_library'}"),
                ("u:b", "{'type': 'static_library', 'dependencies': ['u:a']}"),
                ("u:c", "{'type': 'executable', 'dependencies': ['u:b']}"),
            ],
            false,
        );
        let b = &t[&QualifiedName::parse("u:b").unwrap()];
        assert!(!b.contains_key("dependencies"));
        assert_eq!(b["dependencies_original"], Value::from(vec!["u:a"]));
        assert_eq!(deps(&t, "u:c"), vec!["u:b", "u:a"]);
    }

    #[test]
    fn hard_and_non_static() {
        let t = adjusted(
            &[
                ("u:gen", "{'type': 'none'}"),
                ("u:hard", "{'type': 'static_library', 'hard_dependency': 1}"),
                (
                    "u:exporter",
                    "{'type': 'none', 'dependencies': ['u:other'],
                      'export_dependent_settings': ['u:other']}",
                ),
                ("u:other", "{'type': 'none'}"),
                (
                    "u:lib",
                    "{'type': 'static_library',
                      'dependencies': ['u:gen', 'u:hard', 'u:exporter']}",
                ),
            ],
            false,
        );
        // u:other is imported through u:exporter but was never declared, so it goes
        assert_eq!(deps(&t, "u:lib"), vec!["u:gen", "u:hard", "u:exporter"]);
    }

    #[test]
    fn sorted_dependencies() {
        let t = adjusted(
            &[
                ("u:base", "{'type': 'static_library'}"),
                ("u:mid", "{'type': 'static_library', 'dependencies': ['u:base']}"),
                (
                    "u:app",
                    "{'type': 'executable', 'dependencies': ['u:base', 'u:mid']}",
                ),
            ],
            true,
        );
        assert_eq!(deps(&t, "u:app"), vec!["u:mid", "u:base"]);
    }
}
