use gypsum_util::shell::encode_posix_shell_list;
use gypsum_util::split::trim_key_suffixes;

/// Keys whose string values are paths relative to the unit they were written in.
const BUILTIN_PATH_SECTIONS: &[&str] = &[
    "destination",
    "files",
    "include_dirs",
    "inputs",
    "libraries",
    "outputs",
    "sources",
];

const PATH_SECTION_SUFFIXES: &[&str] = &["_dir", "_dirs", "_file", "_files", "_path", "_paths"];

/// Keys that stay on the target and are never copied into its configurations.
pub const BUILTIN_NON_CONFIGURATION_KEYS: &[&str] = &[
    "actions",
    "configurations",
    "default_configuration",
    "dependencies",
    "dependencies_original",
    "libraries",
    "link_languages",
    "postbuilds",
    "product_dir",
    "product_extension",
    "product_name",
    "product_prefix",
    "rules",
    "run_as",
    "sources",
    "standalone_static_library",
    "suppress_wildcard",
    "target_name",
    "toolset",
    "toolsets",
    "type",
    "variants",
    "variables",
];

/// Merge and filter operator characters that may trail a key.
pub const KEY_OPERATOR_SUFFIXES: &[char] = &['=', '+', '?', '!', '/'];

/// Renders a sequence substituted into string context.
pub type ListEncoder = fn(&[String]) -> String;

/// Settings supplied by the caller for one evaluation run.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Path-valued keys in addition to the built-in ones.
    pub path_sections: Vec<String>,
    /// Target-scope-only keys in addition to [`BUILTIN_NON_CONFIGURATION_KEYS`].
    pub non_configuration_keys: Vec<String>,
    pub handles_variants: bool,
    /// Sequence keys other than `sources` whose items are matched against rule extensions.
    pub extra_sources_for_rules: Vec<String>,
    /// Order the dependencies of linkable targets from dependents to dependencies.
    pub sort_dependencies: bool,
    /// Reject cycles between units before the target graph is built. A target cycle that
    /// crosses units then fails as [`EngineError::UnitCycle`] rather than
    /// [`EngineError::Cycle`].
    ///
    /// [`EngineError::UnitCycle`]: crate::errors::EngineError::UnitCycle
    /// [`EngineError::Cycle`]: crate::errors::EngineError::Cycle
    pub check_unit_cycles: bool,
    pub list_encoder: ListEncoder,
}

fn encode_list(items: &[String]) -> String {
    encode_posix_shell_list(items)
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            path_sections: vec![],
            non_configuration_keys: vec![],
            handles_variants: false,
            extra_sources_for_rules: vec![],
            sort_dependencies: false,
            check_unit_cycles: true,
            list_encoder: encode_list,
        }
    }
}

impl EngineConfig {
    /// Whether values under `key` are paths. Trailing merge/filter operators are ignored.
    pub fn is_path_section(&self, key: &str) -> bool {
        let base = trim_key_suffixes(key, &['=', '+', '?', '!']);

        BUILTIN_PATH_SECTIONS.contains(&base)
            || self.path_sections.iter().any(|s| s == base)
            || PATH_SECTION_SUFFIXES.iter().any(|s| base.ends_with(s))
    }

    /// Whether `key` (with any operator suffix) belongs only to the target and not to its
    /// configurations.
    pub fn is_non_configuration_key(&self, key: &str) -> bool {
        let base = trim_key_suffixes(key, KEY_OPERATOR_SUFFIXES);

        BUILTIN_NON_CONFIGURATION_KEYS.contains(&base)
            || self.non_configuration_keys.iter().any(|k| k == base)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_sections() {
        let mut config = EngineConfig::default();
        assert!(config.is_path_section("sources"));
        assert!(config.is_path_section("sources+"));
        assert!(config.is_path_section("include_dirs!"));
        assert!(config.is_path_section("product_dir"));
        assert!(config.is_path_section("mac_bundle_resources_files"));
        assert!(!config.is_path_section("defines"));
        assert!(!config.is_path_section("sources/"));

        config.path_sections.push(String::from("mac_bundle_resources"));
        assert!(config.is_path_section("mac_bundle_resources="));
    }

    #[test]
    fn non_configuration_keys() {
        let mut config = EngineConfig::default();
        assert!(config.is_non_configuration_key("sources/"));
        assert!(config.is_non_configuration_key("dependencies+"));
        assert!(!config.is_non_configuration_key("defines"));

        config.non_configuration_keys.push(String::from("mac_bundle"));
        assert!(config.is_non_configuration_key("mac_bundle"));
    }

    #[test]
    fn default_list_encoder() {
        let config = EngineConfig::default();
        let items = vec![String::from("a b"), String::from("c")];
        assert_eq!((config.list_encoder)(&items), "\"a b\" c");
    }
}
