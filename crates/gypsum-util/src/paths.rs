//! Lexical path helpers.
//!
//! Unit paths are plain `/`-separated strings. Nothing here touches the filesystem: `..` is
//! collapsed textually, the way a normpath would, so results are deterministic regardless of the
//! current directory or symlinks.

use itertools::Itertools;

/// The directory portion of `path`, or `""` if it has none.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => "",
    }
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Collapse `.`, `..` and repeated separators.
///
/// ```
/// use gypsum_util::paths::normalize;
/// assert_eq!(normalize("a/./b/../c//d"), "a/c/d");
/// assert_eq!(normalize("../a/.."), "..");
/// assert_eq!(normalize(""), ".");
/// ```
pub fn normalize(path: &str) -> String {
    let absolute = is_absolute(path);
    let mut parts: Vec<&str> = vec![];

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // Can't go above the root
                _ if absolute => {}
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => String::from("."),
        (false, false) => joined,
    }
}

/// Join `path` onto `base`. An absolute `path` (or an empty `base`) is returned as-is.
pub fn join(base: &str, path: &str) -> String {
    if base.is_empty() || is_absolute(path) {
        path.to_string()
    } else if base.ends_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

pub fn join_normalized(base: &str, path: &str) -> String {
    normalize(&join(base, path))
}

fn components(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect()
}

/// Express `path` relative to the directory `relative_to`. Returns `""` when they are the same
/// location.
///
/// Both inputs are normalized first. When `relative_to` climbs above the common prefix with `..`,
/// the answer cannot be known lexically and the best effort is to keep those components.
pub fn relative_path(path: &str, relative_to: &str) -> String {
    let path = normalize(path);
    let relative_to = normalize(relative_to);

    if is_absolute(&path) != is_absolute(&relative_to) {
        return path;
    }

    let path_parts = components(&path);
    let base_parts = components(&relative_to);

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    std::iter::repeat_n("..", base_parts.len() - common)
        .chain(path_parts[common..].iter().copied())
        .join("/")
}
