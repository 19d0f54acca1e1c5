/// Split a trailing operator character off `key` if it is one of `suffixes`.
///
/// # Example
///
/// ```
/// use gypsum_util::split::split_key_suffix;
/// assert_eq!(split_key_suffix("sources+", &['=', '+', '?']), ("sources", Some('+')));
/// assert_eq!(split_key_suffix("sources", &['=', '+', '?']), ("sources", None));
/// ```
pub fn split_key_suffix<'a>(key: &'a str, suffixes: &[char]) -> (&'a str, Option<char>) {
    match key.chars().last() {
        Some(c) if suffixes.contains(&c) => (&key[..key.len() - c.len_utf8()], Some(c)),
        _ => (key, None),
    }
}

/// Remove every trailing character found in `suffixes`.
pub fn trim_key_suffixes<'a>(key: &'a str, suffixes: &[char]) -> &'a str {
    key.trim_end_matches(|c| suffixes.contains(&c))
}
