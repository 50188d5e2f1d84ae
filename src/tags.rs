/// Value of `name` in a `|`-separated `name=value` tag list.
///
/// Tag lists look like `cvss_base=5.0|risk_factor=Medium|solution=...`.
/// The first matching entry wins. A missing tag yields the empty string.
pub fn tag<'a>(tags: &'a str, name: &str) -> &'a str {
    tags.split('|')
        .find_map(|entry| entry.strip_prefix(name)?.strip_prefix('='))
        .unwrap_or("")
}

/// Whether two comma-separated CVE lists share an entry.
pub fn common_cve(a: &str, b: &str) -> bool {
    let ours: Vec<&str> = a.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();

    b.split(',')
        .map(str::trim)
        .any(|theirs| !theirs.is_empty() && ours.contains(&theirs))
}
