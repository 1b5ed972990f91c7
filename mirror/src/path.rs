//! Helpers for slash-separated, root-relative remote paths

/// Parent directory of `path`, `""` for root-level entries
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Final segment of `path`
pub fn leaf_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Number of segments in `path`
pub fn depth_of(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}

/// First segment of `path`
pub fn top_level_of(path: &str) -> &str {
    match path.find('/') {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// Every proper ancestor of `path`, outermost first
pub fn ancestors_of(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(idx, _)| &path[..idx])
}

/// Join two remote path fragments, ignoring empty sides
pub fn join(base: &str, relative: &str) -> String {
    match (base.is_empty(), relative.is_empty()) {
        (true, _) => relative.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, relative),
    }
}

/// Why `path` is not a well-formed relative remote path, if it is not
pub fn validate(path: &str) -> Option<&'static str> {
    if path.is_empty() {
        Some("empty path")
    } else if path.starts_with('/') {
        Some("leading '/'")
    } else if path.ends_with('/') {
        Some("trailing '/'")
    } else if path.split('/').any(|segment| segment.is_empty()) {
        Some("empty path segment")
    } else {
        None
    }
}
