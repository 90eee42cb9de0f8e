//! Share path utilities
//!
//! Every path handed to a transport is share-relative, uses `/` separators
//! and has no leading or trailing separator. The share root is `""`.

use crate::config::SharePathMode;

const SEPARATORS: [char; 2] = ['/', '\\'];

/// Characters that mark a segment as a file or folder name rather than a share
const NAME_MARKERS: [char; 4] = ['.', ' ', '-', '_'];

/// Normalize separators and drop empty and `.` segments
///
/// ```
/// use sharelink::core::path::normalize;
///
/// assert_eq!(normalize("\\docs//2024\\q1/"), "docs/2024/q1");
/// assert_eq!(normalize("/"), "");
/// ```
pub fn normalize(path: &str) -> String {
    path.split(SEPARATORS)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// First path segment after stripping leading separators
pub fn share_name(path: &str) -> Option<&str> {
    path.trim_start_matches(SEPARATORS)
        .split(SEPARATORS)
        .next()
        .filter(|segment| !segment.is_empty())
}

/// Strip a leading share segment from a user-supplied path
///
/// In [`SharePathMode::Heuristic`] the first segment is removed only when it
/// appears in `known_shares` (case-insensitive) and contains none of the
/// characters typical of file or folder names. Otherwise the normalized path
/// is returned unchanged. [`SharePathMode::ShareRelative`] only normalizes.
pub fn path_without_share(path: &str, mode: SharePathMode, known_shares: &[String]) -> String {
    let normalized = normalize(path);
    if mode == SharePathMode::ShareRelative {
        return normalized;
    }

    let (first, rest) = match normalized.split_once('/') {
        Some((first, rest)) => (first, rest),
        None => (normalized.as_str(), ""),
    };

    let looks_like_share = !first.contains(NAME_MARKERS)
        && known_shares.iter().any(|share| share.eq_ignore_ascii_case(first));

    if looks_like_share {
        rest.to_string()
    } else {
        normalized
    }
}

/// Join a share-relative directory and a child name
pub fn join(parent: &str, name: &str) -> String {
    let parent = normalize(parent);
    let name = normalize(name);
    match (parent.is_empty(), name.is_empty()) {
        (true, _) => name,
        (_, true) => parent,
        _ => format!("{}/{}", parent, name),
    }
}

/// Parent directory of a normalized path; the root's parent is the root
pub fn parent(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(ix) => normalized[..ix].to_string(),
        None => String::new(),
    }
}

/// Last segment of a path
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches(SEPARATORS)
        .rsplit(SEPARATORS)
        .next()
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares() -> Vec<String> {
        ["public", "shared", "data"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_share_name() {
        assert_eq!(share_name("/media/photos/a.jpg"), Some("media"));
        assert_eq!(share_name("\\\\nas\\share"), Some("nas"));
        assert_eq!(share_name("///"), None);
        assert_eq!(share_name(""), None);
    }

    #[test]
    fn test_heuristic_strips_known_share() {
        let stripped = path_without_share("/Public/reports/file.txt", SharePathMode::Heuristic, &shares());
        assert_eq!(stripped, "reports/file.txt");

        assert_eq!(path_without_share("data", SharePathMode::Heuristic, &shares()), "");
    }

    #[test]
    fn test_heuristic_keeps_unknown_or_name_like_segments() {
        assert_eq!(
            path_without_share("projects/plan.doc", SharePathMode::Heuristic, &shares()),
            "projects/plan.doc"
        );
        assert_eq!(
            path_without_share("public.old/x", SharePathMode::Heuristic, &shares()),
            "public.old/x"
        );
    }

    #[test]
    fn test_share_relative_mode_only_normalizes() {
        assert_eq!(
            path_without_share("\\public\\reports\\file.txt", SharePathMode::ShareRelative, &shares()),
            "public/reports/file.txt"
        );
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join("", "a.txt"), "a.txt");
        assert_eq!(join("/docs/", "a.txt"), "docs/a.txt");
        assert_eq!(join("docs", ""), "docs");
        assert_eq!(parent("docs/2024/a.txt"), "docs/2024");
        assert_eq!(parent("a.txt"), "");
        assert_eq!(parent(""), "");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("docs/2024/a.txt"), "a.txt");
        assert_eq!(file_name("docs\\sub\\"), "sub");
        assert_eq!(file_name(""), "");
    }
}
