//! Segment-wise path pattern matching.
//!
//! A pattern segment beginning with `@` matches exactly one request segment.
//! There are no partial-segment or multi-segment wildcards.

/// Whether `request_path` matches `pattern`.
#[must_use]
pub fn matches(request_path: &str, pattern: &str) -> bool {
    let request = request_path.trim_matches('/').split('/');
    let pattern = pattern.trim_matches('/').split('/');

    if request.clone().count() != pattern.clone().count() {
        return false;
    }

    request
        .zip(pattern)
        .all(|(req, pat)| pat.starts_with('@') || req == pat)
}

/// The first of `patterns` matching `request_path`.
pub fn first_match<'a, I>(request_path: &str, patterns: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    patterns
        .into_iter()
        .find(|pattern| matches(request_path, pattern))
}

#[cfg(test)]
mod tests {
    use proptest::{collection, prelude::*};

    use super::{first_match, matches};

    #[test]
    fn wildcard_segment() {
        assert!(matches("/users/123", "/users/@id"));
        assert!(matches("/users/123/profile", "/users/@id/profile"));
    }

    #[test]
    fn segment_count_must_agree() {
        assert!(!matches("/users/123/profile", "/users/@id"));
        assert!(!matches("/users", "/users/@id"));
    }

    #[test]
    fn literal_segments_must_agree() {
        assert!(!matches("/posts/1", "/users/@id"));
        assert!(!matches("/users/123/settings", "/users/@id/profile"));
    }

    #[test]
    fn surrounding_slashes_are_ignored() {
        assert!(matches("users/123/", "/users/@id"));
        assert!(matches("/", ""));
    }

    #[test]
    fn first_declared_pattern_wins() {
        let patterns = ["/orders/@id", "/users/@id", "/users/@other"];
        assert_eq!(
            first_match("/users/9", patterns.iter().copied()),
            Some("/users/@id")
        );
        assert_eq!(first_match("/nothing", patterns.iter().copied()), None);
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}"
    }

    proptest! {
        #[test]
        fn path_matches_itself(segments in collection::vec(segment(), 0..8)) {
            let path = format!("/{}", segments.join("/"));
            prop_assert!(matches(&path, &path));
        }

        #[test]
        fn all_wildcards_match_any_path_of_same_length(segments in collection::vec(segment(), 1..8)) {
            let path = format!("/{}", segments.join("/"));
            let pattern = format!("/{}", vec!["@v"; segments.len()].join("/"));
            prop_assert!(matches(&path, &pattern));
            let longer = format!("{path}/extra");
            prop_assert!(!matches(&longer, &pattern));
        }
    }
}
