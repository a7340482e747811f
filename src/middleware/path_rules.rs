use std::collections::HashMap;

/// Path-scoped settings with one precedence policy for every middleware:
/// an exact path first, then the longest matching prefix, then the
/// catch-all.
///
/// Prefixes match at segment boundaries: `/api` covers `/api` and
/// `/api/x` but not `/apix`. A prefix ending in `/` covers everything below
/// it.
#[derive(Debug, Clone)]
pub struct PathRules<T> {
    exact: HashMap<String, T>,
    /// Kept sorted by descending prefix length.
    prefixes: Vec<(String, T)>,
    catch_all: Option<T>,
}

impl<T> Default for PathRules<T> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            prefixes: Vec::new(),
            catch_all: None,
        }
    }
}

impl<T> PathRules<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule for one exact path.
    #[must_use]
    pub fn exact(mut self, path: &str, rule: T) -> Self {
        self.exact.insert(path.to_string(), rule);
        self
    }

    /// Rule for every path under `prefix`. Re-registering a prefix replaces
    /// its rule.
    #[must_use]
    pub fn prefix(mut self, prefix: &str, rule: T) -> Self {
        self.prefixes.retain(|(p, _)| p != prefix);
        self.prefixes.push((prefix.to_string(), rule));
        self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    /// Rule used when nothing else matches.
    #[must_use]
    pub fn catch_all(mut self, rule: T) -> Self {
        self.catch_all = Some(rule);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty() && self.catch_all.is_none()
    }

    /// Most specific rule for `path`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&T> {
        self.resolve_with_key(path).map(|(_, rule)| rule)
    }

    /// Most specific rule plus the key it was registered under (`*` for the
    /// catch-all).
    #[must_use]
    pub fn resolve_with_key<'a>(&'a self, path: &str) -> Option<(&'a str, &'a T)> {
        if let Some((key, rule)) = self.exact.get_key_value(path) {
            return Some((key.as_str(), rule));
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(p, rule)| (p.as_str(), rule))
            .or_else(|| self.catch_all.as_ref().map(|rule| ("*", rule)))
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    let Some(rest) = path.strip_prefix(prefix) else {
        return false;
    };
    rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let rules = PathRules::new().prefix("/api/", "B").prefix("/api/admin", "A");
        assert_eq!(rules.resolve("/api/admin/x"), Some(&"A"));
        assert_eq!(rules.resolve("/api/admin"), Some(&"A"));
        assert_eq!(rules.resolve("/api/other"), Some(&"B"));
        assert_eq!(rules.resolve("/api/administrator"), Some(&"B"));
        assert_eq!(rules.resolve("/other"), None);
    }

    #[test]
    fn test_exact_then_prefix_then_catch_all() {
        let rules = PathRules::new()
            .catch_all(0)
            .prefix("/slow", 1)
            .exact("/slow/health", 2);
        assert_eq!(rules.resolve("/slow/health"), Some(&2));
        assert_eq!(rules.resolve("/slow/report"), Some(&1));
        assert_eq!(rules.resolve_with_key("/fast"), Some(("*", &0)));
    }

    #[test]
    fn test_segment_boundary() {
        let rules = PathRules::new().prefix("/api", ());
        assert!(rules.resolve("/api").is_some());
        assert!(rules.resolve("/api/v1").is_some());
        assert!(rules.resolve("/apix").is_none());
    }
}
