//! Ordered header list with case-insensitive lookup (RFC 9110 §5).

/// A case-insensitive, multi-value HTTP header list.
///
/// Entries keep their insertion order and original casing, which is what gets
/// written back on the wire. Cached responses carry their headers unchanged, so
/// equality is exact (order and casing included).
///
/// # Examples
///
/// ```
/// use rttp_chain::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Cache-Control", "max-age=100");
/// headers.set("cache-control", "no-store");
///
/// assert_eq!(headers.get("CACHE-CONTROL"), Some("no-store"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry; existing values for the same name are kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every value for `name` with a single entry.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// First value for `name`, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes every entry named `name`. Returns `true` if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.entries.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Number of entries, not unique names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn insert_keeps_every_value() {
        let mut h = Headers::new();
        h.insert("Set-Cookie", "a=1");
        h.insert("set-cookie", "b=2");
        let vals: Vec<_> = h.get_all("SET-COOKIE").collect();
        assert_eq!(vals, vec!["a=1", "b=2"]);
    }

    #[test]
    fn set_replaces_all_values() {
        let mut h = Headers::new();
        h.insert("X-Foo", "1");
        h.insert("x-foo", "2");
        h.set("X-Foo", "3");
        let vals: Vec<_> = h.get_all("x-foo").collect();
        assert_eq!(vals, vec!["3"]);
    }

    #[test]
    fn remove_reports_whether_anything_changed() {
        let mut h = Headers::new();
        h.insert("X-Foo", "bar");
        assert!(h.remove("x-foo"));
        assert!(h.is_empty());
        assert!(!h.remove("x-foo"));
        assert!(!h.contains("x-foo"));
    }
}
