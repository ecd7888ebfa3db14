//! Table of hosts a command index can refer to.

/// Built-in destinations. Index 0 is the local machine.
pub const DEFAULT_DESTINATIONS: [&str; 22] = [
    "localhost",
    "www.bbc.co.uk",
    "www.speedtest6.com",
    "www.yahoo.com",
    "he.net",
    "www.youtube.com",
    "axu.tm",
    "www.google.com",
    "www.ietf.org",
    "www.viagenie.ca",
    "www.facebook.com",
    "www.gmail.com",
    "cloudflare.com",
    "ipv6-test.com",
    "tum.de",
    "www.itu.int",
    "ipv6now.com.au",
    "www.nanog.org",
    "www.netflix.com",
    "www.instagram.com",
    "www.wikipedia.org",
    "www.yandex.ru",
];

/// Index of the local destination.
pub const LOCAL_INDEX: usize = 0;

/// Index used when no usable index is given.
pub const DEFAULT_INDEX: usize = 7;

/// Ordered, read-only mapping from index to hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    hosts: Vec<String>,
}

impl Destinations {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }

    /// Look up a hostname. Out-of-range indices yield `None`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.hosts.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Index to use when none, or an unusable one, was given.
    ///
    /// `DEFAULT_INDEX` when the table reaches it, otherwise `LOCAL_INDEX`.
    /// `None` only for an empty table.
    pub fn fallback_index(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else if DEFAULT_INDEX < self.len() {
            Some(DEFAULT_INDEX)
        } else {
            Some(LOCAL_INDEX)
        }
    }

    /// Iterate over `(index, hostname)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.hosts.iter().map(String::as_str).enumerate()
    }
}

impl Default for Destinations {
    fn default() -> Self {
        Self::new(DEFAULT_DESTINATIONS.iter().map(|h| h.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = Destinations::default();
        assert_eq!(table.len(), 22);
        assert_eq!(table.get(LOCAL_INDEX), Some("localhost"));
        assert_eq!(table.get(DEFAULT_INDEX), Some("www.google.com"));
        assert_eq!(table.get(21), Some("www.yandex.ru"));
    }

    #[test]
    fn test_out_of_range() {
        let table = Destinations::default();
        assert_eq!(table.get(22), None);
        assert_eq!(table.get(9999), None);
    }

    #[test]
    fn test_fallback_index() {
        assert_eq!(Destinations::default().fallback_index(), Some(DEFAULT_INDEX));

        let short = Destinations::new(vec!["example.com".into(), "example.org".into()]);
        assert_eq!(short.fallback_index(), Some(LOCAL_INDEX));

        assert_eq!(Destinations::new(Vec::new()).fallback_index(), None);
    }

    #[test]
    fn test_iter_order() {
        let table = Destinations::new(vec!["a".into(), "b".into()]);
        let pairs: Vec<_> = table.iter().collect();
        assert_eq!(pairs, vec![(0, "a"), (1, "b")]);
    }
}
