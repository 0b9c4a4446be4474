use serde::{Deserialize, Serialize};

/// Document version used for optimistic concurrency control.
///
/// A freshly inserted document is at version 1 and every successful update
/// increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a freshly inserted document.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Versioned<T> {
    #[serde(flatten)]
    pub value: T,
    pub version: Version,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }

    /// Discards the version.
    pub fn into_inner(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_sequence() {
        let v = Version::first();
        assert_eq!(v.as_i64(), 1);
        assert_eq!(v.next(), Version::new(2));
        assert!(v < v.next());
    }

    #[test]
    fn test_versioned_serializes_flat() {
        #[derive(Serialize)]
        struct Doc {
            name: &'static str,
        }

        let doc = Versioned::new(Doc { name: "a" }, Version::new(3));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json, serde_json::json!({"name": "a", "version": 3}));
    }
}
