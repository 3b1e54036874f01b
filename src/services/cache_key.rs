//! Cache key derivation.
//!
//! Generation and upload flows mint a fresh opaque id before contacting the
//! origin. Proxy flows build a deterministic `namespace/seg/...` locator from
//! the upstream-identifying path segments, so every client asking for the same
//! upstream resource lands on the same object. Fresh ids never contain `/`
//! and composites always do, so the two families cannot collide in a shared
//! bucket.

use crate::errors::CacheError;
use std::fmt;
use uuid::Uuid;

const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// A new random key, independent of any request payload.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic key `namespace/segments[0]/segments[1]/...`.
    ///
    /// Pure function of its input. Each part must be a single non-empty path
    /// segment that is safe as a bucket object name.
    pub fn composite<S: AsRef<str>>(namespace: &str, segments: &[S]) -> Result<Self, CacheError> {
        if segments.is_empty() {
            return Err(CacheError::Validation(
                "at least one locator segment is required".into(),
            ));
        }

        let mut key = String::from(ensure_segment(namespace)?);
        for segment in segments {
            key.push(SEPARATOR);
            key.push_str(ensure_segment(segment.as_ref())?);
        }
        Ok(Self(key))
    }

    /// Wrap a key supplied by a client for retrieval.
    pub fn existing(key: impl Into<String>) -> Result<Self, CacheError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(CacheError::Validation("object key is required".into()));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Short stable digest for segments that must not appear verbatim in a key,
/// such as API keys.
pub fn segment_digest(value: &str) -> String {
    let digest = format!("{:x}", md5::compute(value));
    digest[..16].to_string()
}

fn ensure_segment(segment: &str) -> Result<&str, CacheError> {
    let invalid = |reason: &str| {
        CacheError::Validation(format!("invalid key segment `{}`: {}", segment, reason))
    };

    if segment.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if segment == "." || segment == ".." || segment.contains("..") {
        return Err(invalid("must not contain `..`"));
    }
    if segment
        .chars()
        .any(|c| c == SEPARATOR || c == '\\' || c.is_control())
    {
        return Err(invalid("must not contain separators or control characters"));
    }
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn composite_is_stable() {
        let a = CacheKey::composite("replicate", &["xezq", "IjJpp5sfup1w", "tmpcpjkrycc.mp4"]).unwrap();
        let b = CacheKey::composite("replicate", &["xezq", "IjJpp5sfup1w", "tmpcpjkrycc.mp4"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "replicate/xezq/IjJpp5sfup1w/tmpcpjkrycc.mp4");
    }

    #[test]
    fn namespaces_keep_variants_apart() {
        let veo = CacheKey::composite("veo", &["a", "b"]).unwrap();
        let other = CacheKey::composite("replicate", &["a", "b"]).unwrap();
        assert_ne!(veo, other);
    }

    #[test]
    fn composite_rejects_unsafe_segments() {
        assert!(CacheKey::composite("veo", &[""]).is_err());
        assert!(CacheKey::composite("veo", &["a/b"]).is_err());
        assert!(CacheKey::composite("veo", &[".."]).is_err());
        assert!(CacheKey::composite("veo", &["a\nb"]).is_err());
        assert!(CacheKey::composite::<&str>("veo", &[]).is_err());
    }

    #[test]
    fn fresh_keys_are_unique() {
        let keys: HashSet<String> = (0..1000).map(|_| CacheKey::fresh().into_string()).collect();
        assert_eq!(keys.len(), 1000);
        assert!(keys.iter().all(|k| !k.contains(SEPARATOR)));
    }

    #[test]
    fn digest_is_deterministic_and_short() {
        assert_eq!(segment_digest("secret"), segment_digest("secret"));
        assert_ne!(segment_digest("secret"), segment_digest("other"));
        assert_eq!(segment_digest("secret").len(), 16);
    }

    #[test]
    fn existing_rejects_blank() {
        assert!(CacheKey::existing("  ").is_err());
        assert_eq!(CacheKey::existing("abc").unwrap().as_str(), "abc");
    }
}
