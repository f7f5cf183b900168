use sha2::{Digest, Sha256};

/// Deterministic idempotency fingerprint over `(repository, pr_id, source_commit_id)`.
///
/// `event_type` is deliberately excluded: two deliveries of the same
/// commit on the same PR must collide regardless of which webhook event
/// triggered them.
pub fn idempotency_fingerprint(repository: &str, pr_id: &str, source_commit_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repository.as_bytes());
    hasher.update(b"\0");
    hasher.update(pr_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(source_commit_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest of arbitrary content, used for content-addressed cache keys.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_event_type_by_construction() {
        let a = idempotency_fingerprint("org/repo", "42", "abc123");
        let b = idempotency_fingerprint("org/repo", "42", "abc123");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_on_commit() {
        let a = idempotency_fingerprint("org/repo", "42", "abc123");
        let b = idempotency_fingerprint("org/repo", "42", "def456");
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }
}
