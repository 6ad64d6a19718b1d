//! Fingerprint similarity.
//!
//! Character-set Jaccard over the canonical component strings, not the
//! hex digests (two digests always share the hex alphabet). Intentionally
//! coarse: it tolerates minor environment drift (a software update
//! shifting the agent string) without forcing re-authentication, while
//! component strings from genuinely different devices share few
//! characters.

use std::collections::HashSet;

/// Similarity at or above which two fingerprints count as the same
/// device.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Jaccard similarity of the character sets of two hashes, in [0, 1].
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();

    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();

    intersection as f64 / union as f64
}

/// Whether two fingerprints are close enough to be the same device.
pub fn are_similar(a: &str, b: &str, threshold: f64) -> bool {
    similarity(a, b) >= threshold
}
