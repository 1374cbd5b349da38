//! Expression fingerprinting.
//!
//! Every indexed expression is reduced to a fixed-width digest of its
//! canonical structure. The registry compares fingerprint lists as
//! *multisets*: the order in which expressions were given does not matter
//! for duplicate detection or expression-based lookup.

use std::fmt;

use sha2::{Digest, Sha256};

/// Domain tag mixed into every fingerprint so digests cannot collide with
/// other SHA-256 uses in the engine.
const FINGERPRINT_DOMAIN_TAG: &[u8] = b"marten.index.fingerprint.v1";

const FRAME_EXPRESSION: &[u8] = b"expression";

/// Width of a fingerprint digest in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// An expression that can be reduced to a stable fingerprint.
///
/// The planner implements this for its expression nodes; the canonical form
/// must be stable across process runs for fingerprints to survive a
/// save/load cycle.
pub trait Expression {
    /// The canonical textual form of the expression, e.g. a normalized
    /// column reference or function application.
    fn canonical_form(&self) -> String;
}

impl<T: Expression + ?Sized> Expression for &T {
    fn canonical_form(&self) -> String {
        (**self).canonical_form()
    }
}

impl Expression for str {
    fn canonical_form(&self) -> String {
        self.to_string()
    }
}

impl Expression for String {
    fn canonical_form(&self) -> String {
        self.clone()
    }
}

/// A fixed-width digest capturing the identity of an indexed expression.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Computes the fingerprint of an expression from its canonical form.
    pub fn of(expr: &dyn Expression) -> Self {
        let canonical = expr.canonical_form();
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN_TAG);
        write_framed(&mut hasher, FRAME_EXPRESSION, canonical.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Reconstructs a fingerprint from raw digest bytes, e.g. when loading
    /// a persisted index.
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

// Length-framed update so adjacent fields can never alias each other.
fn write_framed(hasher: &mut Sha256, label: &[u8], bytes: &[u8]) {
    let label_len = u32::try_from(label.len()).unwrap_or(u32::MAX);
    hasher.update(label_len.to_be_bytes());
    hasher.update(label);

    let bytes_len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    hasher.update(bytes_len.to_be_bytes());
    hasher.update(bytes);
}

/// Compares two fingerprint lists for multiset equality.
///
/// Each element of `a` must match exactly one unmatched element of `b`.
/// Neither slice is reordered; callers may pass borrowed planner state.
pub fn lists_equal(a: &[Fingerprint], b: &[Fingerprint]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut visited = vec![false; b.len()];
    for fa in a {
        let mut found = false;
        for (j, fb) in b.iter().enumerate() {
            if visited[j] {
                continue;
            }
            if fa.as_bytes() == fb.as_bytes() {
                visited[j] = true;
                found = true;
                break;
            }
        }
        if !found {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(expr: &str) -> Fingerprint {
        Fingerprint::of(&expr.to_string())
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fp("users.name"), fp("users.name"));
        assert_ne!(fp("users.name"), fp("users.email"));
    }

    #[test]
    fn test_fingerprint_display_is_hex() {
        let rendered = fp("users.name").to_string();
        assert_eq!(rendered.len(), FINGERPRINT_LEN * 2);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_from_bytes_round_trip() {
        let original = fp("lower(users.name)");
        let rebuilt = Fingerprint::from_bytes(*original.as_bytes());
        assert_eq!(original, rebuilt);
    }

    #[test]
    fn test_lists_equal_ignores_order() {
        let a = [fp("a"), fp("b"), fp("c")];
        let b = [fp("c"), fp("a"), fp("b")];
        assert!(lists_equal(&a, &b));
        assert!(lists_equal(&b, &a));
    }

    #[test]
    fn test_lists_equal_respects_multiplicity() {
        let a = [fp("a"), fp("a")];
        let b = [fp("a"), fp("b")];
        assert!(!lists_equal(&a, &b));

        let c = [fp("a"), fp("a")];
        assert!(lists_equal(&a, &c));
    }

    #[test]
    fn test_lists_equal_rejects_length_mismatch() {
        let a = [fp("a")];
        let b = [fp("a"), fp("b")];
        assert!(!lists_equal(&a, &b));
        assert!(!lists_equal(&b, &a));
        assert!(lists_equal(&[], &[]));
    }
}
