//! Identifier generation: `<prefix>_<unix millis>_<9 base-36 chars>`, and
//! the session id handle shared by the collectors of one pipeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Build a new id stamped with `now`.
#[must_use]
pub fn generate_id(prefix: &str, now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect();
    format!("{prefix}_{}_{suffix}", now.timestamp_millis())
}

/// Session id owned by the pipeline root and handed to every collector.
/// Clones share one slot, so a rotation is seen by all holders.
#[derive(Debug, Clone)]
pub struct SessionId(Arc<RwLock<String>>);

impl SessionId {
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(Arc::new(RwLock::new(generate_id("session", now))))
    }

    #[must_use]
    pub fn current(&self) -> String {
        self.0.read().clone()
    }

    /// Replace the id with a fresh one and return `(old, new)`.
    pub fn rotate(&self, now: DateTime<Utc>) -> (String, String) {
        let fresh = generate_id("session", now);
        let old = std::mem::replace(&mut *self.0.write(), fresh.clone());
        (old, fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionId, generate_id};
    use chrono::{TimeZone, Utc};

    #[test]
    fn id_has_prefix_timestamp_and_suffix() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let id = generate_id("err", now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "err");
        assert_eq!(parts[1], "1700000000123");
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn ids_are_distinct() {
        let now = Utc::now();
        let a = generate_id("alert", now);
        let b = generate_id("alert", now);
        assert_ne!(a, b);
    }

    #[test]
    fn session_id_rotation_is_shared_by_clones() {
        let now = Utc::now();
        let owner = SessionId::generate(now);
        let collector = owner.clone();
        assert!(owner.current().starts_with("session_"));

        let (old, new) = collector.rotate(now);
        assert_ne!(old, new);
        assert_eq!(owner.current(), new);
    }
}
