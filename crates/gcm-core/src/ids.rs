use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated outbound message identifiers.
pub const MESSAGE_ID_LEN: usize = 8;

/// Returns a random alphanumeric message id.
///
/// Characters are drawn uniformly, with replacement, from `[A-Za-z0-9]`.
/// Uniqueness is not checked; collisions are negligible for ACK tracking.
pub fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MESSAGE_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{random_id, MESSAGE_ID_LEN};

    #[test]
    fn ids_are_eight_ascii_alphanumerics() {
        for _ in 0..1_000 {
            let id = random_id();
            assert_eq!(id.len(), MESSAGE_ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()), "bad id {id}");
        }
    }

    #[test]
    fn ids_vary_between_calls() {
        let ids: HashSet<String> = (0..256).map(|_| random_id()).collect();
        assert!(ids.len() > 250);
    }
}
