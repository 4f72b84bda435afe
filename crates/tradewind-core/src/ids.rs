//! Record id generation
// Decision: UUID v7 for time-ordered ids (sortable by creation time)

use uuid::Uuid;

/// Generate a fresh record id.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let earlier = new_id();
        let later = new_id();
        assert!(earlier <= later);
    }
}
