pub mod mime;
pub mod time;

const ID_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y',
    'z',
];

/// Generate a 21 character run id from a lowercase alphanumeric alphabet.
pub fn longid() -> String {
    nanoid::nanoid!(21, &ID_ALPHABET)
}

/// Truncate `s` to at most `max` characters, appending `...` when cut.
pub fn truncate(
    s: &str,
    max: usize,
) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod test {
    use super::{longid, truncate};

    #[test]
    fn test_longid() {
        let id = longid();
        assert_eq!(id.len(), 21);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(id, longid());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
    }
}
