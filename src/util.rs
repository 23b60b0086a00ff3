//! Small string and timing helpers

use std::time::Instant;

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].to_owned(),
        None => input,
    }
}

/// Milliseconds elapsed since `started`, saturating at `u64::MAX`
pub fn duration_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::{duration_ms, truncate_chars};

    #[test]
    fn truncates_unicode_by_character() {
        let out = truncate_chars("a😀b😀c".to_owned(), 4);
        assert_eq!(out, "a😀b😀");
        assert_eq!(truncate_chars("short".to_owned(), 10), "short");
    }

    #[test]
    fn fresh_instant_measures_near_zero() {
        assert!(duration_ms(Instant::now()) < 1_000);
    }
}
