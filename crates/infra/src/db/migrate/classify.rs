//! Deciding whether a failed apply was lock contention (and so worth retrying).

use super::driver::ApplyError;

/// Case-insensitive substrings that mark an error as lock contention.
pub const LOCK_CONTENTION_MARKERS: [&str; 3] = ["timeout", "lock", "can't acquire"];

/// SQLSTATEs treated as contention by [`sqlstate_contention`]:
/// `55P03` lock_not_available and `57014` query_canceled (statement/lock timeout).
pub const CONTENTION_SQLSTATES: [&str; 2] = ["55P03", "57014"];

pub fn is_lock_contention_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    LOCK_CONTENTION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Default classifier: matches the rendered error text against
/// [`LOCK_CONTENTION_MARKERS`].
pub fn default_contention(err: &ApplyError) -> bool {
    is_lock_contention_text(&err.to_string())
}

/// Structured classifier: failed advisory lock, or a contention SQLSTATE.
pub fn sqlstate_contention(err: &ApplyError) -> bool {
    if matches!(err, ApplyError::Locked(_)) {
        return true;
    }
    err.sqlstate()
        .is_some_and(|code| CONTENTION_SQLSTATES.contains(&code.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn recognizes_typical_contention_messages() {
        assert!(is_lock_contention_text("lock timeout exceeded"));
        assert!(is_lock_contention_text("canceling statement due to lock timeout"));
        assert!(is_lock_contention_text("Can't Acquire advisory lock"));
        assert!(is_lock_contention_text("TIMEOUT"));
    }

    #[test]
    fn schema_errors_are_not_contention() {
        assert!(!is_lock_contention_text("syntax error at or near \"CRATE\""));
        assert!(!is_lock_contention_text("relation \"users\" already exists"));
        assert!(!default_contention(&ApplyError::Dirty(3)));
    }

    #[test]
    fn structured_classifier_ignores_message_text() {
        // Text mentions a lock but carries no contention SQLSTATE.
        let err = ApplyError::Other("lock file missing".to_string());
        assert!(default_contention(&err));
        assert!(!sqlstate_contention(&err));

        assert!(sqlstate_contention(&ApplyError::Locked(sqlx::Error::PoolTimedOut)));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn any_text_containing_a_marker_is_contention(
            prefix in "[a-zA-Z ]{0,20}",
            suffix in "[a-zA-Z ]{0,20}",
            idx in 0usize..LOCK_CONTENTION_MARKERS.len(),
            upper in any::<bool>(),
        ) {
            let marker = if upper {
                LOCK_CONTENTION_MARKERS[idx].to_uppercase()
            } else {
                LOCK_CONTENTION_MARKERS[idx].to_string()
            };
            let text = format!("{prefix}{marker}{suffix}");
            prop_assert!(is_lock_contention_text(&text));
        }

        #[test]
        fn digits_and_punctuation_are_never_contention(text in "[0-9 .,:;()-]{0,40}") {
            prop_assert!(!is_lock_contention_text(&text));
        }
    }
}
