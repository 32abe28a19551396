//! Post body composition
//!
//! Lengths are counted in Unicode scalar values, so a cut never lands inside
//! a code point.

/// Longest text published unchanged.
pub const MAX_POST_CHARS: usize = 300;

pub const ELLIPSIS: &str = "...";

/// Compose the post body for `raw_text`.
///
/// Text of at most [`MAX_POST_CHARS`] characters is returned as is. Longer
/// text is cut before the last `.` found in its first [`MAX_POST_CHARS`]
/// characters; without one, the first 297 characters are kept. Either way
/// [`ELLIPSIS`] is appended.
#[must_use]
pub fn compose_post(raw_text: &str) -> String {
    let window_end = match raw_text.char_indices().nth(MAX_POST_CHARS) {
        Some((idx, _)) => idx,
        None => return raw_text.to_string(),
    };
    let window = &raw_text[..window_end];

    let cut = window.rfind('.').unwrap_or_else(|| {
        let hard_limit = MAX_POST_CHARS - ELLIPSIS.len();
        window
            .char_indices()
            .nth(hard_limit)
            .map_or(window.len(), |(idx, _)| idx)
    });

    format!("{}{}", &window[..cut], ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_text_is_unchanged() {
        let text = "I wonder who I truly am. It has been a long day.";
        assert_eq!(compose_post(text), text);
        assert_eq!(compose_post(""), "");

        let exactly = "a".repeat(MAX_POST_CHARS);
        assert_eq!(compose_post(&exactly), exactly);
    }

    #[test]
    fn cuts_at_last_sentence_boundary() {
        let text = format!("{}. {}", "a".repeat(120), "b".repeat(400));
        let post = compose_post(&text);
        assert_eq!(post, format!("{}...", "a".repeat(120)));
    }

    #[test]
    fn hard_cut_without_sentence_boundary() {
        let text = "x".repeat(301);
        let post = compose_post(&text);
        assert_eq!(post.chars().count(), MAX_POST_CHARS);
        assert_eq!(post, format!("{}...", "x".repeat(297)));
    }

    #[test]
    fn period_beyond_window_is_ignored() {
        let text = format!("{}.", "y".repeat(350));
        assert_eq!(compose_post(&text), format!("{}...", "y".repeat(297)));
    }

    #[test]
    fn multibyte_text_is_not_split() {
        let text = "é".repeat(310);
        let post = compose_post(&text);
        assert_eq!(post, format!("{}...", "é".repeat(297)));
    }

    proptest! {
        #[test]
        fn truncation_law(text in "[a-zé🦀 .]{0,500}") {
            let post = compose_post(&text);
            let chars: Vec<char> = text.chars().collect();

            if chars.len() <= MAX_POST_CHARS {
                prop_assert_eq!(post, text);
            } else {
                prop_assert!(post.ends_with(ELLIPSIS));
                let kept = &post[..post.len() - ELLIPSIS.len()];
                prop_assert!(text.starts_with(kept));

                let window = &chars[..MAX_POST_CHARS];
                match window.iter().rposition(|c| *c == '.') {
                    Some(last_period) => {
                        prop_assert_eq!(kept.chars().count(), last_period);
                    }
                    None => prop_assert_eq!(kept.chars().count(), 297),
                }
            }
        }
    }
}
