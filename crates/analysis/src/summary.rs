/// Summarize `content` as its first `sentences` sentences.
///
/// Sentences are split on `.`, `!` and `?`; blank fragments are skipped. The
/// kept sentences are joined with `". "` and closed with a final `"."`.
pub fn summarize(content: &str, sentences: usize) -> String {
    let picked: Vec<&str> = content
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(sentences)
        .collect();

    let mut summary = picked.join(". ");
    summary.push('.');
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_leading_sentences() {
        let text = "First one. Second!  Third? Fourth.";
        assert_eq!(summarize(text, 3), "First one. Second. Third.");
    }

    #[test]
    fn short_text_is_kept_whole() {
        assert_eq!(summarize("Only this", 3), "Only this.");
    }

    #[test]
    fn empty_text_yields_a_lone_period() {
        assert_eq!(summarize("", 3), ".");
        assert_eq!(summarize("...", 3), ".");
    }
}
