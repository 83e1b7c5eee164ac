use regex::Regex;

/// Extracts ticket reference tokens such as `[INC-1042]` from free text.
#[derive(Debug, Clone)]
pub struct ReferenceMatcher {
    pattern: Regex,
}

impl ReferenceMatcher {
    /// The first capture group, when present, is the token; otherwise the
    /// whole match is.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Tokens in order of appearance, without repeats.
    pub fn tokens<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut found: Vec<&'t str> = Vec::new();
        for caps in self.pattern.captures_iter(text) {
            let Some(token) = caps.get(1).or_else(|| caps.get(0)) else {
                continue;
            };
            let token = token.as_str().trim();
            if !token.is_empty() && !found.contains(&token) {
                found.push(token);
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReconcilerConfig;

    fn default_matcher() -> ReferenceMatcher {
        ReferenceMatcher::new(&ReconcilerConfig::default().reference_pattern).unwrap()
    }

    #[test]
    fn finds_bracketed_codes_through_reply_prefixes() {
        let matcher = default_matcher();
        assert_eq!(matcher.tokens("RE: [INC-1042] disk full"), vec!["INC-1042"]);
        assert_eq!(matcher.tokens("Fwd: AW: [INC-7] [CHG-88]"), vec!["INC-7", "CHG-88"]);
        assert_eq!(matcher.tokens("[INC-7] again [INC-7]"), vec!["INC-7"]);
    }

    #[test]
    fn ignores_non_reference_brackets() {
        let matcher = default_matcher();
        assert!(matcher.tokens("[EXTERNAL] hello").is_empty());
        assert!(matcher.tokens("INC-1042 without brackets").is_empty());
        assert!(matcher.tokens("[1042-INC]").is_empty());
        assert!(matcher.tokens("").is_empty());
    }

    #[test]
    fn custom_pattern_without_group_uses_whole_match() {
        let matcher = ReferenceMatcher::new(r"#[0-9]+").unwrap();
        assert_eq!(matcher.tokens("see #12 and #13"), vec!["#12", "#13"]);
        assert!(ReferenceMatcher::new("[unclosed").is_err());
    }
}
