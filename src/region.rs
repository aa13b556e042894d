use anyhow::{Context, Result};
use regex::RegexBuilder;

/// Word-boundary keyword matcher for relevance counting.
pub struct RegionMatcher {
    pattern: Option<regex::Regex>,
}

impl RegionMatcher {
    pub fn new(keywords: &[String]) -> Result<Self> {
        let escaped: Vec<String> = keywords
            .iter()
            .map(|keyword| keyword.trim())
            .filter(|keyword| !keyword.is_empty())
            .map(regex::escape)
            .collect();

        if escaped.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", escaped.join("|")))
            .case_insensitive(true)
            .build()
            .context("invalid relevance keyword list")?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn matches(&self, location: &str) -> bool {
        if location.is_empty() {
            return false;
        }
        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(location))
    }
}
