//! Keyword heuristics for spotting time-sensitive queries.
//!
//! A query is time-sensitive when its correct answer can change quickly
//! ("who is the current president", "weather today"). Such queries skip the
//! cache read path and are cached with a short TTL.
//!
//! Matching rules:
//! - single-word keywords match whole tokens (`now` does not match `know`);
//! - multi-word keywords match as a phrase over the normalized token stream;
//! - when enabled, a 4-digit token between 1900 and 2099 counts as an
//!   explicit year.
//!
//! The list is a product decision and lives in configuration.

/// Default keyword list used when configuration does not override it.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "current",
    "currently",
    "now",
    "today",
    "tonight",
    "yesterday",
    "tomorrow",
    "recent",
    "recently",
    "latest",
    "newest",
    "breaking",
    "news",
    "this week",
    "this month",
    "this year",
    "right now",
    "president",
    "prime minister",
    "stock price",
    "exchange rate",
    "weather",
    "score",
];

/// Keyword-based time-sensitivity detector.
#[derive(Debug, Clone)]
pub struct TimeSensitivity {
    words: Vec<String>,
    phrases: Vec<Vec<String>>,
    match_years: bool,
}

impl TimeSensitivity {
    pub fn new<I, S>(keywords: I, match_years: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut words = Vec::new();
        let mut phrases = Vec::new();
        for kw in keywords {
            let tokens = tokenize(kw.as_ref());
            match tokens.len() {
                0 => {}
                1 => words.extend(tokens),
                _ => phrases.push(tokens),
            }
        }
        Self {
            words,
            phrases,
            match_years,
        }
    }

    pub fn is_time_sensitive(&self, text: &str) -> bool {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return false;
        }

        if tokens.iter().any(|t| self.words.iter().any(|w| w == t)) {
            return true;
        }

        if self.match_years && tokens.iter().any(|t| is_year(t)) {
            return true;
        }

        self.phrases.iter().any(|phrase| {
            tokens
                .windows(phrase.len())
                .any(|window| window == phrase.as_slice())
        })
    }
}

impl Default for TimeSensitivity {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS, true)
    }
}

/// Lowercase and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_year(token: &str) -> bool {
    token.len() == 4
        && token
            .parse::<u32>()
            .map(|y| (1900..=2099).contains(&y))
            .unwrap_or(false)
}
