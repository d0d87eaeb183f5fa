use std::collections::BTreeSet;

use crate::config::WeightedKeyword;

/// Split text into lowercase whitespace-separated tokens.
///
/// Empty or whitespace-only input yields no tokens.
///
/// # Examples
///
/// ```
/// use faqmatch::tokenizer::tokenize;
///
/// assert_eq!(tokenize("  Hello  World "), vec!["hello", "world"]);
/// assert!(tokenize("   ").is_empty());
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Precomposed Hangul syllable block (가..힣).
pub fn is_hangul_syllable(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

fn is_kept(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c.is_whitespace() || is_hangul_syllable(c)
}

/// Drop everything but word characters, whitespace and Hangul, lowercase,
/// and collapse whitespace runs into single spaces.
pub fn normalize(text: &str) -> String {
    let kept: String = text.chars().filter(|&c| is_kept(c)).collect();
    kept.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Terms compared by the token-overlap relevance check.
///
/// Tokens containing Hangul are broken into character bigrams, so an
/// inflected form ("장려금은") still shares terms with its stem ("장려금").
/// Other tokens are kept whole.
pub fn match_terms(text: &str) -> BTreeSet<String> {
    let mut terms = BTreeSet::new();
    for token in normalize(text).split_whitespace() {
        let chars: Vec<char> = token.chars().collect();
        if chars.len() >= 2 && chars.iter().any(|&c| is_hangul_syllable(c)) {
            for pair in chars.windows(2) {
                terms.insert(pair.iter().collect());
            }
        } else {
            terms.insert(token.to_string());
        }
    }
    terms
}

/// Query/question preprocessing with domain keyword weighting.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    weighted: Vec<WeightedKeyword>,
}

impl Tokenizer {
    pub fn new(weighted: &[WeightedKeyword]) -> Self {
        let weighted = weighted
            .iter()
            .filter_map(|k| {
                let term = normalize(&k.term);
                (!term.is_empty()).then(|| WeightedKeyword {
                    term,
                    weight: k.weight,
                })
            })
            .collect();
        Self { weighted }
    }

    /// Normalize `text` and append extra copies of weighted keywords.
    ///
    /// A keyword with weight `w` found `n` times in the normalized text gets
    /// `n * (w - 1)` copies appended, so it counts `w` times in total. The
    /// copies raise BM25 term frequency for high-value terms.
    pub fn preprocess(&self, text: &str) -> String {
        let base = normalize(text);
        if base.is_empty() {
            return base;
        }

        let mut out = base.clone();
        for keyword in &self.weighted {
            if keyword.weight <= 1 {
                continue;
            }
            let hits = base.matches(keyword.term.as_str()).count();
            for _ in 0..hits * (keyword.weight - 1) {
                out.push(' ');
                out.push_str(&keyword.term);
            }
        }
        out
    }

    /// Tokens of the preprocessed text.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        tokenize(&self.preprocess(text))
    }
}
