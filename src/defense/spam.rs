//! Deterministic content spam scoring.
//!
//! `SpamScorer::analyze` is a pure function of the submitted fields and the
//! configured lists/thresholds: no I/O, no clock, no randomness. Rules are
//! additive; each triggered rule contributes a fixed score and a
//! human-readable reason.

use serde::Serialize;

/// Result of scoring one submission.
#[derive(Debug, Clone, Serialize)]
pub struct SpamAnalysisResult {
    pub is_spam: bool,
    pub score: u32,
    pub reasons: Vec<String>,
    pub triggered_keywords: Vec<String>,
    pub capital_percentage: f64,
    pub url_count: usize,
    pub word_uniqueness: f64,
    pub message_length: usize,
}

pub struct SpamScorer {
    keywords: Vec<String>,
    profanity: Vec<String>,
    spam_threshold: u32,
    max_urls_allowed: usize,
    max_capital_percentage: f64,
}

impl SpamScorer {
    pub fn new(
        keywords: Vec<String>,
        spam_threshold: u32,
        max_urls_allowed: usize,
        max_capital_percentage: f64,
    ) -> Self {
        Self {
            keywords,
            profanity: default_profanity_terms(),
            spam_threshold,
            max_urls_allowed,
            max_capital_percentage,
        }
    }

    /// Score a submission. `text` is the free-form message body; `name` is
    /// concatenated with it for keyword and pattern checks.
    pub fn analyze(&self, name: &str, email: &str, text: &str) -> SpamAnalysisResult {
        let full_text = format!("{} {}", name, text);
        let lowered = full_text.to_lowercase();

        let mut score = 0u32;
        let mut reasons = Vec::new();
        let mut triggered_keywords = Vec::new();

        for keyword in &self.keywords {
            if lowered.contains(keyword.as_str()) {
                score += 25;
                reasons.push(format!("Spam keyword: {keyword}"));
                triggered_keywords.push(keyword.clone());
            }
        }

        if self
            .profanity
            .iter()
            .any(|term| contains_word(&lowered, term))
        {
            score += 20;
            reasons.push("Profanity detected".to_string());
        }

        // Pattern classes score once each, however many times they match.
        // Uppercase-run and capital-ratio checks look at the raw text; the
        // rest work on the lowered text like the keyword scan.
        if has_repeated_char_run(&lowered, 5) {
            score += 15;
            reasons.push("Suspicious pattern: repeated characters".to_string());
        }
        if has_uppercase_run(&full_text, 10) {
            score += 15;
            reasons.push("Suspicious pattern: consecutive capitals".to_string());
        }
        if has_repeated_sequence(&lowered) {
            score += 15;
            reasons.push("Suspicious pattern: repeated sequence".to_string());
        }
        if has_adjacent_digit_groups(&lowered) {
            score += 15;
            reasons.push("Suspicious pattern: card-like number groups".to_string());
        }
        if lowered.contains("http://") || lowered.contains("https://") {
            score += 15;
            reasons.push("Suspicious pattern: URL present".to_string());
        }

        let url_count = count_urls(&lowered);
        if url_count > self.max_urls_allowed {
            score += 30;
            reasons.push(format!("Too many URLs ({url_count})"));
        }

        let capital_percentage = capital_percentage(&full_text);
        if capital_percentage > self.max_capital_percentage {
            score += 20;
            reasons.push(format!(
                "Too many capital letters ({capital_percentage:.1}%)"
            ));
        }

        if is_disposable_email(email) {
            score += 25;
            reasons.push("Suspicious email provider".to_string());
        }

        let message_length = text.chars().count();
        if message_length < 20 {
            score += 10;
            reasons.push("Message too short".to_string());
        }

        if has_repeated_char_run(text, 5) {
            score += 15;
            reasons.push("Repeated characters detected".to_string());
        }

        let (word_uniqueness, word_count) = word_uniqueness(text);
        if word_uniqueness < 0.3 && word_count > 10 {
            score += 20;
            reasons.push("High word repetition".to_string());
        }

        SpamAnalysisResult {
            is_spam: score >= self.spam_threshold,
            score,
            reasons,
            triggered_keywords,
            capital_percentage,
            url_count,
            word_uniqueness,
            message_length,
        }
    }
}

/// True if any single character occurs `run_len`+ times consecutively.
fn has_repeated_char_run(text: &str, run_len: usize) -> bool {
    let mut run = 0usize;
    let mut previous: Option<char> = None;
    for ch in text.chars() {
        if Some(ch) == previous {
            run += 1;
            if run >= run_len {
                return true;
            }
        } else {
            previous = Some(ch);
            run = 1;
        }
    }
    run_len <= 1 && !text.is_empty()
}

/// True if `run_len`+ uppercase ASCII letters occur consecutively.
fn has_uppercase_run(text: &str, run_len: usize) -> bool {
    let mut run = 0usize;
    for ch in text.chars() {
        if ch.is_ascii_uppercase() {
            run += 1;
            if run >= run_len {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// True if some 1-3 character sequence occurs 6+ times back to back
/// ("abcabcabcabcabcabc"). Single-character runs are covered too, but those
/// already trip the repeated-char rule at shorter lengths.
fn has_repeated_sequence(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    for seq_len in 1..=3usize {
        if chars.len() < seq_len * 6 {
            continue;
        }
        for start in 0..=chars.len() - seq_len * 6 {
            let seq = &chars[start..start + seq_len];
            let mut occurrences = 1usize;
            let mut pos = start + seq_len;
            while pos + seq_len <= chars.len() && &chars[pos..pos + seq_len] == seq {
                occurrences += 1;
                pos += seq_len;
            }
            if occurrences >= 6 {
                return true;
            }
        }
    }
    false
}

/// True for two adjacent groups of 4+ digits separated by optional
/// whitespace (card-number shape). A single run of 8+ digits counts, since
/// it splits into two such groups.
fn has_adjacent_digit_groups(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let run_len = i - run_start;
        if run_len >= 8 {
            return true;
        }
        if run_len >= 4 {
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let second_start = j;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            if j > second_start && j - second_start >= 4 {
                return true;
            }
        }
    }
    false
}

fn count_urls(text: &str) -> usize {
    text.matches("http://").count() + text.matches("https://").count()
}

/// Percentage of ASCII letters that are uppercase; 0 for letterless text.
fn capital_percentage(text: &str) -> f64 {
    let total = text.chars().filter(|ch| ch.is_ascii_alphabetic()).count();
    if total == 0 {
        return 0.0;
    }
    let capitals = text.chars().filter(|ch| ch.is_ascii_uppercase()).count();
    capitals as f64 / total as f64 * 100.0
}

/// Disposable-mail providers, all-digit domains, and placeholder domains.
fn is_disposable_email(email: &str) -> bool {
    let lowered = email.to_lowercase();
    let Some(domain) = lowered.rsplit_once('@').map(|(_, domain)| domain) else {
        return false;
    };

    const PROVIDERS: [&str; 5] = [
        "10minutemail",
        "guerrillamail",
        "mailinator",
        "tempmail",
        "yopmail",
    ];
    if PROVIDERS.iter().any(|provider| domain.contains(provider)) {
        return true;
    }

    if let Some((label, tld)) = domain.split_once('.') {
        if !label.is_empty() && label.chars().all(|ch| ch.is_ascii_digit()) {
            if matches!(tld, "com" | "net" | "org") {
                return true;
            }
        }
        if matches!(label, "test" | "fake" | "spam" | "example") {
            return true;
        }
    }
    false
}

/// Ratio of distinct lower-cased words to total words, plus the word count.
/// An empty text counts as perfectly unique.
fn word_uniqueness(text: &str) -> (f64, usize) {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect();
    if words.is_empty() {
        return (1.0, 0);
    }
    let total = words.len();
    let mut unique = words;
    unique.sort_unstable();
    unique.dedup();
    (unique.len() as f64 / total as f64, total)
}

/// Whole-word containment, so "class" never trips a filter on "ass".
fn contains_word(text: &str, word: &str) -> bool {
    text.split(|ch: char| !ch.is_alphanumeric())
        .any(|token| token == word)
}

fn default_profanity_terms() -> Vec<String> {
    [
        "mierda", "pendejo", "cabron", "puta", "puto", "joder", "idiota", "imbecil", "fuck",
        "shit", "bitch", "asshole", "bastard", "dick",
    ]
    .iter()
    .map(|term| term.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_spam_keywords;

    fn scorer() -> SpamScorer {
        SpamScorer::new(default_spam_keywords(), 50, 0, 30.0)
    }

    #[test]
    fn clean_submission_scores_low() {
        let result = scorer().analyze(
            "Maria Lopez",
            "maria@gmail.com",
            "Mi lavadora hace un ruido extrano cuando centrifuga y no estoy segura de la causa.",
        );
        assert!(!result.is_spam);
        assert_eq!(result.score, 0);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn spanish_spam_sample_is_rejected() {
        // "urgente" and "dinero facil" keywords plus two URLs.
        let result = scorer().analyze(
            "Promo",
            "promo@gmail.com",
            "URGENTE!!! Gana dinero facil http://spam.example http://spam2.example visita ya",
        );
        assert!(result.is_spam);
        assert!(result.score >= 50);
        assert!(result
            .triggered_keywords
            .contains(&"urgente".to_string()));
        assert!(result
            .triggered_keywords
            .contains(&"dinero facil".to_string()));
        assert!(result.url_count >= 2);
    }

    #[test]
    fn each_keyword_scores_once() {
        let result = scorer().analyze(
            "test",
            "a@gmail.com",
            "urgente urgente urgente es un problema con la nevera de la cocina",
        );
        assert_eq!(
            result
                .triggered_keywords
                .iter()
                .filter(|kw| kw.as_str() == "urgente")
                .count(),
            1
        );
    }

    #[test]
    fn capital_ratio_checks_raw_text() {
        let shouty = scorer().analyze(
            "Ana",
            "ana@gmail.com",
            "THE WASHING MACHINE IS BROKEN AND I NEED IT FIXED",
        );
        assert!(shouty.capital_percentage > 30.0);
        assert!(shouty
            .reasons
            .iter()
            .any(|reason| reason.contains("capital letters")));

        let calm = scorer().analyze(
            "Ana",
            "ana@gmail.com",
            "The washing machine is broken and I need it fixed",
        );
        assert!(calm.capital_percentage < 30.0);
    }

    #[test]
    fn pattern_detectors_fire_individually() {
        assert!(has_repeated_char_run("aaaaah", 5));
        assert!(!has_repeated_char_run("aaaa", 5));

        assert!(has_uppercase_run("read THISISSHOUTING now", 10));
        assert!(!has_uppercase_run("Normal Text Here", 10));

        assert!(has_repeated_sequence("abcabcabcabcabcabc"));
        assert!(!has_repeated_sequence("abcabcabc"));

        assert!(has_adjacent_digit_groups("4111 1111 1111 1111"));
        assert!(has_adjacent_digit_groups("41111111"));
        assert!(!has_adjacent_digit_groups("call me at 555 123"));
    }

    #[test]
    fn disposable_and_placeholder_emails_are_penalized() {
        assert!(is_disposable_email("user@mailinator.com"));
        assert!(is_disposable_email("user@sub.yopmail.net"));
        assert!(is_disposable_email("user@12345.com"));
        assert!(is_disposable_email("user@test.io"));
        assert!(!is_disposable_email("user@gmail.com"));
        assert!(!is_disposable_email("not-an-email"));
    }

    #[test]
    fn low_word_uniqueness_needs_more_than_ten_words() {
        let repetitive = "buy buy buy buy buy buy buy buy buy buy buy buy";
        let result = scorer().analyze("Bot", "bot@gmail.com", repetitive);
        assert!(result
            .reasons
            .iter()
            .any(|reason| reason.contains("word repetition")));

        let short = scorer().analyze("Bot", "bot@gmail.com", "buy buy buy");
        assert!(!short
            .reasons
            .iter()
            .any(|reason| reason.contains("word repetition")));
    }

    #[test]
    fn analyze_is_deterministic() {
        let scorer = scorer();
        let first = scorer.analyze("Promo", "promo@gmail.com", "oferta especial gratis total");
        let second = scorer.analyze("Promo", "promo@gmail.com", "oferta especial gratis total");
        assert_eq!(first.score, second.score);
        assert_eq!(first.reasons, second.reasons);
    }
}
