//! Spam scoring and duplicate fingerprints for public submissions.
//!
//! Everything here is pure: the intake service gathers the signals (including the per-IP
//! submission counts it reads from the database) and persists the outcome.

use crate::config::IntakeConfig;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const SUSPICIOUS_DOMAIN_POINTS: u32 = 30;
pub const LINK_POINTS: u32 = 40;
pub const KEYWORD_POINTS: u32 = 20;
pub const KEYWORD_CAP: u32 = 40;
pub const HOURLY_RATE_POINTS: u32 = 25;
pub const DAILY_RATE_POINTS: u32 = 15;

lazy_static! {
    static ref LINK_RE: Regex =
        Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"']+"#).expect("link regex is valid");
}

/// What a submission looks like to the scorer.
#[derive(Debug, Clone, Default)]
pub struct SpamSignals<'a> {
    pub email: &'a str,
    pub body: &'a str,
    /// Submissions from the same IP during the trailing hour, this one excluded
    pub hourly_submissions: u64,
    /// Submissions from the same IP during the trailing day, this one excluded
    pub daily_submissions: u64,
}

#[derive(Debug, Clone)]
pub struct SpamRules {
    pub suspicious_domains: Vec<String>,
    pub keywords: Vec<String>,
    pub link_threshold: usize,
    pub hourly_limit: u64,
    pub daily_limit: u64,
    pub threshold: u32,
}

impl From<&IntakeConfig> for SpamRules {
    fn from(config: &IntakeConfig) -> Self {
        Self {
            suspicious_domains: config
                .suspicious_domains
                .iter()
                .map(|d| d.trim().to_lowercase())
                .collect(),
            keywords: config
                .spam_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            link_threshold: config.link_threshold,
            hourly_limit: config.hourly_limit,
            daily_limit: config.daily_limit,
            threshold: config.spam_threshold,
        }
    }
}

impl Default for SpamRules {
    fn default() -> Self {
        Self::from(&IntakeConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamAssessment {
    pub score: u32,
    pub reasons: Vec<String>,
    pub rejected: bool,
}

pub fn score(signals: &SpamSignals<'_>, rules: &SpamRules) -> SpamAssessment {
    let mut score = 0;
    let mut reasons = Vec::new();

    if let Some(domain) = email_domain(signals.email) {
        let suspicious = rules
            .suspicious_domains
            .iter()
            .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)));
        if suspicious {
            score += SUSPICIOUS_DOMAIN_POINTS;
            reasons.push(format!("suspicious email domain: {}", domain));
        }
    }

    let links = distinct_links(signals.body);
    if links > rules.link_threshold {
        score += LINK_POINTS;
        reasons.push(format!("{} links in message", links));
    }

    let body = signals.body.to_lowercase();
    let mut keyword_points = 0;
    for keyword in &rules.keywords {
        if contains_word(&body, keyword) {
            reasons.push(format!("denylisted keyword: {}", keyword));
            keyword_points += KEYWORD_POINTS;
        }
    }
    score += keyword_points.min(KEYWORD_CAP);

    if signals.hourly_submissions > rules.hourly_limit {
        score += HOURLY_RATE_POINTS;
        reasons.push(format!(
            "{} submissions from this IP in the last hour",
            signals.hourly_submissions
        ));
    }
    if signals.daily_submissions > rules.daily_limit {
        score += DAILY_RATE_POINTS;
        reasons.push(format!(
            "{} submissions from this IP in the last day",
            signals.daily_submissions
        ));
    }

    SpamAssessment {
        score,
        rejected: score >= rules.threshold,
        reasons,
    }
}

fn email_domain(email: &str) -> Option<String> {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().trim_end_matches('.').to_lowercase())
        .filter(|d| !d.is_empty())
}

/// Number of distinct links, compared case-insensitively and without trailing punctuation.
pub fn distinct_links(body: &str) -> usize {
    LINK_RE
        .find_iter(body)
        .map(|m| {
            m.as_str()
                .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')'))
                .to_lowercase()
        })
        .collect::<BTreeSet<_>>()
        .len()
}

/// `needle` occurs in `haystack` with no alphanumeric character on either side.
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
    })
}

/// Lowercases and collapses runs of whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn contact_hash(email: &str, message: &str) -> String {
    sha256_hex(&[&normalize(email), &normalize(message)])
}

/// Hash of the email and the requested product set; order and repeats don't matter.
pub fn sample_hash(email: &str, products: &[Uuid]) -> String {
    let ids = products
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",");
    sha256_hex(&[&normalize(email), &ids])
}
