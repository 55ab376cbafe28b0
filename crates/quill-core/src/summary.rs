use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Period a summary covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    Daily,
    Weekly,
}

impl SummaryKind {
    /// Length of the covered period in days.
    pub fn days(self) -> i64 {
        match self {
            SummaryKind::Daily => 1,
            SummaryKind::Weekly => 7,
        }
    }
}

/// Input to a summarizer: decrypted entries for one period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryRequest {
    pub kind: SummaryKind,
    pub period_start: NaiveDate,
    /// Entry texts, oldest first.
    pub entries: Vec<String>,
}

/// Summary payload, stored encrypted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    /// One word or short phrase (e.g. "positive").
    pub mood: String,
    pub themes: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Contract for any summary provider (OpenAI, local, stub).
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    async fn summarize(&self, request: SummaryRequest) -> Result<Summary>;
}

const POSITIVE: &[&str] = &[
    "good", "great", "happy", "calm", "grateful", "love", "excited", "proud", "relaxed", "fun",
];
const NEGATIVE: &[&str] = &[
    "bad", "sad", "tired", "angry", "anxious", "stressed", "lonely", "worried", "awful", "sick",
];
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "because", "before", "being", "could", "really", "should",
    "there", "their", "these", "thing", "things", "today", "tomorrow", "which", "while", "would",
    "yesterday",
];

/// Offline summarizer: lexicon mood and word-frequency themes. Used when no
/// AI provider is configured and in tests.
pub struct KeywordSummarizer;

impl KeywordSummarizer {
    fn mood(words: &[String]) -> &'static str {
        let score: i64 = words
            .iter()
            .map(|w| {
                if POSITIVE.contains(&w.as_str()) {
                    1
                } else if NEGATIVE.contains(&w.as_str()) {
                    -1
                } else {
                    0
                }
            })
            .sum();
        match score {
            s if s > 0 => "positive",
            s if s < 0 => "negative",
            _ => "neutral",
        }
    }

    fn themes(words: &[String]) -> Vec<String> {
        let lexicon: HashSet<&str> = POSITIVE
            .iter()
            .chain(NEGATIVE)
            .chain(STOPWORDS)
            .copied()
            .collect();
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for word in words {
            if word.chars().count() > 4 && !lexicon.contains(word.as_str()) {
                *counts.entry(word.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        // Stable sort keeps alphabetical order among ties.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
            .into_iter()
            .take(3)
            .map(|(w, _)| w.to_string())
            .collect()
    }
}

#[async_trait]
impl Summarizer for KeywordSummarizer {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn summarize(&self, request: SummaryRequest) -> Result<Summary> {
        let words: Vec<String> = request
            .entries
            .iter()
            .flat_map(|e| e.split(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mood = Self::mood(&words).to_string();
        let recommendations = match (request.entries.is_empty(), mood.as_str()) {
            (true, _) => vec!["Write a short entry to get a summary.".to_string()],
            (false, "negative") => vec![
                "Take a short walk or a break away from screens.".to_string(),
                "Note one thing that went well, however small.".to_string(),
            ],
            _ => vec!["Keep the writing habit going.".to_string()],
        };

        Ok(Summary {
            mood,
            themes: Self::themes(&words),
            recommendations,
        })
    }
}
