use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Known difficulty levels with their display labels, in menu order.
pub const LEVELS: &[(&str, &str)] = &[
    ("junior", "Junior"),
    ("middle", "Middle"),
    ("senior", "Senior"),
];

pub fn is_known_level(key: &str) -> bool {
    LEVELS.iter().any(|(k, _)| *k == key)
}

pub fn level_name(key: &str) -> &str {
    LEVELS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, label)| *label)
        .unwrap_or(key)
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read question file: {0}")]
    Io(#[from] std::io::Error),
    #[error("question file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{topic}/{level}, question {index}: {problem}")]
    BadQuestion {
        topic: String,
        level: String,
        index: usize,
        problem: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Question {
    #[serde(rename = "question")]
    pub text: String,
    pub options: Vec<String>,
    #[serde(rename = "correct")]
    pub correct_index: usize,
    /// Opaque reference to an attached image (a Telegram file id for us).
    #[serde(rename = "file_id", default)]
    pub media: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    #[serde(default)]
    title: Option<String>,
    #[serde(flatten)]
    levels: BTreeMap<String, Vec<Question>>,
}

#[derive(Debug)]
pub struct Topic {
    pub title: String,
    levels: BTreeMap<String, Vec<Question>>,
}

/// Read-only catalog of topics -> levels -> ordered question lists.
/// Loaded once at startup; any malformed entry is a fatal load error.
#[derive(Debug)]
pub struct QuestionBank {
    topics: BTreeMap<String, Topic>,
}

impl QuestionBank {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        let raw: BTreeMap<String, RawTopic> = serde_json::from_str(json)?;

        let mut topics = BTreeMap::new();
        for (key, topic) in raw {
            for (level, questions) in &topic.levels {
                for (index, question) in questions.iter().enumerate() {
                    if question.options.len() < 2 {
                        return Err(LoadError::BadQuestion {
                            topic: key.clone(),
                            level: level.clone(),
                            index,
                            problem: format!(
                                "needs at least 2 options, has {}",
                                question.options.len()
                            ),
                        });
                    }
                    if question.correct_index >= question.options.len() {
                        return Err(LoadError::BadQuestion {
                            topic: key.clone(),
                            level: level.clone(),
                            index,
                            problem: format!(
                                "correct index {} is out of range for {} options",
                                question.correct_index,
                                question.options.len()
                            ),
                        });
                    }
                }
            }
            let title = topic.title.unwrap_or_else(|| key.clone());
            topics.insert(
                key,
                Topic {
                    title,
                    levels: topic.levels,
                },
            );
        }

        Ok(Self { topics })
    }

    pub fn topics(&self) -> impl Iterator<Item = (&str, &Topic)> {
        self.topics.iter().map(|(key, topic)| (key.as_str(), topic))
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn topic_title<'a>(&'a self, key: &'a str) -> &'a str {
        self.topics.get(key).map(|t| t.title.as_str()).unwrap_or(key)
    }

    /// Questions for a topic/level pair, empty when either is unknown.
    /// An empty list is valid data: the pair exists but has nothing to ask.
    pub fn questions(&self, topic: &str, level: &str) -> &[Question] {
        self.topics
            .get(topic)
            .and_then(|t| t.levels.get(level))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn question(&self, topic: &str, level: &str, index: usize) -> Option<&Question> {
        self.questions(topic, level).get(index)
    }

    pub fn question_count(&self, topic: &str, level: &str) -> usize {
        self.questions(topic, level).len()
    }
}
