use std::str::FromStr;

use thiserror::Error;

/// Inbound event, already stripped of transport payloads. The adapter maps
/// Telegram updates onto these; the engine never sees a Message or a
/// CallbackQuery.
#[derive(Debug, Clone)]
pub enum Event {
    Start {
        user_id: u64,
        display_name_hint: Option<String>,
    },
    Text {
        user_id: u64,
        text: String,
    },
    Button {
        user_id: u64,
        token: String,
    },
}

impl Event {
    pub fn user_id(&self) -> u64 {
        match self {
            Event::Start { user_id, .. }
            | Event::Text { user_id, .. }
            | Event::Button { user_id, .. } => *user_id,
        }
    }
}

/// A decoded callback token. Answer tokens carry the question index they
/// were rendered for and the option's original index, never its display
/// position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Level(String),
    Topic(String),
    Answer {
        question_index: usize,
        option_index: usize,
    },
    Feedback,
    SelectLevel,
    SelectTopic,
}

impl Callback {
    pub fn encode(&self) -> String {
        match self {
            Callback::Level(id) => format!("level:{id}"),
            Callback::Topic(id) => format!("topic:{id}"),
            Callback::Answer {
                question_index,
                option_index,
            } => format!("ans:{question_index}:{option_index}"),
            Callback::Feedback => "feedback".to_string(),
            Callback::SelectLevel => "select_level".to_string(),
            Callback::SelectTopic => "select_topic".to_string(),
        }
    }
}

/// `Malformed` is a known token shape with broken fields (wrong field count,
/// non-integer index); `Unrecognized` is a token we never produced, which in
/// practice means a button from an expired render.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallbackParseError {
    #[error("malformed callback token `{0}`")]
    Malformed(String),
    #[error("unrecognized callback token `{0}`")]
    Unrecognized(String),
}

impl FromStr for Callback {
    type Err = CallbackParseError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "" => return Err(CallbackParseError::Malformed(String::new())),
            "feedback" => return Ok(Callback::Feedback),
            "select_level" => return Ok(Callback::SelectLevel),
            "select_topic" => return Ok(Callback::SelectTopic),
            _ => {}
        }

        let malformed = || CallbackParseError::Malformed(token.to_string());

        let Some((tag, rest)) = token.split_once(':') else {
            return Err(CallbackParseError::Unrecognized(token.to_string()));
        };
        match tag {
            "level" | "topic" => {
                if rest.is_empty() || rest.contains(':') {
                    return Err(malformed());
                }
                Ok(match tag {
                    "level" => Callback::Level(rest.to_string()),
                    _ => Callback::Topic(rest.to_string()),
                })
            }
            "ans" => {
                let (qidx, opt) = rest.split_once(':').ok_or_else(malformed)?;
                let question_index = qidx.parse().map_err(|_| malformed())?;
                let option_index = opt.parse().map_err(|_| malformed())?;
                Ok(Callback::Answer {
                    question_index,
                    option_index,
                })
            }
            _ => Err(CallbackParseError::Unrecognized(token.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_variant() {
        let tokens = [
            Callback::Level("junior".into()),
            Callback::Topic("permissions".into()),
            Callback::Answer {
                question_index: 4,
                option_index: 2,
            },
            Callback::Feedback,
            Callback::SelectLevel,
            Callback::SelectTopic,
        ];
        for token in tokens {
            assert_eq!(token.encode().parse::<Callback>().unwrap(), token);
        }
    }

    #[test]
    fn rejects_malformed_tokens() {
        for token in ["", "ans:1", "ans:1:2:3", "ans:x:0", "ans:0:y", "level:", "topic:a:b"] {
            assert!(
                matches!(token.parse::<Callback>(), Err(CallbackParseError::Malformed(_))),
                "token {token:?} should be malformed"
            );
        }
    }

    #[test]
    fn rejects_unknown_tokens_as_unrecognized() {
        for token in ["bogus", "lvl:junior", "restart"] {
            assert!(
                matches!(
                    token.parse::<Callback>(),
                    Err(CallbackParseError::Unrecognized(_))
                ),
                "token {token:?} should be unrecognized"
            );
        }
    }
}
