use std::env;

/// Runtime settings taken from the environment (`.env` is loaded first).
/// The bot token itself stays with teloxide's `Bot::from_env`.
#[derive(Debug, Clone)]
pub struct Config {
    pub questions_file: String,
    pub database_file: String,
    /// Chat that receives forwarded feedback; unset disables forwarding.
    pub feedback_chat: Option<i64>,
}

impl Config {
    pub fn from_env() -> Self {
        let questions_file =
            env::var("QUESTIONS_FILE").unwrap_or_else(|_| "data/quizzes.json".to_string());
        let database_file =
            env::var("DATABASE_FILE").unwrap_or_else(|_| "quiz-bot.db".to_string());
        let feedback_chat = match env::var("FEEDBACK_CHAT_ID") {
            Ok(raw) => match raw.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    log::warn!("FEEDBACK_CHAT_ID is not a number, feedback forwarding disabled");
                    None
                }
            },
            Err(_) => None,
        };
        Self {
            questions_file,
            database_file,
            feedback_chat,
        }
    }
}
