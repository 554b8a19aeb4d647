pub mod effect;
pub mod event;
pub mod report;
pub mod session;
pub mod shuffle;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bank::{self, QuestionBank};
use crate::ledger::ScoreLedger;

pub use effect::{DisplayOption, Effect, NoticeKind, ReportItem};
pub use event::{Callback, CallbackParseError, Event};
pub use session::{AnswerRecord, FlowState, Session};
pub use shuffle::{RngShuffle, Shuffle};

const MAX_NAME_CHARS: usize = 100;

type SessionCell = Arc<tokio::sync::Mutex<Session>>;

/// The quiz state machine. One call per inbound event; the returned effects
/// are descriptions for the presentation layer, not rendering calls.
///
/// Events for one user are serialized on a per-user mutex held across the
/// whole validate -> mutate -> ledger-append span; different users never
/// contend on it.
pub struct Engine {
    bank: Arc<QuestionBank>,
    ledger: Arc<ScoreLedger>,
    shuffle: Box<dyn Shuffle>,
    sessions: Mutex<HashMap<u64, SessionCell>>,
}

impl Engine {
    pub fn new(bank: Arc<QuestionBank>, ledger: Arc<ScoreLedger>) -> Self {
        Self::with_shuffle(bank, ledger, Box::new(RngShuffle))
    }

    pub fn with_shuffle(
        bank: Arc<QuestionBank>,
        ledger: Arc<ScoreLedger>,
        shuffle: Box<dyn Shuffle>,
    ) -> Self {
        Self {
            bank,
            ledger,
            shuffle,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle(&self, event: Event) -> Vec<Effect> {
        let user_id = event.user_id();
        let cell = self.session_cell(user_id);
        let mut session = cell.lock().await;
        match event {
            Event::Start {
                display_name_hint, ..
            } => self.on_start(&mut session, user_id, display_name_hint.as_deref()),
            Event::Text { text, .. } => self.on_text(&mut session, user_id, &text),
            Event::Button { token, .. } => self.on_button(&mut session, user_id, &token),
        }
    }

    /// Sessions start at `EnteringName` for unknown users and at
    /// `SelectingLevel` (with the stored level) for users the ledger knows.
    fn session_cell(&self, user_id: u64) -> SessionCell {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions
            .entry(user_id)
            .or_insert_with(|| {
                let mut session = Session::default();
                if let Some(record) = self.ledger.get(user_id) {
                    session.state = FlowState::SelectingLevel;
                    session.level = record.selected_level;
                }
                Arc::new(tokio::sync::Mutex::new(session))
            })
            .clone()
    }

    fn on_start(&self, session: &mut Session, user_id: u64, hint: Option<&str>) -> Vec<Effect> {
        *session = Session::default();
        match self.ledger.get(user_id) {
            Some(record) => {
                session.state = FlowState::SelectingLevel;
                session.level = record.selected_level;
                vec![Effect::ShowLevelMenu]
            }
            None => {
                log::debug!("first contact from user {user_id} ({hint:?})");
                session.state = FlowState::EnteringName;
                vec![Effect::AskName]
            }
        }
    }

    fn on_text(&self, session: &mut Session, user_id: u64, text: &str) -> Vec<Effect> {
        match session.state {
            FlowState::EnteringName => {
                let name = text.trim();
                if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
                    return vec![notice(
                        NoticeKind::InvalidInput,
                        "Please send a name between 1 and 100 characters.",
                    )];
                }
                self.ledger.get_or_create(user_id, name);
                session.state = FlowState::SelectingLevel;
                vec![Effect::ShowLevelMenu]
            }
            FlowState::AwaitingFeedback => {
                let feedback = text.trim();
                if feedback.is_empty() {
                    return vec![notice(
                        NoticeKind::InvalidInput,
                        "Feedback cannot be empty, try again.",
                    )];
                }
                let mut effects = vec![
                    Effect::ForwardFeedback {
                        user_id,
                        text: feedback.to_string(),
                    },
                    Effect::AckFeedback,
                ];
                match session.level.clone() {
                    Some(level) => {
                        session.state = FlowState::SelectingTopic;
                        effects.push(Effect::ShowTopicMenu { level });
                    }
                    None => {
                        session.state = FlowState::SelectingLevel;
                        effects.push(Effect::ShowLevelMenu);
                    }
                }
                effects
            }
            _ => vec![notice(
                NoticeKind::InvalidInput,
                "Please use the buttons, or send /start to begin again.",
            )],
        }
    }

    fn on_button(&self, session: &mut Session, user_id: u64, token: &str) -> Vec<Effect> {
        let callback = match token.parse::<Callback>() {
            Ok(callback) => callback,
            Err(err @ CallbackParseError::Malformed(_)) => {
                log::warn!("rejected callback from user {user_id}: {err}");
                return vec![notice(
                    NoticeKind::InvalidInput,
                    "Could not understand that action.",
                )];
            }
            Err(err @ CallbackParseError::Unrecognized(_)) => {
                log::debug!("unrecognized callback from user {user_id}: {err}");
                return vec![stale()];
            }
        };

        match callback {
            Callback::Feedback => {
                session.state = FlowState::AwaitingFeedback;
                vec![Effect::AskFeedback]
            }
            Callback::SelectLevel => {
                session.state = FlowState::SelectingLevel;
                vec![Effect::ShowLevelMenu]
            }
            Callback::SelectTopic => match session.level.clone() {
                Some(level) => {
                    session.state = FlowState::SelectingTopic;
                    vec![Effect::ShowTopicMenu { level }]
                }
                None => {
                    session.state = FlowState::SelectingLevel;
                    vec![Effect::ShowLevelMenu]
                }
            },
            Callback::Level(level) => self.on_level(session, user_id, level),
            Callback::Topic(topic) => self.on_topic(session, user_id, topic),
            Callback::Answer {
                question_index,
                option_index,
            } => self.on_answer(session, user_id, question_index, option_index),
        }
    }

    fn on_level(&self, session: &mut Session, user_id: u64, level: String) -> Vec<Effect> {
        if session.state != FlowState::SelectingLevel {
            return vec![stale()];
        }
        if !bank::is_known_level(&level) {
            return vec![notice(
                NoticeKind::InvalidInput,
                "Pick one of the offered levels.",
            )];
        }

        // Changing level always abandons any quiz in flight.
        session.level = Some(level.clone());
        session.reset_quiz();
        session.state = FlowState::SelectingTopic;

        let mut effects = Vec::new();
        match self.ledger.set_level(user_id, &level) {
            Some(record) => effects.push(Effect::UpdateSummarySurface {
                user_id,
                text: report::render_summary(&record),
            }),
            None => log::warn!("level chosen by user {user_id} with no ledger record"),
        }
        effects.push(Effect::ShowTopicMenu { level });
        effects
    }

    fn on_topic(&self, session: &mut Session, user_id: u64, topic: String) -> Vec<Effect> {
        if session.state != FlowState::SelectingTopic {
            return vec![stale()];
        }
        let Some(level) = session.level.clone() else {
            session.state = FlowState::SelectingLevel;
            return vec![Effect::ShowLevelMenu];
        };

        let total = self.bank.question_count(&topic, &level);
        if total == 0 {
            return vec![notice(
                NoticeKind::NoQuestions,
                &format!(
                    "No {} questions in this topic yet. Pick another one.",
                    bank::level_name(&level)
                ),
            )];
        }

        session.reset_quiz();
        session.topic = Some(topic.clone());
        session.state = FlowState::Answering;
        log::info!("user {user_id} started {topic}/{level} ({total} questions)");
        vec![self.show_question(&topic, &level, 0, total)]
    }

    fn on_answer(
        &self,
        session: &mut Session,
        user_id: u64,
        question_index: usize,
        option_index: usize,
    ) -> Vec<Effect> {
        if session.state != FlowState::Answering {
            return vec![stale()];
        }
        let (Some(topic), Some(level)) = (session.topic.clone(), session.level.clone()) else {
            return self.abort_broken_session(session, user_id);
        };
        let total = self.bank.question_count(&topic, &level);
        if !session.invariants_hold() || session.question_index >= total {
            return self.abort_broken_session(session, user_id);
        }

        // A resubmission for any other index is a duplicate or delayed
        // button press; reject it without touching the session.
        if question_index != session.question_index {
            return vec![notice(
                NoticeKind::Stale,
                "This question has already been answered.",
            )];
        }
        let Some(question) = self.bank.question(&topic, &level, question_index) else {
            return self.abort_broken_session(session, user_id);
        };
        if option_index >= question.options.len() {
            return vec![notice(
                NoticeKind::InvalidInput,
                "Could not understand that action.",
            )];
        }

        let correct = option_index == question.correct_index;
        session.record_answer(correct);
        let mut effects = vec![Effect::ShowAnswerFeedback { correct }];

        if session.question_index >= total {
            if !session.ledger_appended {
                session.ledger_appended = true;
                let record = self.ledger.append_score(
                    user_id,
                    &level,
                    session.running_score as u32,
                    session.results.len() as u32,
                );
                effects.push(Effect::UpdateSummarySurface {
                    user_id,
                    text: report::render_summary(&record),
                });
            }
            effects.push(report::build_report(
                &self.bank,
                &topic,
                &level,
                &session.results,
            ));
            session.reset_quiz();
            session.state = FlowState::SelectingTopic;
        } else {
            effects.push(self.show_question(&topic, &level, session.question_index, total));
        }
        effects
    }

    fn show_question(&self, topic: &str, level: &str, index: usize, total: usize) -> Effect {
        let Some(question) = self.bank.question(topic, level, index) else {
            return notice(
                NoticeKind::Error,
                "Question missing, send /start to begin again.",
            );
        };
        let order = self.shuffle.permutation(question.options.len());
        let options = order
            .into_iter()
            .map(|original_index| DisplayOption {
                original_index,
                text: question.options[original_index].clone(),
            })
            .collect();
        Effect::ShowQuestion {
            text: question.text.clone(),
            options,
            index,
            total,
            media: question.media.clone(),
        }
    }

    /// An inconsistent session is a programming error: fail loudly, reset
    /// to a safe state, never guess at a score.
    fn abort_broken_session(&self, session: &mut Session, user_id: u64) -> Vec<Effect> {
        log::error!("session for user {user_id} violated an engine invariant: {session:?}");
        session.reset_quiz();
        session.state = if session.level.is_some() {
            FlowState::SelectingTopic
        } else {
            FlowState::SelectingLevel
        };
        vec![notice(
            NoticeKind::Error,
            "Something went wrong on our side, the quiz was reset. Pick a topic to try again.",
        )]
    }

    #[cfg(test)]
    pub(crate) async fn put_session(&self, user_id: u64, session: Session) {
        *self.session_cell(user_id).lock().await = session;
    }

    #[cfg(test)]
    pub(crate) async fn session_snapshot(&self, user_id: u64) -> Session {
        self.session_cell(user_id).lock().await.clone()
    }
}

fn notice(kind: NoticeKind, text: &str) -> Effect {
    Effect::ShowNotice {
        kind,
        text: text.to_string(),
    }
}

fn stale() -> Effect {
    notice(
        NoticeKind::Stale,
        "That button has expired. Send /start to begin again.",
    )
}
