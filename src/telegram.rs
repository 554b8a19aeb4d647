use std::sync::Arc;

use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    types::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId},
    utils::command::BotCommands,
};

use crate::bank::{self, QuestionBank};
use crate::engine::{Callback, DisplayOption, Effect, Engine, Event, NoticeKind, ReportItem};
use crate::ledger::ScoreLedger;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const GREETING_TEXT: &str = "🤓 Hi! I'm a quiz bot for testing your Linux knowledge.\n\
     I'll help you prepare for a DevOps interview.\n\n\
     Let's get acquainted — what's your name?";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "restart the bot")]
    Start,
    #[command(description = "leave feedback")]
    Feedback,
}

/// Everything the rendering side needs besides the bot itself.
pub struct Presenter {
    pub bank: Arc<QuestionBank>,
    pub ledger: Arc<ScoreLedger>,
    pub feedback_chat: Option<ChatId>,
}

pub fn handler_tree() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

async fn handle_command(
    bot: Bot,
    engine: Arc<Engine>,
    presenter: Arc<Presenter>,
    msg: Message,
    cmd: Command,
) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let event = match cmd {
        Command::Start => Event::Start {
            user_id: user.id.0,
            display_name_hint: Some(user.first_name.clone()),
        },
        Command::Feedback => Event::Button {
            user_id: user.id.0,
            token: Callback::Feedback.encode(),
        },
    };
    let effects = engine.handle(event).await;
    render_effects(&bot, &presenter, msg.chat.id, user.id.0, None, effects).await
}

async fn handle_message(
    bot: Bot,
    engine: Arc<Engine>,
    presenter: Arc<Presenter>,
    msg: Message,
) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, "Please answer with text, or use the buttons.")
            .await?;
        return Ok(());
    };
    let event = Event::Text {
        user_id: user.id.0,
        text: text.to_string(),
    };
    let effects = engine.handle(event).await;
    render_effects(&bot, &presenter, msg.chat.id, user.id.0, None, effects).await
}

async fn handle_callback(
    bot: Bot,
    engine: Arc<Engine>,
    presenter: Arc<Presenter>,
    cb: CallbackQuery,
) -> HandlerResult {
    let user_id = cb.from.id.0;
    let chat_id = cb
        .message
        .as_ref()
        .map(|m| m.chat.id)
        .unwrap_or(ChatId(user_id as i64));
    let Some(token) = cb.data.clone() else {
        bot.answer_callback_query(cb.id.clone()).await?;
        return Ok(());
    };
    let effects = engine.handle(Event::Button { user_id, token }).await;
    render_effects(&bot, &presenter, chat_id, user_id, Some(&cb), effects).await
}

/// Turn engine effects into Telegram calls, in order. Rendering comes after
/// the state mutation by construction, so the user never sees a question
/// that disagrees with the engine's current index.
async fn render_effects(
    bot: &Bot,
    presenter: &Presenter,
    chat_id: ChatId,
    user_id: u64,
    cb: Option<&CallbackQuery>,
    effects: Vec<Effect>,
) -> HandlerResult {
    let mut cb_answered = cb.is_none();
    for effect in effects {
        match effect {
            Effect::AskName => {
                bot.send_message(chat_id, GREETING_TEXT).await?;
            }
            Effect::ShowLevelMenu => {
                let text = match presenter.ledger.get(user_id) {
                    Some(record) if !record.display_name.is_empty() => {
                        format!("{}, choose your difficulty level:", record.display_name)
                    }
                    _ => "Choose your difficulty level:".to_string(),
                };
                bot.send_message(chat_id, text)
                    .reply_markup(level_keyboard())
                    .await?;
            }
            Effect::ShowTopicMenu { level } => {
                let text = format!("Level: {} ✅\nNow pick a topic:", bank::level_name(&level));
                bot.send_message(chat_id, text)
                    .reply_markup(topic_keyboard(&presenter.bank))
                    .await?;
            }
            Effect::ShowQuestion {
                text,
                options,
                index,
                total,
                media,
            } => {
                let caption = format!("❓ Question {} of {}\n\n{}", index + 1, total, text);
                let keyboard = answers_keyboard(index, &options);
                send_question(bot, chat_id, caption, keyboard, media).await?;
            }
            Effect::ShowAnswerFeedback { correct } => {
                let text = if correct { "✅ Correct!" } else { "❌ Wrong" };
                match cb {
                    Some(cb) => {
                        bot.answer_callback_query(cb.id.clone()).text(text).await?;
                        cb_answered = true;
                    }
                    None => {
                        bot.send_message(chat_id, text).await?;
                    }
                }
            }
            Effect::ShowReport {
                score,
                total,
                items,
            } => {
                bot.send_message(chat_id, report_text(score, total, &items))
                    .reply_markup(restart_keyboard())
                    .await?;
            }
            Effect::ShowNotice { kind, text } => match cb {
                Some(cb) => {
                    let alert = matches!(
                        kind,
                        NoticeKind::Stale | NoticeKind::NoQuestions | NoticeKind::Error
                    );
                    bot.answer_callback_query(cb.id.clone())
                        .text(text)
                        .show_alert(alert)
                        .await?;
                    cb_answered = true;
                }
                None => {
                    bot.send_message(chat_id, text).await?;
                }
            },
            Effect::UpdateSummarySurface { user_id, text } => {
                update_summary_surface(bot, presenter, chat_id, user_id, text).await;
            }
            Effect::AskFeedback => {
                bot.send_message(chat_id, "📝 Write your feedback in one message:")
                    .await?;
            }
            Effect::AckFeedback => {
                bot.send_message(chat_id, "Thanks for the feedback! 💌").await?;
            }
            Effect::ForwardFeedback { user_id, text } => {
                forward_feedback(bot, presenter, user_id, &text).await;
            }
        }
    }
    // every callback query gets answered, or Telegram keeps the button spinner
    if let Some(cb) = cb {
        if !cb_answered {
            bot.answer_callback_query(cb.id.clone()).await?;
        }
    }
    Ok(())
}

/// Edit the pinned summary in place; if that fails (deleted, never pinned,
/// unchanged text) post and pin a fresh one and remember its id.
async fn update_summary_surface(
    bot: &Bot,
    presenter: &Presenter,
    chat_id: ChatId,
    user_id: u64,
    text: String,
) {
    if let Some(summary_ref) = presenter.ledger.get_summary_ref(user_id) {
        if bot
            .edit_message_text(chat_id, MessageId(summary_ref as i32), text.clone())
            .await
            .is_ok()
        {
            return;
        }
    }
    match bot.send_message(chat_id, text).await {
        Ok(message) => {
            if let Err(err) = bot
                .pin_chat_message(chat_id, message.id)
                .disable_notification(true)
                .await
            {
                log::warn!("could not pin the summary message for user {user_id}: {err}");
            }
            presenter.ledger.set_summary_ref(user_id, message.id.0 as i64);
        }
        Err(err) => log::warn!("could not post the summary message for user {user_id}: {err}"),
    }
}

async fn send_question(
    bot: &Bot,
    chat_id: ChatId,
    caption: String,
    keyboard: InlineKeyboardMarkup,
    media: Option<String>,
) -> HandlerResult {
    if let Some(file_id) = media {
        match bot
            .send_photo(chat_id, InputFile::file_id(file_id))
            .caption(caption.clone())
            .reply_markup(keyboard.clone())
            .await
        {
            Ok(_) => return Ok(()),
            Err(err) => log::warn!("photo send failed, falling back to text: {err}"),
        }
    }
    bot.send_message(chat_id, caption).reply_markup(keyboard).await?;
    Ok(())
}

async fn forward_feedback(bot: &Bot, presenter: &Presenter, user_id: u64, text: &str) {
    let Some(chat) = presenter.feedback_chat else {
        log::info!("feedback from user {user_id}: {text}");
        return;
    };
    let message = format!("✉️ Feedback from user {user_id}:\n\n{text}");
    if let Err(err) = bot.send_message(chat, message).await {
        log::warn!("could not forward feedback from user {user_id}: {err}");
    }
}

fn level_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(bank::LEVELS.iter().map(|(key, label)| {
        vec![InlineKeyboardButton::callback(
            label.to_string(),
            Callback::Level(key.to_string()).encode(),
        )]
    }))
}

fn topic_keyboard(bank: &QuestionBank) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(bank.topics().map(|(key, topic)| {
        vec![InlineKeyboardButton::callback(
            topic.title.clone(),
            Callback::Topic(key.to_string()).encode(),
        )]
    }))
}

fn answers_keyboard(question_index: usize, options: &[DisplayOption]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(options.iter().map(|option| {
        vec![InlineKeyboardButton::callback(
            option.text.clone(),
            Callback::Answer {
                question_index,
                option_index: option.original_index,
            }
            .encode(),
        )]
    }))
}

fn restart_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([
        vec![InlineKeyboardButton::callback(
            "Pick a topic",
            Callback::SelectTopic.encode(),
        )],
        vec![InlineKeyboardButton::callback(
            "Change level",
            Callback::SelectLevel.encode(),
        )],
        vec![InlineKeyboardButton::callback(
            "Leave feedback",
            Callback::Feedback.encode(),
        )],
    ])
}

fn report_text(score: usize, total: usize, items: &[ReportItem]) -> String {
    let mut text = format!("🏁 Quiz finished!\nCorrect answers: {score} of {total}");
    for item in items {
        let mark = if item.was_correct { "✅" } else { "❌" };
        text.push_str(&format!(
            "\n\n{mark} Question {}: {}\n    Answer: {}",
            item.number, item.question, item.correct_option
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_text_lists_items_after_the_aggregate() {
        let items = vec![
            ReportItem {
                number: 1,
                was_correct: true,
                question: "Default SSH port?".to_string(),
                correct_option: "22".to_string(),
            },
            ReportItem {
                number: 2,
                was_correct: false,
                question: "Who owns /etc?".to_string(),
                correct_option: "root".to_string(),
            },
        ];
        let text = report_text(1, 2, &items);
        assert!(text.starts_with("🏁 Quiz finished!\nCorrect answers: 1 of 2"));
        assert!(text.contains("✅ Question 1: Default SSH port?"));
        assert!(text.contains("❌ Question 2: Who owns /etc?"));
        assert!(text.contains("Answer: root"));
    }

    #[test]
    fn report_text_without_items_is_just_the_aggregate() {
        let text = report_text(21, 21, &[]);
        assert_eq!(text, "🏁 Quiz finished!\nCorrect answers: 21 of 21");
    }
}
