mod bank;
mod config;
mod engine;
mod ledger;
mod telegram;

use std::sync::Arc;

use dotenv::dotenv;
use teloxide::prelude::*;

use bank::QuestionBank;
use config::Config;
use engine::Engine;
use ledger::store::SqliteStore;
use ledger::ScoreLedger;
use telegram::Presenter;

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("starting quiz bot...");

    let config = Config::from_env();

    // Missing or malformed question data is fatal: better to not start than
    // to run a quiz bot with no questions.
    let bank = match QuestionBank::load(&config.questions_file) {
        Ok(bank) => Arc::new(bank),
        Err(err) => {
            log::error!(
                "cannot load question bank from {}: {err}",
                config.questions_file
            );
            std::process::exit(1);
        }
    };
    log::info!("question bank loaded, {} topic(s)", bank.topic_count());

    let store = match SqliteStore::open(&config.database_file) {
        Ok(store) => store,
        Err(err) => {
            log::error!("cannot open score database {}: {err}", config.database_file);
            std::process::exit(1);
        }
    };
    let (ledger, mut write_failures) = match ScoreLedger::start(Box::new(store)) {
        Ok(pair) => pair,
        Err(err) => {
            log::error!("cannot read score database: {err}");
            std::process::exit(1);
        }
    };

    let bot = Bot::from_env();

    // Exhausted score writes surface to the user as a notice; the scores the
    // user already saw stay valid in memory either way.
    {
        let bot = bot.clone();
        tokio::spawn(async move {
            while let Some(failure) = write_failures.recv().await {
                let text = "⚠️ We hit a problem saving your progress. \
                     Your scores here are correct, and the issue has been logged.";
                if let Err(err) = bot.send_message(ChatId(failure.user_id as i64), text).await {
                    log::warn!(
                        "could not notify user {} about a lost score write: {err}",
                        failure.user_id
                    );
                }
            }
        });
    }

    let engine = Arc::new(Engine::new(bank.clone(), ledger.clone()));
    let presenter = Arc::new(Presenter {
        bank,
        ledger,
        feedback_chat: config.feedback_chat.map(ChatId),
    });

    Dispatcher::builder(bot, telegram::handler_tree())
        .dependencies(dptree::deps![engine, presenter])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
