use std::sync::Arc;

use dotenv::dotenv;
use rekishi_quiz::catalog::KeywordCatalog;
use rekishi_quiz::config::{BotConfig, QuizBackend};
use rekishi_quiz::quiz::ai_helper::QuizHelper;
use rekishi_quiz::quiz::client::HttpQuizSource;
use rekishi_quiz::quiz::controller::{QuizController, QuizSource, Resolution, SessionTasks};
use rekishi_quiz::quiz::display::{
    completion_message, option_labels, outcome_message, parse_choice, question_message,
    FALLBACK_NOTICE, GENERATING_NOTICE, NEXT_QUESTION,
};
use rekishi_quiz::quiz::session::{Phase, QuizSession, Step};
use rekishi_quiz::QuizItem;
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatAction, KeyboardButton, KeyboardMarkup, KeyboardRemove},
};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type QuizStorage = Arc<ErasedStorage<State>>;
type PendingRequests = Arc<SessionTasks<ChatId>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveEra,
    Quiz {
        session: QuizSession,
    },
}

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting history quiz bot...");

    let config = BotConfig::from_env()?;

    let catalog = Arc::new(KeywordCatalog::load(&config.catalog_path)?);

    let source: Arc<dyn QuizSource> = match &config.backend {
        QuizBackend::Remote { url } => {
            log::info!("Quizzes come from {}", url);
            Arc::new(HttpQuizSource::new(url.clone(), config.request_timeout)?)
        }
        QuizBackend::InProcess(generation) => {
            log::info!("Quizzes are generated in-process via {}", generation.endpoint);
            Arc::new(QuizHelper::new(generation.clone())?)
        }
    };
    let controller = Arc::new(QuizController::new(source, config.request_timeout));
    let pending: PendingRequests = Arc::new(SessionTasks::new());

    log::info!("Opening dialogue storage at {}", config.storage_path);
    let storage: QuizStorage = SqliteStorage::open(&config.storage_path, Json)
        .await?
        .erase();

    let bot = Bot::from_env();

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(
                dptree::filter(|msg: Message| {
                    msg.text().map_or(false, |text| text.starts_with("/start"))
                })
                .endpoint(start),
            )
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveEra].endpoint(receive_era))
            .branch(dptree::case![State::Quiz { session }].endpoint(quiz_reply)),
    )
    .dependencies(dptree::deps![storage, catalog, controller, pending])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

    Ok(())
}

const GREETING_TEXT: &str = "こんにちは！歴史クイズボットです。時代を選ぶとクイズが始まります。";
const CHOOSE_ERA_TEXT: &str = "時代を選択してください。";
const CHOOSE_OPTION_TEXT: &str = "選択肢のボタンから答えを選んでください。";
const PRESS_NEXT_TEXT: &str = "「次の問題」を押してください。";

fn era_keyboard(catalog: &KeywordCatalog) -> KeyboardMarkup {
    let eras: Vec<&str> = catalog.eras().collect();
    KeyboardMarkup::new(
        eras.chunks(2)
            .map(|row| row.iter().map(|era| KeyboardButton::new(*era)).collect())
            .collect::<Vec<Vec<_>>>(),
    )
}

fn answer_keyboard(quiz: &QuizItem) -> KeyboardMarkup {
    KeyboardMarkup::new(
        option_labels(quiz)
            .into_iter()
            .map(|label| vec![KeyboardButton::new(label)])
            .collect::<Vec<_>>(),
    )
}

fn next_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(NEXT_QUESTION)]])
}

async fn start(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    catalog: Arc<KeywordCatalog>,
    pending: PendingRequests,
) -> HandlerResult {
    pending.cancel(&msg.chat.id);

    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(era_keyboard(&catalog))
        .await?;

    dialogue.update(State::ReceiveEra).await?;
    Ok(())
}

async fn receive_era(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    catalog: Arc<KeywordCatalog>,
    controller: Arc<QuizController>,
    pending: PendingRequests,
) -> HandlerResult {
    match msg.text() {
        Some(era) => begin_session(bot, dialogue, era, catalog, controller, pending).await,
        None => {
            bot.send_message(msg.chat.id, CHOOSE_ERA_TEXT)
                .reply_markup(era_keyboard(&catalog))
                .await?;
            Ok(())
        }
    }
}

async fn begin_session(
    bot: Bot,
    dialogue: QuizDialogue,
    era: &str,
    catalog: Arc<KeywordCatalog>,
    controller: Arc<QuizController>,
    pending: PendingRequests,
) -> HandlerResult {
    let chat_id = dialogue.chat_id();
    let started = QuizSession::start(&catalog, era, &mut rand::thread_rng());
    let session = match started {
        Ok(session) => session,
        Err(e) => {
            // Nothing was created, the current state stays as it is.
            bot.send_message(chat_id, e.to_string())
                .reply_markup(era_keyboard(&catalog))
                .await?;
            return Ok(());
        }
    };

    log::info!(
        "Chat {} starts session {} for {:?} ({} keywords)",
        chat_id,
        session.id(),
        era,
        session.total()
    );
    bot.send_message(
        chat_id,
        format!("「{}」のクイズを始めます！全{}問です。", era, session.total()),
    )
    .reply_markup(KeyboardRemove::new())
    .await?;

    request_question(bot, dialogue, session, controller, pending).await
}

/// Stores the session as requesting and resolves its question in the
/// background; the chat stays responsive meanwhile.
async fn request_question(
    bot: Bot,
    dialogue: QuizDialogue,
    session: QuizSession,
    controller: Arc<QuizController>,
    pending: PendingRequests,
) -> HandlerResult {
    let chat_id = dialogue.chat_id();
    let session_id = session.id();

    dialogue
        .update(State::Quiz {
            session: session.clone(),
        })
        .await?;

    let registry = pending.clone();
    pending.spawn(chat_id, session_id, async move {
        if let Err(e) = deliver_question(bot, dialogue, session, controller).await {
            log::error!("Could not deliver question to chat {}: {}", chat_id, e);
        }
        registry.finish(&chat_id, session_id);
    });
    Ok(())
}

async fn deliver_question(
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: QuizSession,
    controller: Arc<QuizController>,
) -> HandlerResult {
    let chat_id = dialogue.chat_id();
    // Only cosmetic, a failure here changes nothing.
    let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;

    let resolution = controller.resolve(&mut session).await?;

    match dialogue.get().await? {
        Some(State::Quiz { session: stored })
            if stored.id() == session.id() && stored.is_requesting() => {}
        _ => {
            log::info!("Dropping question of abandoned session {}", session.id());
            return Ok(());
        }
    }

    if resolution == Resolution::FallBack {
        bot.send_message(chat_id, FALLBACK_NOTICE).await?;
    }

    if let Some(quiz) = session.current_quiz() {
        bot.send_message(chat_id, question_message(&session, quiz))
            .reply_markup(answer_keyboard(quiz))
            .await?;
    }

    dialogue.update(State::Quiz { session }).await?;
    Ok(())
}

async fn quiz_reply(
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: QuizSession,
    msg: Message,
    catalog: Arc<KeywordCatalog>,
    controller: Arc<QuizController>,
    pending: PendingRequests,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text() else {
        bot.send_message(chat_id, CHOOSE_OPTION_TEXT).await?;
        return Ok(());
    };

    // Picking an era mid-run abandons the current session.
    let is_answer = session
        .current_quiz()
        .map_or(false, |quiz| parse_choice(text, quiz).is_some());
    if catalog.contains_era(text) && !is_answer {
        pending.cancel(&chat_id);
        log::info!("Chat {} abandons session {}", chat_id, session.id());
        return begin_session(bot, dialogue, text, catalog, controller, pending).await;
    }

    match session.phase().clone() {
        Phase::Requesting | Phase::Retrying { .. } => {
            if pending.is_pending(&chat_id, session.id()) {
                bot.send_message(chat_id, GENERATING_NOTICE).await?;
            } else {
                // Restored from storage without a running request, e.g. after a restart.
                log::info!("Resuming request for session {}", session.id());
                bot.send_message(chat_id, GENERATING_NOTICE).await?;
                request_question(bot, dialogue, session, controller, pending).await?;
            }
        }
        Phase::Displaying { quiz, .. } => {
            let Some(choice) = parse_choice(text, &quiz) else {
                bot.send_message(chat_id, CHOOSE_OPTION_TEXT)
                    .reply_markup(answer_keyboard(&quiz))
                    .await?;
                return Ok(());
            };

            let outcome = session.answer(choice)?;
            bot.send_message(chat_id, outcome_message(&quiz, &outcome))
                .reply_markup(next_keyboard())
                .await?;
            dialogue.update(State::Quiz { session }).await?;
        }
        Phase::Answered { .. } => {
            if text != NEXT_QUESTION {
                bot.send_message(chat_id, PRESS_NEXT_TEXT)
                    .reply_markup(next_keyboard())
                    .await?;
                return Ok(());
            }

            match session.next()? {
                Step::Request { keyword } => {
                    log::debug!("Session {} moves on to {:?}", session.id(), keyword);
                    bot.send_message(chat_id, GENERATING_NOTICE)
                        .reply_markup(KeyboardRemove::new())
                        .await?;
                    request_question(bot, dialogue, session, controller, pending).await?;
                }
                Step::Finished { correct, total } => {
                    bot.send_message(chat_id, completion_message(correct, total))
                        .reply_markup(era_keyboard(&catalog))
                        .await?;
                    dialogue.update(State::ReceiveEra).await?;
                }
            }
        }
        Phase::Finished => {
            bot.send_message(chat_id, CHOOSE_ERA_TEXT)
                .reply_markup(era_keyboard(&catalog))
                .await?;
            dialogue.update(State::ReceiveEra).await?;
        }
    }

    Ok(())
}
