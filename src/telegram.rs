//! Telegram bindings for the pipeline.
//!
//! Routes: `/start` greets, any other text is taken as a URL, and the format
//! buttons trigger delivery. Every route sits behind the [`AllowList`];
//! updates from anyone else are dropped without a reply.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use teloxide::{
    dispatching::{DefaultKey, UpdateHandler},
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode, User},
    update_listeners::webhooks,
    utils::command::BotCommands,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    auth::AllowList,
    error::Result,
    pipeline::{
        Document, Pipeline, Reply,
        choice::{DeliveryFormat, FormatChoice},
        messages,
    },
    storage::DownloadId,
};

type HandlerError = Box<dyn std::error::Error + Send + Sync>;
type HandlerResult = std::result::Result<(), HandlerError>;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    /// Greets the user.
    Start,
}

/// How updates reach the bot.
#[derive(Debug, Clone)]
pub enum UpdateSource {
    /// Delete any webhook and long-poll.
    Polling,
    /// Serve a webhook on `addr`; Telegram posts to `url`.
    Webhook { addr: SocketAddr, url: Url },
}

/// Replies into one chat, optionally answering the callback query that
/// started the exchange.
struct ChatReply {
    bot: Bot,
    chat_id: ChatId,
    callback: Option<CallbackQuery>,
}

#[async_trait]
impl Reply for ChatReply {
    async fn text(&self, text: &str) -> Result<()> {
        self.bot.send_message(self.chat_id, text).await?;
        Ok(())
    }

    async fn html(&self, html: &str) -> Result<()> {
        self.bot
            .send_message(self.chat_id, html)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn offer_formats(&self, text: &str, id: DownloadId, audio_format: &str) -> Result<()> {
        self.bot
            .send_message(self.chat_id, text)
            .reply_markup(format_keyboard(id, audio_format))
            .await?;
        Ok(())
    }

    async fn acknowledge(&self) -> Result<()> {
        if let Some(query) = &self.callback {
            self.bot.answer_callback_query(query.id.clone()).await?;
        }
        Ok(())
    }

    async fn document(&self, document: Document) -> Result<()> {
        let Document {
            file_name,
            size,
            body,
        } = document;
        debug!(chat = self.chat_id.0, file = %file_name, size, "sending document");
        self.bot
            .send_document(self.chat_id, InputFile::read(body).file_name(file_name))
            .await?;
        Ok(())
    }
}

fn format_keyboard(id: DownloadId, audio_format: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback(
            format!("🎵 {audio_format}"),
            FormatChoice::new(DeliveryFormat::Audio, id).token(),
        ),
        InlineKeyboardButton::callback(
            "📦 zip",
            FormatChoice::new(DeliveryFormat::Zip, id).token(),
        ),
    ]])
}

fn is_allowed(policy: &AllowList, user: Option<&User>) -> bool {
    policy.permits(user.and_then(|user| user.username.as_deref()))
}

/// Chat holding the tapped button, or the user's private chat when Telegram
/// no longer attaches the message.
fn reply_chat(query: &CallbackQuery) -> ChatId {
    query
        .message
        .as_ref()
        .map(|message| message.chat().id)
        .unwrap_or_else(|| ChatId::from(query.from.id))
}

fn schema() -> UpdateHandler<HandlerError> {
    let messages = Update::filter_message()
        .filter(|msg: Message, policy: Arc<AllowList>| is_allowed(&policy, msg.from.as_ref()))
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(on_command),
        )
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(on_text));

    let callbacks = Update::filter_callback_query()
        .filter(|query: CallbackQuery, policy: Arc<AllowList>| {
            is_allowed(&policy, Some(&query.from))
        })
        .endpoint(on_callback);

    dptree::entry().branch(messages).branch(callbacks)
}

async fn on_command(bot: Bot, msg: Message, cmd: Command) -> HandlerResult {
    match cmd {
        Command::Start => {
            bot.send_message(msg.chat.id, messages::GREETING).await?;
        }
    }
    Ok(())
}

async fn on_text(bot: Bot, msg: Message, pipeline: Pipeline) -> HandlerResult {
    let Some(url) = msg.text() else {
        return Ok(());
    };
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    info!(user = user.id.0, url, "download requested");

    let reply = ChatReply {
        bot,
        chat_id: msg.chat.id,
        callback: None,
    };
    pipeline.request_download(user.id.0, url, &reply).await?;
    Ok(())
}

async fn on_callback(bot: Bot, query: CallbackQuery, pipeline: Pipeline) -> HandlerResult {
    let Some(choice) = query.data.as_deref().and_then(FormatChoice::parse) else {
        warn!(user = query.from.id.0, data = ?query.data, "unrecognised callback");
        bot.answer_callback_query(query.id.clone()).await?;
        bot.send_message(reply_chat(&query), messages::NOT_FOUND).await?;
        return Ok(());
    };

    let user = query.from.id;
    info!(user = user.0, id = %choice.id, format = ?choice.format, "format chosen");
    let reply = ChatReply {
        bot,
        chat_id: reply_chat(&query),
        callback: Some(query),
    };
    pipeline.deliver(user.0, choice, &reply).await?;
    Ok(())
}

fn dispatcher(
    bot: Bot,
    pipeline: Pipeline,
    policy: AllowList,
) -> Dispatcher<Bot, HandlerError, DefaultKey> {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![pipeline, Arc::new(policy)])
        .default_handler(|update| async move {
            debug!(update = ?update.id, "ignoring update");
        })
        .enable_ctrlc_handler()
        .build()
}

/// Runs the bot until Ctrl+C.
pub async fn run(
    bot: Bot,
    pipeline: Pipeline,
    policy: AllowList,
    source: UpdateSource,
) -> anyhow::Result<()> {
    let mut dispatcher = dispatcher(bot.clone(), pipeline, policy);
    match source {
        UpdateSource::Polling => {
            bot.delete_webhook().await?;
            info!("start polling");
            dispatcher.dispatch().await;
        }
        UpdateSource::Webhook { addr, url } => {
            info!(%addr, path = url.path(), "registering webhook");
            let listener = webhooks::axum(bot, webhooks::Options::new(addr, url)).await?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("error from the update listener"),
                )
                .await;
        }
    }
    Ok(())
}
