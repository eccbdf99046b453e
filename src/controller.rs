//! Publish path and moderator interaction handlers.
//!
//! Drafts go to the moderation chat with four controls, each carrying
//! `"<action>:<post id>"` as callback data:
//!
//! | Button | Callback | Effect |
//! |--------|----------|--------|
//! | 🗑 Delete | `del:` | Remove the draft (idempotent) |
//! | 🔄 Regenerate | `regen:` | Re-summarize the cached article and edit in place |
//! | ✏️ Edit | `edit:` | Ask for replacement text, apply the moderator's next message |
//! | ✅ Publish | `pub:` | Copy to the channel without the timestamp, drop the draft |
//!
//! Handlers run in their own tasks next to the poll cycle. Every failure is
//! turned into a callback alert or a reply; nothing escapes a handler.

use crate::config::Settings;
use crate::edit::{EditKey, EditSessions, EditState, PendingEdit};
use crate::error::{ActionError, PublishError, ResolveError};
use crate::fetcher::ArticleFetcher;
use crate::models::{ArticleRecord, Draft, PostId, PostRecord};
use crate::store::NewsStore;
use crate::summarizer::Summarizer;
use crate::telegram::{CallbackQuery, InlineButton, InlineKeyboard, Message, Messenger, Update, User};
use crate::utils::{escape_html, strip_timestamps, timestamp_line, visible_len};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Telegram's limit on photo captions, in visible characters.
pub const CAPTION_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Delete,
    Regenerate,
    Publish,
    Edit,
}

impl Action {
    fn prefix(self) -> &'static str {
        match self {
            Action::Delete => "del",
            Action::Regenerate => "regen",
            Action::Publish => "pub",
            Action::Edit => "edit",
        }
    }

    pub fn callback_data(self, post_id: &PostId) -> String {
        format!("{}:{}", self.prefix(), post_id)
    }

    fn button(self, label: &str, post_id: &PostId) -> InlineButton {
        InlineButton {
            text: label.to_string(),
            callback_data: self.callback_data(post_id),
        }
    }
}

pub fn parse_callback(data: &str) -> Result<(Action, PostId), ActionError> {
    let bad = || ActionError::BadCallback(data.to_string());
    let (prefix, raw_id) = data.split_once(':').ok_or_else(bad)?;
    let action = match prefix {
        "del" => Action::Delete,
        "regen" => Action::Regenerate,
        "pub" => Action::Publish,
        "edit" => Action::Edit,
        _ => return Err(bad()),
    };
    let post_id = PostId::parse(raw_id).ok_or_else(bad)?;
    Ok((action, post_id))
}

pub fn draft_keyboard(post_id: &PostId) -> InlineKeyboard {
    InlineKeyboard {
        inline_keyboard: vec![
            vec![
                Action::Delete.button("🗑 Delete", post_id),
                Action::Regenerate.button("🔄 Regenerate", post_id),
            ],
            vec![
                Action::Edit.button("✏️ Edit", post_id),
                Action::Publish.button("✅ Publish", post_id),
            ],
        ],
    }
}

/// Draft HTML: the model's summary, or the escaped extractive summary under
/// a bold title, then the timestamp line and the source link.
pub fn render_body(record: &ArticleRecord, summary: Option<&str>) -> String {
    let lead = match summary {
        Some(summary) => summary.to_string(),
        None => format!(
            "<b>{}</b>\n\n{}",
            escape_html(&record.title),
            escape_html(&record.summary_text)
        ),
    };
    let source = record.source_tag().unwrap_or_else(|| "source".to_string());
    format!(
        "{lead}\n\n{}\n🔗 <a href=\"{}\">{}</a>",
        timestamp_line(&record.published_at),
        escape_html(&record.url),
        escape_html(&source)
    )
}

/// Channel HTML: the draft without timestamp lines, plus the attribution.
pub fn broadcast_body(draft_body: &str, attribution: &str) -> String {
    let body = strip_timestamps(draft_body);
    if attribution.trim().is_empty() {
        body
    } else {
        format!("{body}\n\n{}", attribution.trim())
    }
}

/// Reply to a moderator message that is not an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Status,
    Cancel,
}

fn parse_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?;
    // "/status@desk_bot" in groups
    let name = word.split('@').next()?;
    match name {
        "/start" => Some(Command::Start),
        "/status" => Some(Command::Status),
        "/cancel" => Some(Command::Cancel),
        _ => None,
    }
}

pub struct Controller {
    settings: Arc<Settings>,
    store: Arc<NewsStore>,
    fetcher: Arc<ArticleFetcher>,
    summarizer: Arc<Summarizer>,
    messenger: Arc<dyn Messenger>,
    edits: EditSessions,
    /// `settings.moderation_chat_id` as the Bot API's `chat_id` parameter.
    moderation_chat: String,
}

impl Controller {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<NewsStore>,
        fetcher: Arc<ArticleFetcher>,
        summarizer: Arc<Summarizer>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let edits = EditSessions::new(settings.edit_timeout);
        let moderation_chat = settings.moderation_chat_id.to_string();
        Controller {
            settings,
            store,
            fetcher,
            summarizer,
            messenger,
            edits,
            moderation_chat,
        }
    }

    fn moderation_chat(&self) -> &str {
        &self.moderation_chat
    }

    fn is_moderation_chat(&self, chat_id: i64) -> bool {
        chat_id == self.settings.moderation_chat_id
    }

    pub fn render_draft(
        &self,
        record: &ArticleRecord,
        summary: Option<String>,
        image_url: Option<String>,
    ) -> Draft {
        let summarized = summary.is_some();
        Draft {
            post_id: PostId::for_url(&record.url),
            url: record.url.clone(),
            body: render_body(record, summary.as_deref()),
            image_url,
            summarized,
        }
    }

    /// Send a photo when there is an image and the caption fits, otherwise
    /// (or when the photo is rejected) plain text. Returns the message id
    /// and whether it went out as a photo.
    async fn send_unit(
        &self,
        chat_id: &str,
        image_url: Option<&str>,
        body: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(i64, bool), PublishError> {
        if let Some(image) = image_url {
            if visible_len(body) <= CAPTION_LIMIT {
                match self.messenger.send_photo(chat_id, image, body, keyboard).await {
                    Ok(id) => return Ok((id, true)),
                    Err(e) => warn!(%chat_id, %image, error = %e, "Photo send failed; falling back to text"),
                }
            } else {
                debug!(chars = visible_len(body), "Caption over limit; sending as text");
            }
        }
        let id = self.messenger.send_text(chat_id, body, keyboard).await?;
        Ok((id, false))
    }

    /// Post a draft to the moderation chat and index it by post id.
    #[instrument(level = "info", skip_all, fields(url = %draft.url, post_id = %draft.post_id))]
    pub async fn post_draft(&self, draft: &Draft) -> Result<PostRecord, ActionError> {
        if let Ok(existing) = self.store.resolve_url(&draft.post_id) {
            if existing != draft.url {
                return Err(ResolveError::AmbiguousPostId {
                    post_id: draft.post_id.to_string(),
                    existing,
                    incoming: draft.url.clone(),
                }
                .into());
            }
        }

        let keyboard = draft_keyboard(&draft.post_id);
        let chat = self.moderation_chat();
        let (message_id, is_photo) = self
            .send_unit(chat, draft.image_url.as_deref(), &draft.body, Some(&keyboard))
            .await?;

        let post = PostRecord {
            url: draft.url.clone(),
            chat_id: chat.to_string(),
            message_id,
            body: draft.body.clone(),
            image_url: draft.image_url.clone().filter(|_| is_photo),
            is_photo,
            posted_at: Instant::now(),
        };
        self.store.register_post(&draft.post_id, post.clone())?;
        info!(message_id, is_photo, summarized = draft.summarized, "Draft posted for moderation");
        Ok(post)
    }

    pub async fn handle_update(&self, update: Update) {
        if let Some(callback) = update.callback_query {
            self.on_callback(callback).await;
        } else if let Some(message) = update.message {
            self.on_message(message).await;
        }
    }

    #[instrument(level = "info", skip_all, fields(callback_id = %callback.id, data = ?callback.data))]
    async fn on_callback(&self, callback: CallbackQuery) {
        let message = match callback.message.as_ref() {
            Some(m) if self.is_moderation_chat(m.chat.id) => m,
            other => {
                let text = match other {
                    Some(m) => {
                        debug!(chat_id = m.chat.id, "Callback from foreign chat; refusing");
                        "This chat is not the moderation chat."
                    }
                    None => {
                        debug!("Callback without message; refusing");
                        "This message is no longer available."
                    }
                };
                // the button spinner stays up until the query is answered
                let _ = self
                    .messenger
                    .answer_callback(&callback.id, Some(text), false)
                    .await;
                return;
            }
        };

        let data = callback.data.as_deref().unwrap_or_default();
        let result = match parse_callback(data) {
            Ok((Action::Delete, id)) => self.delete(&id, message.message_id).await,
            Ok((Action::Regenerate, id)) => self.regenerate(&id).await,
            Ok((Action::Publish, id)) => self.publish(&id).await,
            Ok((Action::Edit, id)) => self.begin_edit(&id, message, callback.from.id).await,
            Err(e) => Err(e),
        };

        let (text, alert) = match &result {
            Ok(text) => (text.to_string(), false),
            Err(e) => {
                warn!(error = %e, "Moderator action failed");
                (e.user_message(), true)
            }
        };
        // answer_callback logs its own failures
        let _ = self
            .messenger
            .answer_callback(&callback.id, Some(&text), alert)
            .await;
    }

    /// Idempotent: a draft that is already gone counts as deleted.
    #[instrument(level = "info", skip(self))]
    pub async fn delete(&self, post_id: &PostId, message_id: i64) -> Result<&'static str, ActionError> {
        match self
            .messenger
            .delete_message(self.moderation_chat(), message_id)
            .await
        {
            Ok(()) => info!("Draft deleted"),
            Err(PublishError::MessageNotFound) => debug!("Draft already deleted"),
            Err(e) => return Err(e.into()),
        }
        self.store.forget_post(post_id);
        Ok("Deleted.")
    }

    /// Re-summarize the article behind `post_id` and edit the draft in place.
    #[instrument(level = "info", skip(self))]
    pub async fn regenerate(&self, post_id: &PostId) -> Result<&'static str, ActionError> {
        let post = self.store.post(post_id)?;
        // cache first; an evicted article is downloaded again
        let record = self.fetcher.fetch(&post.url).await?;
        let summary = self
            .summarizer
            .summarize(&record.raw_text, &record.url, &record.related_links)
            .await
            .ok_or(ActionError::SummaryUnavailable)?;

        let body = render_body(&record, Some(&summary));
        self.replace_body(post_id, &post, &body).await?;
        info!(url = %post.url, "Draft regenerated");
        Ok("Regenerated.")
    }

    /// Edit the draft message keeping its controls, then record the new body.
    async fn replace_body(&self, post_id: &PostId, post: &PostRecord, body: &str) -> Result<(), ActionError> {
        if post.is_photo {
            let chars = visible_len(body);
            if chars > CAPTION_LIMIT {
                return Err(ActionError::CaptionTooLong {
                    chars,
                    limit: CAPTION_LIMIT,
                });
            }
        }
        let keyboard = draft_keyboard(post_id);
        let result = if post.is_photo {
            self.messenger
                .edit_caption(&post.chat_id, post.message_id, body, Some(&keyboard))
                .await
        } else {
            self.messenger
                .edit_text(&post.chat_id, post.message_id, body, Some(&keyboard))
                .await
        };
        match result {
            Ok(()) => {}
            Err(PublishError::NotModified) => debug!("Draft unchanged"),
            Err(e) => return Err(e.into()),
        }
        self.store.update_post_body(post_id, body)?;
        Ok(())
    }

    /// Copy the draft to the channel, then remove it from moderation.
    #[instrument(level = "info", skip(self))]
    pub async fn publish(&self, post_id: &PostId) -> Result<&'static str, ActionError> {
        let post = self.store.post(post_id)?;
        let body = broadcast_body(&post.body, &self.settings.attribution);
        let (channel_message, _) = self
            .send_unit(&self.settings.channel_id, post.image_url.as_deref(), &body, None)
            .await?;
        info!(url = %post.url, channel_message, "Published to channel");

        match self
            .messenger
            .delete_message(&post.chat_id, post.message_id)
            .await
        {
            Ok(()) | Err(PublishError::MessageNotFound) => {}
            Err(e) => warn!(error = %e, "Published, but the draft could not be removed"),
        }
        self.store.forget_post(post_id);
        Ok("Published.")
    }

    #[instrument(level = "info", skip(self, message))]
    async fn begin_edit(&self, post_id: &PostId, message: &Message, user_id: i64) -> Result<&'static str, ActionError> {
        let post = self.store.post(post_id)?;
        let prompt_message_id = self
            .messenger
            .send_text(
                &post.chat_id,
                "✏️ Send the new text for this post (HTML allowed). /cancel to abort.",
                None,
            )
            .await?;
        let key = EditKey {
            chat_id: message.chat.id,
            user_id,
        };
        let replaced = self.edits.begin(
            key,
            PendingEdit {
                post_id: post_id.clone(),
                message_id: post.message_id,
                prompt_message_id: Some(prompt_message_id),
                started_at: Instant::now(),
            },
        );
        if let Some(old) = replaced {
            self.drop_prompt(&old).await;
        }
        Ok("Waiting for the new text.")
    }

    async fn drop_prompt(&self, edit: &PendingEdit) {
        if let Some(prompt) = edit.prompt_message_id {
            if let Err(e) = self.messenger.delete_message(self.moderation_chat(), prompt).await {
                debug!(error = %e, "Could not remove edit prompt");
            }
        }
    }

    #[instrument(level = "info", skip_all, fields(message_id = message.message_id))]
    async fn on_message(&self, message: Message) {
        if !self.is_moderation_chat(message.chat.id) {
            debug!(chat_id = message.chat.id, "Message from foreign chat; ignoring");
            return;
        }
        let (Some(text), Some(from)) = (message.text.as_deref(), message.from.as_ref()) else {
            return;
        };
        let key = EditKey {
            chat_id: message.chat.id,
            user_id: from.id,
        };

        let reply = match parse_command(text) {
            Some(Command::Start) => Some("📰 Crypto news desk is running.".to_string()),
            Some(Command::Status) => {
                let stats = self.store.stats();
                Some(format!(
                    "📊 Cached articles: {}\nSeen URLs: {}\nDrafts awaiting moderation: {}",
                    stats.cached_articles, stats.seen_urls, stats.live_posts
                ))
            }
            Some(Command::Cancel) => match self.edits.cancel(key) {
                Some(edit) => {
                    self.drop_prompt(&edit).await;
                    Some("Edit cancelled.".to_string())
                }
                None => Some("Nothing to cancel.".to_string()),
            },
            None => self.apply_edit(key, from, text).await,
        };

        if let Some(reply) = reply {
            if let Err(e) = self.messenger.send_text(self.moderation_chat(), &reply, None).await {
                warn!(error = %e, "Reply failed");
            }
        }
    }

    /// Plain text from a moderator: apply it if they have an edit pending.
    async fn apply_edit(&self, key: EditKey, moderator: &User, text: &str) -> Option<String> {
        match self.edits.take(key, Instant::now()) {
            EditState::Idle => None,
            EditState::Expired(edit) => {
                info!(post_id = %edit.post_id, "Edit session expired");
                self.drop_prompt(&edit).await;
                Some("⌛ Edit session expired. Press ✏️ Edit again.".to_string())
            }
            EditState::AwaitingText(edit) => {
                let result = match self.store.post(&edit.post_id) {
                    Ok(post) => self.replace_body(&edit.post_id, &post, text.trim()).await,
                    Err(e) => Err(e.into()),
                };
                self.drop_prompt(&edit).await;
                match result {
                    Ok(()) => {
                        info!(post_id = %edit.post_id, user = ?moderator.username, "Draft edited by moderator");
                        None
                    }
                    Err(e) => {
                        warn!(post_id = %edit.post_id, error = %e, "Edit failed");
                        Some(e.user_message())
                    }
                }
            }
        }
    }

    /// Discard timed-out edit sessions.
    pub fn purge_expired_edits(&self) -> usize {
        self.edits.purge_expired(Instant::now())
    }
}
