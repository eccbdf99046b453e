//! In-memory doubles for the collaborator seams, shared by unit tests.

use crate::api::AskAsync;
use crate::cli::Cli;
use crate::config::{DeskFile, Settings};
use crate::error::{FetchFailure, PublishError, SummarizeError};
use crate::scrapers::WebClient;
use crate::telegram::{InlineKeyboard, Messenger};
use async_trait::async_trait;
use clap::Parser;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MODERATION_CHAT: &str = "-100";
pub const CHANNEL: &str = "@desk_channel";

/// Settings with test credentials and `file` as the YAML layer.
pub fn settings(file: DeskFile) -> Settings {
    let cli = Cli::parse_from([
        "crypto_news_desk",
        "--bot-token",
        "token",
        "--gemini-api-key",
        "key",
        "--moderation-chat-id",
        MODERATION_CHAT,
        "--channel-id",
        CHANNEL,
    ]);
    Settings::from_parts(&cli, file).unwrap()
}

/// Minimal article page the extractor understands.
pub fn article_html(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head>\
         <body><article><p>{body}</p></article></body></html>"
    )
}

#[derive(Default)]
struct WebState {
    pages: HashMap<String, String>,
    calls: HashMap<String, usize>,
    panics_left: usize,
}

/// URL to HTML map. Unknown URLs fail as network errors.
#[derive(Clone, Default)]
pub struct FakeWeb {
    state: Arc<Mutex<WebState>>,
    delay: Option<Duration>,
}

impl FakeWeb {
    pub fn new() -> Self {
        FakeWeb::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.set_page(url, html);
        self
    }

    /// Every response is delayed by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The next `n` requests panic instead of answering.
    pub fn with_panics(self, n: usize) -> Self {
        self.state.lock().unwrap().panics_left = n;
        self
    }

    pub fn set_page(&self, url: &str, html: &str) {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(url.to_string(), html.to_string());
    }

    pub fn calls(&self, url: &str) -> usize {
        self.state.lock().unwrap().calls.get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl WebClient for FakeWeb {
    async fn get_html(&self, url: &str) -> Result<String, FetchFailure> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(url.to_string()).or_default() += 1;
        if state.panics_left > 0 {
            state.panics_left -= 1;
            // release the lock so later calls are not poisoned
            drop(state);
            panic!("fake web blew up fetching {url}");
        }
        state.pages.get(url).cloned().ok_or_else(|| FetchFailure::Network {
            url: url.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

#[derive(Default)]
struct AskState {
    script: VecDeque<Result<String, SummarizeError>>,
    prompts: Vec<String>,
}

/// Scripted model: answers in order, then reports an empty completion.
#[derive(Clone, Default)]
pub struct FakeAsk {
    state: Arc<Mutex<AskState>>,
}

impl FakeAsk {
    pub fn new(script: Vec<Result<String, SummarizeError>>) -> Self {
        FakeAsk {
            state: Arc::new(Mutex::new(AskState {
                script: script.into(),
                prompts: Vec::new(),
            })),
        }
    }

    pub fn push(&self, answer: Result<String, SummarizeError>) {
        self.state.lock().unwrap().script.push_back(answer);
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().prompts.len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.lock().unwrap().prompts.clone()
    }
}

#[async_trait]
impl AskAsync for FakeAsk {
    async fn ask(&self, prompt: &str) -> Result<String, SummarizeError> {
        let mut state = self.state.lock().unwrap();
        state.prompts.push(prompt.to_string());
        state.script.pop_front().unwrap_or(Err(SummarizeError::Empty))
    }
}

/// A message as the recording messenger last saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: String,
    pub message_id: i64,
    pub body: String,
    pub photo_url: Option<String>,
    pub keyboard: Option<InlineKeyboard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackAnswer {
    pub callback_id: String,
    pub text: Option<String>,
    pub show_alert: bool,
}

#[derive(Default)]
struct MessengerState {
    next_id: i64,
    sent: Vec<SentMessage>,
    live: HashMap<(String, i64), SentMessage>,
    deleted: Vec<(String, i64)>,
    answers: Vec<CallbackAnswer>,
    failing_chats: HashSet<String>,
    fail_photos: bool,
    rejected_markers: Vec<String>,
}

/// Records every outbound call and keeps the current state of each message.
#[derive(Clone, Default)]
pub struct RecordingMessenger {
    state: Arc<Mutex<MessengerState>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        RecordingMessenger::default()
    }

    /// Reject every photo send.
    pub fn failing_photos(self) -> Self {
        self.state.lock().unwrap().fail_photos = true;
        self
    }

    /// Reject every send to `chat_id`.
    pub fn failing_chat(self, chat_id: &str) -> Self {
        self.state.lock().unwrap().failing_chats.insert(chat_id.to_string());
        self
    }

    /// Reject any send whose body contains `marker`, the way Telegram
    /// rejects HTML it cannot parse.
    pub fn rejecting_bodies_containing(self, marker: &str) -> Self {
        self.state.lock().unwrap().rejected_markers.push(marker.to_string());
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, chat_id: &str) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.chat_id == chat_id).collect()
    }

    pub fn live(&self, chat_id: &str, message_id: i64) -> Option<SentMessage> {
        self.state
            .lock()
            .unwrap()
            .live
            .get(&(chat_id.to_string(), message_id))
            .cloned()
    }

    pub fn deleted(&self) -> Vec<(String, i64)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn answers(&self) -> Vec<CallbackAnswer> {
        self.state.lock().unwrap().answers.clone()
    }

    fn send(
        &self,
        chat_id: &str,
        body: &str,
        photo_url: Option<&str>,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64, PublishError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_chats.contains(chat_id) || (photo_url.is_some() && state.fail_photos) {
            return Err(PublishError::Rejected {
                code: 400,
                description: "Bad Request: rejected by test".to_string(),
            });
        }
        if state.rejected_markers.iter().any(|m| body.contains(m.as_str())) {
            return Err(PublishError::Rejected {
                code: 400,
                description: "Bad Request: can't parse entities".to_string(),
            });
        }
        state.next_id += 1;
        let message = SentMessage {
            chat_id: chat_id.to_string(),
            message_id: state.next_id,
            body: body.to_string(),
            photo_url: photo_url.map(str::to_string),
            keyboard: keyboard.cloned(),
        };
        state.sent.push(message.clone());
        state
            .live
            .insert((chat_id.to_string(), message.message_id), message);
        Ok(state.next_id)
    }

    fn edit(
        &self,
        chat_id: &str,
        message_id: i64,
        body: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        let message = state
            .live
            .get_mut(&(chat_id.to_string(), message_id))
            .ok_or(PublishError::MessageNotFound)?;
        if message.body == body && message.keyboard.as_ref() == keyboard {
            return Err(PublishError::NotModified);
        }
        message.body = body.to_string();
        message.keyboard = keyboard.cloned();
        Ok(())
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        chat_id: &str,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64, PublishError> {
        self.send(chat_id, html, None, keyboard)
    }

    async fn send_photo(
        &self,
        chat_id: &str,
        photo_url: &str,
        caption_html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64, PublishError> {
        self.send(chat_id, caption_html, Some(photo_url), keyboard)
    }

    async fn edit_text(
        &self,
        chat_id: &str,
        message_id: i64,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PublishError> {
        self.edit(chat_id, message_id, html, keyboard)
    }

    async fn edit_caption(
        &self,
        chat_id: &str,
        message_id: i64,
        caption_html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PublishError> {
        self.edit(chat_id, message_id, caption_html, keyboard)
    }

    async fn delete_message(&self, chat_id: &str, message_id: i64) -> Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        state
            .live
            .remove(&(chat_id.to_string(), message_id))
            .ok_or(PublishError::MessageNotFound)?;
        state.deleted.push((chat_id.to_string(), message_id));
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), PublishError> {
        self.state.lock().unwrap().answers.push(CallbackAnswer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            show_alert,
        });
        Ok(())
    }
}
