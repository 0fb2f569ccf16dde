use chrono::SecondsFormat;
use log::{debug, info, warn};
use std::fmt;
use crate::discord::{Embed, EmbedField, EmbedFooter, MessageChannel};
use crate::poll::AggregateSummary;

pub const BOARD_TITLE: &str = "Servers running VisTrace";
pub const BOARD_FOOTER: &str = "Last updated";
pub const BOARD_COLOR: u32 = (255 << 16) | (150 << 8);
pub const LOOKBACK_WINDOW: u8 = 20;

const MAX_FIELDS: usize = 25;
const MAX_FIELD_NAME: usize = 256;
const MAX_FIELD_VALUE: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum PublishError {
    ChannelUnavailable(String),
    MessageNotFound(String),
    Rejected { status: u16, body: String },
    Transport(String),
    Decode(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelUnavailable(msg) => write!(f, "Error getting channel: {}", msg),
            Self::MessageNotFound(id) => write!(f, "Board message {} no longer exists", id),
            Self::Rejected { status, body } => write!(f, "Discord rejected the request ({}): {}", status, body),
            Self::Transport(msg) => write!(f, "Could not reach Discord: {}", msg),
            Self::Decode(msg) => write!(f, "Unexpected Discord response: {}", msg),
        }
    }
}

impl std::error::Error for PublishError {}

pub fn render_board(summary: &AggregateSummary) -> Embed {
    if summary.lines.len() > MAX_FIELDS {
        warn!("Board shows only the first {} of {} servers", MAX_FIELDS, summary.lines.len());
    }

    let fields = summary.lines
        .iter()
        .take(MAX_FIELDS)
        .map(|line| EmbedField {
            name: clip(&line.heading, MAX_FIELD_NAME),
            value: clip(&line.body, MAX_FIELD_VALUE),
            inline: false,
        })
        .collect();

    Embed {
        title: BOARD_TITLE.to_string(),
        color: BOARD_COLOR,
        timestamp: summary.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        footer: EmbedFooter { text: BOARD_FOOTER.to_string() },
        fields,
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max - 1).collect();
    clipped.push('…');
    clipped
}

/// Keeps a single status message in the channel up to date.
pub struct BoardPublisher<C> {
    channel: C,
    board_id: Option<String>,
}

impl<C: MessageChannel> BoardPublisher<C> {
    pub fn new(channel: C) -> Self {
        Self { channel, board_id: None }
    }

    pub fn board_id(&self) -> Option<&str> {
        self.board_id.as_deref()
    }

    pub async fn publish(&mut self, summary: &AggregateSummary) -> Result<(), PublishError> {
        let embed = render_board(summary);

        self.channel.fetch_channel().await?;

        if let Some(id) = self.board_id.clone() {
            match self.channel.edit_message(&id, &embed).await {
                Ok(()) => {
                    debug!("Updated board message {}", id);
                    return Ok(());
                }
                Err(PublishError::MessageNotFound(_)) => {
                    warn!("Board message {} disappeared, looking again", id);
                    self.board_id = None;
                }
                Err(e) => return Err(e),
            }
        }

        let recent = self.channel.recent_messages(LOOKBACK_WINDOW).await?;
        let own = recent
            .into_iter()
            .take(LOOKBACK_WINDOW as usize)
            .find(|message| message.author.id == self.channel.own_id());

        let id = match own {
            Some(message) => {
                self.channel.edit_message(&message.id, &embed).await?;
                info!("Found board message {}", message.id);
                message.id
            }
            None => {
                let message = self.channel.send_message(&embed).await?;
                info!("Created board message {}", message.id);
                message.id
            }
        };
        self.board_id = Some(id);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::discord::{ChannelMessage, User};
    use parking_lot::Mutex;
    use std::sync::Arc;

    pub const BOT_ID: &str = "1000";

    #[derive(Default)]
    pub struct FakeChannel {
        // newest first
        pub messages: Mutex<Vec<(ChannelMessage, Option<Embed>)>>,
        pub sends: Mutex<usize>,
        pub edits: Mutex<Vec<(String, Embed)>>,
        pub fetches: Mutex<usize>,
        /// Channel lookups that succeed before the channel goes away.
        pub reachable_fetches: Mutex<Option<usize>>,
        next_id: Mutex<u64>,
    }

    impl FakeChannel {
        pub fn post_foreign(&self, author: &str) -> String {
            self.post(author, None)
        }

        pub fn post(&self, author: &str, embed: Option<Embed>) -> String {
            let mut next = self.next_id.lock();
            *next += 1;
            let id = format!("m{}", next);
            let message = ChannelMessage { id: id.clone(), author: User { id: author.to_string() } };
            self.messages.lock().insert(0, (message, embed));
            id
        }

        pub fn delete(&self, id: &str) {
            self.messages.lock().retain(|(m, _)| m.id != id);
        }

        pub fn embed_of(&self, id: &str) -> Option<Embed> {
            self.messages
                .lock()
                .iter()
                .find(|(m, _)| m.id == id)
                .and_then(|(_, e)| e.clone())
        }
    }

    impl MessageChannel for Arc<FakeChannel> {
        fn own_id(&self) -> &str {
            BOT_ID
        }

        async fn fetch_channel(&self) -> Result<(), PublishError> {
            let mut fetches = self.fetches.lock();
            *fetches += 1;
            match *self.reachable_fetches.lock() {
                Some(limit) if *fetches > limit =>
                    Err(PublishError::ChannelUnavailable("Missing Access".to_string())),
                _ => Ok(()),
            }
        }

        async fn recent_messages(&self, limit: u8) -> Result<Vec<ChannelMessage>, PublishError> {
            Ok(self.messages
                .lock()
                .iter()
                .take(limit as usize)
                .map(|(m, _)| m.clone())
                .collect())
        }

        async fn send_message(&self, embed: &Embed) -> Result<ChannelMessage, PublishError> {
            *self.sends.lock() += 1;
            let id = self.post(BOT_ID, Some(embed.clone()));
            Ok(ChannelMessage { id, author: User { id: BOT_ID.to_string() } })
        }

        async fn edit_message(&self, message_id: &str, embed: &Embed) -> Result<(), PublishError> {
            let mut messages = self.messages.lock();
            let Some(entry) = messages.iter_mut().find(|(m, _)| m.id == message_id) else {
                return Err(PublishError::MessageNotFound(message_id.to_string()));
            };
            entry.1 = Some(embed.clone());
            self.edits.lock().push((message_id.to_string(), embed.clone()));
            Ok(())
        }
    }
}
