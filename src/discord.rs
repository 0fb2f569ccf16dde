// src/discord.rs
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::RateLimiter;
use log::{debug, info};
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use crate::board::PublishError;
use crate::config::Config;

const USER_AGENT: &str = concat!("DiscordBot (vtserverlist, ", env!("CARGO_PKG_VERSION"), ")");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub author: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub timestamp: String,
    pub footer: EmbedFooter,
    pub fields: Vec<EmbedField>,
}

#[derive(Serialize)]
struct MessagePayload<'a> {
    content: &'a str,
    embeds: &'a [Embed],
}

impl<'a> MessagePayload<'a> {
    fn board(embed: &'a Embed) -> Self {
        Self { content: "", embeds: std::slice::from_ref(embed) }
    }
}

/// The operations the board needs from a messaging channel.
pub trait MessageChannel: Send + Sync {
    /// Identity used to recognise messages this process posted earlier.
    fn own_id(&self) -> &str;

    fn fetch_channel(&self) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Most recent messages first.
    fn recent_messages(&self, limit: u8) -> impl Future<Output = Result<Vec<ChannelMessage>, PublishError>> + Send;

    fn send_message(&self, embed: &Embed) -> impl Future<Output = Result<ChannelMessage, PublishError>> + Send;

    fn edit_message(&self, message_id: &str, embed: &Embed) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Bot session against the Discord REST API, bound to one channel.
pub struct DiscordClient {
    http: reqwest::Client,
    api: String,
    token: String,
    channel_id: u64,
    own_id: String,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl DiscordClient {
    /// Opens the session and learns the bot's own user id.
    pub async fn connect(config: &Config) -> Result<Self, PublishError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let mut client = Self {
            http,
            api: config.discord_api.clone(),
            token: config.token.clone(),
            channel_id: config.channel_id,
            own_id: String::new(),
            limiter: RateLimiter::direct(config.discord_quota()),
        };

        let me: User = client.json(client.http.get(client.url("/users/@me"))).await?;
        info!("Logged in to Discord as user {}", me.id);
        client.own_id = me.id;
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api, path)
    }

    fn channel_url(&self, suffix: &str) -> String {
        self.url(&format!("/channels/{}{}", self.channel_id, suffix))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PublishError> {
        self.limiter.until_ready().await;

        let response = request
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        debug!("Discord answered {} for {}", status, response.url().path());
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(PublishError::Rejected { status: status.as_u16(), body })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, PublishError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PublishError::Decode(e.to_string()))
    }
}

impl MessageChannel for DiscordClient {
    fn own_id(&self) -> &str {
        &self.own_id
    }

    async fn fetch_channel(&self) -> Result<(), PublishError> {
        self.send(self.http.get(self.channel_url("")))
            .await
            .map(|_| ())
            .map_err(|e| PublishError::ChannelUnavailable(format!("channel {}: {}", self.channel_id, e)))
    }

    async fn recent_messages(&self, limit: u8) -> Result<Vec<ChannelMessage>, PublishError> {
        let request = self.http
            .get(self.channel_url("/messages"))
            .query(&[("limit", limit)]);
        self.json(request).await
    }

    async fn send_message(&self, embed: &Embed) -> Result<ChannelMessage, PublishError> {
        let request = self.http
            .post(self.channel_url("/messages"))
            .json(&MessagePayload::board(embed));
        self.json(request).await
    }

    async fn edit_message(&self, message_id: &str, embed: &Embed) -> Result<(), PublishError> {
        let request = self.http
            .patch(self.channel_url(&format!("/messages/{}", message_id)))
            .json(&MessagePayload::board(embed));

        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(PublishError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() =>
                Err(PublishError::MessageNotFound(message_id.to_string())),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn board_payload_has_empty_content_and_one_embed() {
        let embed = Embed {
            title: "Servers running VisTrace".to_string(),
            color: 0xFF9600,
            timestamp: "2026-10-17T12:00:00+00:00".to_string(),
            footer: EmbedFooter { text: "Last updated".to_string() },
            fields: vec![EmbedField {
                name: ":flag_gb: Alpha".to_string(),
                value: "3/16 Playing Sandbox on gm_construct | VisTrace v0.14.2".to_string(),
                inline: false,
            }],
        };

        let value = serde_json::to_value(MessagePayload::board(&embed)).unwrap();
        assert_eq!(value["content"], json!(""));
        assert_eq!(value["embeds"][0]["color"], json!(0xFF9600));
        assert_eq!(value["embeds"][0]["footer"]["text"], json!("Last updated"));
        assert_eq!(value["embeds"][0]["fields"][0]["inline"], json!(false));
    }

    #[test]
    fn message_author_is_decoded() {
        let raw = r#"[{"id":"11","content":"","author":{"id":"42","username":"bot"}}]"#;
        let messages: Vec<ChannelMessage> = serde_json::from_str(raw).unwrap();
        assert_eq!(messages[0].author.id, "42");
    }
}
