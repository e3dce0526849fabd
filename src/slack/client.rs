//! Slack Socket Mode client.
//!
//! Implements the outbound gateway: direct Web API calls with bounded
//! rate-limit backoff, returning message timestamps for the
//! editable-status flow.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use slack_morphism::prelude::{
    SlackApiChatDeleteRequest, SlackApiChatPostMessageRequest, SlackApiChatUpdateRequest,
    SlackApiConversationsHistoryRequest, SlackApiConversationsInfoRequest,
    SlackApiConversationsOpenRequest, SlackApiFilesComplete,
    SlackApiFilesCompleteUploadExternalRequest, SlackApiFilesGetUploadUrlExternalRequest,
    SlackApiReactionsAddRequest, SlackApiReactionsRemoveRequest,
    SlackApiToken, SlackApiTokenType, SlackApiTokenValue, SlackChannelId, SlackClient,
    SlackClientEventsListenerEnvironment, SlackClientHyperHttpsConnector, SlackClientSession,
    SlackClientSocketModeConfig, SlackClientSocketModeListener, SlackMessageContent,
    SlackReactionName, SlackSocketModeListenerCallbacks, SlackTs, SlackUserId,
};
use tokio::io::AsyncWriteExt;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info, warn};

use crate::config::SlackConfig;
use crate::slack::dispatcher::Dispatcher;
use crate::slack::{blocks, events};
use crate::{AppError, Result};

use super::gateway::{
    ChannelInfo, FetchedMessage, OutboundMessage, PostIdentity, SlackGateway,
};

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const DIRECT_CALL_ATTEMPTS: u32 = 3;

/// Slack Socket Mode wrapper over the Web API.
pub struct SlackService {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    bot_token_value: String,
    http: reqwest::Client,
}

/// Join handles for Slack background tasks.
pub struct SlackRuntime {
    pub socket_task: Option<JoinHandle<()>>,
}

impl SlackService {
    /// Start the Slack client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the HTTPS connector cannot be created.
    pub fn start(config: &SlackConfig) -> Result<(Arc<Self>, SlackRuntime)> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Slack(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };

        let service = Arc::new(Self {
            client: Arc::clone(&client),
            bot_token,
            app_token,
            bot_token_value: config.bot_token.clone(),
            http: reqwest::Client::new(),
        });

        info!("slack service started");
        Ok((service, SlackRuntime { socket_task: None }))
    }

    /// Start Socket Mode with the live dispatcher as callback state.
    #[must_use]
    pub fn start_socket_mode(&self, dispatcher: Arc<Dispatcher>) -> JoinHandle<()> {
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(dispatcher),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                info!(?event, "socket hello");
            })
            .with_push_events(events::handle_push)
            .with_interaction_events(events::handle_interaction);
        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        let app_token = self.app_token.clone();
        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                error!(?error, "socket mode listen failed");
                return;
            }
            listener.serve().await;
            info!("socket mode listener exited");
        })
    }

    /// The bot's own user id, via `auth.test`. Needed to recognize
    /// mentions and filter self-posts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the API call fails.
    pub async fn bot_user_id(&self) -> Result<String> {
        let raw: serde_json::Value = self
            .http
            .post("https://slack.com/api/auth.test")
            .bearer_auth(&self.bot_token_value)
            .send()
            .await
            .map_err(|err| AppError::Slack(format!("auth.test failed: {err}")))?
            .json()
            .await
            .map_err(|err| AppError::Slack(format!("auth.test malformed: {err}")))?;
        raw.get("user_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| AppError::Slack("auth.test returned no user_id".into()))
    }

    /// Periodic connection health check via `auth.test`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the check fails or times out.
    pub async fn health_check(&self) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(10), self.bot_user_id())
            .await
            .map_err(|_| AppError::Slack("health check timed out".into()))?
            .map(|_| ())
    }

    fn http_session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }

    async fn post_message_once(&self, message: OutboundMessage) -> Result<String> {
        let content = if message.buttons.is_empty() {
            SlackMessageContent {
                text: Some(message.text.clone()),
                blocks: None,
                attachments: None,
                upload: None,
                files: None,
                reactions: None,
                metadata: None,
            }
        } else {
            SlackMessageContent {
                text: Some(message.text.clone()),
                blocks: Some(blocks::message_blocks(&message.text, &message.buttons)),
                attachments: None,
                upload: None,
                files: None,
                reactions: None,
                metadata: None,
            }
        };

        let (username, icon_emoji) = match &message.identity {
            PostIdentity::Bot => (None, None),
            PostIdentity::Persona {
                username,
                icon_emoji,
            } => (Some(username.clone()), Some(icon_emoji.clone())),
        };

        let request = SlackApiChatPostMessageRequest {
            channel: SlackChannelId(message.channel.clone()),
            content,
            as_user: None,
            icon_emoji,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: message.thread_ts.clone().map(SlackTs),
            username,
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        };

        let response = self
            .http_session()
            .chat_post_message(&request)
            .await
            .map_err(|err| AppError::Slack(format!("chat.postMessage failed: {err}")))?;
        Ok(response.ts.to_string())
    }

    /// Run a direct API call with bounded retries on rate limits.
    async fn with_rate_limit_retry<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<
            Output = std::result::Result<T, slack_morphism::errors::SlackClientError>,
        >,
    {
        let mut backoff = INITIAL_RETRY_DELAY;
        for attempt in 1..=DIRECT_CALL_ATTEMPTS {
            match call().await {
                Ok(value) => return Ok(value),
                Err(slack_morphism::errors::SlackClientError::RateLimitError(rate))
                    if attempt < DIRECT_CALL_ATTEMPTS =>
                {
                    let delay = rate.retry_after.unwrap_or(backoff);
                    warn!(label, attempt, delay = ?delay, "slack rate limited; retrying");
                    sleep(delay).await;
                    backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                }
                Err(err) => return Err(AppError::Slack(format!("{label} failed: {err}"))),
            }
        }
        Err(AppError::Slack(format!("{label} failed: rate limited")))
    }
}

#[async_trait]
impl SlackGateway for SlackService {
    async fn post_message(&self, message: OutboundMessage) -> Result<String> {
        self.post_message_once(message).await
    }

    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<()> {
        let request = SlackApiChatUpdateRequest::new(
            SlackChannelId(channel.to_owned()),
            SlackMessageContent {
                text: Some(text.to_owned()),
                blocks: None,
                attachments: None,
                upload: None,
                files: None,
                reactions: None,
                metadata: None,
            },
            SlackTs(ts.to_owned()),
        );
        self.with_rate_limit_retry("chat.update", || {
            let request = request.clone();
            async move { self.http_session().chat_update(&request).await }
        })
        .await
        .map(|_| ())
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<()> {
        let request =
            SlackApiChatDeleteRequest::new(SlackChannelId(channel.to_owned()), SlackTs(ts.to_owned()));
        self.with_rate_limit_retry("chat.delete", || {
            let request = request.clone();
            async move { self.http_session().chat_delete(&request).await }
        })
        .await
        .map(|_| ())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        let request = SlackApiReactionsAddRequest::new(
            SlackChannelId(channel.to_owned()),
            SlackReactionName(name.to_owned()),
            SlackTs(ts.to_owned()),
        );
        self.with_rate_limit_retry("reactions.add", || {
            let request = request.clone();
            async move { self.http_session().reactions_add(&request).await }
        })
        .await
        .map(|_| ())
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        let request = SlackApiReactionsRemoveRequest::new(SlackReactionName(name.to_owned()))
            .with_channel(SlackChannelId(channel.to_owned()))
            .with_timestamp(SlackTs(ts.to_owned()));
        self.with_rate_limit_retry("reactions.remove", || {
            let request = request.clone();
            async move { self.http_session().reactions_remove(&request).await }
        })
        .await
        .map(|_| ())
    }

    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Option<FetchedMessage>> {
        let request = SlackApiConversationsHistoryRequest {
            channel: Some(SlackChannelId(channel.to_owned())),
            cursor: None,
            latest: Some(SlackTs(ts.to_owned())),
            limit: Some(1),
            oldest: None,
            inclusive: Some(true),
            include_all_metadata: None,
        };
        let response = self
            .with_rate_limit_retry("conversations.history", || {
                let request = request.clone();
                async move { self.http_session().conversations_history(&request).await }
            })
            .await?;

        Ok(response
            .messages
            .into_iter()
            .find(|m| m.origin.ts.to_string() == ts)
            .map(|m| FetchedMessage {
                text: m.content.text.clone().unwrap_or_default(),
                user: m.sender.user.as_ref().map(SlackUserId::to_string),
                is_bot: m.sender.bot_id.is_some(),
            }))
    }

    async fn channel_info(&self, channel: &str) -> Result<ChannelInfo> {
        let request = SlackApiConversationsInfoRequest::new(SlackChannelId(channel.to_owned()));
        let response = self
            .with_rate_limit_retry("conversations.info", || {
                let request = request.clone();
                async move { self.http_session().conversations_info(&request).await }
            })
            .await?;
        Ok(ChannelInfo {
            name: response.channel.name.clone().unwrap_or_default(),
            topic: response
                .channel
                .topic
                .as_ref()
                .map(|topic| topic.value.clone())
                .unwrap_or_default(),
        })
    }

    async fn open_dm(&self, user: &str) -> Result<String> {
        let request = SlackApiConversationsOpenRequest::new()
            .with_users(vec![SlackUserId(user.to_owned())]);
        let response = self
            .with_rate_limit_retry("conversations.open", || {
                let request = request.clone();
                async move { self.http_session().conversations_open(&request).await }
            })
            .await?;
        Ok(response.channel.id.to_string())
    }

    async fn upload_file(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<()> {
        let session = self.http_session();

        // Step 1: Get upload URL.
        let url_request =
            SlackApiFilesGetUploadUrlExternalRequest::new(filename.into(), content.len());
        let url_response = session
            .get_upload_url_external(&url_request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to get upload url: {err}")))?;

        // Step 2: Upload content to the URL.
        self.http
            .post(url_response.upload_url.0.to_string())
            .body(content)
            .send()
            .await
            .map_err(|err| AppError::Slack(format!("failed to upload file: {err}")))?;

        // Step 3: Complete the upload.
        let file_ref = SlackApiFilesComplete {
            id: url_response.file_id,
            title: Some(filename.into()),
        };
        let mut complete_request = SlackApiFilesCompleteUploadExternalRequest::new(vec![file_ref]);
        complete_request.channel_id = Some(SlackChannelId(channel.to_owned()));
        complete_request.thread_ts = thread_ts.map(|ts| SlackTs(ts.to_owned()));
        session
            .files_complete_upload_external(&complete_request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to complete upload: {err}")))?;

        Ok(())
    }

    async fn download_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token_value)
            .send()
            .await
            .map_err(|err| AppError::Slack(format!("file download failed: {err}")))?;
        if !response.status().is_success() {
            return Err(AppError::Slack(format!(
                "file download failed: {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::Slack(format!("file download read failed: {err}")))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        file.write_all(&bytes).await?;
        Ok(bytes.len() as u64)
    }
}
