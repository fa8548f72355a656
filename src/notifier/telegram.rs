use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

use crate::error::NotifyError;
use crate::model::NotificationPayload;
use crate::notification::escape_html;
use crate::notifier::Notifier;

const SEND_TIMEOUT_SECS: u64 = 10;

/// Delivers payloads through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self, Report<NotifyError>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .change_context(delivery_error())
            .attach("failed to build HTTP client")?;
        let api_base: String = api_base.into();

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_owned(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

impl Notifier for TelegramNotifier {
    fn notify<'a>(
        &'a self,
        payload: &'a NotificationPayload,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            let request = build_send_message(&self.chat_id, payload);

            // The URL embeds the bot token, keep it out of error attachments.
            let response = self
                .client
                .post(self.send_message_url())
                .json(&request)
                .send()
                .await
                .map_err(reqwest::Error::without_url)
                .change_context(delivery_error())?;

            if !response.status().is_success() {
                return Err(Report::new(delivery_error())
                    .attach(format!("HTTP status: {}", response.status())));
            }

            debug!(channel = payload.channel_key, "telegram message delivered");
            Ok(())
        })
    }
}

fn delivery_error() -> NotifyError {
    NotifyError::Delivery {
        channel: "telegram".into(),
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

fn build_send_message<'a>(chat_id: &'a str, payload: &'a NotificationPayload) -> SendMessage<'a> {
    let options = &payload.telegram;
    SendMessage {
        chat_id,
        text: format!("{}\n\n{}", options.title, escape_html(&payload.body)),
        parse_mode: options.parse_mode,
        disable_web_page_preview: options.disable_web_page_preview,
    }
}
