//! Update dispatch: turns Telegram messages into collector and summarizer calls and
//! every outcome into exactly one reply.

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use super::client::{ChatTransport, OutgoingMessage, SentMessage};
use super::parser::{Message, Update};
use super::response_builder::{
    CANCEL_REPLY, LOG_FORBIDDEN, LOG_HISTORY_LIMIT, NEXT_MESSAGE_REPLY, PRIVATE_CHAT_ONLY,
    START_REPLY, SUMMARIZING_PLACEHOLDER, WHITELIST_GRANTED,
    first_message_reply, help_text, log_text,
};
use crate::audit::{AccessControl, AuditSink};
use crate::collect::Collector;
use crate::core::models::UserId;
use crate::errors::{BotError, DigestError};
use crate::utils::escape::Dialect;
use crate::worker::deliver::{deliver_outcome, retire_placeholder, send_with_plain_fallback};
use crate::worker::summarize::Summarizer;

pub struct DigestBot {
    transport: Arc<dyn ChatTransport>,
    collector: Collector,
    summarizer: Summarizer,
    audit: Arc<dyn AuditSink>,
    access: Arc<dyn AccessControl>,
    has_user_limitation: bool,
}

impl DigestBot {
    #[must_use]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        collector: Collector,
        summarizer: Summarizer,
        audit: Arc<dyn AuditSink>,
        access: Arc<dyn AccessControl>,
        has_user_limitation: bool,
    ) -> Self {
        Self {
            transport,
            collector,
            summarizer,
            audit,
            access,
            has_user_limitation,
        }
    }

    /// Handle one update. Failures are logged here; the polling loop never sees them.
    pub async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            debug!(update_id = update.update_id, "ignoring update without message");
            return;
        };
        let span = info_span!(
            "update",
            correlation_id = %Uuid::new_v4(),
            update_id = update.update_id,
            chat_id = message.chat.id,
        );
        async {
            if let Err(e) = self.handle_message(&message).await {
                error!(error = %e, "failed to handle message");
            }
        }
        .instrument(span)
        .await;
    }

    async fn handle_message(&self, message: &Message) -> Result<(), BotError> {
        let Some(user) = message.from.as_ref().map(|u| u.id) else {
            debug!("ignoring message without sender");
            return Ok(());
        };

        if let Some(command) = message.command() {
            if !message.chat.is_private() {
                self.reply(message, PRIVATE_CHAT_ONLY, None).await?;
                return Ok(());
            }
            return self.handle_command(message, user, &command).await;
        }

        if !message.chat.is_private() {
            debug!("ignoring non-command message outside a private chat");
            return Ok(());
        }
        self.handle_submission(message, user).await
    }

    async fn handle_command(
        &self,
        message: &Message,
        user: UserId,
        command: &str,
    ) -> Result<(), BotError> {
        info!(user, command, "command received");
        match command {
            "start" => {
                let text = match self.collector.start(user).await {
                    Ok(()) => START_REPLY,
                    Err(e) => e.user_message(),
                };
                self.reply(message, text, None).await?;
            }
            "finish" => self.finish(message, user).await?,
            "cancel" => {
                let text = match self.collector.cancel(user).await {
                    Ok(()) => CANCEL_REPLY,
                    Err(e) => e.user_message(),
                };
                self.reply(message, text, None).await?;
            }
            "log" => self.show_log(message, user).await?,
            "init" => {
                if self.has_user_limitation && self.access.grant_first_user(user).await? {
                    info!(user, "first user added to whitelist");
                    self.reply(message, WHITELIST_GRANTED, None).await?;
                }
            }
            "help" | "about" | "settings" | "privacy" => {
                self.reply(message, &help_text(), Some(Dialect::Html)).await?;
            }
            _ => debug!(user, command, "ignoring unknown command"),
        }
        Ok(())
    }

    async fn handle_submission(&self, message: &Message, user: UserId) -> Result<(), BotError> {
        let Some(candidate) = message.to_candidate() else {
            debug!(user, "ignoring message that was not forwarded");
            return Ok(());
        };
        match self.collector.submit(user, &candidate).await {
            Ok(outcome) if outcome.first => {
                let text = first_message_reply(&outcome.channel, outcome.message_id);
                self.reply(message, &text, Some(Dialect::Markdown)).await?;
            }
            Ok(_) => {
                self.reply(message, NEXT_MESSAGE_REPLY, None).await?;
            }
            Err(e) => {
                log_rejection(user, &e);
                self.reply(message, e.user_message(), None).await?;
            }
        }
        Ok(())
    }

    async fn finish(&self, message: &Message, user: UserId) -> Result<(), BotError> {
        let batch = match self.summarizer.prepare(user).await {
            Ok(batch) => batch,
            Err(e) => {
                log_rejection(user, &e);
                self.reply(message, e.user_message(), None).await?;
                return Ok(());
            }
        };

        let placeholder = match self.reply(message, SUMMARIZING_PLACEHOLDER, None).await {
            Ok(sent) => sent,
            Err(e) => {
                self.summarizer.abandon(user).await;
                return Err(e);
            }
        };
        let outcome = self.summarizer.complete(user, batch).await;
        let delivered = deliver_outcome(
            &*self.transport,
            message.chat.id,
            message.message_id,
            &outcome,
        )
        .await;
        retire_placeholder(&*self.transport, placeholder).await;
        delivered
    }

    async fn show_log(&self, message: &Message, user: UserId) -> Result<(), BotError> {
        if !self.access.can_view_logs(user).await? {
            self.reply(message, LOG_FORBIDDEN, None).await?;
            return Ok(());
        }
        let records = self.audit.history(user, LOG_HISTORY_LIMIT).await?;
        let total = self.audit.total_tokens().await?;
        self.reply(message, &log_text(&records, total), Some(Dialect::Markdown)).await?;
        Ok(())
    }

    async fn reply(
        &self,
        message: &Message,
        text: &str,
        dialect: Option<Dialect>,
    ) -> Result<SentMessage, BotError> {
        let outgoing = OutgoingMessage::plain(message.chat.id, text).reply_to(message.message_id);
        match dialect {
            Some(dialect) => {
                send_with_plain_fallback(&*self.transport, outgoing.with_parse_mode(dialect)).await
            }
            None => self.transport.send(&outgoing).await,
        }
    }
}

fn log_rejection(user: UserId, error: &DigestError) {
    match error {
        DigestError::UnexpectedFailure(detail) => {
            error!(user, detail = %detail, "request failed unexpectedly");
        }
        other => debug!(user, reason = %other, "request rejected"),
    }
}
