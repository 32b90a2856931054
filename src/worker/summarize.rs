//! `/finish`: turn the collected batch into a grouped, linked summary.
//!
//! [`Summarizer::prepare`] claims the batch so concurrent `/finish` calls cannot both
//! consume it. Each later stage returns a value or a typed [`DigestError`];
//! [`Summarizer::complete`] alone decides, from the final result, whether the claimed
//! batch is dropped or handed back to collection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::ai::prompt_builder::{
    PromptMessage, SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE, build_payload, build_system_prompt,
};
use crate::ai::{ModelClient, ModelError, ModelRequest, Moderator};
use crate::audit::AuditSink;
use crate::core::models::{
    AuditRecord, ChannelInfo, CollectedMessage, Digest, SessionState, SummaryGroup,
    SummaryResponse, UserId,
};
use crate::errors::DigestError;
use crate::session::SessionStore;
use crate::telegram::response_builder::render_summary;

/// A batch claimed by [`Summarizer::prepare`]. Until [`Summarizer::complete`] or
/// [`Summarizer::abandon`] runs, the session rejects new messages and other `/finish`
/// calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBatch {
    pub channel: ChannelInfo,
    pub messages: Vec<CollectedMessage>,
}

pub struct Summarizer {
    store: Arc<dyn SessionStore>,
    model: Arc<dyn ModelClient>,
    moderator: Option<Arc<dyn Moderator>>,
    audit: Arc<dyn AuditSink>,
    model_timeout: Duration,
}

impl Summarizer {
    /// `moderator` is `None` when the moderation pass is disabled.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        model: Arc<dyn ModelClient>,
        moderator: Option<Arc<dyn Moderator>>,
        audit: Arc<dyn AuditSink>,
        model_timeout: Duration,
    ) -> Self {
        Self {
            store,
            model,
            moderator,
            audit,
            model_timeout,
        }
    }

    /// Summarize the user's batch and close the session when the attempt is over.
    ///
    /// # Errors
    ///
    /// Any [`DigestError`] of the pipeline; see [`DigestError::clears_session`] for which
    /// of them leave the batch in place.
    pub async fn finish(&self, user: UserId) -> Result<Digest, DigestError> {
        let batch = self.prepare(user).await?;
        self.complete(user, batch).await
    }

    /// Claim the batch `/finish` will work on.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` when the user is not collecting, `SummaryInProgress` when
    /// another `/finish` already claimed the batch, `EmptyBatch` when nothing was
    /// collected yet. None of them change the session.
    pub async fn prepare(&self, user: UserId) -> Result<PreparedBatch, DigestError> {
        let session = self.store.claim(user).await?;
        match session.state {
            SessionState::Collecting => {}
            SessionState::Summarizing => return Err(DigestError::SummaryInProgress),
            SessionState::Idle => return Err(DigestError::NoActiveSession),
        }
        if session.messages.is_empty() {
            return Err(DigestError::EmptyBatch);
        }
        let Some(channel) = session.channel else {
            self.abandon(user).await;
            return Err(DigestError::UnexpectedFailure(
                "collected messages without a channel lock".to_string(),
            ));
        };
        Ok(PreparedBatch {
            channel,
            messages: session.messages,
        })
    }

    /// Hand a claimed batch back to collection without summarizing it.
    pub async fn abandon(&self, user: UserId) {
        if let Err(e) = self.store.release(user).await {
            error!(user, error = %e, "failed to release summary claim");
        }
    }

    /// Run the model over a claimed batch, then drop or release it and audit according
    /// to the result.
    ///
    /// # Errors
    ///
    /// See [`Summarizer::finish`].
    pub async fn complete(
        &self,
        user: UserId,
        batch: PreparedBatch,
    ) -> Result<Digest, DigestError> {
        let outcome = self.summarize(user, &batch.channel, &batch.messages).await;

        let clear = match &outcome {
            Ok(_) => true,
            Err(e) => e.clears_session(),
        };
        if clear {
            if let Err(e) = self.store.consume(user).await {
                error!(user, error = %e, "failed to clear session after finish");
            }
        } else {
            self.abandon(user).await;
        }

        match &outcome {
            Ok(digest) => {
                let entry = AuditRecord {
                    user_id: user,
                    target_channel_id: digest.channel.id,
                    tokens_spent: digest.tokens_spent,
                    timestamp_secs: chrono::Utc::now().timestamp(),
                };
                if let Err(e) = self.audit.record(entry).await {
                    error!(user, error = %e, "failed to record summarization");
                }
                info!(
                    user,
                    channel = digest.channel.id,
                    groups = digest.groups.len(),
                    tokens = digest.tokens_spent,
                    "summary produced"
                );
            }
            Err(e) => warn!(user, error = %e, cleared = clear, "summarization failed"),
        }

        outcome
    }

    async fn summarize(
        &self,
        user: UserId,
        channel: &ChannelInfo,
        messages: &[CollectedMessage],
    ) -> Result<Digest, DigestError> {
        let kept = self.moderate(messages).await?;
        if kept.is_empty() {
            info!(user, "every collected message was excluded by moderation");
            return Err(DigestError::EmptySummary);
        }

        let prompt: Vec<PromptMessage<'_>> =
            kept.iter().copied().map(PromptMessage::from).collect();
        let payload = build_payload(&prompt)
            .map_err(|e| DigestError::UnexpectedFailure(format!("payload encoding: {e}")))?;
        let request = ModelRequest {
            system: build_system_prompt(channel),
            payload,
            max_tokens: SUMMARY_MAX_TOKENS,
            temperature: SUMMARY_TEMPERATURE,
            user: user.to_string(),
        };

        let call = tokio::time::timeout(self.model_timeout, self.model.complete(request)).await;
        let response = call.unwrap_or(Err(ModelError::Timeout)).map_err(|e| match e {
            ModelError::ContextLengthExceeded => DigestError::BatchTooLarge,
            other => DigestError::ModelUnavailable(other.to_string()),
        })?;

        let groups = parse_summary(response.content.as_deref())?;
        let allowed: HashSet<i64> = kept.iter().map(|m| m.message_id).collect();
        let groups = retain_known_ids(groups, &allowed);
        if groups.is_empty() {
            return Err(DigestError::EmptySummary);
        }

        Ok(Digest {
            text: render_summary(channel, &groups),
            channel: channel.clone(),
            groups,
            tokens_spent: response.total_tokens.unwrap_or(0),
        })
    }

    /// Messages that may enter the prompt. Checks run concurrently; any failed check
    /// fails the whole pass.
    async fn moderate<'a>(
        &self,
        messages: &'a [CollectedMessage],
    ) -> Result<Vec<&'a CollectedMessage>, DigestError> {
        let Some(moderator) = &self.moderator else {
            return Ok(messages.iter().collect());
        };

        let verdicts = join_all(messages.iter().map(|m| moderator.is_flagged(&m.text))).await;

        let mut kept = Vec::with_capacity(messages.len());
        for (message, verdict) in messages.iter().zip(verdicts) {
            match verdict {
                Ok(false) => kept.push(message),
                Ok(true) => info!(message_id = message.message_id, "message flagged by moderation"),
                Err(e) => {
                    return Err(DigestError::ModelUnavailable(format!("moderation failed: {e}")));
                }
            }
        }
        Ok(kept)
    }
}

/// Validate the model's answer against the `{ "result": [...] }` schema.
///
/// # Errors
///
/// `MalformedResponse` for missing content, invalid JSON or a wrong shape,
/// `EmptySummary` when `result` is an empty list.
pub fn parse_summary(content: Option<&str>) -> Result<Vec<SummaryGroup>, DigestError> {
    let raw = content
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| DigestError::MalformedResponse("response is empty".to_string()))?;
    let parsed: SummaryResponse = serde_json::from_str(raw)
        .map_err(|e| DigestError::MalformedResponse(e.to_string()))?;
    if parsed.result.is_empty() {
        return Err(DigestError::EmptySummary);
    }
    Ok(parsed.result)
}

/// Drop items whose id was never offered or was already used by an earlier item,
/// then drop groups left without items.
#[must_use]
pub fn retain_known_ids(groups: Vec<SummaryGroup>, allowed: &HashSet<i64>) -> Vec<SummaryGroup> {
    let mut seen: HashSet<i64> = HashSet::new();
    groups
        .into_iter()
        .filter_map(|mut group| {
            group
                .messages
                .retain(|item| allowed.contains(&item.id) && seen.insert(item.id));
            (!group.messages.is_empty()).then_some(group)
        })
        .collect()
}
