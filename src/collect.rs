//! Per-user collection state machine: `start`, `submit`, `cancel`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::audit::AccessControl;
use crate::core::models::{
    Candidate, ChannelInfo, CollectedMessage, ForwardOrigin, SessionState, SubmitOutcome,
    UserId,
};
use crate::errors::{BotError, DigestError};
use crate::session::SessionStore;

/// Looks up title and description of a channel (Telegram `getChat`).
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn channel_info(&self, chat_id: i64) -> Result<ChannelInfo, BotError>;
}

pub struct Collector {
    store: Arc<dyn SessionStore>,
    access: Arc<dyn AccessControl>,
    directory: Arc<dyn ChannelDirectory>,
    has_user_limitation: bool,
}

impl Collector {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        access: Arc<dyn AccessControl>,
        directory: Arc<dyn ChannelDirectory>,
        has_user_limitation: bool,
    ) -> Self {
        Self {
            store,
            access,
            directory,
            has_user_limitation,
        }
    }

    /// Open a fresh collecting session. Calling it again starts over with an empty batch.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when user limitation is on and the user is not whitelisted,
    /// `UnexpectedFailure` when a collaborator fails.
    pub async fn start(&self, user: UserId) -> Result<(), DigestError> {
        if self.has_user_limitation && !self.access.is_authorized(user).await? {
            info!(user, "start refused: not on whitelist");
            return Err(DigestError::Unauthorized);
        }
        self.store.begin(user).await?;
        info!(user, "collection session started");
        Ok(())
    }

    /// Validate a forwarded message and add it to the user's batch.
    ///
    /// A rejected candidate never changes the stored session.
    ///
    /// # Errors
    ///
    /// `NoActiveSession`, `SummaryInProgress`, `UnsupportedContent`, `InvalidOrigin` or
    /// `ChannelMismatch` for rejected candidates, `UnexpectedFailure` when a collaborator fails.
    pub async fn submit(
        &self,
        user: UserId,
        candidate: &Candidate,
    ) -> Result<SubmitOutcome, DigestError> {
        let session = self.store.snapshot(user).await?;
        match session.state {
            SessionState::Collecting => {}
            SessionState::Summarizing => return Err(DigestError::SummaryInProgress),
            SessionState::Idle => return Err(DigestError::NoActiveSession),
        }

        let text = candidate.content().ok_or(DigestError::UnsupportedContent)?;

        let ForwardOrigin::Channel {
            chat_id,
            message_id,
        } = candidate.origin
        else {
            return Err(DigestError::InvalidOrigin);
        };

        let (channel, first) = match session.channel {
            Some(locked) if locked.id != chat_id => {
                info!(user, locked = locked.id, offered = chat_id, "channel mismatch");
                return Err(DigestError::ChannelMismatch);
            }
            Some(locked) => (locked, false),
            None => {
                let info = self.directory.channel_info(chat_id).await?;
                let Some(locked) = self.store.lock_channel(user, &info).await? else {
                    return Err(DigestError::NoActiveSession);
                };
                if locked.id != chat_id {
                    warn!(user, locked = locked.id, offered = chat_id, "lost channel lock race");
                    return Err(DigestError::ChannelMismatch);
                }
                (locked, true)
            }
        };

        let message = CollectedMessage {
            text: text.to_string(),
            message_id,
        };
        // The session may have been finished or cancelled since the snapshot.
        let Some(count) = self.store.append(user, &message).await? else {
            info!(user, message_id, "session closed before the message was stored");
            return Err(DigestError::NoActiveSession);
        };
        info!(user, channel = channel.id, message_id, count, "message collected");

        Ok(SubmitOutcome {
            count,
            first,
            channel,
            message_id,
        })
    }

    /// Drop the session; cancelling an idle user is a no-op.
    ///
    /// # Errors
    ///
    /// `UnexpectedFailure` when the store cannot be reached.
    pub async fn cancel(&self, user: UserId) -> Result<(), DigestError> {
        self.store.clear(user).await?;
        info!(user, "collection session cancelled");
        Ok(())
    }
}
