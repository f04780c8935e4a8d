//! Per-invocation exchange handle for server-side handlers
//!
//! Every tool/resource/prompt/completion handler receives an [`Exchange`]:
//! its window onto the connected client. Through it a handler can read the
//! peer's declared capabilities, issue requests back to the client
//! (`sampling/createMessage`, `roots/list`), and emit
//! `notifications/message` log entries honoring the client's minimum level.

use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::protocol::{
    ClientCapabilities, CreateMessageParams, CreateMessageResult, Implementation, ListRootsResult,
    LoggingLevel, LoggingMessageParams, methods, notifications,
};
use crate::session::{Peer, Session, SessionPhase};

/// Handle giving an inbound handler access to peer state and outbound
/// operations. Cheap to clone.
#[derive(Clone)]
pub struct Exchange {
    session: Session,
    min_log_level: Arc<RwLock<LoggingLevel>>,
    logging_declared: bool,
}

impl Exchange {
    pub(crate) fn new(
        session: Session,
        min_log_level: Arc<RwLock<LoggingLevel>>,
        logging_declared: bool,
    ) -> Self {
        Self {
            session,
            min_log_level,
            logging_declared,
        }
    }

    /// The client's identity, as sent in `initialize`.
    pub fn client_info(&self) -> Option<Implementation> {
        self.session.peer().map(|peer| peer.info().clone())
    }

    /// The client's declared capabilities.
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        match self.session.peer() {
            Some(Peer::Client { capabilities, .. }) => Some(capabilities),
            _ => None,
        }
    }

    /// Whether the session is shutting down. Long-running handlers should
    /// poll this and return promptly once it turns true.
    pub fn is_closing(&self) -> bool {
        matches!(
            self.session.phase(),
            SessionPhase::Closing | SessionPhase::Closed
        )
    }

    /// Delegate an LLM completion to the client.
    ///
    /// Refused locally when the client did not declare the `sampling`
    /// capability during initialize.
    pub async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult> {
        let declared = self
            .client_capabilities()
            .map(|caps| caps.sampling.is_some())
            .unwrap_or(false);
        if !declared {
            return Err(Error::Mcp(
                "client did not declare sampling capability".to_string(),
            ));
        }

        let codec = self.session.codec();
        let result = self
            .session
            .request(
                methods::SAMPLING_CREATE_MESSAGE,
                Some(codec.to_value(&params)?),
            )
            .await?;
        codec.from_value(result)
    }

    /// Ask the client for its current filesystem roots.
    pub async fn list_roots(&self) -> Result<ListRootsResult> {
        let codec = self.session.codec();
        let result = self.session.request(methods::ROOTS_LIST, None).await?;
        codec.from_value(result)
    }

    /// Emit a `notifications/message` log entry.
    ///
    /// Dropped silently when the server did not declare `logging` or the
    /// entry is below the client's minimum level.
    pub async fn log(&self, params: LoggingMessageParams) -> Result<()> {
        if !self.logging_declared {
            return Ok(());
        }
        let min = *self.min_log_level.read().expect("level lock poisoned");
        if params.level < min {
            return Ok(());
        }
        let codec = self.session.codec();
        self.session
            .notify(notifications::MESSAGE, Some(codec.to_value(&params)?))
            .await
    }

    /// Convenience wrapper building a text log entry.
    pub async fn log_text(
        &self,
        level: LoggingLevel,
        logger: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<()> {
        self.log(LoggingMessageParams {
            level,
            logger: Some(logger.into()),
            data: Some(serde_json::Value::String(text.into())),
        })
        .await
    }
}
