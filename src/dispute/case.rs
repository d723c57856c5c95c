use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::common::{error::EscrowError, types::Party};

use super::{result::DisputeReason, DisputeResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: Url,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationMessage {
    pub message_id: Uuid,
    pub trade_uuid: Uuid,
    pub sender: Party,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    pub attachment: Option<Attachment>,
}

impl CommunicationMessage {
    pub fn new(
        trade_uuid: Uuid,
        sender: Party,
        body: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            trade_uuid,
            sender,
            timestamp: Utc::now(),
            body: body.into(),
            attachment,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
pub enum DisputeStatus {
    Open,
    Closed,
}

/// Append-only record of a dispute. Closed exactly once, by the signed result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisputeCase {
    trade_uuid: Uuid,
    opened_by: Party,
    opened_reason: DisputeReason,
    opened_at: DateTime<Utc>,
    messages: Vec<CommunicationMessage>,
    result: Option<DisputeResult>,
}

impl DisputeCase {
    pub fn new(trade_uuid: Uuid, opened_by: Party, opened_reason: DisputeReason) -> Self {
        Self {
            trade_uuid,
            opened_by,
            opened_reason,
            opened_at: Utc::now(),
            messages: Vec::new(),
            result: None,
        }
    }

    pub fn trade_uuid(&self) -> Uuid {
        self.trade_uuid
    }

    pub fn opened_by(&self) -> Party {
        self.opened_by
    }

    pub fn opened_reason(&self) -> DisputeReason {
        self.opened_reason
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn messages(&self) -> &[CommunicationMessage] {
        &self.messages
    }

    pub fn result(&self) -> Option<&DisputeResult> {
        self.result.as_ref()
    }

    pub fn status(&self) -> DisputeStatus {
        if self.result.is_some() {
            DisputeStatus::Closed
        } else {
            DisputeStatus::Open
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status() == DisputeStatus::Closed
    }

    /// Appends a message to the log. Returns `false` if a message with the
    /// same id is already present, in which case the log is left as is.
    pub fn append(&mut self, message: CommunicationMessage) -> Result<bool, EscrowError> {
        if self.is_closed() {
            return Err(EscrowError::AlreadyClosed(self.trade_uuid));
        }
        self.append_unchecked(message)
    }

    /// The only status change a case ever goes through.
    pub fn close_with_result(&mut self, result: DisputeResult) -> Result<(), EscrowError> {
        if self.is_closed() {
            return Err(EscrowError::AlreadyClosed(self.trade_uuid));
        }
        if result.trade_uuid() != self.trade_uuid {
            return Err(EscrowError::ProtocolViolation(format!(
                "Dispute for TradeUUID {} cannot be closed by a result for TradeUUID {}",
                self.trade_uuid,
                result.trade_uuid()
            )));
        }
        if let Some(message) = result.communication_message() {
            self.append_unchecked(message.clone())?;
        }
        self.result = Some(result);
        Ok(())
    }

    fn append_unchecked(&mut self, message: CommunicationMessage) -> Result<bool, EscrowError> {
        if message.trade_uuid != self.trade_uuid {
            return Err(EscrowError::ProtocolViolation(format!(
                "Message {} for TradeUUID {} appended to dispute for TradeUUID {}",
                message.message_id, message.trade_uuid, self.trade_uuid
            )));
        }
        if self
            .messages
            .iter()
            .any(|existing| existing.message_id == message.message_id)
        {
            debug!(
                "Trade w/ TradeUUID {} dispute message {} already in log",
                self.trade_uuid, message.message_id
            );
            return Ok(false);
        }
        self.messages.push(message);
        Ok(true)
    }
}
