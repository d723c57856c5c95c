use std::{error::Error, fmt};

use uuid::Uuid;

use crate::escrow::LedgerFailure;

#[derive(Debug)]
pub enum EscrowError {
    Simple(String),
    ProtocolViolation(String),
    Timeout(String),
    InvalidDisputeResult(String),
    PayoutInvariantViolation(String),
    LedgerFailure(LedgerFailure),
    DeserializationFailure(String),
    AlreadyClosed(Uuid),
    Io(std::io::Error),
    SerdesJson(serde_json::Error),
    Secp256k1(secp256k1::Error),
    MpscSend(String),
    OneshotRecv(String),
}

impl EscrowError {
    /// Errors an operator has to look at by hand. These are never retried.
    pub fn needs_escalation(&self) -> bool {
        matches!(
            self,
            EscrowError::InvalidDisputeResult(_) | EscrowError::PayoutInvariantViolation(_)
        )
    }
}

impl Error for EscrowError {}

impl fmt::Display for EscrowError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let error_string = match self {
            EscrowError::Simple(msg) => format!("Escrow-Error | Other - {}", msg),
            EscrowError::ProtocolViolation(msg) => {
                format!("Escrow-Error | ProtocolViolation - {}", msg)
            }
            EscrowError::Timeout(msg) => format!("Escrow-Error | Timeout - {}", msg),
            EscrowError::InvalidDisputeResult(msg) => {
                format!("Escrow-Error | InvalidDisputeResult - {}", msg)
            }
            EscrowError::PayoutInvariantViolation(msg) => {
                format!("Escrow-Error | PayoutInvariantViolation - {}", msg)
            }
            EscrowError::LedgerFailure(failure) => {
                format!("Escrow-Error | LedgerFailure - {}", failure)
            }
            EscrowError::DeserializationFailure(msg) => {
                format!("Escrow-Error | DeserializationFailure - {}", msg)
            }
            EscrowError::AlreadyClosed(trade_uuid) => {
                format!(
                    "Escrow-Error | AlreadyClosed - Dispute for TradeUUID {} is already closed",
                    trade_uuid
                )
            }
            EscrowError::Io(err) => format!("Escrow-Error | IoError - {}", err),
            EscrowError::SerdesJson(err) => format!("Escrow-Error | SerdesJsonError - {}", err),
            EscrowError::Secp256k1(err) => format!("Escrow-Error | Secp256k1Error - {}", err),
            EscrowError::MpscSend(msg) => format!("Escrow-Error | MpscSendError - {}", msg),
            EscrowError::OneshotRecv(msg) => format!("Escrow-Error | OneshotRecvError - {}", msg),
        };
        write!(f, "{}", error_string)
    }
}

impl From<LedgerFailure> for EscrowError {
    fn from(e: LedgerFailure) -> EscrowError {
        EscrowError::LedgerFailure(e)
    }
}

impl From<std::io::Error> for EscrowError {
    fn from(e: std::io::Error) -> EscrowError {
        EscrowError::Io(e)
    }
}

impl From<serde_json::Error> for EscrowError {
    fn from(e: serde_json::Error) -> EscrowError {
        EscrowError::SerdesJson(e)
    }
}

impl From<secp256k1::Error> for EscrowError {
    fn from(e: secp256k1::Error) -> EscrowError {
        EscrowError::Secp256k1(e)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EscrowError {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> EscrowError {
        EscrowError::MpscSend(e.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for EscrowError {
    fn from(e: tokio::sync::oneshot::error::RecvError) -> EscrowError {
        EscrowError::OneshotRecv(e.to_string())
    }
}
