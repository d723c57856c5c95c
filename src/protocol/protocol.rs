use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use strum_macros::{Display, IntoStaticStr};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    comms::Messenger,
    common::{
        error::EscrowError,
        types::{Party, TradeSide},
    },
    config::TradeConfig,
    dispute::{
        ArbitratorRegistry, Attachment, CommunicationMessage, DisputeCase, DisputeReason,
        DisputeResult,
    },
    escrow::{
        arbitrated_payout, mutual_completion_payout, validate_payout, LedgerRef, Payout,
        PayoutKind, RetryingLedger,
    },
    store::DurableStore,
    trade::{Trade, TradeState},
};

use super::{
    message::{TradeEnvelope, TradeMessage, TradeMessageKind},
    role::{LocalAction, RoleCapabilities},
};

/// Outcome of a request the trade accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Transitioned { from: TradeState, to: TradeState },
    Recorded,
    Duplicate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TradeNotif {
    StateChanged {
        trade_uuid: Uuid,
        from: TradeState,
        to: TradeState,
    },
    DisputeMessage(CommunicationMessage),
    Violation {
        trade_uuid: Uuid,
        detail: String,
    },
    Escalation {
        trade_uuid: Uuid,
        detail: String,
    },
    DeadlineExpired {
        trade_uuid: Uuid,
        state: TradeState,
    },
}

/// Collaborators shared by every trade actor of a node.
#[derive(Clone)]
pub(crate) struct ProtocolContext {
    pub(crate) store: Arc<dyn DurableStore>,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) ledger: RetryingLedger,
    pub(crate) arbitrators: Arc<ArbitratorRegistry>,
    pub(crate) config: Arc<TradeConfig>,
    pub(crate) local_address: Url,
}

#[derive(Clone)]
pub struct TradeAccess {
    tx: mpsc::Sender<TradeRequest>,
}

impl TradeAccess {
    fn new(tx: mpsc::Sender<TradeRequest>) -> Self {
        Self { tx }
    }

    pub(crate) async fn begin(&self) -> Result<Applied, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<Applied, EscrowError>>();
        let request = TradeRequest::Begin { rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn apply_incoming_message(
        &self,
        envelope: TradeEnvelope,
    ) -> Result<Applied, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<Applied, EscrowError>>();
        let request = TradeRequest::IncomingMessage { envelope, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn confirm_payment_started(&self) -> Result<Applied, EscrowError> {
        self.local_action(LocalAction::ConfirmPaymentStarted).await
    }

    pub async fn confirm_payment_received(&self) -> Result<Applied, EscrowError> {
        self.local_action(LocalAction::ConfirmPaymentReceived).await
    }

    async fn local_action(&self, action: LocalAction) -> Result<Applied, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<Applied, EscrowError>>();
        let request = TradeRequest::LocalAction { action, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn cancel(&self, reason: impl Into<String>) -> Result<Applied, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<Applied, EscrowError>>();
        let request = TradeRequest::Cancel {
            reason: reason.into(),
            rsp_tx,
        };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn open_dispute(&self, reason: DisputeReason) -> Result<Applied, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<Applied, EscrowError>>();
        let request = TradeRequest::OpenDispute { reason, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn send_dispute_message(
        &self,
        body: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Result<CommunicationMessage, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<CommunicationMessage, EscrowError>>();
        let request = TradeRequest::SendDisputeMessage {
            body: body.into(),
            attachment,
            rsp_tx,
        };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    /// For results that reach the node out of band, eg. entered by an operator.
    pub async fn apply_dispute_result(
        &self,
        result: DisputeResult,
    ) -> Result<Applied, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<Applied, EscrowError>>();
        let request = TradeRequest::ApplyDisputeResult { result, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn retry_payout(&self) -> Result<Applied, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<Applied, EscrowError>>();
        let request = TradeRequest::RetryPayout { rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn query_trade(&self) -> Result<Trade, EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Trade>();
        let request = TradeRequest::QueryTrade { rsp_tx };
        self.tx.send(request).await?;
        Ok(rsp_rx.await?)
    }

    pub async fn register_notif_tx(
        &self,
        tx: mpsc::Sender<TradeNotif>,
    ) -> Result<(), EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), EscrowError>>();
        let request = TradeRequest::RegisterNotifTx { tx, rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn unregister_notif_tx(&self) -> Result<(), EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), EscrowError>>();
        let request = TradeRequest::UnregisterNotifTx { rsp_tx };
        self.tx.send(request).await?;
        rsp_rx.await?
    }

    pub async fn shutdown(&self) -> Result<(), EscrowError> {
        let (rsp_tx, rsp_rx) = oneshot::channel::<Result<(), EscrowError>>();
        let request = TradeRequest::Shutdown { rsp_tx };
        self.tx.send(request).await?; // Shutdown is allowed to fail if already shutdown
        rsp_rx.await?
    }
}

pub(crate) struct TradeProtocol {
    tx: mpsc::Sender<TradeRequest>,
    pub(crate) task_handle: tokio::task::JoinHandle<()>,
}

impl TradeProtocol {
    pub(crate) fn new(trade: Trade, context: ProtocolContext) -> Self {
        let channel_size = context.config.request_channel_size.max(1);
        let (tx, rx) = mpsc::channel::<TradeRequest>(channel_size);
        let actor = TradeActor::new(rx, trade, context);
        let task_handle = tokio::spawn(async move { actor.run().await });
        Self { tx, task_handle }
    }

    pub(crate) fn new_accessor(&self) -> TradeAccess {
        TradeAccess::new(self.tx.clone())
    }
}

#[derive(Display, IntoStaticStr)]
enum TradeRequest {
    Begin {
        rsp_tx: oneshot::Sender<Result<Applied, EscrowError>>,
    },
    IncomingMessage {
        envelope: TradeEnvelope,
        rsp_tx: oneshot::Sender<Result<Applied, EscrowError>>,
    },
    LocalAction {
        action: LocalAction,
        rsp_tx: oneshot::Sender<Result<Applied, EscrowError>>,
    },
    Cancel {
        reason: String,
        rsp_tx: oneshot::Sender<Result<Applied, EscrowError>>,
    },
    OpenDispute {
        reason: DisputeReason,
        rsp_tx: oneshot::Sender<Result<Applied, EscrowError>>,
    },
    SendDisputeMessage {
        body: String,
        attachment: Option<Attachment>,
        rsp_tx: oneshot::Sender<Result<CommunicationMessage, EscrowError>>,
    },
    ApplyDisputeResult {
        result: DisputeResult,
        rsp_tx: oneshot::Sender<Result<Applied, EscrowError>>,
    },
    RetryPayout {
        rsp_tx: oneshot::Sender<Result<Applied, EscrowError>>,
    },
    QueryTrade {
        rsp_tx: oneshot::Sender<Trade>,
    },
    RegisterNotifTx {
        tx: mpsc::Sender<TradeNotif>,
        rsp_tx: oneshot::Sender<Result<(), EscrowError>>,
    },
    UnregisterNotifTx {
        rsp_tx: oneshot::Sender<Result<(), EscrowError>>,
    },
    Shutdown {
        rsp_tx: oneshot::Sender<Result<(), EscrowError>>,
    },
}

type Outgoing = Vec<(Url, TradeMessage)>;

struct TradeActor {
    rx: mpsc::Receiver<TradeRequest>,
    ctx: ProtocolContext,
    trade: Trade,
    caps: RoleCapabilities,
    notif_tx: Option<mpsc::Sender<TradeNotif>>,
    // Entry time of the state whose deadline already fired, so it fires once
    deadline_fired_for: Option<DateTime<Utc>>,
}

impl TradeActor {
    fn new(rx: mpsc::Receiver<TradeRequest>, trade: Trade, ctx: ProtocolContext) -> Self {
        let caps = RoleCapabilities::for_role(trade.role());
        TradeActor {
            rx,
            ctx,
            trade,
            caps,
            notif_tx: None,
            deadline_fired_for: None,
        }
    }

    async fn run(mut self) {
        self.resume_dispute_close().await;
        loop {
            let deadline = self.next_deadline();
            select! {
                request = self.rx.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    if self.handle_request(request).await {
                        break;
                    }
                },
                _ = sleep_until_deadline(deadline) => {
                    self.handle_deadline().await;
                },
            }
        }
        info!("Trade w/ TradeUUID {} terminating", self.trade_uuid());
    }

    fn trade_uuid(&self) -> Uuid {
        self.trade.trade_uuid()
    }

    // A restored trade still DisputeOpened whose case already holds the result
    // crashed between the two saves. Complete it without waiting on the arbitrator
    async fn resume_dispute_close(&mut self) {
        if self.trade.state() != TradeState::DisputeOpened {
            return;
        }
        let Some(result) = self
            .trade
            .dispute_case()
            .and_then(|case| case.result())
            .cloned()
        else {
            return;
        };
        warn!(
            "Trade w/ TradeUUID {} dispute case closed but trade is {}. Resuming close",
            self.trade_uuid(),
            self.trade.state()
        );
        if let Err(error) = self.apply_dispute_result(result, None).await {
            error!(
                "Trade w/ TradeUUID {} could not resume dispute close - {}",
                self.trade_uuid(),
                error
            );
        }
    }

    // Top-down Request Handling

    async fn handle_request(&mut self, request: TradeRequest) -> bool {
        let mut terminate = false;

        debug!(
            "Trade w/ TradeUUID {} handle_request() of type {}",
            self.trade_uuid(),
            request
        );

        let trade_uuid = self.trade_uuid();
        match request {
            TradeRequest::Begin { rsp_tx } => {
                let result = self.begin().await;
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::IncomingMessage { envelope, rsp_tx } => {
                let result = self.apply_incoming_message(envelope).await;
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::LocalAction { action, rsp_tx } => {
                let result = self.local_action(action).await;
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::Cancel { reason, rsp_tx } => {
                let result = self.cancel(reason).await;
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::OpenDispute { reason, rsp_tx } => {
                let opened_by = self.trade.party();
                let result = self.open_dispute(opened_by, reason).await;
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::SendDisputeMessage {
                body,
                attachment,
                rsp_tx,
            } => {
                let result = self.send_dispute_message(body, attachment).await;
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::ApplyDisputeResult { result, rsp_tx } => {
                let result = self.apply_dispute_result(result, None).await;
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::RetryPayout { rsp_tx } => {
                let result = self.retry_payout().await;
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::QueryTrade { rsp_tx } => {
                reply(trade_uuid, rsp_tx, self.trade.clone());
            }
            TradeRequest::RegisterNotifTx { tx, rsp_tx } => {
                let result = self.register_notif_tx(tx);
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::UnregisterNotifTx { rsp_tx } => {
                let result = self.unregister_notif_tx();
                reply(trade_uuid, rsp_tx, result);
            }
            TradeRequest::Shutdown { rsp_tx } => {
                reply(trade_uuid, rsp_tx, Ok(()));
                terminate = true;
            }
        }
        terminate
    }

    // Sends the opening message of the role. Persisting first means a crash
    // right after creation still leaves a trade to restore.
    async fn begin(&mut self) -> Result<Applied, EscrowError> {
        if self.trade.state() != TradeState::Initiated {
            return Ok(Applied::Duplicate);
        }
        let message = if self.trade.role().is_offerer() {
            TradeMessage::PublishDepositRequest {
                total_escrow: self.trade.total_escrow()?,
            }
        } else {
            TradeMessage::TakeOfferRequest {
                offer: self.trade.offer().clone(),
            }
        };
        let outgoing = vec![self.to_counterparty(message)];
        self.commit(self.trade.clone(), outgoing).await
    }

    async fn local_action(&mut self, action: LocalAction) -> Result<Applied, EscrowError> {
        let Some(step) = self.caps.local_step(action) else {
            return Err(self.violation(format!(
                "{} is not available to a {}",
                action,
                self.trade.role()
            )));
        };
        if self.trade.state() != step.from {
            return Err(self.violation(format!(
                "{} requires state {} but trade is {}",
                action,
                step.from,
                self.trade.state()
            )));
        }

        let message = match step.sends {
            TradeMessageKind::FiatTransferStarted => TradeMessage::FiatTransferStarted,
            TradeMessageKind::FiatReceived => TradeMessage::FiatReceived,
            other => {
                return Err(EscrowError::Simple(format!(
                    "Local action {} cannot send {}",
                    action, other
                )));
            }
        };

        let mut next = self.trade.clone();
        next.transition(step.to)?;
        let outgoing = vec![self.to_counterparty(message)];
        self.commit(next, outgoing).await
    }

    async fn cancel(&mut self, reason: String) -> Result<Applied, EscrowError> {
        if self.trade.state() != TradeState::Initiated {
            return Err(self.violation(format!(
                "Cannot cancel once past {}, trade is {}",
                TradeState::Initiated,
                self.trade.state()
            )));
        }
        let mut next = self.trade.clone();
        next.fail(format!("Cancelled - {}", reason))?;
        let outgoing = vec![self.to_counterparty(TradeMessage::TradeCancelled { reason })];
        self.commit(next, outgoing).await
    }

    async fn open_dispute(
        &mut self,
        opened_by: Party,
        reason: DisputeReason,
    ) -> Result<Applied, EscrowError> {
        match self.trade.state() {
            TradeState::DisputeOpened => {
                debug!(
                    "Trade w/ TradeUUID {} dispute already open",
                    self.trade_uuid()
                );
                return Ok(Applied::Duplicate);
            }
            state if state.is_terminal() => {
                return Err(self.violation(format!("Cannot open a dispute in state {}", state)));
            }
            _ => {}
        }

        let mut next = self.trade.clone();
        next.transition(TradeState::DisputeOpened)?;
        next.attach_dispute_case(DisputeCase::new(self.trade_uuid(), opened_by, reason));

        let message = TradeMessage::OpenDispute { reason };
        let mut outgoing = vec![self.to_counterparty(message.clone())];
        outgoing.extend(self.to_arbitrator(message));
        self.commit(next, outgoing).await
    }

    async fn send_dispute_message(
        &mut self,
        body: String,
        attachment: Option<Attachment>,
    ) -> Result<CommunicationMessage, EscrowError> {
        self.check_dispute_open()?;

        let message = CommunicationMessage::new(
            self.trade_uuid(),
            self.trade.party(),
            body,
            attachment,
        );
        let mut next = self.trade.clone();
        let Some(case) = next.dispute_case_mut() else {
            return Err(self.missing_case());
        };
        case.append(message.clone())?;

        let chat = TradeMessage::DisputeCommunication(message.clone());
        let mut outgoing = vec![self.to_counterparty(chat.clone())];
        outgoing.extend(self.to_arbitrator(chat));
        self.commit(next, outgoing).await?;
        Ok(message)
    }

    async fn retry_payout(&mut self) -> Result<Applied, EscrowError> {
        if self.trade.finalized_payout().is_some() {
            return Err(EscrowError::Simple(format!(
                "Trade w/ TradeUUID {} already finalized its payout",
                self.trade_uuid()
            )));
        }

        match self.trade.state() {
            TradeState::PaymentReceived if self.trade.role().side() == TradeSide::Buyer => {
                self.settle_mutual_payout(self.trade.clone()).await
            }
            TradeState::DisputeClosed => {
                let Some(result) = self
                    .trade
                    .dispute_case()
                    .and_then(|case| case.result())
                    .cloned()
                else {
                    return Err(self.missing_case());
                };
                let payout = arbitrated_payout(&self.trade.escrow_amounts(), &result)?;
                self.settle_arbitrated_payout(self.trade.clone(), payout, result.publisher(), None)
                    .await
            }
            state => Err(self.violation(format!("No payout to retry in state {}", state))),
        }
    }

    fn register_notif_tx(&mut self, tx: mpsc::Sender<TradeNotif>) -> Result<(), EscrowError> {
        let mut result = Ok(());
        if self.notif_tx.is_some() {
            let error = EscrowError::Simple(format!(
                "Trade w/ TradeUUID {} already have notif_tx registered",
                self.trade_uuid()
            ));
            result = Err(error);
        }
        self.notif_tx = Some(tx);
        result
    }

    fn unregister_notif_tx(&mut self) -> Result<(), EscrowError> {
        let mut result = Ok(());
        if self.notif_tx.is_none() {
            let error = EscrowError::Simple(format!(
                "Trade w/ TradeUUID {} expected to already have notif_tx registered",
                self.trade_uuid()
            ));
            result = Err(error);
        }
        self.notif_tx = None;
        result
    }

    // Bottom-up Peer Message Handling

    async fn apply_incoming_message(
        &mut self,
        envelope: TradeEnvelope,
    ) -> Result<Applied, EscrowError> {
        let kind = envelope.kind();
        debug!(
            "Trade w/ TradeUUID {} apply_incoming_message() of kind {} from {}, message ID {}",
            self.trade_uuid(),
            kind,
            envelope.sender,
            envelope.message_id
        );

        if envelope.trade_uuid != self.trade_uuid() {
            return Err(self.violation(format!(
                "{} for TradeUUID {} routed to the wrong trade",
                kind, envelope.trade_uuid
            )));
        }

        if self.trade.has_processed(&envelope.message_id) {
            debug!(
                "Trade w/ TradeUUID {} already processed message ID {}",
                self.trade_uuid(),
                envelope.message_id
            );
            return Ok(Applied::Duplicate);
        }

        let TradeEnvelope {
            message_id,
            sender,
            message,
            ..
        } = envelope;

        match message {
            TradeMessage::Ack { acked } => {
                debug!(
                    "Trade w/ TradeUUID {} {} acknowledged message ID {}",
                    self.trade_uuid(),
                    sender,
                    acked
                );
                Ok(Applied::Recorded)
            }
            TradeMessage::DisputeResult(result) => {
                if sender != Party::Arbitrator {
                    return Err(self.violation(format!(
                        "{} sent by {} instead of the arbitrator",
                        kind, sender
                    )));
                }
                self.apply_dispute_result(result, Some(message_id)).await
            }
            TradeMessage::DisputeCommunication(chat) => {
                self.receive_dispute_message(message_id, sender, chat).await
            }
            TradeMessage::OpenDispute { reason } => {
                self.check_counterparty(kind, sender)?;
                self.receive_open_dispute(message_id, reason).await
            }
            TradeMessage::TradeCancelled { reason } => {
                self.check_counterparty(kind, sender)?;
                self.receive_cancel(message_id, reason).await
            }
            TradeMessage::TakeOfferRequest { offer } => {
                self.check_counterparty(kind, sender)?;
                if self.trade.role().is_offerer() && &offer == self.trade.offer() {
                    debug!(
                        "Trade w/ TradeUUID {} take request already handled",
                        self.trade_uuid()
                    );
                    return Ok(Applied::Duplicate);
                }
                Err(self.violation(format!("Unexpected {} for an existing trade", kind)))
            }
            message => {
                self.check_counterparty(kind, sender)?;
                self.apply_step(message_id, kind, message).await
            }
        }
    }

    async fn apply_step(
        &mut self,
        message_id: Uuid,
        kind: TradeMessageKind,
        message: TradeMessage,
    ) -> Result<Applied, EscrowError> {
        let Some(step) = self.caps.inbound_step(kind) else {
            return Err(self.violation(format!(
                "{} is not addressed to a {}",
                kind,
                self.trade.role()
            )));
        };

        let state = self.trade.state();
        if state != step.from {
            return match (state.phase_index(), step.from.phase_index()) {
                (Some(current), Some(from)) if current > from => {
                    debug!(
                        "Trade w/ TradeUUID {} is {}, ignoring stale {}",
                        self.trade_uuid(),
                        state,
                        kind
                    );
                    Ok(Applied::Duplicate)
                }
                _ => Err(self.violation(format!(
                    "{} expected in state {} but trade is {}",
                    kind, step.from, state
                ))),
            };
        }

        let mut next = self.trade.clone();
        next.mark_processed(message_id);

        match message {
            TradeMessage::PublishDepositRequest { total_escrow } => {
                self.publish_deposit(next, total_escrow).await
            }
            TradeMessage::DepositTxPublished { deposit_tx_ref } => {
                self.record_deposit(next, message_id, deposit_tx_ref).await
            }
            TradeMessage::FiatTransferStarted => {
                next.transition(step.to)?;
                let outgoing = vec![self.ack(message_id)];
                self.commit(next, outgoing).await
            }
            TradeMessage::FiatReceived => {
                next.transition(step.to)?;
                self.settle_mutual_payout(next).await
            }
            TradeMessage::PayoutTxPublished {
                payout_tx_ref,
                payout,
            } => {
                self.record_mutual_payout(next, message_id, payout_tx_ref, payout)
                    .await
            }
            _ => Err(EscrowError::Simple(format!(
                "No handler for {} in the cooperative path",
                kind
            ))),
        }
    }

    async fn publish_deposit(
        &mut self,
        mut next: Trade,
        total_escrow: u64,
    ) -> Result<Applied, EscrowError> {
        let expected = next.total_escrow()?;
        if total_escrow != expected {
            let reason = format!(
                "Deposit request for {} does not match the escrow total {}",
                total_escrow, expected
            );
            warn!("Trade w/ TradeUUID {} {}", self.trade_uuid(), reason);
            return self.fail_trade(next, reason).await;
        }

        match self
            .ctx
            .ledger
            .publish_deposit(self.trade_uuid(), expected)
            .await
        {
            Ok(deposit_tx_ref) => {
                next.set_deposit_tx_ref(deposit_tx_ref.clone());
                next.transition(TradeState::DepositPublished)?;
                let outgoing =
                    vec![self.to_counterparty(TradeMessage::DepositTxPublished { deposit_tx_ref })];
                self.commit(next, outgoing).await
            }
            Err(error) => {
                let reason = format!("Deposit could not be published - {}", error);
                self.fail_trade(next, reason).await
            }
        }
    }

    async fn record_deposit(
        &mut self,
        mut next: Trade,
        message_id: Uuid,
        deposit_tx_ref: LedgerRef,
    ) -> Result<Applied, EscrowError> {
        if deposit_tx_ref.trim().is_empty() {
            let reason = "Counterparty reported an empty deposit reference".to_string();
            warn!("Trade w/ TradeUUID {} {}", self.trade_uuid(), reason);
            return self.fail_trade(next, reason).await;
        }
        next.set_deposit_tx_ref(deposit_tx_ref);
        next.transition(TradeState::DepositPublished)?;
        let outgoing = vec![self.ack(message_id)];
        self.commit(next, outgoing).await
    }

    async fn record_mutual_payout(
        &mut self,
        mut next: Trade,
        message_id: Uuid,
        payout_tx_ref: LedgerRef,
        payout: Payout,
    ) -> Result<Applied, EscrowError> {
        if let Err(error) = validate_payout(&payout, next.total_escrow()?) {
            return Err(self.escalate(error));
        }
        let expected = mutual_completion_payout(&next.escrow_amounts())?;
        if payout != expected {
            return Err(self.violation(format!(
                "Reported payout {:?} differs from the agreed {:?}",
                payout, expected
            )));
        }
        if payout_tx_ref.trim().is_empty() {
            return Err(self.violation("Reported payout has an empty reference".to_string()));
        }

        next.finalize_payout(payout, PayoutKind::MutualCompletion, payout_tx_ref)?;
        next.transition(TradeState::Completed)?;
        next.set_outcome_reason("Completed by mutual agreement");
        let outgoing = vec![self.ack(message_id)];
        self.commit(next, outgoing).await
    }

    async fn receive_open_dispute(
        &mut self,
        message_id: Uuid,
        reason: DisputeReason,
    ) -> Result<Applied, EscrowError> {
        match self.trade.state() {
            TradeState::DisputeOpened => {
                debug!(
                    "Trade w/ TradeUUID {} dispute already open",
                    self.trade_uuid()
                );
                Ok(Applied::Duplicate)
            }
            state if state.is_terminal() => {
                Err(self.violation(format!("Cannot open a dispute in state {}", state)))
            }
            _ => {
                let mut next = self.trade.clone();
                next.mark_processed(message_id);
                next.transition(TradeState::DisputeOpened)?;
                next.attach_dispute_case(DisputeCase::new(
                    self.trade_uuid(),
                    self.trade.role().counterparty(),
                    reason,
                ));
                let outgoing = vec![self.ack(message_id)];
                self.commit(next, outgoing).await
            }
        }
    }

    async fn receive_cancel(
        &mut self,
        message_id: Uuid,
        reason: String,
    ) -> Result<Applied, EscrowError> {
        match self.trade.state() {
            TradeState::Failed => Ok(Applied::Duplicate),
            TradeState::Initiated => {
                let mut next = self.trade.clone();
                next.mark_processed(message_id);
                next.fail(format!("Cancelled by counterparty - {}", reason))?;
                let outgoing = vec![self.ack(message_id)];
                self.commit(next, outgoing).await
            }
            state => Err(self.violation(format!(
                "Counterparty cancelled in state {}, only allowed in {}",
                state,
                TradeState::Initiated
            ))),
        }
    }

    async fn receive_dispute_message(
        &mut self,
        message_id: Uuid,
        sender: Party,
        chat: CommunicationMessage,
    ) -> Result<Applied, EscrowError> {
        if sender == self.trade.party() || chat.sender != sender {
            return Err(self.violation(format!(
                "Dispute message attributed to {} arrived from {}",
                chat.sender, sender
            )));
        }
        self.check_dispute_open()?;

        let mut next = self.trade.clone();
        next.mark_processed(message_id);
        let Some(case) = next.dispute_case_mut() else {
            return Err(self.missing_case());
        };
        if !case.append(chat.clone())? {
            return Ok(Applied::Duplicate);
        }

        let applied = self.commit(next, vec![]).await?;
        self.notify(TradeNotif::DisputeMessage(chat));
        Ok(applied)
    }

    async fn apply_dispute_result(
        &mut self,
        result: DisputeResult,
        message_id: Option<Uuid>,
    ) -> Result<Applied, EscrowError> {
        match self.trade.state() {
            TradeState::DisputeOpened => {}
            TradeState::DisputeClosed => {
                let closed_with = self.trade.dispute_case().and_then(|case| case.result());
                if closed_with == Some(&result) {
                    return Ok(Applied::Duplicate);
                }
                return Err(EscrowError::AlreadyClosed(self.trade_uuid()));
            }
            state => {
                return Err(self.violation(format!(
                    "Dispute result received in state {}",
                    state
                )));
            }
        }

        if let Err(error) = self.validate_dispute_result(&result) {
            return Err(self.escalate(error));
        }
        let payout = match arbitrated_payout(&self.trade.escrow_amounts(), &result) {
            Ok(payout) => payout,
            Err(error) => return Err(self.escalate(error)),
        };

        let publisher = result.publisher();
        let outcome = format!(
            "Dispute closed in favour of the {} - {}",
            result.winner(),
            result.reason()
        );

        let mut next = self.trade.clone();
        if let Some(message_id) = message_id {
            next.mark_processed(message_id);
        }
        let Some(case) = next.dispute_case_mut() else {
            return Err(self.missing_case());
        };
        // The case record is saved ahead of the trade, so it can already be closed
        // with this very result if the trade save did not make it
        let closed_with = case.result().cloned();
        match closed_with {
            None => case.close_with_result(result)?,
            Some(closed_with) if closed_with == result => {
                info!(
                    "Trade w/ TradeUUID {} finishing dispute close from the stored result",
                    self.trade_uuid()
                );
            }
            Some(_) => return Err(EscrowError::AlreadyClosed(self.trade_uuid())),
        }
        next.transition(TradeState::DisputeClosed)?;
        next.set_outcome_reason(outcome);

        self.settle_arbitrated_payout(next, payout, publisher, message_id)
            .await
    }

    // The trader ID in the result is not checked. Both nodes receive the same
    // result while each trade carries its own node's trader ID
    fn validate_dispute_result(&self, result: &DisputeResult) -> Result<(), EscrowError> {
        if result.trade_uuid() != self.trade_uuid() {
            return Err(EscrowError::InvalidDisputeResult(format!(
                "Result names TradeUUID {}",
                result.trade_uuid()
            )));
        }
        let expected = self.trade.offer().arbitrator_pubkey;
        if !self.ctx.arbitrators.contains(&expected) {
            return Err(EscrowError::InvalidDisputeResult(format!(
                "Arbitrator {} agreed in the offer is not a known arbitrator",
                expected
            )));
        }
        result.verify(&expected)
    }

    // Payouts

    async fn settle_mutual_payout(&mut self, mut next: Trade) -> Result<Applied, EscrowError> {
        let payout = mutual_completion_payout(&next.escrow_amounts())?;
        let total = next.total_escrow()?;

        match self
            .ctx
            .ledger
            .request_payout(self.trade_uuid(), payout, total, TradeSide::Buyer)
            .await
        {
            Ok(payout_tx_ref) => {
                next.finalize_payout(payout, PayoutKind::MutualCompletion, payout_tx_ref.clone())?;
                next.transition(TradeState::Completed)?;
                next.set_outcome_reason("Completed by mutual agreement");
                let outgoing = vec![self.to_counterparty(TradeMessage::PayoutTxPublished {
                    payout_tx_ref,
                    payout,
                })];
                self.commit(next, outgoing).await
            }
            Err(EscrowError::LedgerFailure(failure)) => {
                let note = format!("Mutual payout not accepted by the ledger - {}", failure);
                self.flag_manual_intervention(&mut next, note);
                self.commit(next, vec![]).await
            }
            Err(error) => Err(self.escalate(error)),
        }
    }

    async fn settle_arbitrated_payout(
        &mut self,
        mut next: Trade,
        payout: Payout,
        publisher: TradeSide,
        ack_message_id: Option<Uuid>,
    ) -> Result<Applied, EscrowError> {
        let total = next.total_escrow()?;
        let mut outgoing = Outgoing::new();
        if let Some(message_id) = ack_message_id {
            outgoing.extend(self.to_arbitrator(TradeMessage::Ack { acked: message_id }));
        }

        match self
            .ctx
            .ledger
            .request_payout(self.trade_uuid(), payout, total, publisher)
            .await
        {
            Ok(payout_tx_ref) => {
                next.finalize_payout(payout, PayoutKind::Arbitrated, payout_tx_ref)?;
                self.commit(next, outgoing).await
            }
            Err(EscrowError::LedgerFailure(failure)) => {
                let note = format!("Arbitrated payout not accepted by the ledger - {}", failure);
                self.flag_manual_intervention(&mut next, note);
                self.commit(next, outgoing).await
            }
            Err(error) => Err(self.escalate(error)),
        }
    }

    fn flag_manual_intervention(&self, next: &mut Trade, note: String) {
        error!(
            "Trade w/ TradeUUID {} needs manual intervention - {}",
            self.trade_uuid(),
            note
        );
        self.notify(TradeNotif::Escalation {
            trade_uuid: self.trade_uuid(),
            detail: note.clone(),
        });
        next.set_manual_intervention(Some(note));
    }

    // Deadlines

    fn next_deadline(&self) -> Option<Instant> {
        if self.trade.manual_intervention().is_some() {
            return None;
        }
        let timeout = self.ctx.config.timeouts.for_state(self.trade.state())?;
        let entered_at = self.trade.state_entered_at();
        if self.deadline_fired_for == Some(entered_at) {
            return None;
        }
        let elapsed = (Utc::now() - entered_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Some(Instant::now() + timeout.saturating_sub(elapsed))
    }

    async fn handle_deadline(&mut self) {
        let state = self.trade.state();
        self.deadline_fired_for = Some(self.trade.state_entered_at());

        let expired = EscrowError::Timeout(format!("Deadline for state {} expired", state));
        warn!(
            "Trade w/ TradeUUID {} {}. Opening {} dispute",
            self.trade_uuid(),
            expired,
            DisputeReason::NoReply
        );
        self.notify(TradeNotif::DeadlineExpired {
            trade_uuid: self.trade_uuid(),
            state,
        });

        let opened_by = self.trade.party();
        if let Err(error) = self.open_dispute(opened_by, DisputeReason::NoReply).await {
            error!(
                "Trade w/ TradeUUID {} failed to open dispute after deadline - {}",
                self.trade_uuid(),
                error
            );
        }
    }

    // Commit & Messaging

    // The trade (and its case) is durable before anything leaves the node
    async fn commit(&mut self, next: Trade, outgoing: Outgoing) -> Result<Applied, EscrowError> {
        if let Some(case) = next.dispute_case() {
            self.ctx.store.save_dispute_case(case).await?;
        }
        self.ctx.store.save_trade(&next).await?;

        let from = self.trade.state();
        let to = next.state();
        self.trade = next;

        for (address, message) in outgoing {
            self.send(address, message).await;
        }

        if from == to {
            return Ok(Applied::Recorded);
        }

        info!(
            "Trade w/ TradeUUID {} transitioned from {} to {}",
            self.trade_uuid(),
            from,
            to
        );
        self.notify(TradeNotif::StateChanged {
            trade_uuid: self.trade_uuid(),
            from,
            to,
        });
        Ok(Applied::Transitioned { from, to })
    }

    async fn fail_trade(&mut self, mut next: Trade, reason: String) -> Result<Applied, EscrowError> {
        next.fail(reason.clone())?;
        let outgoing = vec![self.to_counterparty(TradeMessage::TradeCancelled { reason })];
        self.commit(next, outgoing).await
    }

    async fn send(&self, address: Url, message: TradeMessage) {
        let envelope = TradeEnvelope::new(
            self.trade_uuid(),
            self.trade.party(),
            self.ctx.local_address.clone(),
            message,
        );
        let kind = envelope.kind();
        if let Err(error) = self.ctx.messenger.send(address.clone(), envelope).await {
            // Already committed. The peer's deadline or a resend recovers from a lost message
            error!(
                "Trade w/ TradeUUID {} failed to send {} to {} - {}",
                self.trade_uuid(),
                kind,
                address,
                error
            );
        }
    }

    fn to_counterparty(&self, message: TradeMessage) -> (Url, TradeMessage) {
        (self.trade.counterparty_address().clone(), message)
    }

    fn to_arbitrator(&self, message: TradeMessage) -> Option<(Url, TradeMessage)> {
        let pubkey = self.trade.offer().arbitrator_pubkey;
        match self.ctx.arbitrators.get(&pubkey) {
            Some(arbitrator) => Some((arbitrator.address.clone(), message)),
            None => {
                warn!(
                    "Trade w/ TradeUUID {} has no address for arbitrator {}",
                    self.trade_uuid(),
                    pubkey
                );
                None
            }
        }
    }

    fn ack(&self, message_id: Uuid) -> (Url, TradeMessage) {
        self.to_counterparty(TradeMessage::Ack { acked: message_id })
    }

    // Checks & Diagnostics

    fn check_counterparty(&self, kind: TradeMessageKind, sender: Party) -> Result<(), EscrowError> {
        let expected = self.trade.role().counterparty();
        if sender != expected {
            return Err(self.violation(format!(
                "{} sent by {}, expected the {}",
                kind, sender, expected
            )));
        }
        Ok(())
    }

    fn check_dispute_open(&self) -> Result<(), EscrowError> {
        match self.trade.state() {
            TradeState::DisputeOpened => Ok(()),
            TradeState::DisputeClosed => Err(EscrowError::AlreadyClosed(self.trade_uuid())),
            state => Err(self.violation(format!("No dispute open in state {}", state))),
        }
    }

    fn missing_case(&self) -> EscrowError {
        EscrowError::Simple(format!(
            "Trade w/ TradeUUID {} is {} but holds no dispute case",
            self.trade_uuid(),
            self.trade.state()
        ))
    }

    fn violation(&self, detail: String) -> EscrowError {
        warn!(
            "Trade w/ TradeUUID {} protocol violation - {}",
            self.trade_uuid(),
            detail
        );
        self.notify(TradeNotif::Violation {
            trade_uuid: self.trade_uuid(),
            detail: detail.clone(),
        });
        EscrowError::ProtocolViolation(detail)
    }

    fn escalate(&self, error: EscrowError) -> EscrowError {
        if error.needs_escalation() {
            error!(
                "Trade w/ TradeUUID {} escalating to operator - {}",
                self.trade_uuid(),
                error
            );
            self.notify(TradeNotif::Escalation {
                trade_uuid: self.trade_uuid(),
                detail: error.to_string(),
            });
        }
        error
    }

    fn notify(&self, notif: TradeNotif) {
        let Some(tx) = self.notif_tx.as_ref() else {
            return;
        };
        if let Err(error) = tx.try_send(notif) {
            warn!(
                "Trade w/ TradeUUID {} dropped notification - {}",
                self.trade_uuid(),
                error
            );
        }
    }
}

fn reply<T>(trade_uuid: Uuid, rsp_tx: oneshot::Sender<T>, value: T) {
    if rsp_tx.send(value).is_err() {
        warn!(
            "Trade w/ TradeUUID {} requester went away before the reply",
            trade_uuid
        );
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
