mod common;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secp256k1::KeyPair;
    use tokio::{sync::mpsc, time::sleep};

    use crusty_escrow::{
        common::{
            error::EscrowError,
            types::{Party, TradeSide},
        },
        config::TimeoutConfig,
        dispute::{DisputeReason, DisputeResult, DisputeResultBuilder, DisputeStatus},
        escrow::{LedgerFailure, Payout, PayoutKind},
        manager::RouteOutcome,
        protocol::{Applied, TradeAccess, TradeEnvelope, TradeMessage, TradeNotif},
        testing::{SomeTestOfferParams, SomeTestParams},
        trade::TradeState,
    };

    use super::common::{harness::Harness, logger::setup as logger_setup};

    async fn disputed_trade() -> (Harness, TradeAccess, TradeAccess) {
        let mut harness = Harness::start().await;
        let offer = SomeTestOfferParams::default_builder().build().unwrap();
        harness.maker.manager.add_offer(offer.clone()).await.unwrap();
        harness.taker.manager.take_offer(offer).await.unwrap();
        harness.pump().await;

        let trade_uuid = SomeTestParams::some_uuid();
        let buyer = harness.taker.manager.get_trade(trade_uuid).await.unwrap();
        let seller = harness.maker.manager.get_trade(trade_uuid).await.unwrap();

        buyer.confirm_payment_started().await.unwrap();
        harness.pump().await;
        buyer.open_dispute(DisputeReason::NoReply).await.unwrap();
        harness.pump().await;
        (harness, buyer, seller)
    }

    fn result_signed_by(keypair: &KeyPair, buyer: u64, seller: u64) -> DisputeResult {
        DisputeResultBuilder::new()
            .trade_uuid(SomeTestParams::some_uuid())
            .winner(TradeSide::Buyer)
            .reason(DisputeReason::NoReply)
            .tamper_proof_evidence(true)
            .summary_notes("Seller did not respond within the payment window")
            .buyer_payout_amount(buyer)
            .seller_payout_amount(seller)
            .build_signed(keypair)
            .unwrap()
    }

    fn some_result() -> DisputeResult {
        result_signed_by(&SomeTestParams::arbitrator_keypair(), 1_150_000, 50_000)
    }

    fn from_arbitrator(result: DisputeResult) -> TradeEnvelope {
        TradeEnvelope::new(
            SomeTestParams::some_uuid(),
            Party::Arbitrator,
            SomeTestParams::arbitrator_address(),
            TradeMessage::DisputeResult(result),
        )
    }

    async fn state_of(access: &TradeAccess) -> TradeState {
        access.query_trade().await.unwrap().state()
    }

    #[tokio::test]
    async fn test_dispute_opened_on_both_sides() {
        logger_setup();
        let (harness, buyer, seller) = disputed_trade().await;

        assert_eq!(state_of(&buyer).await, TradeState::DisputeOpened);
        assert_eq!(state_of(&seller).await, TradeState::DisputeOpened);

        let seller_trade = seller.query_trade().await.unwrap();
        let case = seller_trade.dispute_case().unwrap();
        assert_eq!(case.opened_by(), Party::Buyer);
        assert_eq!(case.opened_reason(), DisputeReason::NoReply);
        assert_eq!(case.status(), DisputeStatus::Open);

        assert!(harness.arbitrator_inbox.iter().any(|envelope| matches!(
            envelope.message,
            TradeMessage::OpenDispute {
                reason: DisputeReason::NoReply
            }
        )));

        // Opening again is a no-op
        assert_eq!(
            buyer.open_dispute(DisputeReason::Other).await.unwrap(),
            Applied::Duplicate
        );
    }

    #[tokio::test]
    async fn test_dispute_chat_reaches_counterparty_and_arbitrator() {
        logger_setup();
        let (mut harness, buyer, seller) = disputed_trade().await;

        let (notif_tx, mut notif_rx) = mpsc::channel::<TradeNotif>(10);
        seller.register_notif_tx(notif_tx).await.unwrap();

        let sent = buyer
            .send_dispute_message("Transfer went out on Monday", None)
            .await
            .unwrap();
        harness.pump().await;

        let seller_trade = seller.query_trade().await.unwrap();
        assert_eq!(
            seller_trade.dispute_case().unwrap().messages(),
            &[sent.clone()]
        );
        assert_eq!(
            notif_rx.recv().await.unwrap(),
            TradeNotif::DisputeMessage(sent.clone())
        );
        assert!(harness.arbitrator_inbox.iter().any(|envelope| matches!(
            &envelope.message,
            TradeMessage::DisputeCommunication(message) if message == &sent
        )));

        let buyer_trade = buyer.query_trade().await.unwrap();
        assert_eq!(buyer_trade.dispute_case().unwrap().messages(), &[sent]);
    }

    #[tokio::test]
    async fn test_signed_result_closes_dispute_and_pays_out() {
        logger_setup();
        let (mut harness, buyer, seller) = disputed_trade().await;

        let envelope = from_arbitrator(some_result());
        let (maker_outcome, taker_outcome) =
            harness.broadcast_from_arbitrator(envelope.clone()).await;
        for outcome in [maker_outcome, taker_outcome] {
            assert!(matches!(
                outcome,
                RouteOutcome::Applied(Applied::Transitioned {
                    from: TradeState::DisputeOpened,
                    to: TradeState::DisputeClosed
                })
            ));
        }

        let expected = Payout {
            buyer: 1_150_000,
            seller: 50_000,
        };
        for access in [&buyer, &seller] {
            let trade = access.query_trade().await.unwrap();
            assert_eq!(trade.state(), TradeState::DisputeClosed);
            let finalized = trade.finalized_payout().unwrap();
            assert_eq!(finalized.payout, expected);
            assert_eq!(finalized.kind, PayoutKind::Arbitrated);
            assert!(trade.is_settled());
            let case = trade.dispute_case().unwrap();
            assert!(case.is_closed());
            assert_eq!(case.result(), Some(&some_result_from(&envelope)));
        }

        // Loser is not the publisher, so the winning buyer publishes
        let payouts = harness.taker.ledger.payouts().await;
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].publisher, TradeSide::Buyer);

        // Both nodes acknowledge the result to the arbitrator
        harness.pump().await;
        let acks = harness
            .arbitrator_inbox
            .iter()
            .filter(|inbound| {
                matches!(inbound.message, TradeMessage::Ack { acked } if acked == envelope.message_id)
            })
            .count();
        assert_eq!(acks, 2);

        // Redelivery is absorbed, a different result is refused
        let (maker_outcome, _) = harness.broadcast_from_arbitrator(envelope).await;
        assert!(matches!(
            maker_outcome,
            RouteOutcome::Applied(Applied::Duplicate)
        ));
        let other = from_arbitrator(result_signed_by(
            &SomeTestParams::arbitrator_keypair(),
            600_000,
            600_000,
        ));
        let (maker_outcome, _) = harness.broadcast_from_arbitrator(other).await;
        assert!(matches!(
            maker_outcome,
            RouteOutcome::Rejected(EscrowError::AlreadyClosed(_))
        ));

        assert!(matches!(
            buyer.send_dispute_message("One more thing", None).await,
            Err(EscrowError::AlreadyClosed(_))
        ));
    }

    fn some_result_from(envelope: &TradeEnvelope) -> DisputeResult {
        match &envelope.message {
            TradeMessage::DisputeResult(result) => result.clone(),
            other => panic!("Expected a dispute result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_result_from_rogue_arbitrator_is_escalated() {
        logger_setup();
        let (mut harness, buyer, seller) = disputed_trade().await;

        let (notif_tx, mut notif_rx) = mpsc::channel::<TradeNotif>(10);
        seller.register_notif_tx(notif_tx).await.unwrap();

        let rogue = result_signed_by(&SomeTestParams::rogue_keypair(), 0, 1_200_000);
        let (maker_outcome, taker_outcome) =
            harness.broadcast_from_arbitrator(from_arbitrator(rogue)).await;
        for outcome in [maker_outcome, taker_outcome] {
            assert!(matches!(
                outcome,
                RouteOutcome::Rejected(EscrowError::InvalidDisputeResult(_))
            ));
        }

        assert!(matches!(
            notif_rx.recv().await.unwrap(),
            TradeNotif::Escalation { .. }
        ));
        assert_eq!(state_of(&buyer).await, TradeState::DisputeOpened);
        assert_eq!(state_of(&seller).await, TradeState::DisputeOpened);
        assert!(harness.maker.ledger.payouts().await.is_empty());
        assert!(harness.taker.ledger.payouts().await.is_empty());
    }

    #[tokio::test]
    async fn test_tampered_result_is_rejected() {
        logger_setup();
        let (mut harness, buyer, _seller) = disputed_trade().await;

        let mut json = serde_json::to_value(some_result()).unwrap();
        json["buyer_payout_amount"] = serde_json::json!(1_200_000u64);
        json["seller_payout_amount"] = serde_json::json!(0u64);
        let tampered: DisputeResult = serde_json::from_value(json).unwrap();

        let (_, taker_outcome) = harness
            .broadcast_from_arbitrator(from_arbitrator(tampered))
            .await;
        assert!(matches!(
            taker_outcome,
            RouteOutcome::Rejected(EscrowError::InvalidDisputeResult(_))
        ));
        assert_eq!(state_of(&buyer).await, TradeState::DisputeOpened);
    }

    #[tokio::test]
    async fn test_result_with_wrong_sum_is_rejected() {
        logger_setup();
        let (mut harness, buyer, seller) = disputed_trade().await;

        let short = result_signed_by(&SomeTestParams::arbitrator_keypair(), 1_000_000, 100_000);
        let (maker_outcome, taker_outcome) =
            harness.broadcast_from_arbitrator(from_arbitrator(short)).await;
        for outcome in [maker_outcome, taker_outcome] {
            assert!(matches!(
                outcome,
                RouteOutcome::Rejected(EscrowError::PayoutInvariantViolation(_))
            ));
        }
        assert_eq!(state_of(&buyer).await, TradeState::DisputeOpened);
        assert_eq!(state_of(&seller).await, TradeState::DisputeOpened);

        // A correct result still closes it afterwards
        let (_, taker_outcome) = harness
            .broadcast_from_arbitrator(from_arbitrator(some_result()))
            .await;
        assert!(matches!(
            taker_outcome,
            RouteOutcome::Applied(Applied::Transitioned { .. })
        ));
    }

    #[tokio::test]
    async fn test_result_must_come_from_arbitrator() {
        logger_setup();
        let (harness, buyer, _seller) = disputed_trade().await;

        let forged = TradeEnvelope::new(
            SomeTestParams::some_uuid(),
            Party::Seller,
            SomeTestParams::maker_address(),
            TradeMessage::DisputeResult(some_result()),
        );
        let outcome = harness.taker.manager.route_message(forged).await;
        assert!(matches!(
            outcome,
            RouteOutcome::Rejected(EscrowError::ProtocolViolation(_))
        ));
        assert_eq!(state_of(&buyer).await, TradeState::DisputeOpened);
    }

    #[tokio::test]
    async fn test_failed_arbitrated_payout_can_be_retried() {
        logger_setup();
        let (mut harness, buyer, _seller) = disputed_trade().await;
        harness
            .taker
            .ledger
            .fail_payouts(LedgerFailure::InsufficientFee, 1)
            .await;

        let (notif_tx, mut notif_rx) = mpsc::channel::<TradeNotif>(10);
        buyer.register_notif_tx(notif_tx).await.unwrap();

        let (_, taker_outcome) = harness
            .broadcast_from_arbitrator(from_arbitrator(some_result()))
            .await;
        assert!(matches!(
            taker_outcome,
            RouteOutcome::Applied(Applied::Transitioned { .. })
        ));

        let trade = buyer.query_trade().await.unwrap();
        assert_eq!(trade.state(), TradeState::DisputeClosed);
        assert!(trade.manual_intervention().is_some());
        assert!(trade.finalized_payout().is_none());
        assert!(!trade.is_settled());
        assert!(matches!(
            notif_rx.recv().await.unwrap(),
            TradeNotif::Escalation { .. }
        ));

        assert_eq!(buyer.retry_payout().await.unwrap(), Applied::Recorded);
        let trade = buyer.query_trade().await.unwrap();
        assert!(trade.manual_intervention().is_none());
        assert!(trade.is_settled());
        assert_eq!(harness.taker.ledger.payouts().await.len(), 1);

        assert!(buyer.retry_payout().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_mutual_payout_can_be_retried() {
        logger_setup();
        let mut harness = Harness::start().await;
        let offer = SomeTestOfferParams::default_builder().build().unwrap();
        harness.maker.manager.add_offer(offer.clone()).await.unwrap();
        harness.taker.manager.take_offer(offer).await.unwrap();
        harness.pump().await;

        let trade_uuid = SomeTestParams::some_uuid();
        let buyer = harness.taker.manager.get_trade(trade_uuid).await.unwrap();
        let seller = harness.maker.manager.get_trade(trade_uuid).await.unwrap();
        harness
            .taker
            .ledger
            .fail_payouts(LedgerFailure::Rejected("Fee too low".to_string()), 1)
            .await;

        buyer.confirm_payment_started().await.unwrap();
        harness.pump().await;
        seller.confirm_payment_received().await.unwrap();
        harness.pump().await;

        let trade = buyer.query_trade().await.unwrap();
        assert_eq!(trade.state(), TradeState::PaymentReceived);
        assert!(trade.manual_intervention().is_some());
        assert_eq!(state_of(&seller).await, TradeState::PaymentReceived);

        let applied = buyer.retry_payout().await.unwrap();
        assert_eq!(
            applied,
            Applied::Transitioned {
                from: TradeState::PaymentReceived,
                to: TradeState::Completed
            }
        );
        harness.pump().await;
        assert_eq!(state_of(&seller).await, TradeState::Completed);
    }

    #[tokio::test]
    async fn test_loser_publishes_when_result_says_so() {
        logger_setup();
        let (mut harness, buyer, seller) = disputed_trade().await;
        let result = DisputeResultBuilder::new()
            .trade_uuid(SomeTestParams::some_uuid())
            .winner(TradeSide::Buyer)
            .reason(DisputeReason::NoReply)
            .buyer_payout_amount(1_100_000u64)
            .seller_payout_amount(100_000u64)
            .loser_is_publisher(true)
            .build_signed(&SomeTestParams::arbitrator_keypair())
            .unwrap();
        assert_eq!(result.publisher(), TradeSide::Seller);

        harness
            .broadcast_from_arbitrator(from_arbitrator(result))
            .await;
        assert_eq!(state_of(&buyer).await, TradeState::DisputeClosed);
        assert_eq!(state_of(&seller).await, TradeState::DisputeClosed);

        for payouts in [
            harness.maker.ledger.payouts().await,
            harness.taker.ledger.payouts().await,
        ] {
            assert_eq!(payouts.len(), 1);
            assert_eq!(payouts[0].publisher, TradeSide::Seller);
        }
    }

    #[tokio::test]
    async fn test_result_trader_id_is_informational() {
        logger_setup();
        let (mut harness, buyer, seller) = disputed_trade().await;
        let result = DisputeResultBuilder::new()
            .trade_uuid(SomeTestParams::some_uuid())
            .trader_id(42u32)
            .winner(TradeSide::Buyer)
            .reason(DisputeReason::NoReply)
            .buyer_payout_amount(1_150_000u64)
            .seller_payout_amount(50_000u64)
            .build_signed(&SomeTestParams::arbitrator_keypair())
            .unwrap();
        assert_ne!(
            buyer.query_trade().await.unwrap().trader_id(),
            result.trader_id()
        );

        let (maker_outcome, taker_outcome) = harness
            .broadcast_from_arbitrator(from_arbitrator(result))
            .await;
        assert!(matches!(
            maker_outcome,
            RouteOutcome::Applied(Applied::Transitioned { .. })
        ));
        assert!(matches!(
            taker_outcome,
            RouteOutcome::Applied(Applied::Transitioned { .. })
        ));
        assert_eq!(state_of(&buyer).await, TradeState::DisputeClosed);
        assert_eq!(state_of(&seller).await, TradeState::DisputeClosed);
    }

    #[tokio::test]
    async fn test_deadline_opens_no_reply_dispute() {
        logger_setup();
        let mut config = SomeTestParams::trade_config();
        config.timeouts = TimeoutConfig {
            initiated_ms: Some(50),
            ..TimeoutConfig::disabled()
        };
        let harness = Harness::start_with_config(config).await;

        // The maker never hears about the take request
        let offer = SomeTestOfferParams::default_builder().build().unwrap();
        let taker = harness.taker.manager.take_offer(offer).await.unwrap();
        let (notif_tx, mut notif_rx) = mpsc::channel::<TradeNotif>(10);
        taker.register_notif_tx(notif_tx).await.unwrap();
        harness.drop_in_flight().await;

        sleep(Duration::from_millis(300)).await;

        assert_eq!(
            notif_rx.recv().await.unwrap(),
            TradeNotif::DeadlineExpired {
                trade_uuid: SomeTestParams::some_uuid(),
                state: TradeState::Initiated
            }
        );
        let trade = taker.query_trade().await.unwrap();
        assert_eq!(trade.state(), TradeState::DisputeOpened);
        let case = trade.dispute_case().unwrap();
        assert_eq!(case.opened_reason(), DisputeReason::NoReply);
        assert_eq!(case.opened_by(), Party::Buyer);

        // Fires once, a dispute has no deadline of its own
        sleep(Duration::from_millis(100)).await;
        assert_eq!(state_of(&taker).await, TradeState::DisputeOpened);
    }
}
