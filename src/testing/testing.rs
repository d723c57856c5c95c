use std::str::FromStr;

use secp256k1::{KeyPair, Secp256k1, SecretKey, XOnlyPublicKey};
use url::Url;
use uuid::Uuid;

use crate::{
    config::{RetryPolicy, TimeoutConfig, TradeConfig},
    dispute::{Arbitrator, ArbitratorRegistry},
};

pub struct SomeTestParams {}

impl SomeTestParams {
    pub fn some_uuid() -> Uuid {
        Uuid::from_str("20c38e4b-037b-4654-b99c-1d9f2beb755f").unwrap()
    }

    pub fn arbitrator_keypair() -> KeyPair {
        let secret_key =
            SecretKey::from_str("01010101010101010001020304050607ffff0000ffff00006363636363636363")
                .unwrap();
        KeyPair::from_secret_key(&Secp256k1::new(), &secret_key)
    }

    pub fn arbitrator_pubkey() -> XOnlyPublicKey {
        let (pubkey, _) = Self::arbitrator_keypair().x_only_public_key();
        pubkey
    }

    // Signs well formed results, but is not an arbitrator anyone agreed to
    pub fn rogue_keypair() -> KeyPair {
        let secret_key =
            SecretKey::from_str("0202020202020202020202020202020202020202020202020202020202020202")
                .unwrap();
        KeyPair::from_secret_key(&Secp256k1::new(), &secret_key)
    }

    pub fn maker_address() -> Url {
        Url::parse("https://maker.example.com/escrow").unwrap()
    }

    pub fn taker_address() -> Url {
        Url::parse("https://taker.example.com/escrow").unwrap()
    }

    pub fn arbitrator_address() -> Url {
        Url::parse("https://arbitrator.example.com/escrow").unwrap()
    }

    pub fn arbitrator_registry() -> ArbitratorRegistry {
        ArbitratorRegistry::with_arbitrators([Arbitrator {
            pubkey: Self::arbitrator_pubkey(),
            address: Self::arbitrator_address(),
        }])
    }

    /// Deadlines off and fast ledger retries, so tests drive every transition themselves.
    pub fn trade_config() -> TradeConfig {
        TradeConfig {
            trader_id: 1,
            timeouts: TimeoutConfig::disabled(),
            ledger_retry: RetryPolicy {
                max_attempts: 2,
                backoff_ms: 1,
            },
            ..Default::default()
        }
    }
}
