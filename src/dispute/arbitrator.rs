use std::collections::HashMap;

use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Arbitrator {
    pub pubkey: XOnlyPublicKey,
    pub address: Url,
}

// Read-only once handed to the Trade Manager. Shared by every trade behind an Arc
#[derive(Clone, Debug, Default)]
pub struct ArbitratorRegistry {
    arbitrators: HashMap<XOnlyPublicKey, Arbitrator>,
}

impl ArbitratorRegistry {
    pub fn new() -> Self {
        Self {
            arbitrators: HashMap::new(),
        }
    }

    pub fn with_arbitrators(arbitrators: impl IntoIterator<Item = Arbitrator>) -> Self {
        let mut registry = Self::new();
        arbitrators
            .into_iter()
            .for_each(|arbitrator| registry.insert(arbitrator));
        registry
    }

    pub fn insert(&mut self, arbitrator: Arbitrator) {
        self.arbitrators.insert(arbitrator.pubkey, arbitrator);
    }

    pub fn get(&self, pubkey: &XOnlyPublicKey) -> Option<&Arbitrator> {
        self.arbitrators.get(pubkey)
    }

    pub fn contains(&self, pubkey: &XOnlyPublicKey) -> bool {
        self.arbitrators.contains_key(pubkey)
    }
}
