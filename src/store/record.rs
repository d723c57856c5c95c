use serde::{Deserialize, Serialize};

use crate::{
    common::{error::EscrowError, types::SerdeGenericTrait},
    dispute::DisputeCase,
    trade::Trade,
};

pub const RECORD_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradeRecord {
    pub version: u32,
    pub trade: Trade,
}

#[typetag::serde(name = "escrow_trade")]
impl SerdeGenericTrait for TradeRecord {
    fn any_ref(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisputeCaseRecord {
    pub version: u32,
    pub case: DisputeCase,
}

#[typetag::serde(name = "escrow_dispute_case")]
impl SerdeGenericTrait for DisputeCaseRecord {
    fn any_ref(&self) -> &dyn std::any::Any {
        self
    }
}

pub(crate) enum DecodedRecord {
    Trade(Trade),
    DisputeCase(DisputeCase),
}

pub(crate) fn encode_trade(trade: &Trade) -> Result<String, EscrowError> {
    let record: Box<dyn SerdeGenericTrait> = Box::new(TradeRecord {
        version: RECORD_VERSION,
        trade: trade.clone(),
    });
    Ok(serde_json::to_string(&record)?)
}

pub(crate) fn encode_dispute_case(case: &DisputeCase) -> Result<String, EscrowError> {
    let record: Box<dyn SerdeGenericTrait> = Box::new(DisputeCaseRecord {
        version: RECORD_VERSION,
        case: case.clone(),
    });
    Ok(serde_json::to_string(&record)?)
}

pub(crate) fn decode(json: &str) -> Result<DecodedRecord, EscrowError> {
    let record: Box<dyn SerdeGenericTrait> = serde_json::from_str(json)
        .map_err(|error| EscrowError::DeserializationFailure(error.to_string()))?;

    if let Some(record) = record.downcast_ref::<TradeRecord>() {
        check_version(record.version)?;
        return Ok(DecodedRecord::Trade(record.trade.clone()));
    }
    if let Some(record) = record.downcast_ref::<DisputeCaseRecord>() {
        check_version(record.version)?;
        return Ok(DecodedRecord::DisputeCase(record.case.clone()));
    }
    Err(EscrowError::DeserializationFailure(format!(
        "Unexpected record {:?}",
        record
    )))
}

fn check_version(version: u32) -> Result<(), EscrowError> {
    if version > RECORD_VERSION {
        return Err(EscrowError::DeserializationFailure(format!(
            "Record version {} is newer than supported version {}",
            version, RECORD_VERSION
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::types::{Party, TradeRole},
        dispute::DisputeReason,
        testing::{SomeTestOfferParams, SomeTestParams},
    };

    fn some_trade() -> Trade {
        let offer = SomeTestOfferParams::default_builder().build().unwrap();
        Trade::new(
            1,
            TradeRole::BuyerAsTaker,
            offer,
            SomeTestParams::maker_address(),
        )
        .unwrap()
    }

    #[test]
    fn trade_record_is_type_tagged_and_versioned() {
        let trade = some_trade();
        let json = encode_trade(&trade).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "escrow_trade");
        assert_eq!(value["version"], RECORD_VERSION);

        let DecodedRecord::Trade(decoded) = decode(&json).unwrap() else {
            panic!("Expected a trade record");
        };
        assert_eq!(decoded, trade);
    }

    #[test]
    fn dispute_case_record_decodes() {
        let case = DisputeCase::new(
            SomeTestParams::some_uuid(),
            Party::Seller,
            DisputeReason::BankProblems,
        );
        let json = encode_dispute_case(&case).unwrap();
        let DecodedRecord::DisputeCase(decoded) = decode(&json).unwrap() else {
            panic!("Expected a dispute case record");
        };
        assert_eq!(decoded, case);
    }

    #[test]
    fn newer_record_version_is_rejected() {
        let json = encode_trade(&some_trade()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["version"] = serde_json::json!(RECORD_VERSION + 1);
        assert!(matches!(
            decode(&value.to_string()),
            Err(EscrowError::DeserializationFailure(_))
        ));
    }

    #[test]
    fn unknown_record_type_is_rejected() {
        let json = r#"{ "type": "n3xb_maker_data", "version": 1 }"#;
        assert!(matches!(
            decode(json),
            Err(EscrowError::DeserializationFailure(_))
        ));
    }
}
