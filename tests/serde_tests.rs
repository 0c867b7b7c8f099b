#![cfg(feature = "serde")]

//! Integration tests for serde support.
//!
//! Backend payloads are JSON; these tests check that legacy stage names are
//! accepted on input and that only canonical names are ever written back.

use dealboard::prelude::*;
use rstest::rstest;

// =============================================================================
// Stage
// =============================================================================

#[rstest]
#[case("\"dead\"", Stage::Dead)]
#[case("\"closed_lost\"", Stage::Dead)]
#[case("\"lead\"", Stage::InitialReview)]
#[case("\"underwriting\"", Stage::ActiveReview)]
#[case("\"loi_submitted\"", Stage::UnderContract)]
#[case("\"due_diligence\"", Stage::UnderContract)]
#[case("\"closed_won\"", Stage::Closed)]
#[case("\"realized\"", Stage::Realized)]
fn test_stage_accepts_canonical_and_legacy_names(#[case] json: &str, #[case] expected: Stage) {
    let stage: Stage = serde_json::from_str(json).unwrap();
    assert_eq!(stage, expected);
}

#[rstest]
fn test_stage_serializes_canonical_name_only() {
    for stage in Stage::ALL {
        let json = serde_json::to_string(&stage).unwrap();
        assert_eq!(json, format!("\"{}\"", stage.as_str()));
    }
}

#[rstest]
fn test_unknown_stage_is_rejected() {
    assert!(serde_json::from_str::<Stage>("\"on_hold\"").is_err());
}

// =============================================================================
// Deal Records
// =============================================================================

#[rstest]
fn test_raw_deal_with_legacy_stage_normalizes_to_canonical() {
    let raw: RawDeal = serde_json::from_str(
        r#"{"id":"D7","name":"Harbor Point","value":5000000,"stage":"loi_submitted"}"#,
    )
    .unwrap();

    assert_eq!(raw.stage, "loi_submitted");
    assert_eq!(raw.property_type, None);
    let deal = raw.normalize().unwrap();
    assert_eq!(deal.stage, Stage::UnderContract);

    let json = serde_json::to_value(&deal).unwrap();
    assert_eq!(json["stage"], "under_contract");
    assert_eq!(json["id"], "D7");
}

#[rstest]
fn test_raw_deal_with_missing_value_reads_as_zero() {
    let raw: RawDeal =
        serde_json::from_str(r#"{"id":"D8","name":"Old Mill","value":null,"stage":"dead"}"#).unwrap();
    assert_eq!(raw.normalize().unwrap().value, 0);
}

#[rstest]
fn test_deal_json_roundtrip() {
    let deal = Deal::new("D1", "Elm Street", 1_200_000, Stage::ActiveReview)
        .with_property_type("retail")
        .with_market("Denver");

    let json = serde_json::to_string(&deal).unwrap();
    let restored: Deal = serde_json::from_str(&json).unwrap();

    assert_eq!(deal, restored);
}

#[rstest]
fn test_filters_deserialize_with_legacy_stage() {
    let filters: DealFilters = serde_json::from_value(serde_json::json!({
        "stage": "underwriting",
        "property_type": null,
        "market": "Austin",
        "min_value": null,
        "max_value": null,
        "search": null,
    }))
    .unwrap();

    assert_eq!(
        DealKeys::list(&filters),
        DealKeys::list(
            &DealFilters::default()
                .with_stage(Stage::ActiveReview)
                .with_market("Austin")
        )
    );
}
