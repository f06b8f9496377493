// Ledger Gateway Tests
// Record model, payload validation, and the in-memory ledger

use deed_escrow::identity::Address;
use deed_escrow::ledger::{
    LedgerError, LedgerGateway, MockLedgerGateway, TransactionId, TransactionRecord,
    TransactionStatus, TransactionType,
};
use rust_decimal::Decimal;
use serde_json::json;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn intent(deed: &str) -> TransactionRecord {
    TransactionRecord::purchase_intent(deed, Address::random(), Address::random(), Decimal::new(25, 1), 100)
}

fn raw_record() -> serde_json::Value {
    json!({
        "id": "tx-1",
        "deedId": "deed-9",
        "from": "0x1111111111111111111111111111111111111111",
        "to": "0x2222222222222222222222222222222222222222",
        "amount": "2.5",
        "share": 40,
        "type": "escrow_sale",
        "status": "pending",
        "blockchainIdentification": "0x3333333333333333333333333333333333333333",
        "date": "2024-05-01T10:00:00Z",
    })
}

// ============================================================================
// RECORD MODEL
// ============================================================================

#[test]
fn test_purchase_intent_shape() {
    let record = intent("deed-1");
    assert_eq!(record.kind, TransactionType::DirectTransfer);
    assert_eq!(record.status, TransactionStatus::Pending);
    assert!(record.is_purchase_intent());
    assert!(!record.is_materialized_escrow());
}

#[test]
fn test_escrow_sale_shape() {
    let escrow = Address::random();
    let record = TransactionRecord::escrow_sale("deed-1", Address::random(), Address::random(), Decimal::ONE, 25, escrow);
    assert!(record.is_materialized_escrow());
    assert!(!record.is_purchase_intent());
    assert!(!record.is_full_ownership());
    assert_eq!(record.blockchain_identification, Some(escrow));
}

#[test]
fn test_generated_ids_are_unique() {
    assert_ne!(TransactionId::generate(), TransactionId::generate());
}

#[test]
fn test_from_json_valid() {
    let record = TransactionRecord::from_json(&raw_record()).unwrap();
    assert_eq!(record.id, TransactionId::new("tx-1"));
    assert_eq!(record.deed_id, "deed-9");
    assert_eq!(record.amount, Decimal::new(25, 1));
    assert_eq!(record.share, 40);
    assert!(record.is_materialized_escrow());
}

#[test]
fn test_from_json_rejects_unknown_type() {
    let mut raw = raw_record();
    raw["type"] = json!("auction");
    assert!(matches!(
        TransactionRecord::from_json(&raw),
        Err(LedgerError::MalformedResponse(_))
    ));
}

#[test]
fn test_from_json_rejects_share_out_of_range() {
    let mut raw = raw_record();
    raw["share"] = json!(0);
    assert!(TransactionRecord::from_json(&raw).is_err());

    raw["share"] = json!(101);
    assert!(TransactionRecord::from_json(&raw).is_err());
}

#[test]
fn test_from_json_rejects_missing_deed() {
    let mut raw = raw_record();
    raw.as_object_mut().unwrap().remove("deedId");
    assert!(TransactionRecord::from_json(&raw).is_err());
}

#[test]
fn test_from_json_missing_escrow_is_none() {
    let mut raw = raw_record();
    raw.as_object_mut().unwrap().remove("blockchainIdentification");
    raw["type"] = json!("direct_transfer");
    let record = TransactionRecord::from_json(&raw).unwrap();
    assert!(record.is_purchase_intent());
}

#[test]
fn test_json_roundtrip_keeps_wire_names() {
    let record = intent("deed-1");
    let value = record.to_json();
    assert_eq!(value["type"], json!("direct_transfer"));
    assert_eq!(value["status"], json!("pending"));
    assert!(value.get("deedId").is_some());
    assert_eq!(TransactionRecord::from_json(&value).unwrap(), record);
}

// ============================================================================
// MOCK LEDGER
// ============================================================================

#[tokio::test]
async fn test_create_and_list_by_deed() {
    let ledger = MockLedgerGateway::new();
    ledger.create_transaction(intent("deed-1")).await.unwrap();
    ledger.create_transaction(intent("deed-1")).await.unwrap();
    ledger.create_transaction(intent("deed-2")).await.unwrap();

    assert_eq!(ledger.transactions_by_deed("deed-1").await.unwrap().len(), 2);
    assert_eq!(ledger.transactions_by_deed("deed-2").await.unwrap().len(), 1);
    assert!(ledger.transactions_by_deed("deed-3").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_id_rejected() {
    let ledger = MockLedgerGateway::new();
    let record = intent("deed-1");
    ledger.create_transaction(record.clone()).await.unwrap();

    let result = ledger.create_transaction(record).await;
    assert!(matches!(result, Err(LedgerError::Rejected(_))));
}

#[tokio::test]
async fn test_status_moves_to_terminal_once() {
    let ledger = MockLedgerGateway::new();
    let record = ledger.create_transaction(intent("deed-1")).await.unwrap();

    let updated = ledger
        .update_transaction_status(&record.id, TransactionStatus::Completed)
        .await
        .unwrap();
    assert_eq!(updated.status, TransactionStatus::Completed);

    // Same status again is a no-op
    assert!(ledger
        .update_transaction_status(&record.id, TransactionStatus::Completed)
        .await
        .is_ok());

    // Terminal records never change
    let result = ledger
        .update_transaction_status(&record.id, TransactionStatus::Failed)
        .await;
    assert!(matches!(result, Err(LedgerError::Rejected(_))));
}

#[tokio::test]
async fn test_update_unknown_record() {
    let ledger = MockLedgerGateway::new();
    let id = TransactionId::new("missing");
    let result = ledger.update_transaction_status(&id, TransactionStatus::Failed).await;
    assert_eq!(result, Err(LedgerError::NotFound(id)));
}

#[tokio::test]
async fn test_by_type_and_status() {
    let ledger = MockLedgerGateway::new();
    let escrow_sale = TransactionRecord::escrow_sale(
        "deed-1",
        Address::random(),
        Address::random(),
        Decimal::ONE,
        100,
        Address::random(),
    );
    ledger.insert(escrow_sale.clone());
    ledger.insert(escrow_sale.clone().with_status(TransactionStatus::Completed));
    ledger.insert(intent("deed-1"));

    let pending = ledger
        .transactions_by_type_and_status(TransactionType::EscrowSale, TransactionStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, escrow_sale.id);
}

#[tokio::test]
async fn test_failure_injection() {
    let ledger = MockLedgerGateway::new();

    ledger.set_fail_reads(true);
    let err = ledger.transactions_by_deed("deed-1").await.unwrap_err();
    assert!(err.is_retryable());
    ledger.set_fail_reads(false);

    ledger.set_reject_writes(true);
    let err = ledger.create_transaction(intent("deed-1")).await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(ledger.create_calls(), 1);
    assert!(ledger.records().is_empty());
}
