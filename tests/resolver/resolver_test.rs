// Escrow Resolver Tests
// Direct and ledger-fallback discovery, filtering, and partial failures

use deed_escrow::escrow::{EscrowStatusFlags, MockEscrowGateway};
use deed_escrow::identity::Address;
use deed_escrow::ledger::{MockLedgerGateway, TransactionRecord, TransactionStatus};
use deed_escrow::resolver::{
    DeedRef, EscrowFilter, EscrowResolver, RecordOrigin, ResolverConfig, Role, Strategy,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

struct Fixture {
    chain: Arc<MockEscrowGateway>,
    ledger: Arc<MockLedgerGateway>,
    resolver: EscrowResolver,
}

fn fixture() -> Fixture {
    fixture_with(ResolverConfig::new().with_call_timeout_ms(200))
}

fn fixture_with(config: ResolverConfig) -> Fixture {
    let chain = Arc::new(MockEscrowGateway::new());
    let ledger = Arc::new(MockLedgerGateway::new());
    let resolver = EscrowResolver::new(chain.clone(), ledger.clone(), config);
    Fixture { chain, ledger, resolver }
}

fn deed() -> DeedRef {
    DeedRef::new("deed-1", "501")
}

fn price() -> Decimal {
    Decimal::new(25, 1)
}

/// Deploy an escrow and record it in the ledger the way a seller would
fn deploy_recorded(f: &Fixture, seller: Address, buyer: Address, deed: &DeedRef) -> Address {
    let escrow = f.chain.create_escrow(seller, buyer, price(), &deed.token_id);
    f.ledger.insert(TransactionRecord::escrow_sale(
        &deed.deed_id,
        seller,
        buyer,
        price(),
        100,
        escrow,
    ));
    escrow
}

// ============================================================================
// DIRECT STRATEGY
// ============================================================================

#[tokio::test]
async fn test_no_escrows_is_empty_not_error() {
    let f = fixture();
    let buyer = Address::random();

    let found = f.resolver.resolve_escrows_for_party(&deed(), &buyer, Role::Buyer).await;
    assert!(found.is_empty());

    let report = f
        .resolver
        .resolve_with_report(&EscrowFilter::for_party(buyer, Role::Buyer))
        .await;
    assert_eq!(report.strategy, Strategy::Nothing);
    assert!(!report.is_degraded());
}

#[tokio::test]
async fn test_direct_links_ledger_record() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    let escrow = deploy_recorded(&f, seller, buyer, &deed());

    let report = f
        .resolver
        .resolve_with_report(&EscrowFilter::for_party(buyer, Role::Buyer).with_deed(deed()))
        .await;

    assert_eq!(report.strategy, Strategy::Direct);
    assert_eq!(report.escrows.len(), 1);
    let resolved = &report.escrows[0];
    assert_eq!(resolved.address(), escrow);
    assert_eq!(resolved.origin, RecordOrigin::Ledger);
    assert_eq!(resolved.record.deed_id, "deed-1");
}

#[tokio::test]
async fn test_direct_without_ledger_record_is_synthetic() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    let escrow = f.chain.create_escrow(seller, buyer, price(), "501");

    let found = f.resolver.resolve_escrows_for_party(&deed(), &seller, Role::Seller).await;

    assert_eq!(found.len(), 1);
    assert!(found[0].is_synthetic());
    assert_eq!(found[0].record.blockchain_identification, Some(escrow));
    assert_eq!(found[0].record.deed_id, "deed-1");
    assert_eq!(found[0].record.from, seller);
    assert_eq!(found[0].record.to, buyer);
    assert_eq!(found[0].record.share, 100);
}

#[tokio::test]
async fn test_linking_can_be_disabled() {
    let f = fixture_with(ResolverConfig::new().with_link_ledger_records(false));
    let (seller, buyer) = (Address::random(), Address::random());
    deploy_recorded(&f, seller, buyer, &deed());

    let found = f.resolver.resolve_escrows_for_party(&deed(), &buyer, Role::Buyer).await;
    assert_eq!(found.len(), 1);
    assert!(found[0].is_synthetic());
}

#[tokio::test]
async fn test_finalized_escrows_excluded() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    let escrow = deploy_recorded(&f, seller, buyer, &deed());
    f.chain.set_status(&escrow, EscrowStatusFlags::new(true, true, true));

    let found = f.resolver.resolve_escrows_for_party(&deed(), &buyer, Role::Buyer).await;
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_role_decides_side() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    deploy_recorded(&f, seller, buyer, &deed());

    // The buyer is not a seller on this escrow
    let found = f.resolver.resolve_escrows_for_party(&deed(), &buyer, Role::Seller).await;
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_deed_filter_matches_share_token() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    f.chain.create_escrow(seller, buyer, price(), "501");
    f.chain.create_escrow(seller, buyer, price(), "777");
    f.chain.create_escrow(seller, buyer, price(), "999");

    let fractional = deed().with_share_token("777");
    let found = f.resolver.resolve_escrows_for_party(&fractional, &buyer, Role::Buyer).await;

    let mut tokens: Vec<String> = found.iter().map(|r| r.snapshot.token_id.clone()).collect();
    tokens.sort();
    assert_eq!(tokens, vec!["501".to_string(), "777".to_string()]);
}

#[tokio::test]
async fn test_triple_filters_counterpart() {
    let f = fixture();
    let seller = Address::random();
    let (buyer_a, buyer_b) = (Address::random(), Address::random());
    let escrow_a = deploy_recorded(&f, seller, buyer_a, &deed());
    deploy_recorded(&f, seller, buyer_b, &deed());

    let found = f.resolver.resolve_for_triple(&deed(), &seller, &buyer_a).await;

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address(), escrow_a);
}

#[tokio::test]
async fn test_pending_for_party_spans_deeds() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    deploy_recorded(&f, seller, buyer, &DeedRef::new("deed-1", "501"));
    deploy_recorded(&f, seller, buyer, &DeedRef::new("deed-2", "502"));
    deploy_recorded(&f, seller, Address::random(), &DeedRef::new("deed-3", "503"));

    let found = f.resolver.resolve_pending_for_party(&buyer, Role::Buyer).await;
    assert_eq!(found.len(), 2);

    let found = f.resolver.resolve_pending_for_party(&seller, Role::Seller).await;
    assert_eq!(found.len(), 3);
}

// ============================================================================
// PARTIAL FAILURES
// ============================================================================

#[tokio::test]
async fn test_one_failed_fetch_keeps_the_others() {
    let f = fixture();
    let seller = Address::random();
    let buyer = Address::random();
    let e1 = f.chain.create_escrow(seller, buyer, price(), "501");
    let e2 = f.chain.create_escrow(seller, buyer, price(), "502");
    let e3 = f.chain.create_escrow(seller, buyer, price(), "503");
    f.chain.fail_escrow(e2);

    let report = f
        .resolver
        .resolve_with_report(&EscrowFilter::for_party(buyer, Role::Buyer))
        .await;

    let mut found: Vec<Address> = report.escrows.iter().map(|r| r.address()).collect();
    found.sort();
    let mut expected = vec![e1, e3];
    expected.sort();

    assert_eq!(found, expected);
    assert_eq!(report.candidates, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, e2);
    assert!(report.is_partial());
    assert!(report.is_degraded());
}

#[tokio::test]
async fn test_stalled_fetch_bounded_by_deadline() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    let healthy = f.chain.create_escrow(seller, buyer, price(), "501");
    let stalled = f.chain.create_escrow(seller, buyer, price(), "502");
    f.chain.stall_escrow(stalled);

    let started = Instant::now();
    let report = f
        .resolver
        .resolve_with_report(&EscrowFilter::for_party(buyer, Role::Buyer))
        .await;

    assert!(started.elapsed().as_secs() < 5);
    assert_eq!(report.escrows.len(), 1);
    assert_eq!(report.escrows[0].address(), healthy);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].1.is_retryable());
}

// ============================================================================
// LEDGER FALLBACK
// ============================================================================

#[tokio::test]
async fn test_fallback_when_index_unavailable() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    let escrow = deploy_recorded(&f, seller, buyer, &deed());
    f.chain.set_index_available(false);

    let report = f
        .resolver
        .resolve_with_report(&EscrowFilter::for_party(buyer, Role::Buyer).with_deed(deed()))
        .await;

    assert!(report.index_failed);
    assert_eq!(report.strategy, Strategy::LedgerFallback);
    assert_eq!(report.escrows.len(), 1);
    assert_eq!(report.escrows[0].address(), escrow);
    assert_eq!(report.escrows[0].origin, RecordOrigin::Ledger);
    assert!(!report.is_degraded());
}

#[tokio::test]
async fn test_fallback_skips_non_pending_records() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    let escrow = f.chain.create_escrow(seller, buyer, price(), "501");
    f.ledger.insert(
        TransactionRecord::escrow_sale("deed-1", seller, buyer, price(), 100, escrow)
            .with_status(TransactionStatus::Failed),
    );
    f.chain.set_index_available(false);

    let found = f.resolver.resolve_escrows_for_party(&deed(), &buyer, Role::Buyer).await;
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_fallback_trusts_chain_over_ledger() {
    let f = fixture();
    let (seller, buyer, stranger) = (Address::random(), Address::random(), Address::random());
    // The chain says the escrow belongs to someone else
    let escrow = f.chain.create_escrow(seller, stranger, price(), "501");
    f.ledger.insert(TransactionRecord::escrow_sale(
        "deed-1",
        seller,
        buyer,
        price(),
        100,
        escrow,
    ));
    f.chain.set_index_available(false);

    let found = f.resolver.resolve_escrows_for_party(&deed(), &buyer, Role::Buyer).await;
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_fallback_drops_finalized_escrow() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    let escrow = deploy_recorded(&f, seller, buyer, &deed());
    f.chain.set_status(&escrow, EscrowStatusFlags::new(true, true, true));
    f.chain.set_index_available(false);

    let found = f.resolver.resolve_escrows_for_party(&deed(), &buyer, Role::Buyer).await;
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_both_sources_down_is_degraded() {
    let f = fixture();
    let buyer = Address::random();
    f.chain.set_index_available(false);
    f.ledger.set_fail_reads(true);

    let report = f
        .resolver
        .resolve_with_report(&EscrowFilter::for_party(buyer, Role::Buyer))
        .await;

    assert!(report.escrows.is_empty());
    assert!(report.index_failed);
    assert!(report.ledger_failed);
    assert!(report.is_degraded());
}

#[tokio::test]
async fn test_snapshot_reads_one_escrow() {
    let f = fixture();
    let (seller, buyer) = (Address::random(), Address::random());
    let escrow = f.chain.create_escrow(seller, buyer, price(), "501");
    f.chain.seller_deposit(&escrow);

    let snapshot = f.resolver.snapshot(&escrow).await.unwrap();
    assert!(snapshot.is_seller_deposited);
    assert_eq!(snapshot.price, price());
}
