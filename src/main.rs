// deedescrow - command-line front end for the escrow purchase coordinator

use clap::{Parser, Subcommand};
use deed_escrow::escrow::{EscrowSnapshot, MockEscrowGateway};
use deed_escrow::fee::{Category, FeeSchedule};
use deed_escrow::identity::Address;
use deed_escrow::ledger::{LedgerGateway, TransactionRecord};
use deed_escrow::purchase::{
    classify, BuyerProfile, CoordinatorConfig, MockOwnerRegistry, PurchaseContext,
};
use deed_escrow::resolver::{DeedRef, ResolverConfig, Role};
use deed_escrow::storage::LedgerStore;
use deed_escrow::watch::WatchConfig;
use deed_escrow::{Coordinator, Settings};
use rust_decimal::Decimal;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deedescrow")]
#[command(about = "Escrow purchase coordinator for tokenized property deeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the stamp fee and seller proceeds for a sale price
    Fees {
        /// Sale price in native-token units
        #[arg(short, long)]
        amount: Decimal,

        /// Transaction category (Sale, Gift, Transfer, Exchange, Lease, Mortgage)
        #[arg(short, long, default_value = "Sale")]
        category: String,
    },

    /// Classify escrow flags into a purchase step
    Classify {
        /// No escrow exists
        #[arg(long)]
        none: bool,

        #[arg(long)]
        seller_deposited: bool,

        #[arg(long)]
        buyer_deposited: bool,

        #[arg(long)]
        finalized: bool,
    },

    /// Run an in-memory purchase end to end with the watch running
    Simulate {
        /// Sale price in native-token units
        #[arg(short, long, default_value = "10")]
        price: Decimal,

        /// Share of the deed being sold, in percent
        #[arg(short, long, default_value = "100")]
        share: u8,

        /// Watch poll interval in milliseconds
        #[arg(long, default_value = "200")]
        poll_interval_ms: u64,

        /// Gateway call timeout in milliseconds
        #[arg(long, default_value = "2000")]
        call_timeout_ms: u64,
    },

    /// Inspect or write the local transaction ledger
    Ledger {
        /// Ledger database path
        #[arg(long, default_value = ".deedescrow/ledger")]
        db: PathBuf,

        #[command(subcommand)]
        command: LedgerCommand,
    },
}

#[derive(Subcommand)]
enum LedgerCommand {
    /// List every record for a deed
    List {
        #[arg(long)]
        deed: String,
    },

    /// Record a buyer's purchase intent
    Intent {
        #[arg(long)]
        deed: String,

        #[arg(long)]
        buyer: Address,

        #[arg(long)]
        seller: Address,

        #[arg(long)]
        amount: Decimal,

        #[arg(long, default_value = "100")]
        share: u8,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Fees { amount, category } => {
            let category: Category = category.parse()?;
            let breakdown = FeeSchedule::standard().payment_breakdown(amount, category)?;
            println!("category:      {}", category);
            println!("total price:   {}", breakdown.total_price);
            println!("stamp fee:     {}% = {}", breakdown.stamp_fee_percentage, breakdown.stamp_fee);
            println!("seller amount: {}", breakdown.seller_amount);
        }

        Commands::Classify {
            none,
            seller_deposited,
            buyer_deposited,
            finalized,
        } => {
            let snapshot = (!none).then(|| EscrowSnapshot {
                address: Address::ZERO,
                seller: Address::ZERO,
                buyer: Address::ZERO,
                price: Decimal::ZERO,
                token_id: String::new(),
                is_seller_deposited: seller_deposited,
                is_buyer_deposited: buyer_deposited,
                is_finalized: finalized,
            });
            if let Some(s) = &snapshot {
                s.status().validate()?;
            }
            println!("{}", classify(snapshot.as_ref()));
        }

        Commands::Simulate {
            price,
            share,
            poll_interval_ms,
            call_timeout_ms,
        } => {
            simulate(price, share, poll_interval_ms, call_timeout_ms).await?;
        }

        Commands::Ledger { db, command } => {
            let store = LedgerStore::open(&db)?;
            match command {
                LedgerCommand::List { deed } => {
                    for record in store.transactions_by_deed(&deed).await? {
                        println!(
                            "{}  {}  {} -> {}  {} ({}%)  {}  {}",
                            record.date.format("%Y-%m-%d %H:%M:%S"),
                            record.kind,
                            record.from.short(),
                            record.to.short(),
                            record.amount,
                            record.share,
                            record.status,
                            record
                                .blockchain_identification
                                .map(|a| a.to_string())
                                .unwrap_or_default(),
                        );
                    }
                }
                LedgerCommand::Intent {
                    deed,
                    buyer,
                    seller,
                    amount,
                    share,
                } => {
                    let record = store
                        .create_transaction(TransactionRecord::purchase_intent(&deed, buyer, seller, amount, share))
                        .await?;
                    println!("{}", record.id);
                }
            }
        }
    }

    Ok(())
}

async fn simulate(price: Decimal, share: u8, poll_interval_ms: u64, call_timeout_ms: u64) -> Result<(), Box<dyn Error>> {
    let chain = Arc::new(MockEscrowGateway::new());
    let ledger = Arc::new(LedgerStore::temporary()?);
    let owners = Arc::new(MockOwnerRegistry::new());

    let settings = Settings::new()
        .with_resolver(ResolverConfig::new().with_call_timeout_ms(call_timeout_ms))
        .with_coordinator(
            CoordinatorConfig::new()
                .with_call_timeout_ms(call_timeout_ms)
                .with_owner_update_retry_delay_ms(100),
        )
        .with_watch(WatchConfig::new().with_poll_interval_ms(poll_interval_ms));
    let coordinator = Coordinator::new(chain.clone(), ledger.clone(), settings)?.with_owner_registry(owners.clone());

    let seller = Address::random();
    let buyer = Address::random();
    let deed = DeedRef::new("deed-sim-1", "1001");

    let breakdown = coordinator.payment_breakdown(price, Category::Sale)?;
    info!(
        price = %breakdown.total_price,
        fee_pct = %breakdown.stamp_fee_percentage,
        fee = %breakdown.stamp_fee,
        seller_amount = %breakdown.seller_amount,
        "payment breakdown"
    );

    let watch = coordinator.watch(buyer, Role::Buyer);
    let _subscription = watch.subscribe(
        |n| {
            info!(
                escrow = %n.escrow.short(),
                step = %n.step,
                message = %n.message,
                action_required = n.action_required,
                "notify"
            )
        },
        |n, reason| info!(escrow = %n.escrow.short(), ?reason, "retire"),
    );
    let handle = watch.start()?;

    let context = PurchaseContext::new(deed.clone(), seller, buyer, Role::Buyer)
        .with_buyer_profile(BuyerProfile::new("Simulated Buyer", "000000000V"));
    let purchase = coordinator.purchase(context)?;

    let interest = purchase.express_interest(price, share).await?;
    info!(id = %interest.record.id, created = interest.created, "intent recorded");

    // Seller side, outside the coordinator: deploy the escrow and record it
    let escrow = chain.create_escrow(seller, buyer, price, &deed.token_id);
    ledger
        .create_transaction(TransactionRecord::escrow_sale(&deed.deed_id, seller, buyer, price, share, escrow))
        .await?;
    info!(step = %purchase.refresh().await?.step, "escrow deployed");
    tokio::time::sleep(Duration::from_millis(poll_interval_ms * 2)).await;

    chain.seller_deposit(&escrow);
    info!(step = %purchase.refresh().await?.step, "seller deposited");
    tokio::time::sleep(Duration::from_millis(poll_interval_ms * 2)).await;

    let deposit = purchase.deposit_payment(&escrow, price).await?;
    info!(tx = %deposit.receipt.tx_hash, step = %deposit.step(), "buyer deposited");
    tokio::time::sleep(Duration::from_millis(poll_interval_ms * 2)).await;

    let finalized = purchase.finalize(&escrow).await?;
    info!(tx = %finalized.receipt.tx_hash, step = %finalized.step(), ledger_updated = finalized.ledger_updated, "finalized");
    if let Some(update) = finalized.owner_update {
        match update.wait().await {
            Ok(attempts) => info!(attempts, "owner of record updated"),
            Err(e) => info!(error = %e, "owner of record update failed"),
        }
    }
    tokio::time::sleep(Duration::from_millis(poll_interval_ms * 2)).await;

    let stats = watch.stats();
    handle.stop().await;
    info!(
        ticks = stats.ticks,
        created = stats.notifications_created,
        retired = stats.notifications_retired,
        "simulation finished"
    );
    Ok(())
}
