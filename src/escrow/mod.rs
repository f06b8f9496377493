// Escrow module - THE ON-CHAIN TRUTH
// Typed escrow views, payload validation, and the gateway to the contracts

mod gateway;
mod model;
mod payload;

pub use gateway::{
    fetch_snapshot, with_timeout, EscrowError, EscrowGateway, EscrowRpc, JsonEscrowGateway,
    MockEscrowGateway,
};
pub use model::{EscrowDetails, EscrowSnapshot, EscrowStatusFlags, TxReceipt};
pub use payload::parse_address_list;
