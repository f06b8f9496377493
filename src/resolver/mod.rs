// Resolver module - WHICH ESCROW
// Discovers the escrow governing a purchase from on-chain and ledger signals

mod model;
#[allow(clippy::module_inception)]
mod resolver;

pub use model::{DeedRef, RecordOrigin, ResolutionReport, ResolvedEscrow, Role, Strategy};
pub use resolver::{ledger_call, EscrowFilter, EscrowResolver, ResolverConfig, ResolverError};
