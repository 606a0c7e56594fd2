/// Ledger data model: rounds, blocks and transactions
pub mod types;

pub use types::*;

/// Number of decimal places used by microalgo amounts and most stablecoin ASAs (e.g. USDC).
pub const MICRO_UNIT_DECIMALS: u32 = 6;
