// Identity module - WHO IS TRADING
// Account and contract addresses shared by every other module

mod address;

pub use address::*;
