//! Generated gRPC client/server stubs for the exchange-worker contract,
//! plus small conversion helpers so callers never hand-roll decimal string
//! parsing at more than one boundary.

tonic::include_proto!("simproto");

use rust_decimal::Decimal;
use std::str::FromStr;

impl SymbolData {
    pub fn open_decimal(&self) -> Result<Decimal, rust_decimal::Error> {
        Decimal::from_str(&self.open)
    }

    pub fn high_decimal(&self) -> Result<Decimal, rust_decimal::Error> {
        Decimal::from_str(&self.high)
    }

    pub fn low_decimal(&self) -> Result<Decimal, rust_decimal::Error> {
        Decimal::from_str(&self.low)
    }

    pub fn close_decimal(&self) -> Result<Decimal, rust_decimal::Error> {
        Decimal::from_str(&self.close)
    }

    pub fn vwap_decimal(&self) -> Result<Decimal, rust_decimal::Error> {
        Decimal::from_str(&self.vwap)
    }
}
