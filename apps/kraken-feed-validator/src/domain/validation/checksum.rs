//! Order Book Checksum
//!
//! CRC-32 (IEEE) over the top of book, as declared on every book message.
//!
//! # Algorithm
//!
//! 1. Take the top 10 asks (ascending) then the top 10 bids (descending).
//! 2. For each level render price, then quantity.
//! 3. Remove the decimal point and strip leading zeros.
//! 4. Concatenate and hash the resulting ASCII string.
//!
//! Values are rendered with the instrument precision when known, otherwise
//! as received. Frames are decoded with arbitrary-precision numbers, so a
//! received `0.50000000` keeps its scale and renders as `50000000`.

use rust_decimal::Decimal;

use crate::domain::market::BookLevel;
use crate::domain::subscription::ChecksumPrecision;

/// Levels per side covered by the checksum.
pub const CHECKSUM_DEPTH: usize = 10;

/// Compute the checksum over the given sides (bids best first, asks best first).
#[must_use]
pub fn compute_checksum(
    bids: &[BookLevel],
    asks: &[BookLevel],
    precision: Option<ChecksumPrecision>,
) -> u32 {
    crc32fast::hash(checksum_input(bids, asks, precision).as_bytes())
}

/// The string the checksum is computed over.
#[must_use]
pub fn checksum_input(
    bids: &[BookLevel],
    asks: &[BookLevel],
    precision: Option<ChecksumPrecision>,
) -> String {
    let mut input = String::new();
    for level in asks
        .iter()
        .take(CHECKSUM_DEPTH)
        .chain(bids.iter().take(CHECKSUM_DEPTH))
    {
        input.push_str(&render(level.price, precision.map(|p| p.price)));
        input.push_str(&render(level.qty, precision.map(|p| p.qty)));
    }
    input
}

fn render(value: Decimal, scale: Option<u32>) -> String {
    let text = match scale {
        Some(dp) => format!("{:.*}", dp as usize, value.round_dp(dp)),
        None => value.to_string(),
    };
    text.replace('.', "").trim_start_matches('0').to_string()
}
