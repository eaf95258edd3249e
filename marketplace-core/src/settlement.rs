//! Purchase settlement arithmetic
//!
//! Splits a sale price three ways (marketplace fee, creator royalty, seller
//! proceeds) using integer basis-point arithmetic with floor division.
//! Rounding remainders accrue to the seller, so the split always conserves
//! the full price.

use crate::types::{Amount, BasisPoints, BPS_DENOMINATOR};

/// Three-way split of a sale price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    /// Portion credited to the administrator
    pub marketplace_fee: Amount,

    /// Portion credited to the token creator
    pub royalty_fee: Amount,

    /// Portion credited to the seller
    pub seller_amount: Amount,
}

/// `floor(price * bps / 10_000)` without the intermediate multiply.
///
/// Splitting the price into whole and fractional denominator parts keeps
/// every product within `Amount` for any price up to `Amount::MAX`.
fn bps_share(price: Amount, bps: BasisPoints) -> Amount {
    let whole = price / BPS_DENOMINATOR;
    let rem = price % BPS_DENOMINATOR;
    whole * bps as Amount + rem * bps as Amount / BPS_DENOMINATOR
}

/// Compute the settlement split for a sale.
///
/// Both percentages are bounded by [`crate::types::MAX_BPS`] (10%), so the
/// two fees together never exceed 20% of the price and the seller amount
/// cannot underflow. Valid for the entire `Amount` range.
pub fn compute_split(price: Amount, fee_bps: BasisPoints, royalty_bps: BasisPoints) -> FeeSplit {
    let marketplace_fee = bps_share(price, fee_bps);
    let royalty_fee = bps_share(price, royalty_bps);
    let seller_amount = price - marketplace_fee - royalty_fee;

    FeeSplit {
        marketplace_fee,
        royalty_fee,
        seller_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_scenario() {
        // 1.5 value units at 18 decimals, 2.5% fee, 5% royalty
        let price: Amount = 1_500_000_000_000_000_000;
        let split = compute_split(price, 250, 500);

        assert_eq!(split.marketplace_fee, price / 40); // 2.5%
        assert_eq!(split.royalty_fee, price / 20); // 5%
        assert_eq!(split.seller_amount, price - price / 40 - price / 20);
        assert_eq!(
            split.marketplace_fee + split.royalty_fee + split.seller_amount,
            price
        );
    }

    #[test]
    fn test_zero_percentages() {
        let split = compute_split(1_000, 0, 0);
        assert_eq!(split.marketplace_fee, 0);
        assert_eq!(split.royalty_fee, 0);
        assert_eq!(split.seller_amount, 1_000);
    }

    #[test]
    fn test_split_at_maximum_price() {
        // The top of the Amount range must not overflow the fee computation
        let split = compute_split(Amount::MAX, 250, 500);
        assert_eq!(
            split.marketplace_fee + split.royalty_fee + split.seller_amount,
            Amount::MAX
        );
        assert_eq!(split.marketplace_fee, bps_share(Amount::MAX, 250));
    }

    #[test]
    fn test_bps_share_matches_direct_formula() {
        // Where the direct multiply cannot overflow, both forms agree
        for price in [0u128, 1, 33, 9_999, 10_000, 10_001, 1_500_000_000_000_000_000] {
            for bps in [0u16, 1, 250, 500, 1_000] {
                assert_eq!(bps_share(price, bps), price * bps as Amount / 10_000);
            }
        }
    }

    #[test]
    fn test_floor_division_conserves_price() {
        // 33 at 2.5% = 0.825, floors to 0; remainder stays with the seller
        let split = compute_split(33, 250, 500);
        assert_eq!(split.marketplace_fee, 0);
        assert_eq!(split.royalty_fee, 1);
        assert_eq!(split.seller_amount, 32);
        assert_eq!(
            split.marketplace_fee + split.royalty_fee + split.seller_amount,
            33
        );
    }
}
