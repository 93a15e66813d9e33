//! GST split of a taxable amount into CGST/SGST or IGST.
//!
//! A supply inside the seller's own state is taxed half as central and half
//! as state GST. A supply into another state is taxed entirely as integrated
//! GST. Each component is rounded to paise independently, half away from
//! zero.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use super::money::{checked_mul, round_money};

/// Rates the tax authority publishes as standard slabs.
pub const STANDARD_SLABS: [Decimal; 5] = [dec!(0), dec!(5), dec!(12), dec!(18), dec!(28)];

/// Whether two state codes name the same jurisdiction.
pub fn same_jurisdiction(seller_state: &str, buyer_state: &str) -> bool {
    seller_state.trim().eq_ignore_ascii_case(buyer_state.trim())
}

/// Tax components for one taxable amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaxSplit {
    pub cgst: Decimal,
    pub sgst: Decimal,
    pub igst: Decimal,
    /// The rate was not one of the configured slabs.
    pub non_standard_rate: bool,
}

impl TaxSplit {
    pub fn total(&self) -> Decimal {
        self.cgst + self.sgst + self.igst
    }
}

#[derive(Debug, Clone)]
pub struct TaxSplitter {
    slabs: Vec<Decimal>,
}

impl Default for TaxSplitter {
    fn default() -> Self {
        Self {
            slabs: STANDARD_SLABS.to_vec(),
        }
    }
}

impl TaxSplitter {
    /// Splitter that treats `slabs` as the standard rates.
    pub fn with_slabs(slabs: Vec<Decimal>) -> Self {
        Self { slabs }
    }

    pub fn is_standard_rate(&self, rate: Decimal) -> bool {
        self.slabs.iter().any(|slab| *slab == rate)
    }

    pub fn split(
        &self,
        amount: Decimal,
        rate: Decimal,
        seller_state: &str,
        buyer_state: &str,
    ) -> Result<TaxSplit, AppError> {
        let non_standard_rate = !self.is_standard_rate(rate);
        let scaled = checked_mul("tax", amount, rate)?;

        if same_jurisdiction(seller_state, buyer_state) {
            let half = round_money(scaled / dec!(200));
            Ok(TaxSplit {
                cgst: half,
                sgst: half,
                igst: Decimal::ZERO,
                non_standard_rate,
            })
        } else {
            Ok(TaxSplit {
                cgst: Decimal::ZERO,
                sgst: Decimal::ZERO,
                igst: round_money(scaled / dec!(100)),
                non_standard_rate,
            })
        }
    }
}
