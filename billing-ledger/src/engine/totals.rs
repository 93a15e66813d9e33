//! Invoice subtotal, tax breakdown and grand total.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use super::money::{check_money, check_quantity, check_rate, checked_add, checked_mul, round_money};
use super::tax::{TaxSplit, TaxSplitter};

const MAX_LINE_RATE: Decimal = dec!(100);

/// Priced line as seen by the calculator. The rate is already resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineInput {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineTotals {
    pub line_amount: Decimal,
    pub tax: TaxSplit,
    pub tax_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub cgst: Decimal,
    pub sgst: Decimal,
    pub igst: Decimal,
}

impl TaxBreakdown {
    pub fn total(&self) -> Decimal {
        self.cgst + self.sgst + self.igst
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub lines: Vec<LineTotals>,
    pub subtotal: Decimal,
    pub tax: TaxBreakdown,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceTotalCalculator {
    splitter: TaxSplitter,
}

impl InvoiceTotalCalculator {
    pub fn new(splitter: TaxSplitter) -> Self {
        Self { splitter }
    }

    /// Check one line before pricing it. `index` is used in the message only.
    pub fn validate_line(index: usize, line: &LineInput) -> Result<(), AppError> {
        let field = |name: &str| format!("line {}: {}", index + 1, name);

        if line.quantity <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "line {}: quantity must be greater than zero, got {}",
                index + 1,
                line.quantity
            )));
        }
        check_quantity(&field("quantity"), line.quantity)?;
        if line.unit_price < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "line {}: unit price must not be negative, got {}",
                index + 1,
                line.unit_price
            )));
        }
        check_money(&field("unit price"), line.unit_price)?;
        check_rate(&field("tax rate"), line.tax_rate, MAX_LINE_RATE)?;
        Ok(())
    }

    /// Price every line, then sum. Every line is validated before any
    /// arithmetic so a bad line never yields partial totals.
    pub fn compute(
        &self,
        lines: &[LineInput],
        seller_state: &str,
        buyer_state: &str,
    ) -> Result<InvoiceTotals, AppError> {
        for (index, line) in lines.iter().enumerate() {
            Self::validate_line(index, line)?;
        }

        let mut priced = Vec::with_capacity(lines.len());
        let mut subtotal = Decimal::ZERO;
        let mut tax = TaxBreakdown::default();

        for line in lines {
            let line_amount = round_money(checked_mul(
                "line amount",
                line.quantity,
                line.unit_price,
            )?);
            check_money("line amount", line_amount)?;
            let split = self
                .splitter
                .split(line_amount, line.tax_rate, seller_state, buyer_state)?;

            subtotal = checked_add("subtotal", subtotal, line_amount)?;
            tax.cgst = checked_add("cgst", tax.cgst, split.cgst)?;
            tax.sgst = checked_add("sgst", tax.sgst, split.sgst)?;
            tax.igst = checked_add("igst", tax.igst, split.igst)?;

            priced.push(LineTotals {
                line_amount,
                tax: split,
                tax_amount: split.total(),
            });
        }

        let tax_amount = tax.total();
        let total = check_money("invoice total", checked_add("invoice total", subtotal, tax_amount)?)?;

        Ok(InvoiceTotals {
            lines: priced,
            subtotal,
            tax,
            tax_amount,
            total,
        })
    }
}
