//! Party balance derived from opening balance, invoices and payments.
//!
//! Sign convention: positive means the party owes the business
//! (receivable), negative means the business owes the party (payable).
//!
//! Every document contributes through exactly one function
//! ([`PartyLedger::invoice_effect`] / [`PartyLedger::payment_effect`]).
//! A full recomputation sums those effects; an incremental projection
//! applies `effect(after) - effect(before)` per mutation. Both must agree.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Invoice, InvoiceType, Party, Payment, PaymentDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceDirection {
    Receivable,
    Payable,
    Settled,
}

impl BalanceDirection {
    pub fn from_signed(signed: Decimal) -> Self {
        if signed > Decimal::ZERO {
            Self::Receivable
        } else if signed < Decimal::ZERO {
            Self::Payable
        } else {
            Self::Settled
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receivable => "receivable",
            Self::Payable => "payable",
            Self::Settled => "settled",
        }
    }
}

/// Balance of a party; `amount` is the magnitude of `signed_amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyBalance {
    pub party_id: Uuid,
    pub signed_amount: Decimal,
    pub amount: Decimal,
    pub direction: BalanceDirection,
}

impl PartyBalance {
    pub fn from_signed(party_id: Uuid, signed_amount: Decimal) -> Self {
        Self {
            party_id,
            signed_amount,
            amount: signed_amount.abs(),
            direction: BalanceDirection::from_signed(signed_amount),
        }
    }
}

/// Stored projection compared against a full recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub party_id: Uuid,
    pub projected: Decimal,
    pub recomputed: Decimal,
}

impl BalanceCheck {
    pub fn is_consistent(&self) -> bool {
        self.projected == self.recomputed
    }

    pub fn drift(&self) -> Decimal {
        self.projected - self.recomputed
    }
}

/// Document behind a statement line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementDocument {
    Invoice {
        invoice_id: Uuid,
        invoice_type: InvoiceType,
    },
    Payment {
        payment_id: Uuid,
        direction: PaymentDirection,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementLine {
    pub document: StatementDocument,
    pub date: NaiveDate,
    pub debit: Decimal,
    pub credit: Decimal,
    pub running_balance: Decimal,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyStatement {
    pub party_id: Uuid,
    pub opening_balance: Decimal,
    pub closing_balance: PartyBalance,
    pub lines: Vec<StatementLine>,
}

pub struct PartyLedger;

impl PartyLedger {
    /// Contribution of one invoice to its party's balance.
    pub fn invoice_effect(invoice: &Invoice) -> Decimal {
        if invoice.is_cancelled() {
            return Decimal::ZERO;
        }
        match invoice.invoice_type {
            InvoiceType::Sale => invoice.total,
            InvoiceType::Purchase => -invoice.total,
        }
    }

    /// Contribution of one payment to its party's balance.
    pub fn payment_effect(payment: &Payment) -> Decimal {
        if !payment.is_active() {
            return Decimal::ZERO;
        }
        match payment.direction {
            PaymentDirection::PaymentIn => -payment.amount,
            PaymentDirection::PaymentOut => payment.amount,
        }
    }

    /// Projection delta for an invoice write. `before` is `None` on create.
    pub fn invoice_delta(before: Option<&Invoice>, after: &Invoice) -> Decimal {
        Self::invoice_effect(after) - before.map(Self::invoice_effect).unwrap_or_default()
    }

    /// Projection delta for a payment write. `before` is `None` on record.
    pub fn payment_delta(before: Option<&Payment>, after: &Payment) -> Decimal {
        Self::payment_effect(after) - before.map(Self::payment_effect).unwrap_or_default()
    }

    fn owns_invoice(party: &Party, invoice: &Invoice) -> bool {
        invoice.party_id == party.party_id && invoice.business_id == party.business_id
    }

    fn owns_payment(party: &Party, payment: &Payment) -> bool {
        payment.party_id == party.party_id && payment.business_id == party.business_id
    }

    /// Signed balance recomputed from scratch.
    pub fn signed_balance(party: &Party, invoices: &[Invoice], payments: &[Payment]) -> Decimal {
        let invoiced: Decimal = invoices
            .iter()
            .filter(|inv| Self::owns_invoice(party, inv))
            .map(Self::invoice_effect)
            .sum();
        let paid: Decimal = payments
            .iter()
            .filter(|p| Self::owns_payment(party, p))
            .map(Self::payment_effect)
            .sum();

        party.signed_opening_balance() + invoiced + paid
    }

    pub fn balance(party: &Party, invoices: &[Invoice], payments: &[Payment]) -> PartyBalance {
        PartyBalance::from_signed(
            party.party_id,
            Self::signed_balance(party, invoices, payments),
        )
    }

    pub fn verify(
        party: &Party,
        projected: Decimal,
        invoices: &[Invoice],
        payments: &[Payment],
    ) -> BalanceCheck {
        BalanceCheck {
            party_id: party.party_id,
            projected,
            recomputed: Self::signed_balance(party, invoices, payments),
        }
    }

    /// Contributing documents in date order with a running balance.
    /// Cancelled invoices and voided payments are left out.
    pub fn statement(party: &Party, invoices: &[Invoice], payments: &[Payment]) -> PartyStatement {
        let mut lines: Vec<StatementLine> = Vec::new();

        for invoice in invoices.iter().filter(|inv| Self::owns_invoice(party, inv)) {
            if invoice.is_cancelled() {
                continue;
            }
            lines.push(Self::line(
                StatementDocument::Invoice {
                    invoice_id: invoice.invoice_id,
                    invoice_type: invoice.invoice_type,
                },
                invoice.invoice_date,
                invoice.created_utc,
                Self::invoice_effect(invoice),
            ));
        }

        for payment in payments.iter().filter(|p| Self::owns_payment(party, p)) {
            if !payment.is_active() {
                continue;
            }
            lines.push(Self::line(
                StatementDocument::Payment {
                    payment_id: payment.payment_id,
                    direction: payment.direction,
                },
                payment.payment_date,
                payment.created_utc,
                Self::payment_effect(payment),
            ));
        }

        lines.sort_by(|a, b| (a.date, a.created_utc).cmp(&(b.date, b.created_utc)));

        let opening_balance = party.signed_opening_balance();
        let mut running = opening_balance;
        for line in &mut lines {
            running += line.debit - line.credit;
            line.running_balance = running;
        }

        PartyStatement {
            party_id: party.party_id,
            opening_balance,
            closing_balance: PartyBalance::from_signed(party.party_id, running),
            lines,
        }
    }

    fn line(
        document: StatementDocument,
        date: NaiveDate,
        created_utc: DateTime<Utc>,
        effect: Decimal,
    ) -> StatementLine {
        let (debit, credit) = if effect >= Decimal::ZERO {
            (effect, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -effect)
        };
        StatementLine {
            document,
            date,
            debit,
            credit,
            running_balance: Decimal::ZERO,
            created_utc,
        }
    }
}
