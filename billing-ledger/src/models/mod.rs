//! Domain models for the billing ledger.

mod business;
mod invoice;
mod item;
mod party;
mod payment;

pub use business::{Business, CreateBusiness};
pub use invoice::{
    CreateInvoice, CreateInvoiceLine, Invoice, InvoiceLine, InvoiceStatus, InvoiceType,
};
pub use item::{
    AdjustStock, AdjustmentReason, CreateItem, InventoryItem, ItemKind, StockAdjustment,
    StockStatus,
};
pub use party::{CreateParty, OpeningBalanceType, Party, PartyType};
pub use payment::{Payment, PaymentDirection, PaymentMode, PaymentStatus, RecordPayment};
