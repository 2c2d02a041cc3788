//! `plaza-invoicing` — commission invoices.
//!
//! Escrow commission is periodically rolled into one invoice per (seller,
//! period) for accounting and reporting. A refund that claws back already
//! invoiced commission shows up as a credit-note line on the same invoice.

pub mod invoice;

pub use invoice::{
    AddCreditNote, AddLine, CommissionInvoice, CommissionInvoiceLine, Finalize, InvoiceCommand,
    InvoiceEvent, InvoicePeriod, InvoiceStatus, OpenInvoice, INVOICE_NAMESPACE,
};
