//! `plaza-payouts` — seller payout schedules.
//!
//! A payout schedule batches the escrow entries one seller became eligible
//! for during a period into a single payable total, then tracks the attempt
//! lifecycle until the transfer is confirmed.

pub mod schedule;

pub use schedule::{
    AddItems, MarkFailed, MarkPaid, OpenSchedule, PayoutPeriod, PayoutSchedule,
    PayoutScheduleItem, ScheduleCommand, ScheduleEvent, ScheduleStatus, StartProcessing,
    PAYOUT_NAMESPACE,
};
