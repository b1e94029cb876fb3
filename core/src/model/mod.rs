// orderflow/src/model/mod.rs

//! Records owned by the engine: orders, payments, status history, vouchers.

pub mod history;
pub mod order;
pub mod payment;
pub mod voucher;

pub use history::{Actor, EntryKind, NewHistoryEntry, StatusHistoryEntry, TimelineEvent};
pub use order::{DeliveryMethod, Destination, Order, PaymentMethod};
pub use payment::{Payment, PaymentStatus};
pub use voucher::{Discount, NewRedemption, Voucher, VoucherRedemption};
