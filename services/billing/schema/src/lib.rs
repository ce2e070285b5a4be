//! sea-orm entities for the billing service tables.

pub mod bookings;
pub mod export_dead_letters;
pub mod inbound_webhook_events;
pub mod invoices;
pub mod notification_records;
pub mod outbox_events;
pub mod payments;
