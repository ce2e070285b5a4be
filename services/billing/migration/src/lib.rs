use sea_orm_migration::prelude::*;

mod m20261001_000001_create_invoices;
mod m20261001_000002_create_bookings;
mod m20261001_000003_create_payments;
mod m20261001_000004_create_inbound_webhook_events;
mod m20261001_000005_create_outbox_events;
mod m20261001_000006_create_export_dead_letters;
mod m20261001_000007_create_notification_records;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_invoices::Migration),
            Box::new(m20261001_000002_create_bookings::Migration),
            Box::new(m20261001_000003_create_payments::Migration),
            Box::new(m20261001_000004_create_inbound_webhook_events::Migration),
            Box::new(m20261001_000005_create_outbox_events::Migration),
            Box::new(m20261001_000006_create_export_dead_letters::Migration),
            Box::new(m20261001_000007_create_notification_records::Migration),
        ]
    }
}
