use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Payments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Payments::InvoiceId).string())
                    .col(ColumnDef::new(Payments::BookingId).string())
                    .col(ColumnDef::new(Payments::Provider).string().not_null())
                    .col(ColumnDef::new(Payments::ProviderRef).string())
                    .col(ColumnDef::new(Payments::CheckoutSessionId).string())
                    .col(
                        ColumnDef::new(Payments::AmountCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Payments::Currency).string_len(3).not_null())
                    .col(ColumnDef::new(Payments::Status).string().not_null())
                    .col(
                        ColumnDef::new(Payments::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Payments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Payments::Table, Payments::InvoiceId)
                            .to(Invoices::Table, Invoices::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Payments::Table, Payments::BookingId)
                            .to(Bookings::Table, Bookings::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Exactly one target, and the partial unique indexes sea-query can't express.
        let db = manager.get_connection();
        db.execute_unprepared(
            "ALTER TABLE payments ADD CONSTRAINT chk_payments_single_target \
             CHECK ((invoice_id IS NULL) <> (booking_id IS NULL))",
        )
        .await?;
        db.execute_unprepared(
            "CREATE UNIQUE INDEX uq_payments_provider_ref \
             ON payments (provider, provider_ref) WHERE provider_ref IS NOT NULL",
        )
        .await?;
        db.execute_unprepared(
            "CREATE UNIQUE INDEX uq_payments_invoice_session \
             ON payments (invoice_id, checkout_session_id) \
             WHERE invoice_id IS NOT NULL AND checkout_session_id IS NOT NULL",
        )
        .await?;
        db.execute_unprepared(
            "CREATE UNIQUE INDEX uq_payments_booking_session \
             ON payments (booking_id, checkout_session_id) \
             WHERE booking_id IS NOT NULL AND checkout_session_id IS NOT NULL",
        )
        .await?;

        manager
            .create_index(
                Index::create()
                    .table(Payments::Table)
                    .col(Payments::InvoiceId)
                    .name("idx_payments_invoice_id")
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .table(Payments::Table)
                    .col(Payments::BookingId)
                    .name("idx_payments_booking_id")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Payments {
    Table,
    Id,
    InvoiceId,
    BookingId,
    Provider,
    ProviderRef,
    CheckoutSessionId,
    AmountCents,
    Currency,
    Status,
    ReceivedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Invoices {
    Table,
    Id,
}

#[derive(Iden)]
enum Bookings {
    Table,
    Id,
}
