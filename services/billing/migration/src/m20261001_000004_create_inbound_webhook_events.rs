use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InboundWebhookEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InboundWebhookEvents::EventId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(InboundWebhookEvents::Provider)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InboundWebhookEvents::EventType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InboundWebhookEvents::PayloadHash)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InboundWebhookEvents::Status)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(InboundWebhookEvents::LastError).text())
                    .col(
                        ColumnDef::new(InboundWebhookEvents::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InboundWebhookEvents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InboundWebhookEvents::ProcessedAt)
                            .timestamp_with_time_zone(),
                    )
                    .to_owned(),
            )
            .await?;

        // Stuck-event watchdog scans processing rows by age.
        manager
            .create_index(
                Index::create()
                    .table(InboundWebhookEvents::Table)
                    .col(InboundWebhookEvents::Status)
                    .col(InboundWebhookEvents::UpdatedAt)
                    .name("idx_inbound_webhook_events_status_updated_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InboundWebhookEvents::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum InboundWebhookEvents {
    Table,
    EventId,
    Provider,
    EventType,
    PayloadHash,
    Status,
    LastError,
    ReceivedAt,
    UpdatedAt,
    ProcessedAt,
}
