use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(NotificationRecords::OrgId).uuid().not_null())
                    .col(
                        ColumnDef::new(NotificationRecords::DedupeKey)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationRecords::NotificationType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationRecords::Recipient)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationRecords::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationRecords::Status)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationRecords::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(NotificationRecords::MaxRetries)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationRecords::NextRetryAt)
                            .timestamp_with_time_zone(),
                    )
                    .col(ColumnDef::new(NotificationRecords::LastError).text())
                    .col(
                        ColumnDef::new(NotificationRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(NotificationRecords::SentAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(NotificationRecords::Table)
                    .col(NotificationRecords::OrgId)
                    .col(NotificationRecords::DedupeKey)
                    .unique()
                    .name("uq_notification_records_org_dedupe_key")
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(NotificationRecords::Table)
                    .col(NotificationRecords::Status)
                    .col(NotificationRecords::NextRetryAt)
                    .name("idx_notification_records_status_next_retry_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(NotificationRecords::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum NotificationRecords {
    Table,
    Id,
    OrgId,
    DedupeKey,
    NotificationType,
    Recipient,
    Payload,
    Status,
    AttemptCount,
    MaxRetries,
    NextRetryAt,
    LastError,
    CreatedAt,
    UpdatedAt,
    SentAt,
}
