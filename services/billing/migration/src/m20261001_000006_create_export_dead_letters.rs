use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExportDeadLetters::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExportDeadLetters::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ExportDeadLetters::OutboxEventId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ExportDeadLetters::OrgId).uuid().not_null())
                    .col(ColumnDef::new(ExportDeadLetters::TargetUrl).text())
                    .col(ColumnDef::new(ExportDeadLetters::LastError).text())
                    .col(
                        ColumnDef::new(ExportDeadLetters::Attempts)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExportDeadLetters::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExportDeadLetters::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(ExportDeadLetters::Table, ExportDeadLetters::OutboxEventId)
                            .to(OutboxEvents::Table, OutboxEvents::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExportDeadLetters::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ExportDeadLetters {
    Table,
    Id,
    OutboxEventId,
    OrgId,
    TargetUrl,
    LastError,
    Attempts,
    Payload,
    CreatedAt,
}

#[derive(Iden)]
enum OutboxEvents {
    Table,
    Id,
}
