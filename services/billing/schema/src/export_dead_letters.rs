use sea_orm::entity::prelude::*;

/// Audit row written when an `export` outbox event is dead-lettered.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "export_dead_letters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub outbox_event_id: Uuid,
    pub org_id: Uuid,
    pub target_url: Option<String>,
    pub last_error: Option<String>,
    pub attempts: i32,
    pub payload: Json,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::outbox_events::Entity",
        from = "Column::OutboxEventId",
        to = "super::outbox_events::Column::Id"
    )]
    OutboxEvent,
}

impl Related<super::outbox_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OutboxEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
