use sea_orm::entity::prelude::*;

/// One provider event id as first seen by the webhook gateway. Never deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "inbound_webhook_events")]
pub struct Model {
    /// Provider-assigned event id; doubles as the idempotency key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub event_id: String,
    pub provider: String,
    pub event_type: String,
    /// Hex SHA-256 of the raw request body.
    pub payload_hash: String,
    /// `processing` | `succeeded` | `ignored` | `error`
    pub status: String,
    pub last_error: Option<String>,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
