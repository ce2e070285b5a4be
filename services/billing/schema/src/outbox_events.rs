use sea_orm::entity::prelude::*;

/// Pending side effect (email, webhook, export) awaiting delivery by the dispatcher.
///
/// `(org_id, dedupe_key)` is unique: enqueueing the same logical event twice
/// yields one row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "outbox_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub org_id: Uuid,
    /// `email` | `webhook` | `export`
    pub kind: String,
    pub payload: Json,
    pub dedupe_key: String,
    /// `pending` | `retry` | `sent` | `dead`
    pub status: String,
    pub attempts: i32,
    /// Null once the row is terminal.
    pub next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
