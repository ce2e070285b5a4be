use sea_orm::entity::prelude::*;

/// A sent or attempted customer notification, unique per `(org_id, dedupe_key)`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "notification_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub org_id: Uuid,
    pub dedupe_key: String,
    pub notification_type: String,
    pub recipient: String,
    /// Full notification, so the retry sweep can resend without the producer.
    pub payload: Json,
    /// `pending` | `sent` | `dead`
    pub status: String,
    pub attempt_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
