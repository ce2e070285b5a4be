use sea_orm::entity::prelude::*;

/// Money applied to an invoice or to a booking deposit. Exactly one of
/// `invoice_id` / `booking_id` is set (enforced by a check constraint).
///
/// Partial unique indexes: `(provider, provider_ref)` where `provider_ref` is set,
/// `(invoice_id, checkout_session_id)` and `(booking_id, checkout_session_id)`
/// where the session id is set.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub invoice_id: Option<String>,
    pub booking_id: Option<String>,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub checkout_session_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    /// `pending` | `succeeded` | `failed`
    pub status: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invoices::Entity",
        from = "Column::InvoiceId",
        to = "super::invoices::Column::Id"
    )]
    Invoice,
    #[sea_orm(
        belongs_to = "super::bookings::Entity",
        from = "Column::BookingId",
        to = "super::bookings::Column::Id"
    )]
    Booking,
}

impl Related<super::invoices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

impl Related<super::bookings::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
