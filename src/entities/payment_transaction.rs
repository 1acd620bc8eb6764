use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PaymentStatus, TransactionType};

/// The `payment_transactions` table: append-only audit ledger. Rows are never
/// mutated or deleted after insert.
///
/// The `(payment_id, provider_transaction_id, transaction_type)` tuple is the
/// idempotency barrier against replayed provider notifications.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub payment_id: Uuid,

    pub transaction_type: TransactionType,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,

    /// Snapshot of the payment status this entry caused.
    pub status: PaymentStatus,

    pub provider_transaction_id: Option<String>,

    pub error_code: Option<String>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id",
        on_delete = "Cascade"
    )]
    Payment,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
