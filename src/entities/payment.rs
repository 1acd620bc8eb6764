use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{OrderRef, PaymentMethod, PaymentProvider, PaymentStatus};

/// The `payments` table: one row per attempt to collect money for one order.
///
/// `status` is mutated only through the ledger's event application; `version`
/// is the optimistic-concurrency token bumped by every mutation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub payer_id: Uuid,

    pub order_type: crate::models::OrderType,
    pub order_id: Uuid,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: Decimal,
    pub currency: String,

    pub method: PaymentMethod,
    pub provider: Option<PaymentProvider>,

    pub status: PaymentStatus,

    /// Remote correlation key; set once known, the reconciliation anchor.
    pub provider_transaction_id: Option<String>,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub refunded_amount: Decimal,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,

    /// `"{order_type}:{order_id}"` while Pending/Processing, cleared on every
    /// terminal transition. Carries a unique index so one order can have at
    /// most one live payment.
    pub active_order_key: Option<String>,

    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,

    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::payment_transaction::Entity")]
    PaymentTransactions,
}

impl Related<super::payment_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentTransactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn order_ref(&self) -> OrderRef {
        OrderRef::new(self.order_type, self.order_id)
    }

    /// Amount still refundable against this payment.
    pub fn remaining_amount(&self) -> Decimal {
        self.amount - self.refunded_amount
    }
}
