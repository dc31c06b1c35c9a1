use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle states.
///
/// `Pending` and `WaitingForPayment` are the open states; a student holds at
/// most one order in an open state at a time. `Paid` freezes the booking set
/// and totals. A `Failed` order can be reset back to `Pending` and reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "waiting_for_payment")]
    WaitingForPayment,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// A payable aggregation of a student's bookings.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub booker_id: Uuid,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub checkout_session_id: Option<String>,
    #[sea_orm(nullable)]
    pub checkout_expires_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub payment_method: Option<String>,
    #[sea_orm(nullable)]
    pub payment_intent_id: Option<String>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    /// Totals are snapshotted here at the moment the order becomes paid and
    /// stay frozen afterwards, even if a slot is later altered.
    #[sea_orm(column_type = "Decimal(Some((19, 6)))", nullable)]
    pub total_original: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 6)))", nullable)]
    pub total_discounted: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 6)))", nullable)]
    pub total_reduction: Option<Decimal>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::booking::Entity")]
    Bookings,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bookings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
