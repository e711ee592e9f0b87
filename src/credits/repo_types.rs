use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Usage,
    Refund,
}

/// A row from the append-only `credits` ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Credit {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Positive for purchases and refunds, negative for usage.
    pub amount: i32,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewCredit {
    pub user_id: Uuid,
    pub amount: i32,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
}
