use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct CreditBalance {
    pub user_id: Uuid,
    pub balance: i64,
}
