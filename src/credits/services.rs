use sqlx::PgConnection;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    repo,
    repo_types::{Credit, NewCredit, TransactionType},
};
use crate::error::ApiError;

/// Ledger sign convention: usage debits, purchases and refunds credit.
pub fn signed_amount(kind: TransactionType, magnitude: i32) -> i32 {
    let magnitude = magnitude.abs();
    match kind {
        TransactionType::Usage => -magnitude,
        TransactionType::Purchase | TransactionType::Refund => magnitude,
    }
}

/// The usage entry for charging `cost` against `balance`, if it is covered.
pub fn usage_entry(
    user_id: Uuid,
    cost: i32,
    balance: i64,
    description: Option<String>,
) -> Result<NewCredit, ApiError> {
    if cost < 0 {
        return Err(ApiError::BadRequest("cost must not be negative".into()));
    }
    if balance < i64::from(cost) {
        return Err(ApiError::InsufficientCredits {
            balance,
            required: i64::from(cost),
        });
    }
    Ok(NewCredit {
        user_id,
        amount: signed_amount(TransactionType::Usage, cost),
        transaction_type: TransactionType::Usage,
        description,
    })
}

/// Debits `cost` credits. Must run inside a transaction; the user row stays
/// locked until it ends.
pub async fn charge(
    conn: &mut PgConnection,
    user_id: Uuid,
    cost: i32,
    description: Option<String>,
) -> Result<Credit, ApiError> {
    if !repo::lock_user(conn, user_id).await? {
        return Err(ApiError::NotFound("user"));
    }
    let balance = Credit::balance(conn, user_id).await?;
    let entry = usage_entry(user_id, cost, balance, description).map_err(|e| {
        warn!(%user_id, balance, cost, "charge rejected");
        e
    })?;
    let credit = Credit::insert(conn, &entry).await?;
    info!(%user_id, cost, balance_after = balance - i64::from(cost), "credits charged");
    Ok(credit)
}

/// The ledger entry returning `amount` credits; nothing when there is
/// nothing to return.
pub fn refund_entry(user_id: Uuid, amount: i32, description: Option<String>) -> Option<NewCredit> {
    (amount > 0).then(|| NewCredit {
        user_id,
        amount: signed_amount(TransactionType::Refund, amount),
        transaction_type: TransactionType::Refund,
        description,
    })
}

pub async fn refund(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i32,
    description: Option<String>,
) -> Result<Option<Credit>, sqlx::Error> {
    let Some(entry) = refund_entry(user_id, amount, description) else {
        return Ok(None);
    };
    let credit = Credit::insert(conn, &entry).await?;
    info!(%user_id, amount, "credits refunded");
    Ok(Some(credit))
}

pub async fn grant(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i32,
    description: Option<String>,
) -> Result<Credit, sqlx::Error> {
    Credit::insert(
        conn,
        &NewCredit {
            user_id,
            amount: signed_amount(TransactionType::Purchase, amount),
            transaction_type: TransactionType::Purchase,
            description,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_follows_transaction_type() {
        assert_eq!(signed_amount(TransactionType::Usage, 10), -10);
        assert_eq!(signed_amount(TransactionType::Usage, -10), -10);
        assert_eq!(signed_amount(TransactionType::Purchase, 100), 100);
        assert_eq!(signed_amount(TransactionType::Refund, -7), 7);
    }

    #[test]
    fn usage_entry_requires_covering_balance() {
        let user = Uuid::new_v4();
        let entry = usage_entry(user, 10, 10, None).expect("exact balance covers");
        assert_eq!(entry.amount, -10);
        assert_eq!(entry.transaction_type, TransactionType::Usage);

        match usage_entry(user, 10, 9, None) {
            Err(ApiError::InsufficientCredits { balance, required }) => {
                assert_eq!((balance, required), (9, 10));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn refunds_credit_back_only_what_was_charged() {
        let user = Uuid::new_v4();
        let entry = refund_entry(user, 10, Some("Refund".into())).unwrap();
        assert_eq!(entry.amount, 10);
        assert_eq!(entry.transaction_type, TransactionType::Refund);
        assert!(refund_entry(user, 0, None).is_none());
    }

    #[test]
    fn negative_cost_is_rejected() {
        assert!(matches!(
            usage_entry(Uuid::new_v4(), -1, 100, None),
            Err(ApiError::BadRequest(_))
        ));
    }
}
