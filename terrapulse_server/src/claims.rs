use log::info;
use serde_json::json;
use terrapulse_common::ClaimStatus;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{LedgerFilter, NewClaim, RewardClaim};
use crate::rewards::round_cents;
use crate::store::{Store, StoreError};

/// Points per reward token.
pub const CONVERSION_RATE: f64 = 1000.0;

#[derive(thiserror::Error, Debug)]
pub enum ClaimError {
    #[error("User not found")]
    UserNotFound,
    #[error("pointsSpent must be a positive number")]
    InvalidAmount,
    #[error("Insufficient points: {available} available, {requested} requested")]
    Insufficient { available: f64, requested: f64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Points the user can still spend: everything earned minus what committed
/// claims already hold.
pub async fn available_points(store: &dyn Store, user_id: Uuid) -> Result<f64, StoreError> {
    let filter = LedgerFilter { user_id: Some(user_id), ..Default::default() };
    let earned = store.ledger_total(&filter).await?;
    let committed = store.committed_claim_points(user_id).await?;
    Ok(round_cents(earned - committed))
}

pub async fn create_claim(
    store: &dyn Store,
    user_id: Uuid,
    points: f64,
    note: Option<String>,
) -> Result<RewardClaim, ClaimError> {
    if !points.is_finite() || points <= 0.0 {
        return Err(ClaimError::InvalidAmount);
    }
    if store.user(user_id).await?.is_none() {
        return Err(ClaimError::UserNotFound);
    }

    let available = available_points(store, user_id).await?;
    if points > available {
        return Err(ClaimError::Insufficient { available, requested: points });
    }

    let requested_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    let claim = store
        .insert_claim(NewClaim {
            user_id,
            points_spent: points,
            tokens_issued: points / CONVERSION_RATE,
            status: ClaimStatus::Pending,
            note: Some(note.unwrap_or_else(|| format!("Claim for {points} points"))),
            meta: json!({
                "conversionRate": CONVERSION_RATE,
                "requestedAt": requested_at,
            }),
        })
        .await?;
    info!("User {user_id} claimed {points} points ({} tokens)", claim.tokens_issued);
    Ok(claim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::{NewLedgerEntry, NewUser, User};

    async fn user_with_points(store: &MemoryStore, points: &[f64]) -> User {
        let user = store
            .insert_user(NewUser {
                privy_id: "did:privy:carol".into(),
                email: "carol@example.com".into(),
                name: None,
                meta: json!({}),
            })
            .await
            .unwrap();
        for &points in points {
            store
                .append_ledger(NewLedgerEntry {
                    user_id: user.id,
                    device_id: None,
                    reading_id: None,
                    points,
                    reason: "BONUS".into(),
                    meta: json!({}),
                })
                .await
                .unwrap();
        }
        user
    }

    #[tokio::test]
    async fn claiming_exactly_the_balance_succeeds() {
        let store = MemoryStore::new();
        let user = user_with_points(&store, &[1500.0, 500.0]).await;

        let claim = create_claim(&store, user.id, 2000.0, None).await.unwrap();
        assert_eq!(claim.status, ClaimStatus::Pending);
        assert_eq!(claim.tokens_issued, 2.0);
        assert_eq!(claim.note.as_deref(), Some("Claim for 2000 points"));
        assert_eq!(claim.meta["conversionRate"], json!(1000.0));
        assert_eq!(available_points(&store, user.id).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn claiming_one_over_the_balance_fails() {
        let store = MemoryStore::new();
        let user = user_with_points(&store, &[100.0]).await;

        create_claim(&store, user.id, 40.0, Some("first".into())).await.unwrap();
        let err = create_claim(&store, user.id, 61.0, None).await.unwrap_err();
        match err {
            ClaimError::Insufficient { available, requested } => {
                assert_eq!(available, 60.0);
                assert_eq!(requested, 61.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn balance_is_kept_to_cents() {
        let store = MemoryStore::new();
        // 0.7 + 0.1 sums to 0.7999999999999999 in f64
        let user = user_with_points(&store, &[0.7, 0.1]).await;

        assert_eq!(available_points(&store, user.id).await.unwrap(), 0.8);
        let claim = create_claim(&store, user.id, 0.8, None).await.unwrap();
        assert_eq!(claim.points_spent, 0.8);
        assert_eq!(available_points(&store, user.id).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn rejects_bad_amounts_and_unknown_users() {
        let store = MemoryStore::new();
        let user = user_with_points(&store, &[10.0]).await;

        for points in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = create_claim(&store, user.id, points, None).await.unwrap_err();
            assert!(matches!(err, ClaimError::InvalidAmount));
        }
        let err = create_claim(&store, Uuid::new_v4(), 1.0, None).await.unwrap_err();
        assert!(matches!(err, ClaimError::UserNotFound));
    }
}
