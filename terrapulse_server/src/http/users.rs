use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::AppState;
use crate::error::ApiError;
use crate::models::{NewUser, NewWallet, User, UserChanges, Wallet};

const WALLET_PROVIDER: &str = "Privy";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    privy_id: Option<String>,
    wallet_address: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpsertUser {
    privy_id: Option<String>,
    wallet_address: Option<String>,
    email: Option<String>,
    name: Option<String>,
    privy_user_data: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct UserWithWallets {
    #[serde(flatten)]
    user: User,
    wallets: Vec<Wallet>,
}

async fn with_wallets(state: &AppState, user: User) -> Result<UserWithWallets, ApiError> {
    let wallets = state.store.wallets_for_user(user.id).await?;
    Ok(UserWithWallets { user, wallets })
}

pub async fn get_user(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<UserWithWallets>, ApiError> {
    let Query(query) = query?;
    let user = match (query.privy_id, query.wallet_address) {
        (Some(privy_id), _) => state.store.user_by_privy_id(&privy_id).await?,
        (None, Some(address)) => state.store.user_by_wallet(&address).await?,
        (None, None) => {
            return Err(ApiError::validation("Either privyId or walletAddress is required"))
        }
    };
    let user = user.ok_or_else(|| ApiError::not_found("User"))?;
    Ok(Json(with_wallets(&state, user).await?))
}

/// Creates or updates a user keyed by `privyId`, linking `walletAddress`
/// when it is new.
pub async fn upsert_user(
    State(state): State<AppState>,
    body: Result<Json<UpsertUser>, JsonRejection>,
) -> Result<(StatusCode, Json<UserWithWallets>), ApiError> {
    let Json(body) = body?;
    let privy_id = match body.privy_id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(ApiError::validation("privyId is required")),
    };
    let address = body.wallet_address.filter(|a| !a.is_empty());
    let existing = state.store.user_by_privy_id(&privy_id).await?;

    if let Some(address) = &address {
        if let Some(wallet) = state.store.wallet_by_key(address).await? {
            if existing.as_ref().map(|user| user.id) != Some(wallet.user_id) {
                return Err(ApiError::Conflict("Wallet is linked to another user".into()));
            }
        }
    }

    let (user, status) = match existing {
        Some(existing) => {
            let changes = UserChanges {
                email: body.email.filter(|e| !e.is_empty()),
                name: body.name.filter(|n| !n.is_empty()),
                meta: body.privy_user_data,
            };
            (state.store.update_user(existing.id, changes).await?, StatusCode::OK)
        }
        None => {
            let user = state
                .store
                .insert_user(NewUser {
                    privy_id,
                    email: body.email.unwrap_or_default(),
                    name: body.name.filter(|n| !n.is_empty()),
                    meta: body.privy_user_data.unwrap_or_else(|| json!({})),
                })
                .await?;
            info!("Registered user {}", user.id);
            (user, StatusCode::CREATED)
        }
    };

    if let Some(address) = address {
        link_wallet(&state, &user, address).await?;
    }

    Ok((status, Json(with_wallets(&state, user).await?)))
}

async fn link_wallet(state: &AppState, user: &User, address: String) -> Result<(), ApiError> {
    if state.store.wallet_by_key(&address).await?.is_some() {
        return Ok(());
    }

    let linked_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    let wallet = state
        .store
        .insert_wallet(NewWallet {
            user_id: user.id,
            public_key: address,
            provider: Some(WALLET_PROVIDER.to_string()),
            meta: json!({ "linkedAt": linked_at }),
        })
        .await?;

    // The reward account can also be opened by the next sync.
    if let Err(err) = state.program.initialize_user(&state.admin_key, &wallet.public_key).await {
        warn!("Could not open reward account for {}: {err}", wallet.public_key);
    }
    Ok(())
}
