use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{Actor, AppState};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor: Actor,
    pub session_token_id: Uuid,
}

impl<S: Store> FromRequestParts<AppState<S>> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            // Extract Authorization: Bearer <token>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            // Active session of an active user with a role this service knows
            let identity = state
                .store
                .transaction(move |tx| {
                    Box::pin(async move { tx.session_by_token_hash(&token_hash).await })
                })
                .await?
                .ok_or_else(ApiError::session_expired)?;

            Ok(AuthContext {
                actor: identity.actor,
                session_token_id: identity.session_token_id,
            })
        }
    }
}
