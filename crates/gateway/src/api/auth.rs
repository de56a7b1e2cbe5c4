//! `/api/auth` — local user identity only; the host itself has no
//! authentication (loopback bind).

use std::sync::Arc;

use {
    axum::{Json, extract::State},
    serde_json::json,
};

use mcphost_store::UserProfile;

use crate::{
    response::{ApiResult, success},
    state::HostState,
};

pub async fn get_profile(State(state): State<Arc<HostState>>) -> ApiResult {
    let profile = state.profile.get().await;
    Ok(success(json!({ "profile": profile })))
}

pub async fn login(
    State(state): State<Arc<HostState>>,
    Json(profile): Json<UserProfile>,
) -> ApiResult {
    state.profile.set(profile.clone()).await?;
    Ok(success(json!({ "profile": profile })))
}

pub async fn logout(State(state): State<Arc<HostState>>) -> ApiResult {
    state.profile.clear().await?;
    Ok(success(json!({})))
}
