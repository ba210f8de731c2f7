use axum::{extract::State, Json};

use gateway_common::record::StreamDescription;

use super::app::AppState;
use crate::api::ApiError;

pub async fn describe(State(state): State<AppState>) -> Result<Json<StreamDescription>, ApiError> {
    Ok(Json(state.publisher.describe().await?))
}
