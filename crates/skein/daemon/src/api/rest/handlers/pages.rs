//! Page cursor handler

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use skein_query::CloudAccountView;
use skein_types::{PageCursorId, ResultPage};

/// Fetch the page behind a cursor
pub async fn get_page(
    State(state): State<AppState>,
    Path(cursor): Path<String>,
) -> ApiResult<Json<ResultPage<CloudAccountView>>> {
    let page = state
        .query
        .workflow()
        .cursors()
        .fetch(&PageCursorId::new(cursor))
        .await?;
    Ok(Json(page))
}
