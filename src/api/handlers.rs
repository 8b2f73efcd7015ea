use crate::api::middleware::RequestId;
use crate::api::routes::AppState;
use crate::error::{AppError, Result};
use crate::models::{SearchRequest, SortOrder};
use axum::{
    extract::{Query, State},
    http::Method,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

const MAX_AUTOCOMPLETE_PREFIX: usize = 100;
const AUTOCOMPLETE_SIZE: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub force_fresh: Option<String>,
}

/// `GET|POST /api/v1/search`
pub async fn search(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    method: Method,
    Query(params): Query<SearchParams>,
    body: Option<Json<SearchRequest>>,
) -> Result<impl IntoResponse> {
    let mut req = if method == Method::POST {
        let Json(req) =
            body.ok_or_else(|| AppError::InvalidRequest("JSON body required".into()))?;
        req
    } else {
        request_from_params(params)
    };

    if req.query.trim().is_empty() {
        return Err(AppError::MissingQuery);
    }
    req.request_id = request_id;

    let resp = state.orchestrator.search(req).await?;
    Ok(Json(resp))
}

fn request_from_params(params: SearchParams) -> SearchRequest {
    SearchRequest {
        query: params.q.unwrap_or_default(),
        page: params.page.unwrap_or(0),
        page_size: params.page_size.unwrap_or(0),
        region: params.region.filter(|r| !r.is_empty()),
        sort: params.sort.as_deref().and_then(SortOrder::parse),
        user_id: params.user_id.filter(|u| !u.is_empty()),
        force_fresh: params.force_fresh.as_deref() == Some("true"),
        ..Default::default()
    }
}

#[derive(Debug, Deserialize)]
pub struct AutocompleteParams {
    #[serde(default)]
    pub q: Option<String>,
}

/// `GET /api/v1/autocomplete?q=`
pub async fn autocomplete(
    State(state): State<AppState>,
    Query(params): Query<AutocompleteParams>,
) -> Result<impl IntoResponse> {
    let prefix = params.q.unwrap_or_default();
    if prefix.trim().is_empty() {
        return Err(AppError::MissingQuery);
    }
    let prefix: String = prefix.chars().take(MAX_AUTOCOMPLETE_PREFIX).collect();

    match state.cache.get_autocomplete(&prefix).await {
        Ok(Some(suggestions)) => {
            return Ok(Json(json!({
                "suggestions": suggestions,
                "source": "cache",
            })));
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "autocomplete cache error"),
    }

    let suggestions = match state
        .orchestrator
        .autocomplete(&prefix, AUTOCOMPLETE_SIZE)
        .await
    {
        Ok(suggestions) if !suggestions.is_empty() => suggestions,
        Ok(_) | Err(_) => {
            // Fall back to a fulltext search and surface the titles
            let req = SearchRequest {
                query: prefix.clone(),
                page_size: AUTOCOMPLETE_SIZE,
                ..Default::default()
            };
            match state.orchestrator.search(req).await {
                Ok(resp) => resp
                    .results
                    .into_iter()
                    .filter(|r| !r.title.is_empty())
                    .map(|r| r.title)
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "autocomplete search failed");
                    return Ok(Json(json!({
                        "suggestions": [],
                        "source": "none",
                    })));
                }
            }
        }
    };

    if let Err(e) = state.cache.set_autocomplete(&prefix, &suggestions).await {
        warn!(error = %e, "autocomplete cache set error");
    }

    Ok(Json(json!({
        "suggestions": suggestions,
        "source": "search",
    })))
}

#[derive(Debug, Deserialize)]
pub struct TrendingParams {
    #[serde(default)]
    pub region: Option<String>,
}

/// `GET /api/v1/trending?region=`
pub async fn trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> impl IntoResponse {
    let region = params
        .region
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "global".to_string());

    let trending = match state.cache.get_trending(&region).await {
        Ok(Some(queries)) => queries,
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "trending cache error");
            Vec::new()
        }
    };

    Json(json!({
        "trending": trending,
        "region": region,
    }))
}

/// `GET /metrics`
pub async fn metrics() -> impl IntoResponse {
    crate::observability::gather_metrics()
}
