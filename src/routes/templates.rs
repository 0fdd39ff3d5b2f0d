use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{Channel, NotificationType, TemplateOverride, TemplateOverrideRepository};
use crate::error::{AppError, AppResult};
use crate::services::templates::{
    default_template, normalize_template, render, trip_placeholders, PlaceholderInfo,
    TemplateResolver, TemplateSource,
};
use crate::AppState;

const MAX_TEMPLATE_LEN: usize = 1600;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_templates))
        .route("/preview", post(preview_template))
        .route("/overrides", get(list_overrides))
        .route("/overrides/:id", delete(deactivate_override))
        .route("/:notification_type", put(upsert_override))
}

#[derive(Debug, Serialize)]
pub struct EffectiveTemplate {
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub body: String,
    pub default_body: &'static str,
    pub source: TemplateSource,
    pub ignored_overrides: usize,
}

#[derive(Debug, Serialize)]
pub struct TemplatesResponse {
    pub templates: Vec<EffectiveTemplate>,
    pub placeholders: Vec<PlaceholderInfo>,
}

#[derive(Debug, Deserialize)]
pub struct OverridesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpsertOverrideRequest {
    #[serde(default)]
    pub channel: Channel,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub notification_type: Option<String>,
    #[serde(default)]
    pub channel: Channel,
    /// Body to render; when absent the effective template for the type is used.
    pub body: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub rendered: String,
    /// Placeholders in a supplied body that nothing fills for the given type.
    pub unknown_placeholders: Vec<String>,
}

fn parse_type(raw: &str) -> AppResult<NotificationType> {
    NotificationType::try_from(raw).map_err(AppError::BadRequest)
}

/// Effective template for every (type, channel) pair
async fn list_templates(State(state): State<Arc<AppState>>) -> AppResult<Json<TemplatesResponse>> {
    let mut templates = Vec::with_capacity(NotificationType::ALL.len() * Channel::ALL.len());
    for notification_type in NotificationType::ALL {
        for channel in Channel::ALL {
            let resolved = TemplateResolver::resolve(&state.db, notification_type, channel).await?;
            templates.push(EffectiveTemplate {
                notification_type,
                channel,
                body: resolved.body,
                default_body: default_template(notification_type),
                source: resolved.source,
                ignored_overrides: resolved.ignored_overrides,
            });
        }
    }

    Ok(Json(TemplatesResponse {
        templates,
        placeholders: trip_placeholders(),
    }))
}

async fn list_overrides(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OverridesQuery>,
) -> AppResult<Json<Vec<TemplateOverride>>> {
    let overrides = TemplateOverrideRepository::list(&state.db, query.include_inactive).await?;
    Ok(Json(overrides))
}

async fn upsert_override(
    State(state): State<Arc<AppState>>,
    Path(notification_type): Path<String>,
    Json(req): Json<UpsertOverrideRequest>,
) -> AppResult<Json<TemplateOverride>> {
    let notification_type = parse_type(&notification_type)?;

    let normalized = normalize_template(req.body.trim());
    let unknown = normalized.unknown_for(notification_type);
    let body = normalized.body;
    if body.is_empty() {
        return Err(AppError::Validation("Template body must not be empty".to_string()));
    }
    if body.chars().count() > MAX_TEMPLATE_LEN {
        return Err(AppError::Validation(format!(
            "Template body must be at most {} characters",
            MAX_TEMPLATE_LEN
        )));
    }
    if !unknown.is_empty() {
        return Err(AppError::Validation(format!(
            "Unknown placeholder(s) for {}: {}",
            notification_type,
            unknown
                .iter()
                .map(|name| format!("{{{}}}", name))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let created = TemplateOverrideRepository::upsert(
        &state.db,
        notification_type.as_str(),
        req.channel.as_str(),
        &body,
    )
    .await?;

    tracing::info!(
        "Template override {} now active for ({}, {})",
        created.id,
        notification_type,
        req.channel
    );

    Ok(Json(created))
}

async fn deactivate_override(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<TemplateOverride>> {
    let deactivated = TemplateOverrideRepository::deactivate(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("template override {}", id)))?;

    tracing::info!(
        "Template override {} deactivated for ({}, {})",
        deactivated.id,
        deactivated.notification_type,
        deactivated.channel
    );

    Ok(Json(deactivated))
}

async fn preview_template(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PreviewRequest>,
) -> AppResult<Json<PreviewResponse>> {
    let notification_type = req.notification_type.as_deref().map(parse_type).transpose()?;

    let (body, unknown_placeholders) = match (req.body, notification_type) {
        (Some(body), notification_type) => {
            let normalized = normalize_template(&body);
            let unknown = notification_type
                .map(|t| normalized.unknown_for(t))
                .unwrap_or_default();
            (normalized.body, unknown)
        }
        (None, Some(notification_type)) => {
            let resolved =
                TemplateResolver::resolve(&state.db, notification_type, req.channel).await?;
            (resolved.body, Vec::new())
        }
        (None, None) => {
            return Err(AppError::BadRequest(
                "Either body or notification_type is required".to_string(),
            ))
        }
    };

    Ok(Json(PreviewResponse {
        rendered: render(&body, &req.variables),
        unknown_placeholders,
    }))
}
