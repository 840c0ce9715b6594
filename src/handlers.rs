use crate::config::Config;
use crate::dataset::Dataset;
use crate::errors::AppError;
use crate::models::{ReminderResponse, StyleOptions};
use crate::persistence::DatasetSource;
use crate::pipeline::{ReminderOutcome, ReminderPipeline};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Locate, generate and persist workflow shared with the CLI.
    pub pipeline: Arc<ReminderPipeline>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "service-reminder-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Routes served by the application. Transport layers (tracing, CORS, rate
/// limiting) are added by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(create_reminder))
        .route("/api/v1/reminders", post(create_reminder))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Fields of the reminder form.
#[derive(Debug, Default)]
struct ReminderForm {
    file_name: Option<String>,
    file: Option<Vec<u8>>,
    key: Option<String>,
    formality: Option<String>,
    length: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<ReminderForm, AppError> {
    let mut form = ReminderForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                form.file_name = Some(field.file_name().unwrap_or_default().to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file: {}", e)))?;
                form.file = Some(bytes.to_vec());
            }
            "vin_or_id" | "formality" | "length" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read {}: {}", name, e)))?;
                // Keys are matched exactly, so only blank values count as absent
                let value = Some(value).filter(|v| !v.trim().is_empty());
                match name.as_str() {
                    "vin_or_id" => form.key = value,
                    "formality" => form.formality = value,
                    _ => form.length = value,
                }
            }
            other => {
                tracing::debug!("Ignoring unexpected form field '{}'", other);
            }
        }
    }

    Ok(form)
}

fn dataset_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn to_response(outcome: ReminderOutcome, checksum: String) -> ReminderResponse {
    ReminderResponse {
        loyalty_field_state: outcome.signals.loyalty_field_state(),
        insurance_field_state: outcome.signals.insurance_field_state(),
        due_sensors: outcome.signals.due_sensor_labels(),
        service_due_text: outcome.signals.service_due_text(),
        generated_at: outcome.message.generated_at,
        mail_content: outcome.message.text,
        row_data: outcome.row_data,
        duplicate_key_warning: outcome.duplicate_warning,
        persisted_to: outcome.persisted.location.display().to_string(),
        dataset_checksum: checksum,
    }
}

/// POST /upload and POST /api/v1/reminders
///
/// Multipart form with `file` (xlsx workbook), `vin_or_id`, and optional
/// `formality` and `length`. Generates the reminder for the matching row,
/// persists it and returns it together with the row's display fields.
pub async fn create_reminder(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ReminderResponse>, AppError> {
    let form = read_form(multipart).await?;

    let bytes = form
        .file
        .ok_or_else(|| AppError::Validation("No file part".to_string()))?;
    let file_name = form.file_name.unwrap_or_default();
    if file_name.trim().is_empty() {
        return Err(AppError::Validation("No selected file".to_string()));
    }
    let key = form
        .key
        .ok_or_else(|| AppError::Validation("vin_or_id is required".to_string()))?;
    let style = StyleOptions::from_raw(form.formality.as_deref(), form.length.as_deref());

    tracing::info!(
        "Reminder request for '{}' from {} ({} bytes), style {:?}",
        key,
        file_name,
        bytes.len(),
        style
    );

    let checksum = dataset_checksum(&bytes);
    let dataset = tokio::task::spawn_blocking(move || Dataset::from_xlsx_bytes(&bytes))
        .await
        .map_err(|e| AppError::Internal(format!("dataset parsing task failed: {}", e)))??;
    tracing::debug!(
        "Loaded sheet '{}' with {} rows, checksum {}",
        dataset.sheet_name(),
        dataset.len(),
        checksum
    );

    let source = DatasetSource::Upload { file_name };
    let outcome = state.pipeline.run(&dataset, &source, &key, style).await?;

    if let Some(warning) = &outcome.duplicate_warning {
        tracing::warn!(
            "Key '{}' matched rows {:?} besides row {}",
            warning.key,
            warning.ignored_rows,
            warning.selected_row
        );
    }
    tracing::info!(
        "✓ Reminder for '{}' generated ({} chars) and saved via {} sink",
        key,
        outcome.message.text.chars().count(),
        outcome.persisted.sink
    );

    Ok(Json(to_response(outcome, checksum)))
}
