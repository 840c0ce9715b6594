/// Integration tests with a mocked completion API
/// Exercises the client, the pipeline and the HTTP handler without hitting OpenAI
use axum::body::Body;
use axum::http::{Request, StatusCode};
use service_reminder_api::composer::{
    PromptLanguage, DEFAULT_INSURANCE_PRODUCT, DEFAULT_LOYALTY_DISCOUNT,
};
use service_reminder_api::config::Config;
use service_reminder_api::dataset::{CellValue, Dataset};
use service_reminder_api::errors::{AppError, GenerationFailureKind};
use service_reminder_api::handlers::{router, AppState};
use service_reminder_api::llm_client::{GenerationOptions, OpenAiClient, TextGenerator};
use service_reminder_api::models::StyleOptions;
use service_reminder_api::persistence::{DatasetSource, FileSink, PersistenceMode};
use service_reminder_api::pipeline::ReminderPipeline;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create test config
fn create_test_config(openai_base_url: String, mail_folder: &Path) -> Config {
    Config {
        port: 5000,
        openai_api_key: "test_key".to_string(),
        openai_base_url,
        openai_model: "gpt-4o-mini".to_string(),
        max_tokens: 500,
        temperature: 0.5,
        generation_timeout: Duration::from_secs(5),
        generation_max_attempts: 1,
        generation_backoff: Duration::from_millis(1),
        generation_max_backoff: Duration::from_millis(2),
        persistence_mode: PersistenceMode::File,
        mail_folder: mail_folder.to_path_buf(),
        spreadsheet_output_dir: mail_folder.join("datasets"),
        prompt_language: PromptLanguage::German,
        assistant_brand: "BMW".to_string(),
        loyalty_discount_text: DEFAULT_LOYALTY_DISCOUNT.to_string(),
        insurance_offer_text: DEFAULT_INSURANCE_PRODUCT.to_string(),
        loyalty_score_threshold: 30.0,
        profit_score_threshold: 40.0,
        max_upload_bytes: 10 * 1024 * 1024,
    }
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [
            {
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }
        ]
    })
}

fn customers() -> Dataset {
    let headers = [
        "vin",
        "customer_id",
        "first_name",
        "last_name",
        "lead_score_loyalty",
        "lead_score_profit",
        "sensor_tire",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect();
    Dataset::from_rows(
        "Kunden",
        headers,
        vec![vec![
            "X1".into(),
            CellValue::Number(1042.0),
            "Anna".into(),
            "Berger".into(),
            25.0.into(),
            35.0.into(),
            2i64.into(),
        ]],
    )
    .unwrap()
}

fn client(base_url: String) -> OpenAiClient {
    OpenAiClient::new(base_url, "test_key".to_string(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_completion_request_shape() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test_key"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "max_tokens": 500,
            "messages": [
                {"role": "system", "content": "system text"},
                {"role": "user", "content": "prompt text"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Hallo")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let text = client(mock_server.uri())
        .generate("prompt text", "system text", &GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(text, "Hallo");
}

#[tokio::test]
async fn test_unauthorized_is_classified() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let err = client(mock_server.uri())
        .generate("p", "s", &GenerationOptions::default())
        .await
        .unwrap_err();

    match err {
        AppError::Generation(failure) => {
            assert_eq!(failure.kind, GenerationFailureKind::Unauthorized)
        }
        other => panic!("expected generation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_completion_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
        .mount(&mock_server)
        .await;

    let err = client(mock_server.uri())
        .generate("p", "s", &GenerationOptions::default())
        .await
        .unwrap_err();

    match err {
        AppError::Generation(failure) => {
            assert_eq!(failure.kind, GenerationFailureKind::MalformedResponse)
        }
        other => panic!("expected generation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pipeline_retries_server_errors_when_configured() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("  Hallo Anna  ")))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(mock_server.uri(), dir.path());
    config.generation_max_attempts = 3;
    let pipeline = ReminderPipeline::from_config_with_sink(
        &config,
        Arc::new(FileSink::new(dir.path())),
    )
    .unwrap();

    let outcome = pipeline
        .run(
            &customers(),
            &DatasetSource::Upload {
                file_name: "kunden.xlsx".to_string(),
            },
            "1042",
            StyleOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.message.text, "Hallo Anna");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("X1.txt")).unwrap(),
        "Hallo Anna"
    );
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_pipeline_does_not_retry_rejected_key() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(mock_server.uri(), dir.path());
    config.generation_max_attempts = 3;
    let pipeline = ReminderPipeline::from_config_with_sink(
        &config,
        Arc::new(FileSink::new(dir.path())),
    )
    .unwrap();

    let err = pipeline
        .run(
            &customers(),
            &DatasetSource::Upload {
                file_name: "kunden.xlsx".to_string(),
            },
            "X1",
            StyleOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    assert!(!dir.path().join("X1.txt").exists());
}

// ============ HTTP handler ============

const BOUNDARY: &str = "reminder-test-boundary";

fn multipart_body(file: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some((file_name, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/vnd.openxmlformats-officedocument.spreadsheetml.sheet\r\n\r\n",
                BOUNDARY, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn app_for(mock_server: &MockServer, mail_folder: &Path) -> axum::Router {
    let config = create_test_config(mock_server.uri(), mail_folder);
    let pipeline = ReminderPipeline::from_config(&config).unwrap();
    router(Arc::new(AppState {
        config,
        pipeline: Arc::new(pipeline),
    }))
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_upload_generates_and_saves_reminder() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("\nSehr geehrte Frau Berger\n")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let workbook = customers().to_xlsx_bytes().unwrap();
    let app = app_for(&mock_server, dir.path()).await;
    let response = app
        .oneshot(upload_request(
            "/upload",
            multipart_body(
                Some(("kunden.xlsx", workbook.as_slice())),
                &[("vin_or_id", "X1"), ("formality", "formal"), ("length", "short")],
            ),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["mail_content"], "Sehr geehrte Frau Berger");
    let generated_at = body["generated_at"].as_str().unwrap();
    assert!(generated_at.parse::<chrono::DateTime<chrono::Utc>>().is_ok());
    assert_eq!(body["loyalty_field_state"], "green");
    assert_eq!(body["insurance_field_state"], "red");
    assert_eq!(body["due_sensors"], serde_json::json!(["tire"]));
    assert_eq!(body["row_data"]["vin"], "X1");
    assert_eq!(body["row_data"]["first_name"], "Anna");
    assert_eq!(body["dataset_checksum"].as_str().unwrap().len(), 64);
    assert!(body["duplicate_key_warning"].is_null());

    assert_eq!(
        std::fs::read_to_string(dir.path().join("X1.txt")).unwrap(),
        "Sehr geehrte Frau Berger"
    );
}

#[tokio::test]
async fn test_upload_with_unknown_key_is_404_without_completion_call() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("unused")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let workbook = customers().to_xlsx_bytes().unwrap();
    let app = app_for(&mock_server, dir.path()).await;
    let response = app
        .oneshot(upload_request(
            "/api/v1/reminders",
            multipart_body(Some(("kunden.xlsx", workbook.as_slice())), &[("vin_or_id", "NOPE")]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"], "No matching VIN or customer ID found.");
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_upload_without_file_is_400() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let app = app_for(&mock_server, dir.path()).await;
    let response = app
        .oneshot(upload_request(
            "/upload",
            multipart_body(None, &[("vin_or_id", "X1")]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "No file part");
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_upload_without_key_is_400() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let workbook = customers().to_xlsx_bytes().unwrap();
    let app = app_for(&mock_server, dir.path()).await;
    let response = app
        .oneshot(upload_request(
            "/upload",
            multipart_body(Some(("kunden.xlsx", workbook.as_slice())), &[("vin_or_id", "  ")]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_of_non_workbook_is_422() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let app = app_for(&mock_server, dir.path()).await;
    let response = app
        .oneshot(upload_request(
            "/upload",
            multipart_body(Some(("notes.xlsx", &b"not a workbook"[..])), &[("vin_or_id", "X1")]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["code"], "invalid_dataset");
}

#[tokio::test]
async fn test_health() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let app = app_for(&mock_server, dir.path()).await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}
