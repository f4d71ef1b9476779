//! Axum + Askama web UI for the faculty metrics table.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use fcm_sync::{BulkSyncSummary, FacultyService, SingleSyncOutcome, SyncError};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const CRATE_NAME: &str = "fcm-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FacultyService>,
}

impl AppState {
    pub fn new(service: FacultyService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FetchOneForm {
    #[serde(default)]
    faculty_name: String,
}

#[derive(Debug, Deserialize, Default)]
struct AddFacultyForm {
    #[serde(default)]
    admin_password: String,
    #[serde(default)]
    new_name: String,
    #[serde(default)]
    new_url: String,
}

#[derive(Debug, Deserialize, Default)]
struct DeleteFacultyForm {
    #[serde(default)]
    admin_password_del: String,
    #[serde(default)]
    delete_name: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    faculty_names: Vec<String>,
}

#[derive(Template, Default)]
#[template(path = "result_one.html")]
struct ResultOneTemplate {
    error: Option<String>,
    message: Option<String>,
    outcome: Option<SingleSyncOutcome>,
}

impl ResultOneTemplate {
    fn error(err: SyncError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Default::default()
        }
    }

    fn message(message: String) -> Self {
        Self {
            message: Some(message),
            ..Default::default()
        }
    }
}

#[derive(Template)]
#[template(path = "result_all.html")]
struct ResultAllTemplate {
    error: Option<String>,
    summary: Option<BulkSyncSummary>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/fetch_one", post(fetch_one_handler))
        .route("/add_faculty", post(add_faculty_handler))
        .route("/delete_faculty", post(delete_faculty_handler))
        .route("/update_all", post(update_all_handler))
        .route("/download_updated", get(download_updated_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(service: FacultyService, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving faculty metrics UI");
    axum::serve(listener, app(AppState::new(service))).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let faculty_names = state.service.faculty_names().await;
    render_html(IndexTemplate { faculty_names })
}

async fn fetch_one_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<FetchOneForm>,
) -> Response {
    match state.service.sync_one(&form.faculty_name).await {
        Ok(outcome) => render_html(ResultOneTemplate {
            outcome: Some(outcome),
            ..Default::default()
        }),
        Err(err) => render_html(ResultOneTemplate::error(err)),
    }
}

async fn add_faculty_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AddFacultyForm>,
) -> Response {
    match state
        .service
        .add_faculty(&form.admin_password, &form.new_name, &form.new_url)
        .await
    {
        Ok(added) => render_html(ResultOneTemplate::message(format!(
            "Faculty '{}' added successfully.",
            added.name
        ))),
        Err(err) => render_html(ResultOneTemplate::error(err)),
    }
}

async fn delete_faculty_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<DeleteFacultyForm>,
) -> Response {
    match state
        .service
        .delete_faculty(&form.admin_password_del, &form.delete_name)
        .await
    {
        Ok(_) => render_html(ResultOneTemplate::message(format!(
            "Faculty '{}' deleted successfully.",
            form.delete_name.trim()
        ))),
        Err(err) => render_html(ResultOneTemplate::error(err)),
    }
}

async fn update_all_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.sync_all().await {
        Ok(summary) => render_html(ResultAllTemplate {
            error: None,
            summary: Some(summary),
        }),
        Err(err) => render_html(ResultAllTemplate {
            error: Some(err.to_string()),
            summary: None,
        }),
    }
}

async fn download_updated_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = state.service.store();
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            "Updated file not found. Please run update first.",
        )
            .into_response()
    };
    if !store.snapshot_exists().await {
        return not_found();
    }
    match store.snapshot_bytes().await {
        Ok(bytes) => {
            let file_name = state
                .service
                .config()
                .updated_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "faculty_data_updated.csv".to_string());
            (
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{file_name}\""),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(_) => not_found(),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}
