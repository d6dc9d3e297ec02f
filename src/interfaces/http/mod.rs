use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType};
use actix_web::{
    delete, dev::Server, error::JsonPayloadError, get, middleware, post, put, web, App,
    HttpRequest, HttpResponse, HttpServer,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::{TableExportUseCase, TableImportUseCase, TemplateUseCase};
use crate::domain::error::{AppError, Result};
use crate::domain::table_format::TableFormat;
use crate::domain::template::{TemplateInput, TemplatePatch};
use crate::infrastructure::config::{AppConfig, AuthConfig};

mod auth;
mod error;
mod upload;

pub use auth::Authenticated;

pub struct HttpState {
    pub templates: TemplateUseCase,
    pub imports: TableImportUseCase,
    pub exports: TableExportUseCase,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    imported_count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteTemplateResponse {
    removed_rows: u64,
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/templates")]
async fn list_templates(
    data: web::Data<HttpState>,
    _caller: Authenticated,
) -> Result<HttpResponse> {
    let templates = data.templates.list_templates().await?;
    Ok(HttpResponse::Ok().json(templates))
}

#[post("/templates")]
async fn create_template(
    data: web::Data<HttpState>,
    Authenticated(principal): Authenticated,
    body: web::Json<TemplateInput>,
) -> Result<HttpResponse> {
    let template = data
        .templates
        .create_template(body.into_inner(), &principal)
        .await?;
    Ok(HttpResponse::Created().json(template))
}

#[get("/templates/{id}")]
async fn get_template(
    data: web::Data<HttpState>,
    _caller: Authenticated,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let template = data.templates.get_template(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(template))
}

#[put("/templates/{id}")]
async fn update_template(
    data: web::Data<HttpState>,
    _caller: Authenticated,
    path: web::Path<i64>,
    body: web::Json<TemplatePatch>,
) -> Result<HttpResponse> {
    let template = data
        .templates
        .update_template(path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(template))
}

#[delete("/templates/{id}")]
async fn delete_template(
    data: web::Data<HttpState>,
    Authenticated(principal): Authenticated,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let removed_rows = data.templates.delete_template(id).await?;
    info!(template_id = id, removed_rows, by = %principal.id, "Template removed via API");
    Ok(HttpResponse::Ok().json(DeleteTemplateResponse { removed_rows }))
}

#[get("/templates/{id}/rows")]
async fn list_rows(
    data: web::Data<HttpState>,
    _caller: Authenticated,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let rows = data.templates.list_rows(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[delete("/templates/{id}/rows/{row_id}")]
async fn delete_row(
    data: web::Data<HttpState>,
    _caller: Authenticated,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse> {
    let (template_id, row_id) = path.into_inner();
    data.templates.delete_row(template_id, row_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// `multipart/form-data` with a `file` part. The optional `format` field overrides
/// the extension of the part's filename.
#[post("/templates/{id}/import")]
async fn import_rows(
    data: web::Data<HttpState>,
    Authenticated(principal): Authenticated,
    path: web::Path<i64>,
    payload: Multipart,
) -> Result<HttpResponse> {
    let template_id = path.into_inner();
    let upload = upload::read_upload(payload, data.imports.max_upload_bytes()).await?;
    info!(
        template_id,
        filename = upload.filename.as_deref().unwrap_or(""),
        bytes = upload.bytes.len(),
        by = %principal.id,
        "Import requested"
    );

    let imported_count = data
        .imports
        .import_rows(
            template_id,
            &upload.bytes,
            upload.filename.as_deref(),
            upload.format.as_deref(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(ImportResponse { imported_count }))
}

#[get("/templates/{id}/export")]
async fn export_rows(
    data: web::Data<HttpState>,
    _caller: Authenticated,
    path: web::Path<i64>,
    query: web::Query<ExportQuery>,
) -> Result<HttpResponse> {
    let requested = query.format.as_deref().unwrap_or("csv");
    let format = TableFormat::from_identifier(requested).ok_or_else(|| {
        AppError::UnsupportedFormat(format!("No codec for format '{}'", requested))
    })?;

    let artifact = data.exports.export_rows(path.into_inner(), format).await?;
    Ok(HttpResponse::Ok()
        .content_type(artifact.content_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(artifact.filename)],
        })
        .body(artifact.bytes))
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::ValidationError(format!("Invalid JSON body: {}", err)).into()
}

/// Routes under `/api`. Shared by the server and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig, max_upload_bytes: usize) {
    cfg.service(
        web::scope("/api")
            .app_data(web::PayloadConfig::new(max_upload_bytes))
            .app_data(web::JsonConfig::default().error_handler(json_error))
            .service(health)
            .service(list_templates)
            .service(create_template)
            .service(get_template)
            .service(update_template)
            .service(delete_template)
            .service(list_rows)
            .service(delete_row)
            .service(import_rows)
            .service(export_rows),
    );
}

fn build_cors(origins: &[String]) -> Cors {
    if origins.iter().any(|origin| origin == "*") {
        return Cors::permissive();
    }

    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers(vec![header::CONTENT_DISPOSITION])
        .max_age(3600)
}

pub fn start_server(state: HttpState, config: &AppConfig) -> std::io::Result<Server> {
    let state = web::Data::new(state);
    let auth: web::Data<AuthConfig> = web::Data::new(config.auth.clone());
    let origins = config.server.cors_origins.clone();
    let max_upload_bytes = config.import.max_upload_bytes;

    let server = HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&origins))
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .app_data(auth.clone())
            .configure(|cfg| configure(cfg, max_upload_bytes))
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run();

    info!(
        host = %config.server.host,
        port = config.server.port,
        "HTTP server listening"
    );
    Ok(server)
}
