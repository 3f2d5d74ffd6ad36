// 内容寻址存储直传 API

use crate::common::UPLOAD;
use crate::server::handlers::telegram::{FormFile, SendForm};
use crate::server::handlers::ApiResponse;
use crate::server::AppState;
use crate::uploader::{ProgressReporter, UploadResult};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::{error, info};

/// 直传文件
///
/// POST /api/ipfs/send
pub async fn send_ipfs(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<UploadResult>>, StatusCode> {
    let form = match SendForm::read(multipart).await {
        Ok(form) => form,
        Err(msg) => return Ok(Json(ApiResponse::error(500, msg))),
    };

    let (data, field_name) = match form.file {
        Some(FormFile::Bytes {
            data, file_name, ..
        }) if !data.is_empty() => (data, file_name),
        _ => return Ok(Json(ApiResponse::error(500, "文件必传"))),
    };
    let name = form
        .file_name
        .or(field_name)
        .unwrap_or_else(|| "unknown".to_string());
    let size = data.len() as u64;
    info!("API: 直传文件: name={}, size={}", name, size);

    let data = Arc::new(data);
    let result = state
        .admission
        .with_admission(UPLOAD, || {
            state
                .ipfs
                .upload(&name, data.clone(), ProgressReporter::noop())
        })
        .await;

    match result {
        Ok(response) => Ok(Json(ApiResponse::success(response.into_result(&name, size)))),
        Err(e) => {
            error!("直传失败: {}: {}", name, e);
            Ok(Json(ApiResponse::error(e.api_code(), e.to_string())))
        }
    }
}
