// Telegram 中转发送 API

use crate::common::UploadError;
use crate::server::handlers::ApiResponse;
use crate::server::AppState;
use crate::telegram::file_type::method_for_field;
use crate::telegram::{classify_mime, classify_url, file_details, FileDetails, SendFile, SendFileParams};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::{error, info};

/// 表单校验失败时的业务码
const VALIDATION_ERROR_CODE: i32 = 500;

/// 表单中的文件字段
#[derive(Debug)]
pub(crate) enum FormFile {
    Bytes {
        data: Vec<u8>,
        file_name: Option<String>,
        mime: Option<String>,
    },
    Text(String),
}

/// 解析后的发送表单
#[derive(Debug, Default)]
pub(crate) struct SendForm {
    pub chat_id: Option<String>,
    pub function_type: Option<String>,
    pub function_name: Option<String>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    pub file: Option<FormFile>,
}

impl SendForm {
    /// 读取 multipart 表单，未知字段忽略
    pub(crate) async fn read(mut multipart: Multipart) -> Result<Self, String> {
        let mut form = SendForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| format!("无法读取表单: {}", e))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == "file" {
                // 带文件名或 Content-Type 的视为文件，否则按文本（URL）处理
                if field.file_name().is_some() || field.content_type().is_some() {
                    let file_name = field.file_name().map(str::to_string);
                    let mime = field.content_type().map(str::to_string);
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| format!("无法读取文件: {}", e))?;
                    form.file = Some(FormFile::Bytes {
                        data: data.to_vec(),
                        file_name,
                        mime,
                    });
                } else {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| format!("无法读取表单: {}", e))?;
                    form.file = Some(FormFile::Text(text));
                }
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| format!("无法读取表单: {}", e))?;
            let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            match name.as_str() {
                "chatId" => form.chat_id = value,
                "functionType" => form.function_type = value,
                "functionName" => form.function_name = value,
                "fileName" => form.file_name = value,
                "caption" => form.caption = value,
                _ => {}
            }
        }

        Ok(form)
    }
}

/// 组装 sendXxx 参数
///
/// 未给出 functionType / functionName 时按文件类型推断
pub(crate) fn build_params(
    form: SendForm,
    default_chat_id: &str,
) -> Result<SendFileParams, String> {
    let chat_id = form
        .chat_id
        .unwrap_or_else(|| default_chat_id.trim().to_string());
    if chat_id.is_empty() {
        return Err("chatId 必填".to_string());
    }

    let (file, classified) = match form.file {
        Some(FormFile::Bytes {
            data,
            file_name,
            mime,
        }) => {
            if data.is_empty() {
                return Err("文件数据无效".to_string());
            }
            let name = form
                .file_name
                .clone()
                .or(file_name)
                .unwrap_or_else(|| "file".to_string());
            let classified = classify_mime(&name, mime.as_deref());
            (
                SendFile::Bytes {
                    data: Arc::new(data),
                    mime,
                },
                classified,
            )
        }
        Some(FormFile::Text(url)) => {
            let url = url.trim().to_string();
            if url.is_empty() {
                return Err("文件必传".to_string());
            }
            let mut classified = classify_url(&url);
            if let Some(name) = &form.file_name {
                classified.file_name = name.clone();
            }
            (SendFile::Url(url), classified)
        }
        None => return Err("文件必传".to_string()),
    };

    let field = form
        .function_type
        .unwrap_or_else(|| classified.field.to_string());
    let method = match form.function_name {
        Some(method) => method,
        None => method_for_field(&field)
            .unwrap_or(classified.method)
            .to_string(),
    };

    Ok(SendFileParams {
        chat_id,
        method,
        field,
        file,
        file_name: Some(classified.file_name),
        caption: form.caption,
    })
}

async fn send(state: &AppState, form: SendForm) -> ApiResponse<FileDetails> {
    if !state.telegram.has_token() {
        return ApiResponse::error(VALIDATION_ERROR_CODE, "Telegram Bot Token 未配置");
    }

    let params = match build_params(form, &state.config.telegram.chat_id) {
        Ok(params) => params,
        Err(msg) => return ApiResponse::error(VALIDATION_ERROR_CODE, msg),
    };

    let file_name = params.file_name.clone().unwrap_or_default();
    let result = state
        .telegram
        .send_file(params)
        .await
        .and_then(|message| {
            file_details(&message).ok_or_else(|| UploadError::rejected("响应中没有文件信息"))
        });

    match result {
        Ok(details) => {
            info!("中转成功: {} -> file_id={}", file_name, details.file_id);
            ApiResponse::success(details)
        }
        Err(e) => {
            error!("[telegram-upload] 请求失败: {}", e);
            ApiResponse::error(e.api_code(), e.to_string())
        }
    }
}

/// 发送文件
///
/// POST /api/telegram/send
pub async fn send_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<FileDetails>>, StatusCode> {
    info!("API: 中转发送文件");

    let form = match SendForm::read(multipart).await {
        Ok(form) => form,
        Err(msg) => return Ok(Json(ApiResponse::error(VALIDATION_ERROR_CODE, msg))),
    };
    if matches!(form.file, Some(FormFile::Text(_))) {
        return Ok(Json(ApiResponse::error(VALIDATION_ERROR_CODE, "文件必传")));
    }

    Ok(Json(send(&state, form).await))
}

/// 发送远程 URL（由 Telegram 自行拉取）
///
/// POST /api/telegram/url
pub async fn send_url(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<FileDetails>>, StatusCode> {
    info!("API: 中转发送 URL");

    let mut form = match SendForm::read(multipart).await {
        Ok(form) => form,
        Err(msg) => return Ok(Json(ApiResponse::error(VALIDATION_ERROR_CODE, msg))),
    };
    // 客户端把 URL 作为带文件名的字段提交时同样按文本处理
    let url = match &form.file {
        Some(FormFile::Bytes { data, .. }) => Some(String::from_utf8_lossy(data).into_owned()),
        _ => None,
    };
    if let Some(url) = url {
        form.file = Some(FormFile::Text(url));
    }

    Ok(Json(send(&state, form).await))
}
