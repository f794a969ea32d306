//! 病例照片上传与静态服务
//!
//! 文件落在配置的uploads目录，文件名服务端生成，原始名只存档。服务路径
//! 仅按文件名取文件，不做归属校验（沿用既有行为，知悉的访问控制缺口）。

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::auth::Claims;
use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Extension, Json,
};
use caselog_admin::AppConfig;
use caselog_core::utils::generate_upload_file_name;
use caselog_core::{CasePhoto, CaselogError, Result};
use caselog_database::NewCasePhoto;
use tracing::{info, warn};

/// 已落盘的上传文件
#[derive(Debug)]
pub struct StoredUpload {
    pub file_name: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// 校验并写入图片文件。仅接受image/*，超过配置上限拒绝。
pub async fn store_image(
    config: &AppConfig,
    original_name: &str,
    mime_type: &str,
    data: &[u8],
) -> Result<StoredUpload> {
    if !mime_type.starts_with("image/") {
        return Err(CaselogError::Upload(
            "Only image uploads are accepted".to_string(),
        ));
    }
    if data.len() > config.uploads.max_size_bytes {
        return Err(CaselogError::Upload(format!(
            "File exceeds the {} byte limit",
            config.uploads.max_size_bytes
        )));
    }

    let file_name = generate_upload_file_name(original_name);
    tokio::fs::create_dir_all(&config.uploads.dir).await?;
    let path = std::path::Path::new(&config.uploads.dir).join(&file_name);
    tokio::fs::write(&path, data).await?;
    info!("Stored upload {} ({} bytes)", file_name, data.len());

    Ok(StoredUpload {
        file_name,
        original_name: original_name.to_string(),
        mime_type: mime_type.to_string(),
        size_bytes: data.len() as i64,
    })
}

async fn owned_case(state: &AppState, case_id: i64, owner: &str) -> ApiResult<()> {
    state
        .storage
        .get_case(case_id)
        .await?
        .filter(|c| c.anesthesiologist_id == owner)
        .ok_or_else(|| ApiError(CaselogError::NotFound("Case not found".to_string())))?;
    Ok(())
}

/// GET /api/cases/:id/photos
pub async fn list_case_photos(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(case_id): Path<i64>,
) -> ApiResult<Json<Vec<CasePhoto>>> {
    owned_case(&state, case_id, &claims.sub).await?;
    Ok(Json(state.storage.list_case_photos(case_id).await?))
}

/// POST /api/cases/:id/photos - multipart字段casePhoto
pub async fn upload_case_photo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(case_id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<CasePhoto>)> {
    owned_case(&state, case_id, &claims.sub).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CaselogError::Upload(e.to_string()))?
    {
        if field.name() != Some("casePhoto") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("photo").to_string();
        let mime_type = field.content_type().unwrap_or("").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| CaselogError::Upload(e.to_string()))?;

        let stored = store_image(&state.config, &original_name, &mime_type, &data).await?;
        let photo = state
            .storage
            .create_case_photo(&NewCasePhoto {
                case_id,
                file_name: stored.file_name,
                original_name: stored.original_name,
                mime_type: stored.mime_type,
                size_bytes: stored.size_bytes,
                uploaded_by: claims.sub,
            })
            .await?;
        return Ok((StatusCode::CREATED, Json(photo)));
    }

    Err(ApiError(CaselogError::Upload(
        "Missing casePhoto field".to_string(),
    )))
}

/// DELETE /api/photos/:id - 删除照片记录并尽力移除文件
pub async fn delete_photo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let photo = state
        .storage
        .get_photo(id)
        .await?
        .filter(|p| p.uploaded_by == claims.sub)
        .ok_or_else(|| CaselogError::NotFound("Photo not found".to_string()))?;

    state.storage.delete_case_photo(id).await?;
    let path = std::path::Path::new(&state.config.uploads.dir).join(&photo.file_name);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!("File removal for photo {} failed: {}", photo.file_name, e);
    }
    Ok(StatusCode::NO_CONTENT)
}

fn content_type_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next().map(str::to_ascii_lowercase) {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// GET /api/uploads/:filename - 免认证按文件名取图
pub async fn serve_upload(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> ApiResult<Response> {
    // 目录穿越防护：只接受裸文件名
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
        return Err(ApiError(CaselogError::NotFound(
            "File not found".to_string(),
        )));
    }

    let path = std::path::Path::new(&state.config.uploads.dir).join(&file_name);
    let data = tokio::fs::read(&path)
        .await
        .map_err(|_| CaselogError::NotFound("File not found".to_string()))?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&file_name))
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(Body::from(data))
        .map_err(|e| CaselogError::Internal(e.to_string()))?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_maps_to_content_type() {
        assert_eq!(content_type_for("a.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn non_image_mime_is_rejected() {
        let config = AppConfig::load(None).unwrap();
        let err = store_image(&config, "notes.txt", "text/plain", b"hello")
            .await
            .unwrap_err();
        assert!(matches!(err, CaselogError::Upload(_)));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let mut config = AppConfig::load(None).unwrap();
        config.uploads.max_size_bytes = 4;
        let err = store_image(&config, "a.png", "image/png", b"12345")
            .await
            .unwrap_err();
        assert!(matches!(err, CaselogError::Upload(_)));
    }
}
