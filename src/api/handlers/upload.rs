use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{info, warn};

use super::{api_error, ApiError, ApiResult};
use crate::api::{auth::extract_bearer_token, state::AppState, types::UploadResponse};
use crate::domain::{BlacklistReason, TokenPayload};
use crate::error::{AuthError, BrokerError};
use crate::services::ScreenshotUpload;
use crate::signing::TokenAuthority;

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// User-facing rejection for a token that does not authorize an upload
pub fn auth_rejection(err: &AuthError) -> ApiError {
    match err {
        AuthError::Blacklisted(BlacklistReason::AlreadyUsed) => {
            api_error(StatusCode::FORBIDDEN, "Token has already been used")
        }
        AuthError::Blacklisted(BlacklistReason::OtherPeerUploaded) => {
            api_error(StatusCode::FORBIDDEN, "Screenshots already uploaded")
        }
        AuthError::Blacklisted(BlacklistReason::Expired) | AuthError::Expired => {
            api_error(StatusCode::UNAUTHORIZED, "Token has expired")
        }
        AuthError::Unparseable | AuthError::BadSignature => {
            api_error(StatusCode::UNAUTHORIZED, "Invalid or expired token")
        }
    }
}

fn broker_rejection(err: BrokerError) -> ApiError {
    match err {
        BrokerError::Auth(auth) => auth_rejection(&auth),
        BrokerError::RequestAlreadyFulfilled { .. } => {
            api_error(StatusCode::CONFLICT, "Screenshots already uploaded")
        }
        BrokerError::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        e if e.is_transient() => {
            warn!("Upload refused, store unavailable: {}", e);
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage temporarily unavailable, retry later",
            )
        }
        e => {
            warn!("Upload failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn authorize(state: &AppState, token: &str) -> ApiResult<TokenPayload> {
    let authority = state.engine.tokens();
    match authority.validate(token).await {
        Ok(payload) => Ok(payload),
        Err(BrokerError::Auth(AuthError::Expired)) => {
            // Later attempts then report the explicit reason
            if let Some(token_id) = TokenAuthority::peek_token_id(token) {
                if let Err(e) = authority
                    .blacklist(&token_id, BlacklistReason::Expired, authority.blacklist_ttl())
                    .await
                {
                    warn!(%token_id, "Could not blacklist expired token: {}", e);
                }
            }
            Err(auth_rejection(&AuthError::Expired))
        }
        Err(e) => Err(broker_rejection(e)),
    }
}

/// Collect every file part. Parts without a declared type count as JPEG;
/// an empty part refuses the whole upload.
async fn read_files(multipart: &mut Multipart, limit: usize) -> ApiResult<Vec<ScreenshotUpload>> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Malformed multipart body: {e}")))?
    {
        if field.file_name().is_none() && field.name() != Some("files") {
            continue;
        }
        if files.len() == limit {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("At most {limit} screenshots may be uploaded at once"),
            ));
        }
        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Unreadable file part: {e}")))?;
        if data.is_empty() {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("Screenshot {} is empty", files.len() + 1),
            ));
        }
        files.push(ScreenshotUpload::new(data.to_vec(), content_type));
    }
    Ok(files)
}

/// POST /api/screenshot/:catalog_id
pub async fn upload_screenshots(
    State(state): State<AppState>,
    Path(catalog_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let token = extract_bearer_token(&headers)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Invalid authorization header"))?;

    let payload = authorize(&state, &token).await?;

    if payload.catalog_id != catalog_id {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Catalog ID in token does not match the request path",
        ));
    }

    let files = read_files(&mut multipart, state.max_screenshots).await?;
    if files.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No screenshots provided"));
    }

    let redemption = state
        .engine
        .redeem(&payload, files)
        .await
        .map_err(broker_rejection)?;

    info!(
        catalog_id = %redemption.catalog_id,
        request_id = %redemption.request_id,
        peer_id = %payload.peer_id,
        "Screenshot upload accepted"
    );
    Ok(Json(UploadResponse::success(
        redemption.catalog_id,
        redemption.screenshot_urls,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_rejection_messages() {
        let (status, Json(body)) = auth_rejection(&AuthError::Blacklisted(BlacklistReason::AlreadyUsed));
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.error, "Token has already been used");

        let (status, Json(body)) =
            auth_rejection(&AuthError::Blacklisted(BlacklistReason::OtherPeerUploaded));
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.error, "Screenshots already uploaded");

        let (status, Json(body)) = auth_rejection(&AuthError::Blacklisted(BlacklistReason::Expired));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.error, "Token has expired");

        let (status, Json(body)) = auth_rejection(&AuthError::BadSignature);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.error, "Invalid or expired token");
    }

    #[test]
    fn test_lost_race_is_conflict() {
        let (status, _) = broker_rejection(BrokerError::RequestAlreadyFulfilled {
            catalog_id: "c".into(),
            request_id: "r".into(),
        });
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = broker_rejection(BrokerError::Store("down".into()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
