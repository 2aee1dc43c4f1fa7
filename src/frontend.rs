//! 嵌入式首页资源服务。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

use crate::error::ApiError;

#[derive(RustEmbed)]
#[folder = "frontend"]
/// 嵌入式首页与静态资源。
pub struct FrontendAssets;

/// 静态资源回退处理器；根路径返回首页。
pub async fn serve_frontend(req: Request<AxumBody>) -> Result<Response, ApiError> {
    let path = req.uri().path().trim_start_matches('/');
    let requested = if path.is_empty() { "index.html" } else { path };
    match load_embedded_asset(requested)? {
        Some(response) => Ok(response),
        None => Err(ApiError::NotFound("not found".into())),
    }
}

fn load_embedded_asset(path: &str) -> Result<Option<Response>, ApiError> {
    let Some(asset) = FrontendAssets::get(path) else {
        return Ok(None);
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(Some(
        (headers, AxumBody::from(asset.data.into_owned())).into_response(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn root_serves_dashboard() {
        let req = Request::builder()
            .uri("/")
            .body(AxumBody::empty())
            .expect("request");
        let response = serve_frontend(req)
            .await
            .unwrap_or_else(|_| panic!("index missing"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/html"))
        );
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let req = Request::builder()
            .uri("/nope.css")
            .body(AxumBody::empty())
            .expect("request");
        assert!(matches!(
            serve_frontend(req).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
