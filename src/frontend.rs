//! 前端静态资源服务、API 转发与 SPA 回退。

use std::path::Path;
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::debug;

use crate::cache::CacheError;
use crate::config::ServerConfig;
use crate::error::DavError;
use crate::etag;
use crate::logging::LogCategory;
use crate::request::{HttpRequest, has_parent_segment};
use crate::response::HttpResponse;
use crate::server::AppState;
use crate::shares::join_relative;
use crate::webdav::content_type_for;

const INDEX_FILE: &str = "index.html";
const ASSET_DIRS: [&str; 2] = ["/assets/", "/static/"];
const NOT_FOUND_PAGE: &str =
    "<!DOCTYPE html>\n<html><head><title>404 Not Found</title></head>\
     <body><h1>404 Not Found</h1></body></html>\n";

/// 前端监听端口的请求入口。
pub async fn handle(request: &HttpRequest, config: &ServerConfig, state: &AppState) -> HttpResponse {
    match dispatch(request, config, state).await {
        Ok(response) => response,
        Err(DavError::NotFound(_)) => HttpResponse::html(404, NOT_FOUND_PAGE),
        Err(err) => {
            if err.status() >= 500 {
                LogCategory::Error.log(format!(
                    "{} {} failed: {err}",
                    request.method, request.raw_path
                ));
            }
            err.into_response()
        }
    }
}

async fn dispatch(
    request: &HttpRequest,
    config: &ServerConfig,
    state: &AppState,
) -> Result<HttpResponse, DavError> {
    request.validate()?;
    let path = request.decoded_path()?;
    if has_parent_segment(&path) {
        LogCategory::Security.log(format!(
            "path traversal attempt: {} {}",
            request.method, request.raw_path
        ));
        return Err(DavError::Forbidden("path traversal".into()));
    }

    if state.api.matches(&path) {
        return Ok(state.api.dispatch(
            request,
            &path,
            config,
            state.pool,
            state.cache.stats(),
            state.audit.as_ref(),
        ));
    }
    if !matches!(request.method.as_str(), "GET" | "HEAD") {
        return Err(DavError::MethodNotAllowed(request.method.clone()));
    }

    // 资源目录下或带点的路径才按文件提供，其余全部交给 index.html
    let relative = path.trim_matches('/');
    if !relative.is_empty() {
        if is_asset_dir(&path) || path.contains('.') {
            let candidate = join_relative(&config.frontend_path, relative)?;
            if let Some(response) = serve_file(&candidate, config, state).await? {
                return Ok(response);
            }
        }
        debug!(path = relative, "spa fallback");
    }

    let index = config.frontend_path.join(INDEX_FILE);
    serve_file(&index, config, state)
        .await?
        .ok_or_else(|| DavError::NotFound(INDEX_FILE.into()))
}

/// 文件不存在或不是普通文件时返回 `None`。
async fn serve_file(
    path: &Path,
    config: &ServerConfig,
    state: &AppState,
) -> Result<Option<HttpResponse>, DavError> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Ok(None),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(DavError::from_io(err)),
    };
    let content = match state.cache.read(path).await {
        Ok(content) => content,
        Err(CacheError::NotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let content_type = content_type_for(path);
    let mut response = HttpResponse::with_body(200, content_type, content);
    response
        .extra_headers
        .extend(etag::validator_headers(&metadata));
    if is_binary(content_type) {
        return Ok(Some(response.binary()));
    }
    let is_index = path.file_name().is_some_and(|name| name == INDEX_FILE);
    let cache_control = if is_index {
        "no-cache".to_string()
    } else {
        format!("public, max-age={}", config.cache_ttl.as_secs())
    };
    Ok(Some(response.header("Cache-Control", cache_control)))
}

fn is_binary(content_type: &str) -> bool {
    content_type == "application/wasm" || content_type.starts_with("image/")
}

fn is_asset_dir(path: &str) -> bool {
    ASSET_DIRS.iter().any(|dir| path.starts_with(*dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    use crate::pool::PoolInfo;
    use crate::request::parse;

    struct Fixture {
        _temp: TempDir,
        config: ServerConfig,
        state: AppState,
    }

    fn fixture(with_index: bool) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let dist = temp.path().join("dist");
        std::fs::create_dir_all(dist.join("assets")).expect("mkdir");
        if with_index {
            std::fs::write(dist.join("index.html"), b"<html>app</html>").expect("index");
        }
        std::fs::write(dist.join("assets/app.js"), b"console.log(1)").expect("js");
        std::fs::write(dist.join("app.wasm"), b"\0asm").expect("wasm");
        std::fs::write(dist.join("logo.png"), b"png").expect("png");
        let config = ServerConfig {
            frontend_path: dist,
            ..ServerConfig::default()
        };
        let state = AppState::new(
            config.clone(),
            PoolInfo {
                workers: 2,
                queue_capacity: 8,
            },
        );
        Fixture {
            _temp: temp,
            config,
            state,
        }
    }

    async fn get(fixture: &Fixture, path: &str) -> HttpResponse {
        let raw = format!("GET {path} HTTP/1.1\r\n\r\n");
        handle(&parse(raw.as_bytes()), &fixture.config, &fixture.state).await
    }

    #[tokio::test]
    async fn serves_index_without_caching() {
        let fixture = fixture(true);
        let response = get(&fixture, "/").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<html>app</html>");
        assert_eq!(response.header_value("Cache-Control"), Some("no-cache"));
    }

    #[tokio::test]
    async fn extensionless_routes_fall_back_to_index() {
        let fixture = fixture(true);
        let response = get(&fixture, "/dashboard/settings").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<html>app</html>");
    }

    #[tokio::test]
    async fn assets_carry_max_age() {
        let fixture = fixture(true);
        let response = get(&fixture, "/assets/app.js").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"console.log(1)");
        assert_eq!(
            response.header_value("Cache-Control"),
            Some("public, max-age=3600")
        );
        assert!(response.header_value("ETag").is_some());
    }

    #[tokio::test]
    async fn unmatched_paths_fall_back_to_index() {
        let fixture = fixture(true);
        for path in ["/static/missing.js", "/missing.js", "/user/john.doe", "/v1.2/page"] {
            let response = get(&fixture, path).await;
            assert_eq!(response.status, 200, "{path}");
            assert_eq!(response.body, b"<html>app</html>", "{path}");
        }
    }

    #[tokio::test]
    async fn extensionless_files_are_served_only_from_asset_dirs() {
        let fixture = fixture(true);
        std::fs::write(fixture.config.frontend_path.join("LICENSE"), b"MIT").expect("license");
        std::fs::write(fixture.config.frontend_path.join("assets/LICENSE"), b"MIT").expect("asset");

        assert_eq!(get(&fixture, "/LICENSE").await.body, b"<html>app</html>");
        assert_eq!(get(&fixture, "/assets/LICENSE").await.body, b"MIT");
    }

    #[tokio::test]
    async fn missing_index_is_not_found() {
        let fixture = fixture(false);
        assert_eq!(get(&fixture, "/some/route").await.status, 404);
        assert_eq!(get(&fixture, "/missing.js").await.status, 404);
        let root = get(&fixture, "/").await;
        assert_eq!(root.status, 404);
        assert!(String::from_utf8_lossy(&root.body).contains("404"));
    }

    #[tokio::test]
    async fn wasm_and_images_are_binary() {
        let fixture = fixture(true);
        let wasm = get(&fixture, "/app.wasm").await;
        assert_eq!(wasm.content_type.as_deref(), Some("application/wasm"));
        assert!(wasm.is_binary && wasm.skip_compression);

        let png = get(&fixture, "/logo.png").await;
        assert_eq!(png.content_type.as_deref(), Some("image/png"));
        assert!(png.is_binary);
    }

    #[tokio::test]
    async fn api_paths_are_routed_to_registry() {
        let fixture = fixture(true);
        let response = get(&fixture, "/api/status").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(get(&fixture, "/api/unknown").await.status, 404);
        // 仅匹配完整路径段
        assert_eq!(get(&fixture, "/apiary").await.body, b"<html>app</html>");
    }

    #[tokio::test]
    async fn rejects_writes_and_traversal() {
        let fixture = fixture(true);
        let raw = b"POST /index.html HTTP/1.1\r\n\r\n";
        let response = handle(&parse(raw), &fixture.config, &fixture.state).await;
        assert_eq!(response.status, 405);
        assert_eq!(get(&fixture, "/assets/%2e%2e/%2e%2e/secret").await.status, 403);
    }
}
