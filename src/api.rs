//! 可注册的 API 端点表与内置的 status / echo 处理器。

use serde::Serialize;
use std::collections::BTreeMap;

use crate::audit::AuditSink;
use crate::cache::CacheStats;
use crate::config::ServerConfig;
use crate::http::add_cors_headers;
use crate::pool::PoolInfo;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::version::{VersionInfo, version_info};

/// 处理器可读取的进程级上下文。
pub struct ApiContext<'a> {
    pub path: &'a str,
    pub config: &'a ServerConfig,
    pub pool: PoolInfo,
    pub cache: CacheStats,
    pub endpoints: Vec<String>,
}

pub type ApiHandler = Box<dyn Fn(&HttpRequest, &ApiContext<'_>) -> HttpResponse + Send + Sync>;

pub struct ApiRegistry {
    prefix: String,
    routes: BTreeMap<String, ApiHandler>,
}

impl ApiRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            routes: BTreeMap::new(),
        }
    }

    /// 注册 `{prefix}/status` 与 `{prefix}/echo`。
    pub fn with_defaults(prefix: &str) -> Self {
        let mut registry = Self::new(prefix);
        registry.register("/status", Box::new(status));
        registry.register("/echo", Box::new(echo));
        registry
    }

    /// `path` 相对于前缀，如 `/status`。
    pub fn register(&mut self, path: &str, handler: ApiHandler) {
        let route = format!("{}/{}", self.prefix, path.trim_start_matches('/'));
        self.routes.insert(route, handler);
    }

    /// 路径是否落在 API 前缀之下（按完整路径段匹配）。
    pub fn matches(&self, path: &str) -> bool {
        path.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// 分发 API 请求，所有响应都带宽松 CORS 头。
    pub fn dispatch(
        &self,
        request: &HttpRequest,
        path: &str,
        config: &ServerConfig,
        pool: PoolInfo,
        cache: CacheStats,
        audit: &dyn AuditSink,
    ) -> HttpResponse {
        audit.audit_api_call(path, &request.method);
        let route = path.trim_end_matches('/');
        let mut response = if request.method == "OPTIONS" {
            HttpResponse::new(204)
        } else {
            match self.routes.get(route) {
                Some(handler) => {
                    let context = ApiContext {
                        path,
                        config,
                        pool,
                        cache,
                        endpoints: self.endpoints(),
                    };
                    handler(request, &context)
                }
                None => HttpResponse::json(404, &ErrorBody {
                    error: "Endpoint not found",
                }),
            }
        };
        add_cors_headers(&mut response);
        response
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// 共享概况；不暴露真实路径。
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShareStatus<'a> {
    alias: &'a str,
    read_only: bool,
    auth_required: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody<'a> {
    status: &'static str,
    version: VersionInfo,
    endpoints: Vec<String>,
    workers: usize,
    queue_capacity: usize,
    cache: CacheStats,
    allow_anonymous: bool,
    shares: Vec<ShareStatus<'a>>,
}

fn status(_request: &HttpRequest, context: &ApiContext<'_>) -> HttpResponse {
    let config = context.config;
    let shares = config
        .shares
        .iter()
        .map(|share| ShareStatus {
            alias: &share.alias,
            read_only: config.is_read_only(share),
            auth_required: share.auth_required,
        })
        .collect();
    HttpResponse::json(
        200,
        &StatusBody {
            status: "ok",
            version: version_info(),
            endpoints: context.endpoints.clone(),
            workers: context.pool.workers,
            queue_capacity: context.pool.queue_capacity,
            cache: context.cache,
            allow_anonymous: config.allow_anonymous,
            shares,
        },
    )
}

#[derive(Serialize)]
struct EchoBody<'a> {
    method: &'a str,
    path: &'a str,
    body: String,
}

fn echo(request: &HttpRequest, context: &ApiContext<'_>) -> HttpResponse {
    HttpResponse::json(
        200,
        &EchoBody {
            method: &request.method,
            path: context.path,
            body: String::from_utf8_lossy(&request.body).into_owned(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::tests::RecordingAudit;
    use crate::config::Share;
    use crate::request::parse;
    use serde_json::Value;

    fn pool() -> PoolInfo {
        PoolInfo {
            workers: 4,
            queue_capacity: 16,
        }
    }

    fn call(registry: &ApiRegistry, raw: &[u8], path: &str) -> (HttpResponse, Value) {
        call_with(registry, &ServerConfig::default(), raw, path)
    }

    fn call_with(
        registry: &ApiRegistry,
        config: &ServerConfig,
        raw: &[u8],
        path: &str,
    ) -> (HttpResponse, Value) {
        let audit = RecordingAudit::default();
        let request = parse(raw);
        let response =
            registry.dispatch(&request, path, config, pool(), CacheStats::default(), &audit);
        let json = serde_json::from_slice(&response.body).unwrap_or(Value::Null);
        (response, json)
    }

    #[test]
    fn status_reports_pool_and_endpoints() {
        let registry = ApiRegistry::with_defaults("/api");
        let (response, json) = call(&registry, b"GET /api/status HTTP/1.1\r\n\r\n", "/api/status");
        assert_eq!(response.status, 200);
        assert_eq!(response.header_value("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(json["status"], "ok");
        assert_eq!(json["workers"], 4);
        assert_eq!(json["queueCapacity"], 16);
        assert_eq!(json["endpoints"][0], "/api/echo");
        assert!(json["version"]["version"].is_string());
    }

    #[test]
    fn status_reports_share_flags_without_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut media = Share::new("media", temp.path());
        media.auth_required = false;
        let config = ServerConfig {
            allow_anonymous: true,
            ..ServerConfig::default()
        }
        .with_shares(vec![media, Share::new("backup", temp.path()).read_only()])
        .expect("shares");

        let registry = ApiRegistry::with_defaults("/api");
        let (_, json) = call_with(
            &registry,
            &config,
            b"GET /api/status HTTP/1.1\r\n\r\n",
            "/api/status",
        );
        assert_eq!(json["allowAnonymous"], true);
        assert_eq!(json["shares"][0]["alias"], "media");
        assert_eq!(json["shares"][0]["authRequired"], false);
        assert_eq!(json["shares"][1]["readOnly"], true);
        assert_eq!(json["shares"][1]["authRequired"], true);
        assert!(json["shares"][0].get("realPath").is_none());
    }

    #[test]
    fn echo_escapes_request_body() {
        let registry = ApiRegistry::with_defaults("/api");
        let raw = b"POST /api/echo HTTP/1.1\r\n\r\n{\"quote\": \"a\\\"b\"}";
        let (response, json) = call(&registry, raw, "/api/echo");
        assert_eq!(response.status, 200);
        assert_eq!(json["method"], "POST");
        assert_eq!(json["path"], "/api/echo");
        assert_eq!(json["body"], "{\"quote\": \"a\\\"b\"}");
    }

    #[test]
    fn unknown_endpoint_and_preflight() {
        let registry = ApiRegistry::with_defaults("/api");
        let (missing, json) = call(&registry, b"GET /api/nope HTTP/1.1\r\n\r\n", "/api/nope");
        assert_eq!(missing.status, 404);
        assert_eq!(json["error"], "Endpoint not found");

        let (preflight, _) = call(&registry, b"OPTIONS /api/echo HTTP/1.1\r\n\r\n", "/api/echo");
        assert_eq!(preflight.status, 204);
        assert!(preflight.header_value("Access-Control-Allow-Methods").is_some());
    }

    #[test]
    fn custom_handlers_can_be_registered() {
        let mut registry = ApiRegistry::new("/v1");
        registry.register(
            "ping",
            Box::new(|_: &HttpRequest, _: &ApiContext<'_>| {
                HttpResponse::with_body(200, "text/plain", "pong")
            }),
        );
        assert!(registry.matches("/v1/ping"));
        assert!(!registry.matches("/v1ping"));
        let (response, _) = call(&registry, b"GET /v1/ping HTTP/1.1\r\n\r\n", "/v1/ping");
        assert_eq!(response.body, b"pong");
    }
}
