//! HTTP 辅助工具：客户端地址识别、CORS 与安全头。

use std::net::{IpAddr, SocketAddr};

use crate::request::HttpRequest;
use crate::response::HttpResponse;

/// 从 `x-forwarded-for` 解析客户端 IP。
pub fn extract_forwarded_ip(request: &HttpRequest) -> Option<IpAddr> {
    request
        .header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// 综合转发头与连接信息计算客户端 IP。
pub fn resolve_client_ip(request: &HttpRequest, peer: Option<SocketAddr>) -> Option<IpAddr> {
    extract_forwarded_ip(request).or(peer.map(|addr| addr.ip()))
}

/// 添加基础安全响应头。
pub fn add_security_headers(response: &mut HttpResponse) {
    if response.header_value("X-Frame-Options").is_none() {
        response.push_header("X-Frame-Options", "DENY");
    }
    if response.header_value("X-Content-Type-Options").is_none() {
        response.push_header("X-Content-Type-Options", "nosniff");
    }
}

/// API 响应使用的宽松 CORS 头。
pub fn add_cors_headers(response: &mut HttpResponse) {
    response.push_header("Access-Control-Allow-Origin", "*");
    response.push_header(
        "Access-Control-Allow-Methods",
        "GET, POST, PUT, DELETE, OPTIONS",
    );
    response.push_header("Access-Control-Allow-Headers", "Content-Type, Authorization");
}
