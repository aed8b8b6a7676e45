//! 结构化 HTTP 响应与线缆格式序列化。

use serde::Serialize;
use tracing::error;

/// 单次请求构建、序列化一次后即丢弃的响应。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub extra_headers: Vec<(String, String)>,
    pub is_binary: bool,
    pub skip_compression: bool,
}

impl HttpResponse {
    /// 无正文的裸状态响应。
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
            extra_headers: Vec::new(),
            is_binary: false,
            skip_compression: false,
        }
    }

    pub fn with_body(status: u16, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            body: body.into(),
            ..Self::new(status)
        }
    }

    /// 序列化为 JSON 正文；序列化失败时降级为 500。
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::with_body(status, "application/json", body),
            Err(err) => {
                error!(error = %err, "json serialization failed");
                Self::new(500)
            }
        }
    }

    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::with_body(status, "text/html; charset=utf-8", body.into())
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_header(name, value);
        self
    }

    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extra_headers.push((name.into(), value.into()));
    }

    /// 标记为二进制内容：追加跨源隔离头并绕过压缩层。
    pub fn binary(mut self) -> Self {
        self.is_binary = true;
        self.skip_compression = true;
        self
    }

    /// 按名称（不区分大小写）查找附加头。
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.extra_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        207 => "Multi-Status",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        414 => "URI Too Long",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

/// 序列化完整响应（状态行、头部与正文）。
pub fn build(response: &HttpResponse) -> Vec<u8> {
    encode(response, true)
}

/// 仅序列化状态行与头部，供 HEAD 请求使用；`Content-Length` 仍反映完整正文。
pub fn build_head(response: &HttpResponse) -> Vec<u8> {
    encode(response, false)
}

fn encode(response: &HttpResponse, include_body: bool) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    );
    if let Some(content_type) = response.content_type.as_deref() {
        push_line(&mut head, "Content-Type", content_type);
    }
    head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));

    if response.is_binary {
        if response.header_value("Access-Control-Allow-Origin").is_none() {
            push_line(&mut head, "Access-Control-Allow-Origin", "*");
        }
        push_line(&mut head, "Cross-Origin-Opener-Policy", "same-origin");
        push_line(&mut head, "Cross-Origin-Embedder-Policy", "require-corp");
    }
    if response.skip_compression {
        push_line(&mut head, "Cache-Control", "no-cache, no-transform");
    }

    for (name, value) in &response.extra_headers {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        if response.skip_compression && name.eq_ignore_ascii_case("cache-control") {
            continue;
        }
        push_line(&mut head, name, value);
    }
    head.push_str("Connection: close\r\n\r\n");

    let mut wire = head.into_bytes();
    if include_body {
        wire.extend_from_slice(&response.body);
    }
    wire
}

fn push_line(head: &mut String, name: &str, value: &str) {
    let clean = |text: &str| text.replace(['\r', '\n'], "");
    head.push_str(&clean(name));
    head.push_str(": ");
    head.push_str(&clean(value));
    head.push_str("\r\n");
}
