//! 统一的请求级错误类型与到响应的转换。

use std::fmt;
use std::io::{self, ErrorKind};

use crate::cache::CacheError;
use crate::response::HttpResponse;
use crate::shares::ShareError;

#[derive(Debug)]
pub enum DavError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    MethodNotAllowed(String),
    Conflict(String),
    UriTooLong,
    RequestTimeout,
    Internal(String),
    NotImplemented(String),
}

impl DavError {
    pub fn status(&self) -> u16 {
        match self {
            DavError::BadRequest(_) => 400,
            DavError::Forbidden(_) => 403,
            DavError::NotFound(_) => 404,
            DavError::MethodNotAllowed(_) => 405,
            DavError::Conflict(_) => 409,
            DavError::UriTooLong => 414,
            DavError::RequestTimeout => 408,
            DavError::Internal(_) => 500,
            DavError::NotImplemented(_) => 501,
        }
    }

    /// 转换为裸状态响应（无正文）。
    pub fn into_response(self) -> HttpResponse {
        HttpResponse::new(self.status())
    }

    /// 将 IO 错误映射为请求错误：不存在 404、无权限 403，其余 500。
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => DavError::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => DavError::Forbidden(err.to_string()),
            _ => DavError::Internal(err.to_string()),
        }
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DavError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            DavError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            DavError::NotFound(msg) => write!(f, "not found: {msg}"),
            DavError::MethodNotAllowed(msg) => write!(f, "method not allowed: {msg}"),
            DavError::Conflict(msg) => write!(f, "conflict: {msg}"),
            DavError::UriTooLong => f.write_str("uri too long"),
            DavError::RequestTimeout => f.write_str("request timeout"),
            DavError::Internal(msg) => write!(f, "internal error: {msg}"),
            DavError::NotImplemented(method) => write!(f, "not implemented: {method}"),
        }
    }
}

impl From<ShareError> for DavError {
    fn from(error: ShareError) -> Self {
        match error {
            ShareError::Traversal => DavError::Forbidden("path traversal".into()),
            ShareError::InvalidPath => DavError::Forbidden("invalid path".into()),
            ShareError::ReadOnly(alias) => DavError::Forbidden(format!("share {alias} is read-only")),
            ShareError::UnknownShare(alias) => DavError::NotFound(format!("no share named {alias}")),
            ShareError::NotACollection(path) => {
                DavError::Conflict(format!("{} is not a collection", path.display()))
            }
            ShareError::Io(err) => DavError::from_io(err),
        }
    }
}

impl From<CacheError> for DavError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::NotFound => DavError::NotFound("file not found".into()),
            CacheError::Unreadable(err) => DavError::Forbidden(err.to_string()),
        }
    }
}
