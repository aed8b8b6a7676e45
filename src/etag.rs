//! ETag 与 Last-Modified 校验头生成。

use httpdate::fmt_http_date;
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// 根据文件元数据生成弱 ETag。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    let modified = metadata.modified().ok();
    if let Some(modified) = modified
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{}\"", size)
}

/// HTTP 日期格式的修改时间。
pub fn last_modified(metadata: &Metadata) -> Option<String> {
    metadata.modified().ok().map(fmt_http_date)
}

/// 文件响应附带的校验头。
pub fn validator_headers(metadata: &Metadata) -> Vec<(String, String)> {
    let mut headers = vec![("ETag".to_string(), etag_from_metadata(metadata))];
    if let Some(value) = last_modified(metadata) {
        headers.push(("Last-Modified".to_string(), value));
    }
    headers
}
