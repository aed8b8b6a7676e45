//! 原始请求字节解析：请求行、头部块与正文。
//!
//! 解析器只定位头部与正文的空行分界，不校验头部语法。请求行残缺时
//! 返回空字段，由路由层按 400 处理。

use percent_encoding::percent_decode_str;

use crate::error::DavError;

/// 正文捕获上限，超出部分被静默截断。
pub const MAX_BODY_CAPTURE: usize = 64 * 1024 * 1024;
/// 请求目标（含查询串）的最大长度，超出返回 414。
pub const MAX_URI_LENGTH: usize = 2048;
/// 头部区域上限，超出后停止读取头部。
pub const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_METHOD_LENGTH: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub raw_path: String,
    pub protocol_version: String,
    pub header_block: String,
    pub body: Vec<u8>,
}

/// 将原始字节解析为请求；从不失败。
pub fn parse(raw: &[u8]) -> HttpRequest {
    let (head, body) = match find_header_end(raw) {
        Some(end) => (&raw[..end], &raw[end + 4..]),
        None => (raw, &raw[raw.len()..]),
    };
    let head = String::from_utf8_lossy(head);
    let (start_line, header_block) = match head.find('\n') {
        Some(index) => (&head[..index], &head[index + 1..]),
        None => (head.as_ref(), ""),
    };

    let mut parts = start_line.trim_end_matches('\r').split_ascii_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let raw_path = parts.next().unwrap_or_default().to_string();
    let protocol_version = parts.next().unwrap_or_default().to_string();

    let capture = body.len().min(MAX_BODY_CAPTURE);
    HttpRequest {
        method,
        raw_path,
        protocol_version,
        header_block: header_block.to_string(),
        body: body[..capture].to_vec(),
    }
}

/// 返回 `\r\n\r\n` 分界起始下标。
pub fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

impl HttpRequest {
    /// 按名称查找头部（不区分大小写，取第一个）。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_block.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")?.parse().ok()
    }

    /// `Transfer-Encoding` 的最后一个编码为 `chunked` 时成立，此时忽略 `Content-Length`。
    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .and_then(|value| value.rsplit(',').next())
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    /// 校验请求行：缺失方法或路径视为错误请求，路径过长返回 414。
    pub fn validate(&self) -> Result<(), DavError> {
        if self.method.is_empty() || self.raw_path.is_empty() {
            return Err(DavError::BadRequest("missing method or path".into()));
        }
        if self.method.len() > MAX_METHOD_LENGTH
            || !self.method.bytes().all(|b| b.is_ascii_alphabetic())
        {
            return Err(DavError::BadRequest("malformed method".into()));
        }
        if self.raw_path.len() > MAX_URI_LENGTH {
            return Err(DavError::UriTooLong);
        }
        Ok(())
    }

    /// 去掉查询串与片段后 URL 解码并折叠重复斜杠。
    pub fn decoded_path(&self) -> Result<String, DavError> {
        if self.raw_path.len() > MAX_URI_LENGTH {
            return Err(DavError::UriTooLong);
        }
        let path = self.raw_path.split(['?', '#']).next().unwrap_or_default();
        if !path.starts_with('/') {
            return Err(DavError::BadRequest(format!("invalid request target {path}")));
        }
        let decoded = url_decode(path);
        if decoded.contains('\0') {
            return Err(DavError::BadRequest("nul byte in path".into()));
        }
        Ok(normalize_slashes(&decoded))
    }
}

const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
    Done,
}

/// 增量解码 `chunked` 正文。
///
/// 输入可按任意边界分批喂入；超过 `limit` 的正文字节被丢弃，但仍继续解析直到
/// 终止块，与 `Content-Length` 正文的截断规则一致。
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
    pending: Vec<u8>,
    body: Vec<u8>,
    limit: usize,
}

impl ChunkedDecoder {
    pub fn new(limit: usize) -> Self {
        Self {
            state: ChunkState::Size,
            pending: Vec::new(),
            body: Vec::new(),
            limit,
        }
    }

    /// 喂入一批字节，终止块与 trailer 读完后返回 `true`。
    pub fn feed(&mut self, input: &[u8]) -> Result<bool, DavError> {
        self.pending.extend_from_slice(input);
        let mut offset = 0;
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(&self.pending[offset..]) else {
                        if self.pending.len() - offset > MAX_CHUNK_LINE {
                            return Err(DavError::BadRequest("chunk size line too long".into()));
                        }
                        break;
                    };
                    let size = parse_chunk_size(&self.pending[offset..offset + line_end])?;
                    offset += line_end + 2;
                    self.state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    let available = (self.pending.len() - offset).min(remaining);
                    if available == 0 {
                        break;
                    }
                    let room = self.limit.saturating_sub(self.body.len());
                    self.body
                        .extend_from_slice(&self.pending[offset..offset + available.min(room)]);
                    offset += available;
                    self.state = if available == remaining {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(remaining - available)
                    };
                }
                ChunkState::DataEnd => {
                    if self.pending.len() - offset < 2 {
                        break;
                    }
                    if &self.pending[offset..offset + 2] != b"\r\n" {
                        return Err(DavError::BadRequest("missing CRLF after chunk".into()));
                    }
                    offset += 2;
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let Some(line_end) = find_crlf(&self.pending[offset..]) else {
                        if self.pending.len() - offset > MAX_CHUNK_LINE {
                            return Err(DavError::BadRequest("trailer line too long".into()));
                        }
                        break;
                    };
                    offset += line_end + 2;
                    if line_end == 0 {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => break,
            }
        }
        self.pending.drain(..offset);
        Ok(self.state == ChunkState::Done)
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

fn find_crlf(raw: &[u8]) -> Option<usize> {
    raw.windows(2).position(|window| window == b"\r\n")
}

/// 块大小行：十六进制长度，可带 `;` 分隔的扩展。
fn parse_chunk_size(line: &[u8]) -> Result<usize, DavError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| DavError::BadRequest("chunk size is not ascii".into()))?;
    let digits = line.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(digits, 16)
        .map_err(|_| DavError::BadRequest(format!("invalid chunk size {digits:?}")))
}

pub fn url_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

pub fn normalize_slashes(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    for ch in path.chars() {
        if ch == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(ch);
    }
    normalized
}

/// 解码后的路径是否含有 `..` 段（兼容反斜杠分隔）。
pub fn has_parent_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| segment == "..")
}
