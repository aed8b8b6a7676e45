//! WebDAV 协议处理：把请求路径解析到共享，再执行各方法语义。
//!
//! 每个请求相互独立。错误在检测处转换为裸状态响应（不带 XML 正文），
//! 成功的 PROPFIND 返回 207 多状态文档。

use chrono::Local;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::cmp::Ordering;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info};
use xmltree::{Element, EmitterConfig, Namespace, XMLNode};

use crate::atomic;
use crate::audit::FileOperation;
use crate::config::{DEFAULT_LOCK_WAIT_TIMEOUT_SECS, ServerConfig};
use crate::error::DavError;
use crate::etag;
use crate::logging::LogCategory;
use crate::request::{HttpRequest, has_parent_segment};
use crate::response::HttpResponse;
use crate::server::AppState;
use crate::shares::{self, ResolvedPath, Target};

pub const DAV_COMPLIANCE: &str = "1,2";
pub const ALLOWED_METHODS: &str = "OPTIONS, GET, HEAD, POST, PUT, DELETE, PROPFIND, MKCOL";
const MULTISTATUS_CONTENT_TYPE: &str = "application/xml; charset=\"utf-8\"";

const HREF_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// WebDAV 监听端口的请求入口。
pub async fn handle(request: &HttpRequest, config: &ServerConfig, state: &AppState) -> HttpResponse {
    match dispatch(request, config, state).await {
        Ok(response) => response,
        Err(err) => {
            if err.status() >= 500 {
                LogCategory::Error.log(format!(
                    "{} {} failed: {err}",
                    request.method, request.raw_path
                ));
            } else {
                debug!(method = %request.method, path = %request.raw_path, error = %err, "request rejected");
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
    if request.method == "OPTIONS" {
        return Ok(options_response());
    }

    let path = request.decoded_path()?;
    if has_parent_segment(&path) {
        LogCategory::Security.log(format!(
            "path traversal attempt: {} {}",
            request.method, request.raw_path
        ));
        return Err(DavError::Forbidden("path traversal".into()));
    }

    let target = shares::resolve(config, &path)?;
    match request.method.as_str() {
        "GET" | "HEAD" => get(target, config, state).await,
        "PROPFIND" => propfind(target, config, state).await,
        "PUT" => put(target, &request.body, config, state).await,
        "DELETE" => delete(target, config, state).await,
        "MKCOL" => mkcol(target, config, state).await,
        other => Err(DavError::NotImplemented(other.to_string())),
    }
}

fn options_response() -> HttpResponse {
    HttpResponse::new(200)
        .header("DAV", DAV_COMPLIANCE)
        .header("Allow", ALLOWED_METHODS)
        .header("MS-Author-Via", "DAV")
}

async fn get(
    target: Target<'_>,
    config: &ServerConfig,
    state: &AppState,
) -> Result<HttpResponse, DavError> {
    let resolved = match target {
        Target::Root => return Ok(landing_page(config)),
        Target::Share(resolved) => resolved,
    };
    resolved.ensure_no_symlinks(false).await?;
    let metadata = fs::metadata(&resolved.real_path)
        .await
        .map_err(DavError::from_io)?;
    // 目录上的 GET 按 PROPFIND 处理
    if metadata.is_dir() {
        return propfind_share(&resolved, &metadata, state).await;
    }

    let content = state.cache.read(&resolved.real_path).await?;
    state
        .audit
        .audit_file_access(&resolved.real_path, FileOperation::Read);
    let mut response =
        HttpResponse::with_body(200, content_type_for(&resolved.real_path), content);
    response
        .extra_headers
        .extend(etag::validator_headers(&metadata));
    Ok(response)
}

async fn propfind(
    target: Target<'_>,
    config: &ServerConfig,
    state: &AppState,
) -> Result<HttpResponse, DavError> {
    match target {
        Target::Root => {
            let mut entries = vec![PropEntry::collection("/".into(), String::new())];
            entries.extend(config.shares.iter().map(|share| {
                PropEntry::collection(format!("/{}/", share.alias), share.alias.clone())
            }));
            multistatus(&entries)
        }
        Target::Share(resolved) => {
            resolved.ensure_no_symlinks(false).await?;
            let metadata = match fs::metadata(&resolved.real_path).await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(DavError::NotFound(resolved.relative.clone()));
                }
                Err(err) => return Err(DavError::Internal(err.to_string())),
            };
            propfind_share(&resolved, &metadata, state).await
        }
    }
}

/// 目标自身一条，目录再追加每个直接子项一条；不解析 Depth 头。
async fn propfind_share(
    resolved: &ResolvedPath<'_>,
    metadata: &Metadata,
    state: &AppState,
) -> Result<HttpResponse, DavError> {
    let is_dir = metadata.is_dir();
    let mut href = format!("/{}/", resolved.share.alias);
    if !resolved.is_share_root() {
        href.push_str(&resolved.relative);
        if is_dir {
            href.push('/');
        }
    }
    let display_name = if resolved.is_share_root() {
        resolved.share.alias.clone()
    } else {
        file_name(&resolved.real_path)
    };

    let mut entries = vec![PropEntry::from_metadata(
        href.clone(),
        display_name,
        &resolved.real_path,
        metadata,
    )];
    if is_dir {
        let children = list_children(&resolved.real_path)
            .await
            .map_err(|err| DavError::Internal(err.to_string()))?;
        entries.extend(children.into_iter().map(|mut child| {
            child.href = format!(
                "{href}{}{}",
                child.href,
                if child.is_dir { "/" } else { "" }
            );
            child
        }));
        state
            .audit
            .audit_file_access(&resolved.real_path, FileOperation::List);
    }
    multistatus(&entries)
}

/// 列出直接子项，目录在前、名称不区分大小写排序；符号链接不列出。
async fn list_children(dir: &Path) -> std::io::Result<Vec<PropEntry>> {
    let mut reader = fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.file_type().is_symlink() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        entries.push(PropEntry::from_metadata(
            name.clone(),
            name,
            &entry.path(),
            &metadata,
        ));
    }
    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a
            .display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase()),
    });
    Ok(entries)
}

async fn put(
    target: Target<'_>,
    body: &[u8],
    config: &ServerConfig,
    state: &AppState,
) -> Result<HttpResponse, DavError> {
    let Target::Share(resolved) = target else {
        return Err(DavError::Forbidden("cannot write to the share list".into()));
    };
    resolved.ensure_writable(config)?;
    resolved.ensure_no_symlinks(true).await?;

    let _guard = state
        .locks
        .lock_path_with_timeout(
            &resolved.real_path,
            Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS),
        )
        .await
        .map_err(|_| DavError::Conflict("path locked".into()))?;
    match fs::metadata(&resolved.real_path).await {
        Ok(metadata) if metadata.is_dir() => {
            return Err(DavError::MethodNotAllowed("target is a collection".into()));
        }
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(DavError::Internal(err.to_string())),
    }

    if let Some(parent) = resolved.real_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| DavError::Internal(err.to_string()))?;
    }
    atomic::replace_file(&resolved.real_path, body)
        .await
        .map_err(|err| DavError::Internal(err.to_string()))?;
    state.cache.invalidate(&resolved.real_path);
    state
        .audit
        .audit_file_access(&resolved.real_path, FileOperation::Write);
    info!(share = %resolved.share.alias, path = %resolved.relative, size = body.len(), "put file");

    let mut response = HttpResponse::new(201);
    if let Ok(metadata) = fs::metadata(&resolved.real_path).await {
        response
            .extra_headers
            .extend(etag::validator_headers(&metadata));
    }
    Ok(response)
}

async fn delete(
    target: Target<'_>,
    config: &ServerConfig,
    state: &AppState,
) -> Result<HttpResponse, DavError> {
    let Target::Share(resolved) = target else {
        return Err(DavError::Forbidden("cannot delete the share list".into()));
    };
    resolved.ensure_writable(config)?;
    if resolved.is_share_root() {
        return Err(DavError::Forbidden("cannot delete a share root".into()));
    }
    resolved.ensure_no_symlinks(false).await?;

    let _guard = state
        .locks
        .lock_path_with_timeout(
            &resolved.real_path,
            Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS),
        )
        .await
        .map_err(|_| DavError::Conflict("path locked".into()))?;
    let metadata = match fs::metadata(&resolved.real_path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(DavError::NotFound(resolved.relative.clone()));
        }
        Err(err) => return Err(DavError::Internal(err.to_string())),
    };
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(&resolved.real_path).await
    } else {
        fs::remove_file(&resolved.real_path).await
    };
    removed.map_err(|err| DavError::Internal(err.to_string()))?;

    state.cache.invalidate(&resolved.real_path);
    state
        .audit
        .audit_file_access(&resolved.real_path, FileOperation::Delete);
    info!(share = %resolved.share.alias, path = %resolved.relative, "delete entry");
    Ok(HttpResponse::new(204))
}

async fn mkcol(
    target: Target<'_>,
    config: &ServerConfig,
    state: &AppState,
) -> Result<HttpResponse, DavError> {
    let Target::Share(resolved) = target else {
        return Err(DavError::Forbidden("cannot create a share".into()));
    };
    resolved.ensure_writable(config)?;
    resolved.ensure_no_symlinks(true).await?;

    if fs::symlink_metadata(&resolved.real_path).await.is_ok() {
        return Err(DavError::MethodNotAllowed("target already exists".into()));
    }
    match fs::create_dir(&resolved.real_path).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(DavError::Conflict("parent collection missing".into()));
        }
        Err(err) => return Err(DavError::Internal(err.to_string())),
    }

    state
        .audit
        .audit_file_access(&resolved.real_path, FileOperation::CreateDir);
    info!(share = %resolved.share.alias, path = %resolved.relative, "create collection");
    Ok(HttpResponse::new(201))
}

/// 多状态文档中的单个资源。
#[derive(Debug)]
struct PropEntry {
    href: String,
    display_name: String,
    is_dir: bool,
    length: u64,
    content_type: Option<String>,
    modified: Option<SystemTime>,
}

impl PropEntry {
    fn collection(href: String, display_name: String) -> Self {
        Self {
            href,
            display_name,
            is_dir: true,
            length: 0,
            content_type: None,
            modified: None,
        }
    }

    fn from_metadata(href: String, display_name: String, path: &Path, metadata: &Metadata) -> Self {
        let is_dir = metadata.is_dir();
        Self {
            href,
            display_name,
            is_dir,
            length: metadata.len(),
            content_type: (!is_dir).then(|| content_type_for(path).to_string()),
            modified: metadata.modified().ok(),
        }
    }

    fn to_element(&self) -> Element {
        let mut prop = dav_element("prop");
        prop.children
            .push(XMLNode::Element(text_element("displayname", &self.display_name)));
        let mut resource_type = dav_element("resourcetype");
        if self.is_dir {
            resource_type
                .children
                .push(XMLNode::Element(dav_element("collection")));
        }
        prop.children.push(XMLNode::Element(resource_type));
        if !self.is_dir {
            prop.children.push(XMLNode::Element(text_element(
                "getcontentlength",
                &self.length.to_string(),
            )));
            if let Some(content_type) = &self.content_type {
                prop.children
                    .push(XMLNode::Element(text_element("getcontenttype", content_type)));
            }
        }
        if let Some(modified) = self.modified {
            prop.children.push(XMLNode::Element(text_element(
                "getlastmodified",
                &httpdate::fmt_http_date(modified),
            )));
        }

        let mut propstat = dav_element("propstat");
        propstat.children.push(XMLNode::Element(prop));
        propstat
            .children
            .push(XMLNode::Element(text_element("status", "HTTP/1.1 200 OK")));

        let mut response = dav_element("response");
        response.children.push(XMLNode::Element(text_element(
            "href",
            &utf8_percent_encode(&self.href, HREF_ENCODE_SET).to_string(),
        )));
        response.children.push(XMLNode::Element(propstat));
        response
    }
}

fn dav_element(name: &str) -> Element {
    let mut element = Element::new(name);
    element.prefix = Some("d".into());
    element
}

fn text_element(name: &str, text: &str) -> Element {
    let mut element = dav_element(name);
    if !text.is_empty() {
        element.children.push(XMLNode::Text(text.to_string()));
    }
    element
}

fn multistatus(entries: &[PropEntry]) -> Result<HttpResponse, DavError> {
    let mut root = dav_element("multistatus");
    let mut namespaces = Namespace::empty();
    namespaces.put("d", "DAV:");
    root.namespaces = Some(namespaces);
    root.children
        .extend(entries.iter().map(|entry| XMLNode::Element(entry.to_element())));

    let mut body = Vec::new();
    root.write_with_config(&mut body, EmitterConfig::new().perform_indent(true))
        .map_err(|err| DavError::Internal(err.to_string()))?;
    Ok(HttpResponse::with_body(207, MULTISTATUS_CONTENT_TYPE, body))
}

/// 按扩展名推断 MIME 类型，未知时为 `application/octet-stream`。
pub fn content_type_for(path: &Path) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn landing_page(config: &ServerConfig) -> HttpResponse {
    let mut shares = String::new();
    for share in &config.shares {
        let (badge, class) = if config.is_read_only(share) {
            ("Read Only", "ro")
        } else {
            ("Read/Write", "rw")
        };
        let alias = escape_html(&share.alias);
        shares.push_str(&format!(
            "<li class=\"share\"><a href=\"/{alias}/\">{alias}</a> \
             <span class=\"badge {class}\">{badge}</span></li>\n"
        ));
    }
    if shares.is_empty() {
        shares.push_str("<li class=\"empty\">No shares configured</li>\n");
    }
    let now = Local::now().format("%Y-%m-%d %H:%M:%S");
    HttpResponse::html(
        200,
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>WebDAV Server</title>\n<style>\n\
             body {{ font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }}\n\
             .badge {{ font-size: 0.8rem; padding: 0.1rem 0.5rem; border-radius: 0.5rem; }}\n\
             .ro {{ background: #fde2e1; }}\n.rw {{ background: #def7e5; }}\n\
             </style>\n</head>\n<body>\n<h1>WebDAV Server</h1>\n\
             <h2>Available Shares</h2>\n<ul>\n{shares}</ul>\n\
             <p>Connect with any WebDAV client at <code>http://host:port/&lt;share&gt;/</code>.</p>\n\
             <footer>Server Time: {now}</footer>\n</body>\n</html>\n"
        ),
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    use crate::audit::tests::RecordingAudit;
    use crate::config::Share;
    use crate::pool::PoolInfo;
    use crate::request::parse;

    struct Fixture {
        _temp: TempDir,
        root: std::path::PathBuf,
        config: ServerConfig,
        state: AppState,
        audit: Arc<RecordingAudit>,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("share");
        let backup = temp.path().join("backup");
        std::fs::create_dir_all(&root).expect("create share");
        std::fs::create_dir_all(&backup).expect("create backup");
        let config = ServerConfig::default()
            .with_shares(vec![
                Share::new("share", &root),
                Share::new("backup", &backup).read_only(),
            ])
            .expect("valid shares");
        let audit = Arc::new(RecordingAudit::default());
        let state = AppState::new(
            config.clone(),
            PoolInfo {
                workers: 1,
                queue_capacity: 1,
            },
        )
        .with_audit(audit.clone());
        Fixture {
            _temp: temp,
            root,
            config,
            state,
            audit,
        }
    }

    async fn send(fixture: &Fixture, raw: &str) -> HttpResponse {
        handle(&parse(raw.as_bytes()), &fixture.config, &fixture.state).await
    }

    fn body_text(response: &HttpResponse) -> String {
        String::from_utf8_lossy(&response.body).to_string()
    }

    #[tokio::test]
    async fn options_advertises_dav() {
        let fixture = fixture();
        let response = send(&fixture, "OPTIONS / HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.header_value("DAV"), Some("1,2"));
        assert_eq!(response.header_value("Allow"), Some(ALLOWED_METHODS));
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn put_then_get_round_trips_body_and_type() {
        let fixture = fixture();
        let put = send(
            &fixture,
            "PUT /share/docs/foo.txt HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await;
        assert_eq!(put.status, 201);
        assert!(put.header_value("ETag").is_some());
        assert!(fixture.root.join("docs").is_dir());

        let get = send(&fixture, "GET /share/docs/foo.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(get.status, 200);
        assert_eq!(get.body, b"hello");
        assert_eq!(get.content_type.as_deref(), Some("text/plain"));
        assert!(get.header_value("Last-Modified").is_some());

        let events = fixture.audit.events.lock().expect("events");
        assert!(events.iter().any(|event| event.starts_with("write ")));
        assert!(events.iter().any(|event| event.starts_with("read ")));
    }

    #[tokio::test]
    async fn put_replaces_cached_content() {
        let fixture = fixture();
        std::fs::write(fixture.root.join("a.txt"), b"old").expect("seed");
        let first = send(&fixture, "GET /share/a.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(first.body, b"old");

        send(&fixture, "PUT /share/a.txt HTTP/1.1\r\n\r\nnewer").await;
        let second = send(&fixture, "GET /share/a.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(second.body, b"newer");
    }

    #[tokio::test]
    async fn delete_twice_returns_no_content_then_not_found() {
        let fixture = fixture();
        std::fs::write(fixture.root.join("foo.txt"), b"bye").expect("seed");
        let first = send(&fixture, "DELETE /share/foo.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(first.status, 204);
        let second = send(&fixture, "DELETE /share/foo.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(second.status, 404);
    }

    #[tokio::test]
    async fn delete_removes_directories_recursively() {
        let fixture = fixture();
        std::fs::create_dir_all(fixture.root.join("dir/nested")).expect("mkdir");
        std::fs::write(fixture.root.join("dir/nested/x.bin"), b"x").expect("seed");
        let response = send(&fixture, "DELETE /share/dir HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, 204);
        assert!(!fixture.root.join("dir").exists());

        let root = send(&fixture, "DELETE /share/ HTTP/1.1\r\n\r\n").await;
        assert_eq!(root.status, 403);
    }

    #[tokio::test]
    async fn propfind_root_with_empty_registry_lists_only_root() {
        let fixture = fixture();
        let config = ServerConfig::default();
        let response = handle(
            &parse(b"PROPFIND / HTTP/1.1\r\nDepth: 1\r\n\r\n"),
            &config,
            &fixture.state,
        )
        .await;
        assert_eq!(response.status, 207);
        assert_eq!(response.content_type.as_deref(), Some(MULTISTATUS_CONTENT_TYPE));
        let body = body_text(&response);
        assert!(body.contains("xmlns:d=\"DAV:\""));
        assert_eq!(body.matches("<d:response>").count(), 1);
    }

    #[tokio::test]
    async fn propfind_root_lists_every_share_as_collection() {
        let fixture = fixture();
        let response = send(&fixture, "PROPFIND / HTTP/1.1\r\n\r\n").await;
        let body = body_text(&response);
        assert_eq!(body.matches("<d:response>").count(), 3);
        assert!(body.contains("<d:href>/share/</d:href>"));
        assert!(body.contains("<d:href>/backup/</d:href>"));
        assert_eq!(body.matches("<d:collection").count(), 3);
    }

    #[tokio::test]
    async fn propfind_lists_immediate_children_regardless_of_depth_header() {
        let fixture = fixture();
        std::fs::create_dir_all(fixture.root.join("Sub/deeper")).expect("mkdir");
        std::fs::write(fixture.root.join("b c.txt"), b"12345").expect("seed");

        // Depth: 0 is ignored; immediate children are always listed.
        let response = send(&fixture, "PROPFIND /share/ HTTP/1.1\r\nDepth: 0\r\n\r\n").await;
        assert_eq!(response.status, 207);
        let body = body_text(&response);
        assert_eq!(body.matches("<d:response>").count(), 3);
        assert!(body.contains("<d:href>/share/Sub/</d:href>"));
        assert!(body.contains("<d:href>/share/b%20c.txt</d:href>"));
        assert!(body.contains("<d:getcontentlength>5</d:getcontentlength>"));
        assert!(body.contains("<d:getcontenttype>text/plain</d:getcontenttype>"));
        assert!(!body.contains("deeper"));
        let sub = body.find("/share/Sub/").expect("dir listed");
        let file = body.find("/share/b%20c.txt").expect("file listed");
        assert!(sub < file);
    }

    #[tokio::test]
    async fn propfind_missing_target_is_bare_not_found() {
        let fixture = fixture();
        let response = send(&fixture, "PROPFIND /share/missing HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, 404);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn get_on_directory_behaves_as_propfind() {
        let fixture = fixture();
        std::fs::write(fixture.root.join("a.txt"), b"a").expect("seed");
        let response = send(&fixture, "GET /share HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, 207);
        assert_eq!(body_text(&response).matches("<d:response>").count(), 2);
    }

    #[tokio::test]
    async fn get_root_renders_escaped_landing_page() {
        let temp = tempdir().expect("tempdir");
        let fixture = fixture();
        let config = ServerConfig::default()
            .with_shares(vec![Share::new("<b>", temp.path())])
            .expect("valid shares");
        let response = handle(&parse(b"GET / HTTP/1.1\r\n\r\n"), &config, &fixture.state).await;
        assert_eq!(response.status, 200);
        let body = body_text(&response);
        assert!(body.contains("&lt;b&gt;"));
        assert!(!body.contains("<b>"));
        assert!(body.contains("Read/Write"));
    }

    #[tokio::test]
    async fn mkcol_semantics() {
        let fixture = fixture();
        let created = send(&fixture, "MKCOL /share/newdir HTTP/1.1\r\n\r\n").await;
        assert_eq!(created.status, 201);
        assert!(fixture.root.join("newdir").is_dir());

        let exists = send(&fixture, "MKCOL /share/newdir HTTP/1.1\r\n\r\n").await;
        assert_eq!(exists.status, 405);

        let orphan = send(&fixture, "MKCOL /share/missing/child HTTP/1.1\r\n\r\n").await;
        assert_eq!(orphan.status, 409);

        std::fs::write(fixture.root.join("f.txt"), b"file").expect("seed");
        let under_file = send(&fixture, "MKCOL /share/f.txt/sub HTTP/1.1\r\n\r\n").await;
        assert_eq!(under_file.status, 409);
        let put_under_file = send(&fixture, "PUT /share/f.txt/sub HTTP/1.1\r\n\r\nx").await;
        assert_eq!(put_under_file.status, 409);
        assert_eq!(std::fs::read(fixture.root.join("f.txt")).expect("intact"), b"file");
    }

    #[tokio::test]
    async fn read_only_share_refuses_writes() {
        let fixture = fixture();
        let mkcol = send(&fixture, "MKCOL /backup/newdir HTTP/1.1\r\n\r\n").await;
        assert_eq!(mkcol.status, 403);
        let put = send(&fixture, "PUT /backup/a.txt HTTP/1.1\r\n\r\nx").await;
        assert_eq!(put.status, 403);
        let delete = send(&fixture, "DELETE /backup/a.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(delete.status, 403);
    }

    #[tokio::test]
    async fn unknown_share_and_missing_file_are_not_found() {
        let fixture = fixture();
        let response = send(&fixture, "GET /nonexistent-alias/file HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, 404);
        let missing = send(&fixture, "GET /share/nope.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn traversal_is_forbidden_before_touching_disk() {
        let fixture = fixture();
        let encoded = send(&fixture, "GET /share/%2e%2e/etc/passwd HTTP/1.1\r\n\r\n").await;
        assert_eq!(encoded.status, 403);
        let put = send(&fixture, "PUT /share/../escape.txt HTTP/1.1\r\n\r\nx").await;
        assert_eq!(put.status, 403);
        assert!(!fixture.root.parent().expect("parent").join("escape.txt").exists());
    }

    #[tokio::test]
    async fn alias_prefix_does_not_match_longer_segment() {
        let fixture = fixture();
        let response = send(&fixture, "GET /sharedocs/file HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn malformed_and_unsupported_requests() {
        let fixture = fixture();
        assert_eq!(send(&fixture, "\r\n\r\n").await.status, 400);
        let long = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(3000));
        assert_eq!(send(&fixture, &long).await.status, 414);
        assert_eq!(send(&fixture, "POST /share/a HTTP/1.1\r\n\r\n").await.status, 501);
    }
}
