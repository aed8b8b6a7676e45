//! 接收循环与单连接处理。
//!
//! 接收循环只负责接受连接并提交任务；读取请求、分发、写回响应全部在
//! 工作者中完成。读写都受每连接期限约束，慢客户端不会永久占住工作者。

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time;
use tracing::{debug, warn};

use crate::api::ApiRegistry;
use crate::audit::{AuditSink, TracingAudit};
use crate::cache::FileCache;
use crate::config::{ConfigStore, ServerConfig};
use crate::error::DavError;
use crate::frontend;
use crate::http::{add_security_headers, resolve_client_ip};
use crate::locking::LockManager;
use crate::logging::LogCategory;
use crate::pool::{PoolInfo, Task, WorkerPool};
use crate::request::{self, ChunkedDecoder, MAX_BODY_CAPTURE, MAX_HEADER_BYTES};
use crate::response;
use crate::webdav;

const READ_CHUNK: usize = 8 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// 服务进程持有的共享实例，显式传入各组件。
pub struct AppState {
    pub config: ConfigStore,
    pub cache: FileCache,
    pub locks: LockManager,
    pub audit: Arc<dyn AuditSink>,
    pub api: ApiRegistry,
    pub pool: PoolInfo,
    pub connections: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: ServerConfig, pool: PoolInfo) -> Self {
        let cache = if config.cache_enabled {
            FileCache::new(config.cache_max_entries, config.cache_max_bytes)
        } else {
            FileCache::disabled()
        };
        let api = ApiRegistry::with_defaults(&config.api_prefix);
        let connections = Arc::new(Semaphore::new(config.max_connections.max(1)));
        Self {
            config: ConfigStore::new(config),
            cache,
            locks: LockManager::new(),
            audit: Arc::new(TracingAudit),
            api,
            pool,
            connections,
        }
    }

    #[cfg(test)]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    WebDav,
    Frontend,
}

impl Listener {
    pub fn name(self) -> &'static str {
        match self {
            Listener::WebDav => "webdav",
            Listener::Frontend => "frontend",
        }
    }
}

/// 接受连接并投递到工作者池；被拒绝的连接直接关闭，不写响应。
pub async fn accept_loop(
    listener: TcpListener,
    kind: Listener,
    state: Arc<AppState>,
    pool: Arc<WorkerPool>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                LogCategory::Error.log(format!("{} accept failed: {err}", kind.name()));
                time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = %err, "set_nodelay failed");
        }
        let Ok(permit) = state.connections.clone().try_acquire_owned() else {
            warn!(%peer, listener = kind.name(), "connection limit reached, closing");
            continue;
        };

        let config = state.config.get();
        let task_state = state.clone();
        let task = Task::new(async move {
            let _permit = permit;
            serve_connection(stream, Some(peer), kind, config, &task_state).await;
        });
        if let Err(rejected) = pool.submit(task) {
            warn!(
                %peer,
                listener = kind.name(),
                reason = %rejected,
                queued = pool.queued(),
                "connection rejected"
            );
        }
    }
}

enum Incoming {
    Request(Vec<u8>),
    /// 头部过大或正文分块格式错误，回 400 后关闭。
    Rejected(DavError),
    Closed,
}

/// 处理单个连接上的一个请求，结束时关闭连接。
pub async fn serve_connection<S>(
    mut stream: S,
    peer: Option<SocketAddr>,
    kind: Listener,
    config: Arc<ServerConfig>,
    state: &AppState,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let deadline = config.connection_timeout;

    let raw = match time::timeout(deadline, read_request(&mut stream)).await {
        Ok(Ok(Incoming::Request(raw))) => raw,
        Ok(Ok(Incoming::Closed)) => return,
        Ok(Ok(Incoming::Rejected(err))) => {
            debug!(?peer, error = %err, "request rejected while reading");
            write_response(&mut stream, &response::build(&err.into_response()), deadline).await;
            return;
        }
        Ok(Err(err)) => {
            debug!(?peer, error = %err, "request read failed");
            return;
        }
        Err(_) => {
            LogCategory::Error.log(format!(
                "{} request read timed out from {}",
                kind.name(),
                peer.map(|addr| addr.to_string())
                    .unwrap_or_else(|| "unknown".into())
            ));
            let response = DavError::RequestTimeout.into_response();
            write_response(&mut stream, &response::build(&response), deadline).await;
            return;
        }
    };

    let request = request::parse(&raw);
    let mut response = match kind {
        Listener::WebDav => webdav::handle(&request, &config, state).await,
        Listener::Frontend => frontend::handle(&request, &config, state).await,
    };
    add_security_headers(&mut response);
    let wire = if request.is_head() {
        response::build_head(&response)
    } else {
        response::build(&response)
    };
    write_response(&mut stream, &wire, deadline).await;

    let client_ip = resolve_client_ip(&request, peer)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".into());
    LogCategory::Access.log(format_args!(
        "{} {client_ip} \"{} {}\" {} {}B {}ms",
        kind.name(),
        request.method,
        request.raw_path,
        response.status,
        response.body.len(),
        started.elapsed().as_millis()
    ));
}

/// 读取头部直到空行，再按 `chunked` 或 `Content-Length` 读取正文（超过捕获上限的部分丢弃）。
///
/// 分块正文在这里解码，返回的字节中正文已是原始内容。
async fn read_request<S>(stream: &mut S) -> io::Result<Incoming>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    let header_end = loop {
        if let Some(end) = request::find_header_end(&buffer) {
            break end;
        }
        if buffer.len() >= MAX_HEADER_BYTES {
            return Ok(Incoming::Rejected(DavError::BadRequest(
                "request headers too large".into(),
            )));
        }
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(if buffer.is_empty() {
                Incoming::Closed
            } else {
                Incoming::Request(buffer)
            });
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let body_start = header_end + 4;
    let head = request::parse(&buffer[..body_start]);
    if head.is_chunked() {
        let mut decoder = ChunkedDecoder::new(MAX_BODY_CAPTURE);
        let received = buffer.split_off(body_start);
        let mut done = match decoder.feed(&received) {
            Ok(done) => done,
            Err(err) => return Ok(Incoming::Rejected(err)),
        };
        while !done {
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                return Ok(Incoming::Rejected(DavError::BadRequest(
                    "connection closed inside chunked body".into(),
                )));
            }
            done = match decoder.feed(&chunk[..read]) {
                Ok(done) => done,
                Err(err) => return Ok(Incoming::Rejected(err)),
            };
        }
        buffer.extend_from_slice(&decoder.into_body());
        return Ok(Incoming::Request(buffer));
    }

    let expected = head.content_length().unwrap_or(0).min(MAX_BODY_CAPTURE);
    while buffer.len() - body_start < expected {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    buffer.truncate(body_start + expected.min(buffer.len() - body_start));
    Ok(Incoming::Request(buffer))
}

async fn write_response<S>(stream: &mut S, wire: &[u8], deadline: Duration)
where
    S: AsyncWrite + Unpin,
{
    let written = time::timeout(deadline, async {
        stream.write_all(wire).await?;
        stream.flush().await?;
        stream.shutdown().await
    })
    .await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(err)) => LogCategory::Error.log(format!("response write failed: {err}")),
        Err(_) => LogCategory::Error.log("response write timed out"),
    }
}
