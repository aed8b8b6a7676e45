//! 文件访问与 API 调用审计通知（即发即弃）。

use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    List,
    Write,
    Delete,
    CreateDir,
}

impl FileOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOperation::Read => "read",
            FileOperation::List => "list",
            FileOperation::Write => "write",
            FileOperation::Delete => "delete",
            FileOperation::CreateDir => "mkcol",
        }
    }
}

/// 审计接收端。实现不得阻塞或影响请求处理。
pub trait AuditSink: Send + Sync {
    fn audit_file_access(&self, path: &Path, operation: FileOperation);
    fn audit_api_call(&self, endpoint: &str, method: &str);
}

/// 以 Security 分类写入 tracing 的默认实现。
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn audit_file_access(&self, path: &Path, operation: FileOperation) {
        info!(
            target: "nas_dav::security",
            path = %path.display(),
            operation = operation.as_str(),
            "file access"
        );
    }

    fn audit_api_call(&self, endpoint: &str, method: &str) {
        info!(target: "nas_dav::security", endpoint, method, "api call");
    }
}
