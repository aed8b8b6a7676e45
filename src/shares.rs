//! 虚拟路径到共享目录真实路径的解析与校验。

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;

use crate::config::{ServerConfig, Share};
use crate::request::has_parent_segment;

/// 解析结果：根目录或某个共享内的目标。
#[derive(Debug)]
pub enum Target<'a> {
    Root,
    Share(ResolvedPath<'a>),
}

#[derive(Debug)]
pub struct ResolvedPath<'a> {
    pub share: &'a Share,
    /// 共享内的相对路径，不含首尾斜杠；空串表示共享根目录。
    pub relative: String,
    pub real_path: PathBuf,
}

impl ResolvedPath<'_> {
    pub fn is_share_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// 写操作前检查共享与全局只读标志。
    pub fn ensure_writable(&self, config: &ServerConfig) -> Result<(), ShareError> {
        if config.is_read_only(self.share) {
            return Err(ShareError::ReadOnly(self.share.alias.clone()));
        }
        Ok(())
    }

    /// 拒绝共享内任何符号链接组件，防止逃逸出共享目录。
    pub async fn ensure_no_symlinks(&self, allow_missing_leaf: bool) -> Result<(), ShareError> {
        ensure_no_symlink_components(&self.share.real_path, &self.real_path, allow_missing_leaf)
            .await
    }
}

/// 将已解码、已折叠斜杠的虚拟路径解析到共享。
///
/// 别名按完整路径段匹配：`/sharedocs` 不会命中别名 `share`。
pub fn resolve<'a>(config: &'a ServerConfig, virtual_path: &str) -> Result<Target<'a>, ShareError> {
    if has_parent_segment(virtual_path) {
        return Err(ShareError::Traversal);
    }
    let trimmed = virtual_path.trim_start_matches('/');
    let (alias, rest) = match trimmed.split_once('/') {
        Some((alias, rest)) => (alias, rest),
        None => (trimmed, ""),
    };
    if alias.is_empty() {
        return Ok(Target::Root);
    }
    let share = config
        .share(alias)
        .ok_or_else(|| ShareError::UnknownShare(alias.to_string()))?;
    let relative = rest.trim_matches('/').to_string();
    let real_path = join_relative(&share.real_path, &relative)?;
    Ok(Target::Share(ResolvedPath {
        share,
        relative,
        real_path,
    }))
}

/// 在 `root` 下拼接相对路径，只接受普通路径段。
pub fn join_relative(root: &Path, relative: &str) -> Result<PathBuf, ShareError> {
    let mut normalized = PathBuf::new();
    let trimmed = relative.trim_start_matches(['/', '\\']);
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => continue,
            Component::ParentDir => return Err(ShareError::Traversal),
            Component::RootDir | Component::Prefix(_) => return Err(ShareError::InvalidPath),
        }
    }
    Ok(root.join(normalized))
}

async fn ensure_no_symlink_components(
    root: &Path,
    target: &Path,
    allow_missing_leaf: bool,
) -> Result<(), ShareError> {
    let relative = target
        .strip_prefix(root)
        .map_err(|_| ShareError::InvalidPath)?;
    let mut current = root.to_path_buf();
    let mut components = relative.components().peekable();

    while let Some(component) = components.next() {
        current.push(component.as_os_str());
        match fs::symlink_metadata(&current).await {
            Ok(metadata) => {
                if metadata.file_type().is_symlink() {
                    return Err(ShareError::InvalidPath);
                }
                if components.peek().is_some() && !metadata.is_dir() {
                    // 创建类请求的父级是文件属于冲突，读取类请求按不存在处理
                    return Err(if allow_missing_leaf {
                        ShareError::NotACollection(current)
                    } else {
                        ShareError::Io(io::Error::from(ErrorKind::NotFound))
                    });
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound && allow_missing_leaf => {
                return Ok(());
            }
            Err(err) => return Err(ShareError::Io(err)),
        }
    }

    Ok(())
}

#[derive(Debug)]
pub enum ShareError {
    Traversal,
    InvalidPath,
    ReadOnly(String),
    UnknownShare(String),
    /// 路径中间段是普通文件。
    NotACollection(PathBuf),
    Io(io::Error),
}

impl From<io::Error> for ShareError {
    fn from(err: io::Error) -> Self {
        ShareError::Io(err)
    }
}
