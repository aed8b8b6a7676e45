//! 临时文件写入后原子替换目标文件。

use std::io;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 将 `contents` 写入同目录临时文件，落盘后重命名覆盖 `target`。
pub async fn replace_file(target: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
    let base = target
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_else(|| "file".into());
    let temp_path = parent.join(format!(".{base}.tmp.{}", Uuid::new_v4()));

    let written: io::Result<()> = async {
        let mut file = File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await
    }
    .await;
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }

    if let Err(err) = fs::rename(&temp_path, target).await {
        #[cfg(windows)]
        {
            if fs::remove_file(target).await.is_ok() {
                return fs::rename(&temp_path, target).await;
            }
        }
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }

    let _ = sync_dir(parent).await;
    Ok(())
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
