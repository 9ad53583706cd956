use std::path::{Path, PathBuf};

use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use tokio::fs::{self, File};
use tracing::{info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("压缩打包失败 {path}: {reason}")]
    Zip { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 章节归档器：把规整后的有序图片打成一个 CBZ 文件。
pub struct CbzBuilder;

impl Default for CbzBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CbzBuilder {
    pub fn new() -> Self {
        Self
    }

    /// 归档名固定为 "<漫画名> - <章节名>.cbz"，章节名去掉连字符再裁剪，
    /// 避免出现双重分隔符。条目按传入顺序写入，条目名就是图片文件名
    /// (文件名里已含补零序号)。File::create 会截断旧文件，重跑原地覆盖。
    #[instrument(skip_all, fields(chapter = %chapter_title))]
    pub async fn build(
        &self,
        title: &str,
        chapter_title: &str,
        dir: &Path,
        images: &[PathBuf],
    ) -> Result<PathBuf, ArchiveError> {
        let clean_chapter = chapter_title.replace('-', "");
        let filename = format!("{} - {}.cbz", title, clean_chapter.trim());
        let archive_path = dir.join(&filename);

        let file = File::create(&archive_path).await?;
        let mut writer = ZipFileWriter::with_tokio(file);

        for image in images {
            let entry_name = image
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| ArchiveError::Zip {
                    path: image.display().to_string(),
                    reason: "图片文件名无效".to_owned(),
                })?;
            let content = fs::read(image).await?;
            let entry = ZipEntryBuilder::new(entry_name.into(), Compression::Deflate);
            writer
                .write_entry_whole(entry, &content)
                .await
                .map_err(|e| ArchiveError::Zip {
                    path: archive_path.display().to_string(),
                    reason: e.to_string(),
                })?;
        }

        writer.close().await.map_err(|e| ArchiveError::Zip {
            path: archive_path.display().to_string(),
            reason: e.to_string(),
        })?;

        info!("CBZ 已生成: {}", archive_path.display());
        Ok(archive_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_zip::tokio::read::fs::ZipFileReader;

    async fn entry_names(path: &Path) -> Vec<String> {
        let reader = ZipFileReader::new(path).await.unwrap();
        reader
            .file()
            .entries()
            .iter()
            .map(|e| e.filename().as_str().unwrap().to_owned())
            .collect()
    }

    #[tokio::test]
    async fn entries_keep_supplied_order_with_gaps() {
        let dir = tempfile::tempdir().unwrap();
        // 002 缺席：下载失败的页直接空缺，顺序不变
        let mut images = Vec::new();
        for name in ["001.jpg", "003.jpg", "004.jpg"] {
            let path = dir.path().join(name);
            std::fs::write(&path, name.as_bytes()).unwrap();
            images.push(path);
        }

        let archive = CbzBuilder::new()
            .build("Title", "Chapter 5", dir.path(), &images)
            .await
            .unwrap();

        assert_eq!(entry_names(&archive).await, vec!["001.jpg", "003.jpg", "004.jpg"]);
    }

    #[tokio::test]
    async fn name_strips_hyphens_from_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("001.jpg");
        std::fs::write(&page, b"x").unwrap();

        let archive = CbzBuilder::new()
            .build("My Manga", "Chapter-12 - Finale", dir.path(), &[page])
            .await
            .unwrap();

        assert_eq!(
            archive.file_name().unwrap().to_str().unwrap(),
            "My Manga - Chapter12  Finale.cbz"
        );
    }

    #[tokio::test]
    async fn rebuild_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CbzBuilder::new();

        let first = dir.path().join("001.jpg");
        std::fs::write(&first, b"one").unwrap();
        let second = dir.path().join("002.jpg");
        std::fs::write(&second, b"two").unwrap();

        let path_a = builder
            .build("T", "Ch 1", dir.path(), &[first.clone(), second.clone()])
            .await
            .unwrap();
        let path_b = builder.build("T", "Ch 1", dir.path(), &[second]).await.unwrap();

        assert_eq!(path_a, path_b);
        assert_eq!(entry_names(&path_b).await, vec!["002.jpg"]);
    }
}
