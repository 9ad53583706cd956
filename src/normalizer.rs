use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tokio::fs;
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("内容类型不是图片: {0}")]
    NotAnImage(String),

    #[error("图片损坏: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 图片规整器：校验字节流确实是图片，统一转成 RGB 并重编码为 JPEG，
/// 写盘后再读回校验一次，校验不过的文件直接删除。
/// 调用方把 NotAnImage 和 Corrupt 一律当作"丢弃这一页"，不中断章节。
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub async fn normalize(
        &self,
        raw: &[u8],
        content_type: Option<&str>,
        dest: &Path,
    ) -> Result<PathBuf, NormalizeError> {
        if let Some(declared) = content_type {
            if !declared.contains("image") {
                return Err(NormalizeError::NotAnImage(declared.to_owned()));
            }
        }

        let decoded =
            image::load_from_memory(raw).map_err(|e| NormalizeError::Corrupt(e.to_string()))?;

        // JPEG 不支持 alpha 和调色板，统一平铺成 RGB
        let flattened = match decoded {
            DynamicImage::ImageRgb8(_) => decoded,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };

        let mut encoded = Vec::new();
        flattened
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
            .map_err(|e| NormalizeError::Corrupt(e.to_string()))?;
        fs::write(dest, &encoded).await?;

        // 写后校验：读回并完整解码，失败则删掉残留文件
        let written = fs::read(dest).await?;
        if let Err(e) = image::load_from_memory_with_format(&written, ImageFormat::Jpeg) {
            let _ = fs::remove_file(dest).await;
            return Err(NormalizeError::Corrupt(format!(
                "写入后校验失败 {}: {}",
                dest.display(),
                e
            )));
        }

        debug!("图片已规整保存");
        Ok(dest.to_path_buf())
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn png_bytes() -> Vec<u8> {
        // 带 alpha 通道的 2x2 PNG，走平铺分支
        let img = RgbaImage::from_fn(2, 2, |x, y| {
            image::Rgba([(x * 100) as u8, (y * 100) as u8, 50, 128])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn valid_png_becomes_decodable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("001.jpg");
        let normalizer = Normalizer::new();

        for _ in 0..2 {
            let path = normalizer
                .normalize(&png_bytes(), Some("image/png"), &dest)
                .await
                .unwrap();
            let written = std::fs::read(&path).unwrap();
            let reopened =
                image::load_from_memory_with_format(&written, ImageFormat::Jpeg).unwrap();
            assert_eq!(reopened.width(), 2);
            assert_eq!(reopened.height(), 2);
        }
    }

    #[tokio::test]
    async fn garbage_bytes_leave_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("002.jpg");
        let normalizer = Normalizer::new();

        let err = normalizer
            .normalize(b"definitely not an image", Some("image/jpeg"), &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Corrupt(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn non_image_content_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("003.jpg");
        let normalizer = Normalizer::new();

        let err = normalizer
            .normalize(&png_bytes(), Some("text/html; charset=utf-8"), &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, NormalizeError::NotAnImage(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn missing_content_type_falls_back_to_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("004.jpg");
        let normalizer = Normalizer::new();

        normalizer.normalize(&png_bytes(), None, &dest).await.unwrap();
        assert!(dest.exists());
    }
}
