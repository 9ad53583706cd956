use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::{info, instrument, warn};

use super::fetcher::{with_retry, Fetcher};
use super::CrawlError;
use crate::browser::BrowserSession;
use crate::cbz::CbzBuilder;
use crate::config::Config;
use crate::ledger;
use crate::normalizer::Normalizer;

/// 阅读器里的页面图片
static READER_IMAGE_SELECTOR: &str = "div.container-chapter-reader img";
/// 图源切换按钮
static SERVER_BUTTON_SELECTOR: &str = ".server-image-btn";

/// 单章获取管线：开浏览器会话，最多尝试两个图源，
/// 逐页下载并规整，存活页打包成 CBZ。
pub struct ChapterPipeline<'a> {
    config: &'a Config,
    fetcher: &'a Fetcher,
    normalizer: &'a Normalizer,
    builder: &'a CbzBuilder,
}

impl<'a> ChapterPipeline<'a> {
    pub fn new(
        config: &'a Config,
        fetcher: &'a Fetcher,
        normalizer: &'a Normalizer,
        builder: &'a CbzBuilder,
    ) -> Self {
        Self {
            config,
            fetcher,
            normalizer,
            builder,
        }
    }

    /// 成功返回归档路径。会话随本函数结束释放，无论从哪条路径返回。
    #[instrument(skip_all, fields(chapter = %chapter_title))]
    pub async fn acquire(
        &self,
        chapter_url: &str,
        title: &str,
        chapter_title: &str,
        title_dir: &Path,
    ) -> Result<PathBuf, CrawlError> {
        let session = BrowserSession::open(&self.config.browser, self.config.delay)?;
        session.navigate(chapter_url)?;
        session.settle();

        for server in 1..=2u32 {
            if server > 1 {
                info!("图源 1 没有图片，切换到图源 2");
                // 没有切换按钮就没有第二个图源可试
                if !session.click_nth(SERVER_BUTTON_SELECTOR, 1)? {
                    break;
                }
                session.settle();
            }

            let srcs = session.collect_attr(READER_IMAGE_SELECTOR, "src")?;
            if srcs.is_empty() {
                continue;
            }
            info!("图源 {} 发现 {} 张图片", server, srcs.len());

            let images = self.download_pages(&srcs, chapter_url, title_dir).await;
            if images.is_empty() {
                return Err(CrawlError::NoImages(chapter_url.to_owned()));
            }

            let archive = self
                .builder
                .build(title, chapter_title, title_dir, &images)
                .await?;

            // 归档是持久产物，散页用完即删
            for image in &images {
                let _ = fs::remove_file(image).await;
            }
            return Ok(archive);
        }

        Err(CrawlError::NoImages(chapter_url.to_owned()))
    }

    /// 逐页下载并规整。序号按发现顺序从 1 开始，
    /// 失败的页只留下日志和序号空缺，不中断整章。
    async fn download_pages(
        &self,
        srcs: &[String],
        chapter_url: &str,
        title_dir: &Path,
    ) -> Vec<PathBuf> {
        let retry = self.config.retry;
        let mut saved = Vec::new();

        for (index, src) in srcs.iter().enumerate() {
            let page = index + 1;
            let dest = title_dir.join(format!("{:03}.jpg", page));

            let fetched = with_retry(
                retry.max_attempts,
                Duration::from_secs(retry.delay_secs),
                |_| true,
                || self.fetcher.get_bytes(src, Some(chapter_url)),
            )
            .await;

            let (bytes, content_type) = match fetched {
                Ok(result) => result,
                Err(e) => {
                    warn!("第 {} 页下载失败: {}", page, e);
                    ledger::log_error(title_dir, &format!("第 {} 页下载失败 {}: {}", page, src, e))
                        .await;
                    continue;
                }
            };

            match self
                .normalizer
                .normalize(&bytes, content_type.as_deref(), &dest)
                .await
            {
                Ok(path) => saved.push(path),
                Err(e) => {
                    warn!("第 {} 页图片无效，丢弃: {}", page, e);
                    ledger::log_error(title_dir, &format!("第 {} 页图片无效 {}: {}", page, src, e))
                        .await;
                }
            }
        }

        saved
    }
}
