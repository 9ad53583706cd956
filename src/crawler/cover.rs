use std::path::Path;
use std::time::Duration;

use tokio::fs;
use tracing::{info, instrument, warn};

use super::fetcher::{with_retry, Fetcher};
use super::parser::Parser;
use super::CrawlError;
use crate::browser::{BrowserError, BrowserSession};
use crate::config::Config;
use crate::ledger;
use crate::normalizer::Normalizer;
use crate::utils;

pub static COVER_FILE: &str = "cover.jpg";
pub static PAGE_CAPTURE_FILE: &str = "page_content.txt";
pub static URL_FILE: &str = "url.txt";

/// 封面站搜索结果里的第一张缩略图
static THUMBNAIL_SELECTOR: &str = "div.grid.gap-2 img.rounded.shadow-md";

/// 封面解析器：逐级回退的搜索链，任何一级成功即终止。
/// 整条链失败也只是没有封面，不影响漫画本体的获取。
pub struct CoverResolver<'a> {
    config: &'a Config,
    fetcher: &'a Fetcher,
    parser: &'a Parser,
    normalizer: &'a Normalizer,
}

impl<'a> CoverResolver<'a> {
    pub fn new(
        config: &'a Config,
        fetcher: &'a Fetcher,
        parser: &'a Parser,
        normalizer: &'a Normalizer,
    ) -> Self {
        Self {
            config,
            fetcher,
            parser,
            normalizer,
        }
    }

    /// 回退顺序：
    /// 1. 封面站直接搜索显示名，无结果则放弃封面
    /// 2. 会话或导航出错时，用已保存的索引页抓取件里的备选标题重搜
    /// 3. 抓取件没有备选标题时，改从镜像站页面提取备选标题重搜
    /// 4. 搜索结构性失败或备选链耗尽，从索引页抓取件的信息面板里直接取图下载
    #[instrument(skip_all, fields(title = %title))]
    pub async fn resolve(&self, title: &str, title_dir: &Path) -> Result<(), CrawlError> {
        match self.search_cover_site(title, title_dir).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                // 正常搜到了，只是没有这部漫画，没有封面也不算失败
                info!("封面站搜索 {} 无结果", title);
                Ok(())
            }
            Err(
                e @ CrawlError::Automation(
                    BrowserError::Launch(_) | BrowserError::Navigation { .. },
                ),
            ) => {
                warn!("封面站会话失败: {}", e);
                ledger::log_error(title_dir, &format!("封面站会话失败: {}", e)).await;

                let mut alternatives = self.saved_alternative_titles(title_dir).await;
                if alternatives.is_empty() {
                    alternatives = self.mirror_alternative_titles().await;
                }

                for alternative in &alternatives {
                    info!("尝试备选标题: {}", alternative);
                    if let Ok(true) = self.search_cover_site(alternative, title_dir).await {
                        info!("备选标题 {} 命中封面", alternative);
                        return Ok(());
                    }
                }

                // 备选链也落空，最后从索引页信息面板提取
                self.cover_from_saved_page(title_dir).await
            }
            Err(e) => {
                // 页面结构对不上属于结构性失败，直接走信息面板提取
                warn!("封面站搜索结构性失败: {}", e);
                ledger::log_error(title_dir, &format!("封面站搜索结构性失败: {}", e)).await;
                self.cover_from_saved_page(title_dir).await
            }
        }
    }

    /// 封面站搜索一次。Ok(false) 表示搜索正常但没有结果，
    /// Err 表示会话或页面本身出了问题。
    async fn search_cover_site(&self, title: &str, title_dir: &Path) -> Result<bool, CrawlError> {
        let query = utils::clean_title_for_search(title);
        let search_url = format!("{}{}", self.config.cover_search_url, query);
        info!("封面站搜索: {}", search_url);

        let session = BrowserSession::open(&self.config.browser, self.config.delay)?;
        session.navigate(&search_url)?;
        session.settle();

        let thumbnails = session.collect_attr(THUMBNAIL_SELECTOR, "src")?;
        let Some(cover_url) = thumbnails.into_iter().next() else {
            return Ok(false);
        };

        // 打开大图后对元素截图，拿到的字节交给规整器统一转成 JPEG
        session.navigate(&cover_url)?;
        session.settle();
        let screenshot = session.capture_element("img")?;

        match self
            .normalizer
            .normalize(&screenshot, None, &title_dir.join(COVER_FILE))
            .await
        {
            Ok(path) => {
                info!("封面已保存: {}", path.display());
                Ok(true)
            }
            Err(e) => {
                warn!("封面截图无效: {}", e);
                Ok(false)
            }
        }
    }

    /// 从已保存的索引页抓取件里提取备选标题
    async fn saved_alternative_titles(&self, title_dir: &Path) -> Vec<String> {
        let capture_path = title_dir.join(PAGE_CAPTURE_FILE);
        match fs::read_to_string(&capture_path).await {
            Ok(html) => {
                let titles = self.parser.alternative_titles(&html);
                info!("抓取件中找到 {} 个备选标题", titles.len());
                titles
            }
            Err(_) => {
                info!("{} 不存在，跳过本级回退", capture_path.display());
                Vec::new()
            }
        }
    }

    /// 从镜像站页面提取备选标题
    async fn mirror_alternative_titles(&self) -> Vec<String> {
        match self
            .fetcher
            .get_text(&self.config.alt_title_site, None)
            .await
        {
            Ok(html) => {
                let titles = self.parser.alternative_titles(&html);
                info!("镜像站找到 {} 个备选标题", titles.len());
                titles
            }
            Err(e) => {
                warn!("镜像站获取失败 {}: {}", self.config.alt_title_site, e);
                Vec::new()
            }
        }
    }

    /// 终极回退：不开浏览器，直接从抓取件的信息面板里取封面图地址下载
    async fn cover_from_saved_page(&self, title_dir: &Path) -> Result<(), CrawlError> {
        info!("回退到索引页信息面板提取封面");
        let html = fs::read_to_string(title_dir.join(PAGE_CAPTURE_FILE))
            .await
            .map_err(|e| CrawlError::Parse(format!("索引页抓取件读取失败: {}", e)))?;
        let base_url = fs::read_to_string(title_dir.join(URL_FILE))
            .await
            .map_err(|e| CrawlError::Parse(format!("地址文件读取失败: {}", e)))?;

        let cover_url = self
            .parser
            .cover_url(&html, base_url.trim())
            .ok_or_else(|| CrawlError::Parse("信息面板里没有封面图".to_owned()))?;

        let retry = self.config.retry;
        let (bytes, content_type) = with_retry(
            retry.max_attempts,
            Duration::from_secs(retry.delay_secs),
            |_| true,
            || self.fetcher.get_bytes(&cover_url, Some(base_url.trim())),
        )
        .await?;

        let path = self
            .normalizer
            .normalize(&bytes, content_type.as_deref(), &title_dir.join(COVER_FILE))
            .await
            .map_err(|e| CrawlError::Parse(format!("封面图无效 {}: {}", cover_url, e)))?;
        info!("封面已保存: {}", path.display());
        Ok(())
    }
}
