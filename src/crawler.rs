pub mod chapter;
pub mod cover;
pub mod fetcher;
pub mod parser;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, instrument, warn};

pub use chapter::ChapterPipeline;
pub use cover::CoverResolver;
pub use fetcher::Fetcher;
pub use parser::Parser;

use crate::browser::BrowserError;
use crate::cbz::{ArchiveError, CbzBuilder};
use crate::config::Config;
use crate::ledger::{self, Ledger};
use crate::normalizer::Normalizer;
use crate::utils;

/// 单章/单图级别的失败。是否致命由调用的层级决定：
/// 索引页的解析失败终止整部漫画，章节内的失败只丢那一章。
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] fetcher::FetchError),

    #[error("页面结构解析失败: {0}")]
    Parse(String),

    #[error(transparent)]
    Automation(#[from] BrowserError),

    #[error("章节 {0} 在两个图源上都没有可用图片")]
    NoImages(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// 漫画级编排器：解析索引页、对账台账、逐章驱动获取管线。
pub struct MangaCrawler {
    config: Config,
    fetcher: Fetcher,
    parser: Parser,
    normalizer: Normalizer,
    builder: CbzBuilder,
}

impl MangaCrawler {
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = Fetcher::new(&config)?;
        Ok(Self {
            config,
            fetcher,
            parser: Parser::new(),
            normalizer: Normalizer::new(),
            builder: CbzBuilder::new(),
        })
    }

    /// 获取一部漫画。known_title 在更新已有目录时传入，
    /// 免去重新解析显示名；resolve_cover 只在首次获取时为 true。
    #[instrument(skip_all, fields(url = %url))]
    pub async fn acquire_title(
        &self,
        url: &str,
        known_title: Option<&str>,
        resolve_cover: bool,
    ) -> Result<()> {
        let html = self
            .fetcher
            .get_text(url, Some(url))
            .await
            .with_context(|| format!("索引页获取失败: {}", url))?;

        let display_name = match known_title {
            Some(name) => name.to_owned(),
            None => self.parser.title(&html)?,
        };
        let safe_name = utils::sanitize_filename(&display_name);
        info!("开始处理漫画: {}", safe_name);

        let title_dir = self.config.storage_dir.join(&safe_name);
        fs::create_dir_all(&title_dir).await?;
        fs::write(title_dir.join(cover::URL_FILE), url).await?;
        // 原始页面留档，供封面回退链离线提取
        fs::write(title_dir.join(cover::PAGE_CAPTURE_FILE), &html).await?;

        if resolve_cover {
            let resolver =
                CoverResolver::new(&self.config, &self.fetcher, &self.parser, &self.normalizer);
            if let Err(e) = resolver.resolve(&safe_name, &title_dir).await {
                // 封面拿不到不影响章节获取
                warn!("封面解析失败: {}", e);
                ledger::log_error(&title_dir, &format!("封面解析失败: {}", e)).await;
            }
        }

        let chapters = self
            .parser
            .chapters(&html, url)
            .with_context(|| format!("章节列表解析失败: {}", url))?;

        let mut ledger = Ledger::load(&title_dir)
            .await
            .with_context(|| format!("下载台账读取失败: {}", safe_name))?;

        for chapter in &chapters {
            if ledger.contains(&chapter.url) {
                info!("章节 {} 已下载，跳过", chapter.title);
                continue;
            }

            info!("开始获取章节: {} | {}", chapter.title, chapter.url);
            utils::polite_pause(&self.config.delay).await;

            let pipeline =
                ChapterPipeline::new(&self.config, &self.fetcher, &self.normalizer, &self.builder);
            match pipeline
                .acquire(&chapter.url, &safe_name, &chapter.title, &title_dir)
                .await
            {
                Ok(archive) => {
                    // 先落台账再进入下一章，中断后重跑不会重复下载
                    ledger.append(&chapter.url, &chapter.title).await?;
                    info!("章节已归档: {}", archive.display());
                }
                Err(e) => {
                    warn!("章节 {} 获取失败: {}", chapter.title, e);
                    ledger::log_error(
                        &title_dir,
                        &format!("章节 {} ({}) 获取失败: {}", chapter.title, chapter.url, e),
                    )
                    .await;
                }
            }
        }

        ledger::rebuild_summary(&self.config.storage_dir).await?;
        Ok(())
    }

    /// 交互式更新流程：列出已有漫画目录，按编号或 all 选择，
    /// 逐个按保存的地址重新获取(跳过封面)。
    pub async fn update_titles(&self) -> Result<()> {
        let titles = self.list_title_dirs().await?;
        if titles.is_empty() {
            println!("还没有已下载的漫画。");
            return Ok(());
        }

        println!("已下载的漫画:");
        for (index, name) in titles.iter().enumerate() {
            println!("{}. {}", index + 1, name);
        }

        let input = utils::read_line("输入 all 更新全部，或输入逗号分隔的编号: ")?;
        let selected = parse_selection(&input, titles.len());
        if selected.is_empty() {
            println!("没有选中任何漫画。");
            return Ok(());
        }

        for index in selected {
            let name = &titles[index - 1];
            let title_dir = self.config.storage_dir.join(name);
            let url_path = title_dir.join(cover::URL_FILE);

            let url = match fs::read_to_string(&url_path).await {
                Ok(saved) => saved.trim().to_owned(),
                Err(_) => {
                    // 地址文件缺失，现场补录一个
                    let entered =
                        utils::read_line(&format!("{} 缺少地址文件，请输入其URL: ", name))?;
                    fs::create_dir_all(&title_dir).await?;
                    fs::write(&url_path, &entered).await?;
                    entered
                }
            };

            info!("更新漫画: {}", name);
            if let Err(e) = self.acquire_title(&url, Some(name), false).await {
                warn!("更新 {} 失败: {:#}", name, e);
            }
        }
        Ok(())
    }

    async fn list_title_dirs(&self) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        if !self.config.storage_dir.exists() {
            return Ok(titles);
        }

        let mut entries = fs::read_dir(&self.config.storage_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().is_dir() {
                titles.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        titles.sort();
        Ok(titles)
    }
}

/// 解析更新选择：all 表示全部，否则是逗号分隔的编号，
/// 越界和非数字的输入丢弃并提示。
fn parse_selection(input: &str, total: usize) -> Vec<usize> {
    if input.eq_ignore_ascii_case("all") {
        return (1..=total).collect();
    }

    let mut selected = Vec::new();
    for piece in input.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match piece.parse::<usize>() {
            Ok(number) if (1..=total).contains(&number) => {
                if !selected.contains(&number) {
                    selected.push(number);
                }
            }
            _ => println!("无效的选择: {}，已跳过", piece),
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_accepts_all_keyword() {
        assert_eq!(parse_selection("all", 3), vec![1, 2, 3]);
        assert_eq!(parse_selection("ALL", 2), vec![1, 2]);
    }

    #[test]
    fn selection_parses_comma_separated_numbers() {
        assert_eq!(parse_selection("1, 3", 3), vec![1, 3]);
        assert_eq!(parse_selection("2,2,1", 3), vec![2, 1]);
    }

    #[test]
    fn selection_drops_invalid_pieces() {
        assert_eq!(parse_selection("0, 4, x, 2", 3), vec![2]);
        assert!(parse_selection("", 3).is_empty());
    }
}
