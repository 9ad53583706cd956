use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

pub static LEDGER_FILE: &str = "download_log.txt";
pub static SUMMARY_FILE: &str = "combined_download_log.txt";
pub static ERROR_LOG_FILE: &str = "error_log.txt";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("下载记录第 {line} 行格式错误: {content}")]
    Malformed { line: usize, content: String },

    #[error("下载记录第 {line} 行重复出现章节 {url}")]
    Duplicate { line: usize, url: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub title: String,
    pub updated_at: String,
}

/// 单部漫画的下载台账。每行三个制表符分隔的字段：
/// 章节URL、章节名、ISO-8601 时间戳。URL 出现即视为已下载。
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: HashMap<String, LedgerEntry>,
    last_updated: Option<String>,
}

impl Ledger {
    /// 读入整个台账。任何一行格式不对都是致命错误，
    /// 静默丢行会导致章节被重复下载或漏记。
    pub async fn load(title_dir: &Path) -> Result<Self, LedgerError> {
        let path = title_dir.join(LEDGER_FILE);
        let mut entries = HashMap::new();
        let mut last_updated = None;

        if path.exists() {
            let content = fs::read_to_string(&path).await?;
            for (number, line) in content.lines().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let fields: Vec<&str> = line.split('\t').collect();
                let [url, title, updated_at] = fields[..] else {
                    return Err(LedgerError::Malformed {
                        line: number + 1,
                        content: line.to_owned(),
                    });
                };
                let previous = entries.insert(
                    url.to_owned(),
                    LedgerEntry {
                        title: title.to_owned(),
                        updated_at: updated_at.to_owned(),
                    },
                );
                if previous.is_some() {
                    return Err(LedgerError::Duplicate {
                        line: number + 1,
                        url: url.to_owned(),
                    });
                }
                last_updated = Some(updated_at.to_owned());
            }
        }

        Ok(Self {
            path,
            entries,
            last_updated,
        })
    }

    pub fn contains(&self, chapter_url: &str) -> bool {
        self.entries.contains_key(chapter_url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.last_updated.as_deref()
    }

    /// 追加一条记录并立即落盘。写入完成前不会返回，
    /// 这样中途崩溃时已完成的章节不丢，未完成的章节下次重来。
    pub async fn append(&mut self, chapter_url: &str, chapter_title: &str) -> Result<(), LedgerError> {
        let stamp = Local::now().to_rfc3339();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\t{}\t{}\n", chapter_url, chapter_title, stamp).as_bytes())
            .await?;
        file.flush().await?;
        file.sync_data().await?;

        self.entries.insert(
            chapter_url.to_owned(),
            LedgerEntry {
                title: chapter_title.to_owned(),
                updated_at: stamp.clone(),
            },
        );
        self.last_updated = Some(stamp);
        Ok(())
    }
}

/// 重建跨漫画汇总表。每次全量扫描所有台账重新生成，
/// 不做增量更新，汇总文件损坏也能自愈。
#[instrument(skip_all)]
pub async fn rebuild_summary(storage_root: &Path) -> Result<PathBuf, LedgerError> {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<30} {:<15} {:<25}\n",
        "Manga Title", "Total Chapters", "Last Updated"
    ));
    output.push_str(&"=".repeat(70));
    output.push('\n');

    let mut titles = Vec::new();
    let mut dir_entries = fs::read_dir(storage_root).await?;
    while let Some(entry) = dir_entries.next_entry().await? {
        if entry.path().is_dir() {
            titles.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    titles.sort();

    for title in titles {
        match Ledger::load(&storage_root.join(&title)).await {
            Ok(ledger) if !ledger.is_empty() => {
                output.push_str(&format!(
                    "{:<30} {:<15} {:<25}\n",
                    title,
                    ledger.len(),
                    ledger.last_updated().unwrap_or_default(),
                ));
            }
            // 没有台账的目录不进汇总
            Ok(_) => {}
            Err(e) => warn!("汇总时跳过 {}: {}", title, e),
        }
    }

    let summary_path = storage_root.join(SUMMARY_FILE);
    fs::write(&summary_path, output).await?;
    info!("汇总表已更新: {}", summary_path.display());
    Ok(summary_path)
}

/// 非致命错误统一追加到漫画目录下的错误日志，带时间戳。
/// 日志本身写不进去只告警，不影响主流程。
pub async fn log_error(title_dir: &Path, message: &str) {
    if let Err(e) = try_log_error(title_dir, message).await {
        warn!("错误日志写入失败 {}: {}", title_dir.display(), e);
    }
}

async fn try_log_error(title_dir: &Path, message: &str) -> std::io::Result<()> {
    let line = format!("{} - {}\n", Local::now().to_rfc3339(), message);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(title_dir.join(ERROR_LOG_FILE))
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
