use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;

static CONFIG_FILE: &str = "config";

/// 全局配置，由 config.toml 反序列化得到，缺失的字段使用默认值。
/// 配置在启动时构造一次，随后整体传入爬虫，不使用进程级全局状态。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 漫画存储根目录
    pub storage_dir: PathBuf,
    /// 封面站搜索地址，清理后的标题拼接在末尾
    pub cover_search_url: String,
    /// 备选标题所在的镜像站页面
    pub alt_title_site: String,
    /// 单次请求超时(秒)
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
    pub delay: DelayRange,
    pub browser: BrowserConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("manga"),
            cover_search_url: "https://mangadex.org/search?q=".to_owned(),
            alt_title_site: "https://manganelo.com/manga-hero-x-demon-queen".to_owned(),
            request_timeout_secs: 10,
            retry: RetryConfig::default(),
            delay: DelayRange::default(),
            browser: BrowserConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 2,
        }
    }
}

/// 交互步骤之间的随机停顿区间，用于降低目标站压力
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min_secs: 2.0,
            max_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// 浏览器空闲多久后自动回收(秒)
    pub idle_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 1080,
            idle_timeout_secs: 300,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        config::Config::builder()
            .add_source(
                config::File::with_name(CONFIG_FILE)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .build()?
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("配置文件反序列化失败: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.delay.min_secs <= config.delay.max_secs);
        assert!(config.cover_search_url.ends_with("q="));
    }
}
