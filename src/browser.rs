use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use rand::Rng;
use tracing::debug;

use crate::config::{BrowserConfig, DelayRange};

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("浏览器启动失败: {0}")]
    Launch(String),

    #[error("页面导航失败 {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("元素未找到: {0}")]
    ElementNotFound(String),

    #[error("脚本执行失败: {0}")]
    Script(String),

    #[error("元素截图失败 {selector}: {reason}")]
    Screenshot { selector: String, reason: String },
}

/// 一次浏览器会话。会话持有整个浏览器进程，值离开作用域(包括 ? 提前返回)
/// 时由 Drop 结束进程，调用方不需要手动释放。
pub struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
    delay: DelayRange,
}

impl BrowserSession {
    pub fn open(config: &BrowserConfig, delay: DelayRange) -> Result<Self, BrowserError> {
        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_width, config.window_height)))
            .idle_browser_timeout(Duration::from_secs(config.idle_timeout_secs))
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let browser = Browser::new(options).map_err(|e| BrowserError::Launch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // 伪装 UA，避免被识别为无头浏览器
        tab.set_user_agent(ua_generator::ua::spoof_ua(), None, None)
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok(Self {
            _browser: browser,
            tab,
            delay,
        })
    }

    pub fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.tab
            .navigate_to(url)
            .map_err(|e| BrowserError::Navigation {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| BrowserError::Navigation {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// 模拟人工浏览：随机停顿，滚到页面底部再滚回来。
    /// 只影响节奏，失败不影响结果，错误直接吞掉。
    pub fn settle(&self) {
        self.pause();
        let _ = self.tab.evaluate(
            "window.scrollTo(0, document.body.scrollHeight);",
            false,
        );
        self.pause();
        let _ = self.tab.evaluate("window.scrollTo(0, 0);", false);
        self.pause();
    }

    fn pause(&self) {
        let secs = rand::rng().random_range(self.delay.min_secs..=self.delay.max_secs);
        debug!("会话停顿 {:.1} 秒", secs);
        std::thread::sleep(Duration::from_secs_f64(secs));
    }

    /// 按文档顺序收集所有命中元素的指定属性，空值被丢弃
    pub fn collect_attr(&self, selector: &str, attr: &str) -> Result<Vec<String>, BrowserError> {
        let script = format!(
            r#"Array.from(document.querySelectorAll('{}')).map(e => e['{}'] || e.getAttribute('{}') || '').join('\n')"#,
            selector.replace('\'', "\\'"),
            attr,
            attr,
        );

        let joined = self
            .evaluate(&script)?
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();

        Ok(joined
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// 点击第 index 个命中元素，返回是否确实点到了
    pub fn click_nth(&self, selector: &str, index: usize) -> Result<bool, BrowserError> {
        let script = format!(
            r#"(function() {{
                var els = document.querySelectorAll('{}');
                if (els.length > {}) {{ els[{}].click(); return true; }}
                return false;
            }})()"#,
            selector.replace('\'', "\\'"),
            index,
            index,
        );

        let clicked = self
            .evaluate(&script)?
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(clicked)
    }

    /// 对第一个命中元素截图，返回 PNG 字节
    pub fn capture_element(&self, selector: &str) -> Result<Vec<u8>, BrowserError> {
        let element = self
            .tab
            .find_element(selector)
            .map_err(|e| BrowserError::ElementNotFound(format!("{}: {}", selector, e)))?;

        element
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png)
            .map_err(|e| BrowserError::Screenshot {
                selector: selector.to_owned(),
                reason: e.to_string(),
            })
    }

    fn evaluate(&self, script: &str) -> Result<Option<serde_json::Value>, BrowserError> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(result.value)
    }
}
