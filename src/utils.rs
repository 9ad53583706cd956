use std::io::{self, Write};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use regex::Regex;
use tracing::{debug, info, instrument};

use crate::config::DelayRange;

// Windows 文件名中不允许的字符
static FORBIDDEN_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("正则表达式编译失败"));

// 搜索串中除字母数字和空白外的所有符号
static NON_WORD_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("正则表达式编译失败"));

#[instrument]
pub fn get_user_input() -> Result<String> {
    println!("请输入漫画页面URL，或输入 update 进入更新模式: ");
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    debug!("用户输入: {}", input);
    Ok(input.trim().to_owned())
}

pub fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_owned())
}

/// 去掉标题中无法出现在文件名里的字符
pub fn sanitize_filename(name: &str) -> String {
    FORBIDDEN_CHARS.replace_all(name, "").trim().to_owned()
}

/// 清理标题用于站内搜索：去符号，空白折叠为 +
pub fn clean_title_for_search(title: &str) -> String {
    NON_WORD_CHARS
        .replace_all(title, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("+")
}

/// 请求之间的随机停顿
pub async fn polite_pause(range: &DelayRange) {
    let secs = rand::rng().random_range(range.min_secs..=range.max_secs);
    debug!("停顿 {:.1} 秒", secs);
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

#[instrument]
pub fn display_elapsed_time(duration: std::time::Duration) {
    let total_ms = duration.as_millis();

    if total_ms >= 60000 {
        // 超过1分钟：显示分秒
        let mins = total_ms / 60000;
        let secs = (total_ms % 60000) / 1000;
        info!("✅ 下载完成！耗时: {}分{}秒", mins, secs);
    } else if total_ms >= 1000 {
        // 1秒到1分钟：显示秒和毫秒
        let secs = total_ms / 1000;
        let ms_remaining = total_ms % 1000;
        info!("✅ 下载完成！耗时: {}秒{}毫秒", secs, ms_remaining);
    } else {
        // 少于1秒：只显示毫秒
        info!("✅ 下载完成！耗时: {}毫秒", total_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_forbidden_chars() {
        assert_eq!(
            sanitize_filename(r#"Hero? X: "Demon/Queen*""#),
            "Hero X DemonQueen"
        );
        assert_eq!(sanitize_filename("  plain title  "), "plain title");
    }

    #[test]
    fn clean_title_builds_query_string() {
        assert_eq!(clean_title_for_search("Hero X: Demon-Queen!"), "Hero+X+DemonQueen");
        assert_eq!(clean_title_for_search("one"), "one");
        assert_eq!(clean_title_for_search("  spaced   out  "), "spaced+out");
    }
}
