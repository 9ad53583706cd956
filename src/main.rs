use std::io::{self, Write};
use std::time::Instant;

use anyhow::Result;

use manga_fetch::{get_user_input, logger, utils, Config, MangaCrawler};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logger::init();

    let config = Config::load()?;
    let crawler = MangaCrawler::new(config)?;

    loop {
        println!("\n=== manga-fetch ===");
        match get_user_input() {
            Ok(input) if input.is_empty() => {
                println!("输入不能为空。");
                continue;
            }
            Ok(input) if input.eq_ignore_ascii_case("update") => {
                if let Err(e) = crawler.update_titles().await {
                    println!("更新失败: {:#}", e);
                }
            }
            Ok(url) => {
                let start = Instant::now();
                match crawler.acquire_title(&url, None, true).await {
                    Ok(()) => utils::display_elapsed_time(start.elapsed()),
                    Err(e) => println!("下载失败: {:#}", e),
                }
            }
            Err(e) => {
                println!("输入错误: {}", e);
            }
        }

        print!("\n是否继续下载其他漫画? (y/n): ");
        io::stdout().flush()?;
        let mut continue_choice = String::new();
        io::stdin().read_line(&mut continue_choice)?;
        if continue_choice.trim().to_lowercase() != "y" {
            break;
        }
    }

    println!("程序结束。");
    Ok(())
}
