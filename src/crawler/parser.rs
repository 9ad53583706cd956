use scraper::{ElementRef, Html, Selector};
use tracing::{info, instrument};

use super::CrawlError;

/// 索引页上列出的一个章节
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRef {
    pub url: String,
    pub title: String,
}

/// 索引页解析器。选择器对应目标站的固定版式，
/// 版式对不上就是 Parse 错误，由调用方决定是否致命。
pub struct Parser {
    title_selector: Selector,
    chapter_list_selector: Selector,
    chapter_link_selector: Selector,
    alt_label_selector: Selector,
    alt_value_selector: Selector,
    cover_selector: Selector,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            title_selector: Selector::parse("div.story-info-right h1").expect("选择器解析失败"),
            chapter_list_selector: Selector::parse("ul.row-content-chapter")
                .expect("选择器解析失败"),
            chapter_link_selector: Selector::parse("li.a-h a.chapter-name")
                .expect("选择器解析失败"),
            alt_label_selector: Selector::parse("td.table-label").expect("选择器解析失败"),
            alt_value_selector: Selector::parse("h2").expect("选择器解析失败"),
            cover_selector: Selector::parse("div.panel-story-info div.story-info-left img.img-loading")
                .expect("选择器解析失败"),
        }
    }

    /// 从索引页提取漫画显示名
    pub fn title(&self, html: &str) -> Result<String, CrawlError> {
        let document = Html::parse_document(html);
        let heading = document
            .select(&self.title_selector)
            .next()
            .ok_or_else(|| CrawlError::Parse("索引页上找不到漫画标题".to_owned()))?;
        let title = heading.text().collect::<String>().trim().to_owned();
        if title.is_empty() {
            return Err(CrawlError::Parse("漫画标题为空".to_owned()));
        }
        Ok(title)
    }

    /// 按页面列出的顺序提取章节列表，相对链接基于索引页地址补全
    #[instrument(skip_all)]
    pub fn chapters(&self, html: &str, base_url: &str) -> Result<Vec<ChapterRef>, CrawlError> {
        let document = Html::parse_document(html);
        let list = document
            .select(&self.chapter_list_selector)
            .next()
            .ok_or_else(|| CrawlError::Parse("索引页上找不到章节列表".to_owned()))?;

        let base = url::Url::parse(base_url)
            .map_err(|e| CrawlError::Parse(format!("索引页地址无效 {}: {}", base_url, e)))?;

        let mut chapters = Vec::new();
        for link in list.select(&self.chapter_link_selector) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let url = base
                .join(href)
                .map_err(|e| CrawlError::Parse(format!("章节链接无效 {}: {}", href, e)))?;
            let title = link.text().collect::<String>().trim().to_owned();
            chapters.push(ChapterRef {
                url: url.to_string(),
                title,
            });
        }

        if chapters.is_empty() {
            return Err(CrawlError::Parse("章节列表为空".to_owned()));
        }
        info!("解析到 {} 个章节", chapters.len());
        Ok(chapters)
    }

    /// 从信息表里提取备选标题：找到文本含 Alternative 的标签格，
    /// 读它相邻值格里的标题文本，按分号拆开。提取不到就返回空，
    /// 单个标题拿不到不算错误。
    pub fn alternative_titles(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);

        for label in document.select(&self.alt_label_selector) {
            if !label.text().collect::<String>().contains("Alternative") {
                continue;
            }

            let Some(value_cell) = label
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|e| {
                    e.value()
                        .attr("class")
                        .is_some_and(|c| c.contains("table-value"))
                })
            else {
                continue;
            };

            let Some(heading) = value_cell.select(&self.alt_value_selector).next() else {
                continue;
            };

            let titles: Vec<String> = heading
                .text()
                .collect::<String>()
                .split(';')
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
                .collect();
            if !titles.is_empty() {
                return titles;
            }
        }

        Vec::new()
    }

    /// 信息面板里的封面图地址，补全为绝对地址
    pub fn cover_url(&self, html: &str, base_url: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let img = document.select(&self.cover_selector).next()?;
        let src = img.value().attr("src")?;
        if src.is_empty() {
            return None;
        }
        let base = url::Url::parse(base_url).ok()?;
        base.join(src).ok().map(|u| u.to_string())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static INDEX_PAGE: &str = r#"
<html><body>
  <div class="panel-story-info">
    <div class="story-info-left">
      <img class="img-loading" src="/covers/hero.jpg" alt=""/>
    </div>
    <div class="story-info-right">
      <h1> Hero X Demon Queen </h1>
      <table class="variations-tableInfo">
        <tr>
          <td class="table-label">Alternative :</td>
          <td class="table-value"><h2>勇者×魔王; Yuusha to Maou ; </h2></td>
        </tr>
        <tr>
          <td class="table-label">Status :</td>
          <td class="table-value">Ongoing</td>
        </tr>
      </table>
    </div>
  </div>
  <ul class="row-content-chapter">
    <li class="a-h"><a class="chapter-name text-nowrap" href="/chapter-3">Chapter 3</a></li>
    <li class="a-h"><a class="chapter-name text-nowrap" href="/chapter-2">Chapter 2</a></li>
    <li class="a-h"><a class="chapter-name text-nowrap" href="https://cdn.example.com/chapter-1">Chapter 1</a></li>
  </ul>
</body></html>
"#;

    #[test]
    fn title_is_trimmed() {
        let parser = Parser::new();
        assert_eq!(parser.title(INDEX_PAGE).unwrap(), "Hero X Demon Queen");
    }

    #[test]
    fn title_missing_is_parse_error() {
        let parser = Parser::new();
        let err = parser.title("<html><body></body></html>").unwrap_err();
        assert!(matches!(err, CrawlError::Parse(_)));
    }

    #[test]
    fn chapters_keep_listed_order_and_join_urls() {
        let parser = Parser::new();
        let chapters = parser
            .chapters(INDEX_PAGE, "https://example.com/manga-hero")
            .unwrap();

        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].title, "Chapter 3");
        assert_eq!(chapters[0].url, "https://example.com/chapter-3");
        assert_eq!(chapters[1].url, "https://example.com/chapter-2");
        // 已是绝对地址的链接保持原样
        assert_eq!(chapters[2].url, "https://cdn.example.com/chapter-1");
    }

    #[test]
    fn missing_chapter_list_is_parse_error() {
        let parser = Parser::new();
        let err = parser
            .chapters("<html><body></body></html>", "https://example.com/")
            .unwrap_err();
        assert!(matches!(err, CrawlError::Parse(_)));
    }

    #[test]
    fn alternative_titles_split_on_semicolon() {
        let parser = Parser::new();
        assert_eq!(
            parser.alternative_titles(INDEX_PAGE),
            vec!["勇者×魔王".to_owned(), "Yuusha to Maou".to_owned()]
        );
    }

    #[test]
    fn alternative_titles_absent_yields_empty() {
        let parser = Parser::new();
        assert!(parser
            .alternative_titles("<html><body><td class=\"table-label\">Status</td></body></html>")
            .is_empty());
    }

    #[test]
    fn cover_url_is_joined_to_base() {
        let parser = Parser::new();
        assert_eq!(
            parser.cover_url(INDEX_PAGE, "https://example.com/manga-hero"),
            Some("https://example.com/covers/hero.jpg".to_owned())
        );
        assert_eq!(parser.cover_url("<html></html>", "https://example.com/"), None);
    }
}
