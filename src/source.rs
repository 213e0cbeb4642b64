//! Remote newsletter source: archive index pagination and article content.
//!
//! The source exposes two endpoints:
//!
//! 1. **Archive index** — `GET {base}{api_path}?sort=new&limit=N&offset=M`
//!    returning a JSON array of [`ArticleSummary`]; an empty (or short) page
//!    ends pagination.
//! 2. **Post content** — `GET {base}/api/v1/posts/{slug}` returning a
//!    [`PostPayload`] whose `body_html` carries the article body.
//!
//! The body HTML is rendered to markdown locally; inline image URLs are
//! collected in document order during rendering so the asset fetcher can
//! localize them.

use crate::config::CrawlerConfig;
use crate::errors::{PipelineError, Result};
use crate::fetch::get_json;
use crate::models::{ArticleSummary, PostPayload};
use reqwest::Client;
use scraper::{ElementRef, Html, Node};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

/// Client for one newsletter's remote endpoints.
#[derive(Debug, Clone)]
pub struct NewsletterSource {
    client: Client,
    config: Arc<CrawlerConfig>,
}

impl NewsletterSource {
    pub fn new(client: Client, config: Arc<CrawlerConfig>) -> Self {
        Self { client, config }
    }

    /// Discover the full ordered set of article references by paginating the
    /// archive index until exhaustion.
    #[instrument(level = "info", skip_all)]
    pub async fn discover_all(&self) -> Result<Vec<ArticleSummary>> {
        let mut summaries: Vec<ArticleSummary> = Vec::new();
        let mut offset = 0usize;
        let limit = self.config.page_size;

        loop {
            let url = format!(
                "{}?sort=new&limit={}&offset={}",
                self.config.archive_url(),
                limit,
                offset
            );
            debug!(%url, "Fetching archive page");
            let page: Vec<ArticleSummary> = get_json(
                &self.client,
                &url,
                self.config.max_retries,
                self.config.api_delay,
            )
            .await?;

            let count = page.len();
            summaries.extend(page);
            offset += count;

            if count < limit {
                break;
            }
            sleep(self.config.api_delay).await;
        }

        info!(count = summaries.len(), "Discovered archive entries");
        Ok(summaries)
    }

    /// Fetch one article's full content payload.
    ///
    /// A politeness delay is applied before the request to bound the request
    /// rate against the source.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_post(&self, slug: &str) -> Result<PostPayload> {
        sleep(self.config.api_delay).await;
        let url = self.config.post_url(slug);
        get_json(
            &self.client,
            &url,
            self.config.max_retries,
            self.config.api_delay,
        )
        .await
    }

    /// The content reference for a summary: slug preferred, id-as-string as
    /// the fallback some sources accept.
    pub fn content_ref(summary: &ArticleSummary) -> Result<String> {
        summary
            .slug
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| summary.id.map(|id| id.to_string()))
            .ok_or_else(|| PipelineError::MalformedData {
                url: "archive entry".to_string(),
                reason: "entry has neither slug nor id".to_string(),
            })
    }
}

/// Render an HTML body to markdown, collecting inline image URLs in
/// document order.
///
/// This is intentionally a small renderer: headings, paragraphs, emphasis,
/// links, images, lists, blockquotes and code cover the shapes newsletter
/// bodies actually use. Unknown elements contribute their children.
pub fn html_to_markdown(body_html: &str) -> (String, Vec<String>) {
    let fragment = Html::parse_fragment(body_html);
    let mut out = String::new();
    let mut images = Vec::new();
    render_children(fragment.root_element(), &mut out, &mut images);

    // Collapse runs of 3+ newlines left behind by nested block elements.
    let mut markdown = String::with_capacity(out.len());
    let mut newlines = 0usize;
    for ch in out.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                markdown.push(ch);
            }
        } else {
            newlines = 0;
            markdown.push(ch);
        }
    }
    (markdown.trim().to_string(), images)
}

fn render_children(el: ElementRef<'_>, out: &mut String, images: &mut Vec<String>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    render_element(child_el, out, images);
                }
            }
            _ => {}
        }
    }
}

fn render_element(el: ElementRef<'_>, out: &mut String, images: &mut Vec<String>) {
    let tag = el.value().name();
    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag[1..].parse::<usize>().unwrap_or(1);
            out.push_str(&"#".repeat(level));
            out.push(' ');
            render_children(el, out, images);
            out.push_str("\n\n");
        }
        "p" | "div" | "section" | "figure" => {
            render_children(el, out, images);
            out.push_str("\n\n");
        }
        "img" => {
            if let Some(src) = el.value().attr("src").filter(|s| !s.is_empty()) {
                let alt = el.value().attr("alt").unwrap_or("");
                images.push(src.to_string());
                out.push_str(&format!("![{alt}]({src})"));
                out.push_str("\n\n");
            }
        }
        "a" => {
            let href = el.value().attr("href").unwrap_or("");
            out.push('[');
            render_children(el, out, images);
            out.push_str(&format!("]({href})"));
        }
        "strong" | "b" => {
            out.push_str("**");
            render_children(el, out, images);
            out.push_str("**");
        }
        "em" | "i" => {
            out.push('*');
            render_children(el, out, images);
            out.push('*');
        }
        "li" => {
            out.push_str("- ");
            render_children(el, out, images);
            out.push('\n');
        }
        "ul" | "ol" => {
            render_children(el, out, images);
            out.push('\n');
        }
        "blockquote" => {
            let mut inner = String::new();
            render_children(el, &mut inner, images);
            for line in inner.trim().lines() {
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        "pre" => {
            let text = el.text().collect::<Vec<_>>().join("");
            out.push_str("```\n");
            out.push_str(text.trim_end());
            out.push_str("\n```\n\n");
        }
        "code" => {
            out.push('`');
            render_children(el, out, images);
            out.push('`');
        }
        "br" => out.push('\n'),
        "script" | "style" => {}
        _ => render_children(el, out, images),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> Arc<CrawlerConfig> {
        Arc::new(CrawlerConfig {
            base_url,
            output_dir: PathBuf::from("unused"),
            page_size: 2,
            api_delay: std::time::Duration::from_millis(1),
            ..CrawlerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_discover_all_paginates_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "slug": "one", "title": "One"},
                {"id": 2, "slug": "two", "title": "Two"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 3, "slug": "three", "title": "Three"}
            ])))
            .mount(&server)
            .await;

        let source = NewsletterSource::new(Client::new(), test_config(server.uri()));
        let summaries = source.discover_all().await.unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[2].article_id(), Some("3".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_post_decodes_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/one"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "One",
                "body_html": "<p>Hello</p>",
                "likes": 12
            })))
            .mount(&server)
            .await;

        let source = NewsletterSource::new(Client::new(), test_config(server.uri()));
        let post = source.fetch_post("one").await.unwrap();
        assert_eq!(post.title.as_deref(), Some("One"));
        assert_eq!(post.body_html.as_deref(), Some("<p>Hello</p>"));
        assert_eq!(post.extra.get("likes").unwrap(), 12);
    }

    #[test]
    fn test_content_ref_prefers_slug() {
        let summary = ArticleSummary {
            id: Some(9),
            slug: Some("nine".to_string()),
            ..ArticleSummary::default()
        };
        assert_eq!(NewsletterSource::content_ref(&summary).unwrap(), "nine");
    }

    #[test]
    fn test_html_to_markdown_basics() {
        let html = r#"
            <h2>Heading</h2>
            <p>Some <strong>bold</strong> and <em>italic</em> text with a
            <a href="https://example.com">link</a>.</p>
            <ul><li>first</li><li>second</li></ul>
        "#;
        let (md, images) = html_to_markdown(html);
        assert!(md.contains("## Heading"));
        assert!(md.contains("**bold**"));
        assert!(md.contains("*italic*"));
        assert!(md.contains("[link](https://example.com)"));
        assert!(md.contains("- first\n- second"));
        assert!(images.is_empty());
    }

    #[test]
    fn test_html_to_markdown_collects_images_in_order() {
        let html = r#"
            <p><img src="https://cdn.example/a.png" alt="first"></p>
            <figure><img src="https://cdn.example/b.jpg"></figure>
        "#;
        let (md, images) = html_to_markdown(html);
        assert_eq!(
            images,
            vec!["https://cdn.example/a.png", "https://cdn.example/b.jpg"]
        );
        assert!(md.contains("![first](https://cdn.example/a.png)"));
        assert!(md.contains("![](https://cdn.example/b.jpg)"));
    }

    #[test]
    fn test_html_to_markdown_blockquote_and_code() {
        let html = "<blockquote><p>wise words</p></blockquote><pre>let x = 1;</pre>";
        let (md, _) = html_to_markdown(html);
        assert!(md.contains("> wise words"));
        assert!(md.contains("```\nlet x = 1;\n```"));
    }

    #[test]
    fn test_html_to_markdown_skips_scripts() {
        let html = "<p>keep</p><script>alert(1)</script>";
        let (md, _) = html_to_markdown(html);
        assert!(md.contains("keep"));
        assert!(!md.contains("alert"));
    }
}
