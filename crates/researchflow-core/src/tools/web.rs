use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use super::{Tool, required_arg, single_string_schema};
use crate::error::ToolError;
use crate::state::ToolArgs;

const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.duckduckgo.com/";
const MAX_SEARCH_RESULTS: usize = 8;

static SCRIPT_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
        .expect("invalid script regex")
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("invalid tag regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("invalid whitespace regex"));

/// Shared settings for the HTTP-backed tools.
#[derive(Debug, Clone)]
pub struct WebToolsConfig {
    pub search_endpoint: String,
    pub scrape_max_chars: usize,
    pub request_timeout: Duration,
}

impl Default for WebToolsConfig {
    fn default() -> Self {
        Self {
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            scrape_max_chars: 1000,
            request_timeout: Duration::from_secs(15),
        }
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("researchflow/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|err| {
            warn!(error = %err, "falling back to default HTTP client");
            reqwest::Client::new()
        })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    answer: serde_json::Value,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelatedTopic {
    #[serde(default)]
    text: String,
    #[serde(default, rename = "FirstURL")]
    first_url: String,
    #[serde(default)]
    topics: Vec<RelatedTopic>,
}

fn flatten_topics<'a>(topics: &'a [RelatedTopic], out: &mut Vec<&'a RelatedTopic>) {
    for topic in topics {
        if topic.topics.is_empty() {
            out.push(topic);
        } else {
            flatten_topics(&topic.topics, out);
        }
    }
}

fn render_answer(answer: &InstantAnswer) -> String {
    let mut sections = Vec::new();
    if let Some(text) = answer.answer.as_str().filter(|text| !text.is_empty()) {
        sections.push(format!("Answer: {text}"));
    }
    if !answer.abstract_text.is_empty() {
        let heading = if answer.heading.is_empty() {
            "Summary"
        } else {
            answer.heading.as_str()
        };
        sections.push(format!(
            "**{heading}**\n{}\nURL: {}",
            answer.abstract_text, answer.abstract_url
        ));
    }

    let mut topics = Vec::new();
    flatten_topics(&answer.related_topics, &mut topics);
    for topic in topics
        .into_iter()
        .filter(|topic| !topic.text.is_empty())
        .take(MAX_SEARCH_RESULTS)
    {
        sections.push(format!("{}\nURL: {}", topic.text, topic.first_url));
    }

    if sections.is_empty() {
        "No results found.".to_string()
    } else {
        sections.join("\n\n---\n\n")
    }
}

/// `web_search`: query the DuckDuckGo instant-answer API.
pub struct WebSearchTool {
    config: WebToolsConfig,
    http: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(config: WebToolsConfig) -> Self {
        let http = http_client(config.request_timeout);
        Self { config, http }
    }

    async fn search(&self, query: &str) -> Result<String, reqwest::Error> {
        let answer: InstantAnswer = self
            .http
            .get(&self.config.search_endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(render_answer(&answer))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information about a topic. Input: search query string."
    }

    fn input_schema(&self) -> serde_json::Value {
        single_string_schema("query", "The search query")
    }

    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let query = required_arg(self.name(), args, "query")?;
        info!(%query, "web search");
        Ok(match self.search(query).await {
            Ok(results) => format!("Search Results:\n{results}"),
            Err(err) => {
                warn!(error = %err, "search failed");
                format!("Search error: {err}")
            }
        })
    }
}

/// Reduce an HTML document to its visible text.
pub(crate) fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_BLOCKS.replace_all(html, " ");
    let without_tags = TAGS.replace_all(&without_scripts, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// `web_scrape`: fetch a page and return the start of its visible text.
pub struct WebScrapeTool {
    config: WebToolsConfig,
    http: reqwest::Client,
}

impl WebScrapeTool {
    pub fn new(config: WebToolsConfig) -> Self {
        let http = http_client(config.request_timeout);
        Self { config, http }
    }

    async fn fetch(&self, url: &str) -> Result<String, reqwest::Error> {
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl Tool for WebScrapeTool {
    fn name(&self) -> &str {
        "web_scrape"
    }

    fn description(&self) -> &str {
        "Extract the text content of a webpage. Input: a valid http(s) URL."
    }

    fn input_schema(&self) -> serde_json::Value {
        single_string_schema("url", "Webpage URL")
    }

    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let url = required_arg(self.name(), args, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Ok(format!("Scrape error: unsupported URL '{url}'"));
        }

        info!(%url, "web scrape");
        Ok(match self.fetch(url).await {
            Ok(body) => {
                let text: String = html_to_text(&body)
                    .chars()
                    .take(self.config.scrape_max_chars)
                    .collect();
                if text.is_empty() {
                    "No content found".to_string()
                } else {
                    format!("Webpage Content:\n{text}")
                }
            }
            Err(err) => {
                warn!(error = %err, %url, "scrape failed");
                format!("Scrape error: {err}")
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_reduced_to_visible_text() {
        let html = r#"<html><head><style>body { color: red; }</style>
            <script>alert("x")</script></head>
            <body><h1>Islamabad</h1><p>Capital&nbsp;of   Pakistan &amp; more</p></body></html>"#;
        assert_eq!(html_to_text(html), "Islamabad Capital of Pakistan & more");
    }

    #[test]
    fn instant_answer_renders_nested_topics() {
        let payload = r#"{
            "Heading": "Islamabad",
            "AbstractText": "Islamabad is the capital city of Pakistan.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Islamabad",
            "RelatedTopics": [
                {"Text": "Rawalpindi - twin city", "FirstURL": "https://duckduckgo.com/Rawalpindi"},
                {"Name": "Places", "Topics": [
                    {"Text": "Faisal Mosque", "FirstURL": "https://duckduckgo.com/Faisal_Mosque"}
                ]}
            ]
        }"#;
        let answer: InstantAnswer = serde_json::from_str(payload).unwrap();
        let rendered = render_answer(&answer);

        assert!(rendered.starts_with("**Islamabad**"));
        assert!(rendered.contains("Rawalpindi - twin city"));
        assert!(rendered.contains("Faisal Mosque"));
    }

    #[test]
    fn empty_answer_says_so() {
        assert_eq!(render_answer(&InstantAnswer::default()), "No results found.");
    }

    #[tokio::test]
    async fn scrape_rejects_non_http_urls_as_text() {
        let tool = WebScrapeTool::new(WebToolsConfig::default());
        let mut args = ToolArgs::new();
        args.insert("url".into(), "file:///etc/passwd".into());
        let text = tool.call(&args).await.unwrap();
        assert!(text.starts_with("Scrape error"), "unexpected: {text}");
    }
}
