//! 浏览工具：browse_webpage / google_search
//!
//! 仅在 Capabilities 带有 BrowserSession 时登记。会话方法是阻塞的，放到 `spawn_blocking` 中执行。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::registry::{ToolDefinition, ToolExecutor, ToolSchema};
use super::schema::{input_schema, parse_input};
use crate::browser::{BrowserSession, PageContent, SearchHit};
use crate::capabilities::ToolContext;
use crate::core::ToolError;

const DEFAULT_MAX_RESULTS: usize = 5;

fn browser(ctx: &ToolContext) -> Result<Arc<BrowserSession>, ToolError> {
    ctx.capabilities
        .browser
        .clone()
        .ok_or(ToolError::Unavailable("browser"))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BrowseInput {
    /// The URL to visit
    pub url: String,
}

pub struct BrowseWebpageTool;

#[async_trait]
impl ToolExecutor for BrowseWebpageTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: BrowseInput = parse_input(input)?;
        let session = browser(ctx)?;
        let page = tokio::task::spawn_blocking(move || session.browse(&args.url))
            .await
            .map_err(|e| ToolError::failed("browse_webpage", format!("Task join: {e}")))?;
        Ok(render_page(&page))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchInput {
    /// The search query
    pub query: String,
    /// Maximum number of results (default: 5)
    #[serde(default)]
    pub max_results: Option<usize>,
}

pub struct GoogleSearchTool;

#[async_trait]
impl ToolExecutor for GoogleSearchTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: SearchInput = parse_input(input)?;
        let max = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1);
        let session = browser(ctx)?;
        let hits = tokio::task::spawn_blocking(move || session.search(&args.query, max))
            .await
            .map_err(|e| ToolError::failed("google_search", format!("Task join: {e}")))?;
        Ok(render_hits(&hits))
    }
}

fn render_page(page: &PageContent) -> String {
    format!("Title: {}\n\n{}", page.title, page.text)
}

fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found".to_string();
    }
    hits.iter()
        .map(|h| format!("- {}\n  {}\n  {}", h.title, h.url, h.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            ToolSchema::new(
                "browse_webpage",
                "Visit a webpage with a headless browser and return its title and readable text.",
                input_schema::<BrowseInput>(),
            ),
            BrowseWebpageTool,
        ),
        ToolDefinition::new(
            ToolSchema::new(
                "google_search",
                "Search the web and return result titles, URLs and snippets.",
                input_schema::<SearchInput>(),
            ),
            GoogleSearchTool,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::tests::fake_session;
    use crate::capabilities::Capabilities;
    use crate::tools::ToolRegistry;
    use serde_json::json;
    use std::sync::Mutex;

    fn ctx() -> ToolContext {
        let session = fake_session(Arc::new(Mutex::new(Vec::new())));
        ToolContext::new(None, Capabilities::new().with_browser(Arc::new(session)))
    }

    #[tokio::test]
    async fn test_browse_renders_title_and_text() {
        let mut reg = ToolRegistry::new();
        reg.register_many(definitions());
        let out = reg
            .execute("browse_webpage", json!({"url": "https://example.com"}), &ctx())
            .await;
        assert!(out.starts_with("Title: Example\n\n"), "{out}");
        assert!(out.contains("world of text"));
    }

    #[tokio::test]
    async fn test_search_renders_hits() {
        let mut reg = ToolRegistry::new();
        reg.register_many(definitions());
        let out = reg
            .execute("google_search", json!({"query": "momentum factor"}), &ctx())
            .await;
        assert!(out.starts_with("- A\n  https://a.example\n  first"), "{out}");
        assert_eq!(out.matches("\n\n- ").count(), 1);
    }

    #[test]
    fn test_render_empty_hits() {
        assert_eq!(render_hits(&[]), "No results found");
    }
}
