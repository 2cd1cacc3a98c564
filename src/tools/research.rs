//! 研究类工具：search_papers（需要 PaperFetcher）/ fetch_market_data（需要 DataFetcher + 沙箱）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::registry::{ToolDefinition, ToolExecutor, ToolSchema};
use super::schema::{input_schema, parse_input};
use crate::capabilities::{PaperSummary, ToolContext};
use crate::core::ToolError;

const ABSTRACT_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchPapersInput {
    /// List of search keywords
    pub keywords: Vec<String>,
    /// Maximum number of results to return (default: 20)
    #[serde(default)]
    pub max_results: Option<usize>,
}

pub struct SearchPapersTool;

#[async_trait]
impl ToolExecutor for SearchPapersTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: SearchPapersInput = parse_input(input)?;
        if args.keywords.is_empty() {
            return Err(ToolError::InvalidInput("keywords must not be empty".into()));
        }
        let fetcher = ctx
            .capabilities
            .paper_fetcher
            .as_ref()
            .ok_or(ToolError::Unavailable("paper_fetcher"))?;
        let papers = fetcher
            .search(&args.keywords, args.max_results.unwrap_or(20))
            .await
            .map_err(|e| ToolError::failed("search_papers", e))?;
        Ok(render_papers(&papers))
    }
}

fn render_papers(papers: &[PaperSummary]) -> String {
    if papers.is_empty() {
        return "No papers found for the given keywords.".to_string();
    }
    let entries: Vec<String> = papers
        .iter()
        .map(|p| {
            let authors: Vec<&str> = p.authors.iter().take(3).map(String::as_str).collect();
            let abstract_preview: String = p.abstract_text.chars().take(ABSTRACT_PREVIEW_CHARS).collect();
            format!(
                "- [{}] {}\n  Authors: {}\n  Categories: {}\n  Abstract: {}...",
                p.id,
                p.title,
                authors.join(", "),
                p.categories.join(", "),
                abstract_preview
            )
        })
        .collect();
    format!("Found {} papers:\n\n{}", papers.len(), entries.join("\n\n"))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchMarketDataInput {
    /// Ticker symbols to fetch (each becomes a dataset named after the symbol)
    pub symbols: Vec<String>,
    /// Start date, YYYY-MM-DD
    #[serde(default)]
    pub start_date: Option<String>,
    /// End date, YYYY-MM-DD
    #[serde(default)]
    pub end_date: Option<String>,
    /// Bar interval, e.g. '1d'
    #[serde(default)]
    pub interval: Option<String>,
}

/// fetch_market_data：取数后注入沙箱 data/，返回新的 manifest
pub struct FetchMarketDataTool;

#[async_trait]
impl ToolExecutor for FetchMarketDataTool {
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: FetchMarketDataInput = parse_input(input.clone())?;
        if args.symbols.is_empty() {
            return Err(ToolError::InvalidInput("symbols must not be empty".into()));
        }
        let fetcher = ctx
            .capabilities
            .data_fetcher
            .as_ref()
            .ok_or(ToolError::Unavailable("data_fetcher"))?;
        let sandbox = ctx.sandbox.as_ref().ok_or(ToolError::Unavailable("sandbox"))?;

        let datasets = fetcher
            .fetch(&input)
            .await
            .map_err(|e| ToolError::failed("fetch_market_data", e))?;
        if datasets.is_empty() {
            return Ok("No data returned for the requested symbols.".to_string());
        }
        let rows: usize = datasets.values().map(|d| d.len()).sum();
        let manifest = sandbox.inject_data(&datasets)?;
        let manifest_json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| ToolError::failed("fetch_market_data", e))?;
        Ok(format!(
            "Injected {} datasets ({} rows) into data/. Manifest:\n{}",
            datasets.len(),
            rows,
            manifest_json
        ))
    }
}

pub fn paper_definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition::new(
        ToolSchema::new(
            "search_papers",
            "Search papers by keywords. Returns id, title, authors, categories and an abstract preview.",
            input_schema::<SearchPapersInput>(),
        ),
        SearchPapersTool,
    )]
}

pub fn market_data_definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition::new(
        ToolSchema::new(
            "fetch_market_data",
            "Fetch market data for the given symbols and save it as CSV files under data/ in the sandbox. \
             Returns the updated data manifest (dataset name -> relative path).",
            input_schema::<FetchMarketDataInput>(),
        ),
        FetchMarketDataTool,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::capabilities::{Capabilities, DataFetcher, PaperFetcher};
    use crate::sandbox::{Dataset, SandboxConfig, SandboxManager};
    use crate::tools::ToolRegistry;
    use serde_json::json;

    struct StubPapers;

    #[async_trait]
    impl PaperFetcher for StubPapers {
        async fn search(&self, keywords: &[String], max_results: usize) -> Result<Vec<PaperSummary>, String> {
            Ok((0..max_results.min(2))
                .map(|i| PaperSummary {
                    id: format!("2401.0000{i}"),
                    title: format!("{} study {i}", keywords[0]),
                    authors: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                    categories: vec!["q-fin.PM".into()],
                    abstract_text: "x".repeat(400),
                })
                .collect())
        }
    }

    struct StubBars;

    #[async_trait]
    impl DataFetcher for StubBars {
        async fn fetch(&self, request: &Value) -> Result<BTreeMap<String, Dataset>, String> {
            let mut out = BTreeMap::new();
            for symbol in request["symbols"].as_array().into_iter().flatten() {
                let name = symbol.as_str().ok_or("symbol must be a string")?;
                out.insert(
                    name.to_string(),
                    Dataset::new(["date", "close"]).with_row(["2024-01-02", "10"]),
                );
            }
            Ok(out)
        }
    }

    #[tokio::test]
    async fn test_search_papers_formats_summary() {
        let mut reg = ToolRegistry::new();
        reg.register_many(paper_definitions());
        let ctx = ToolContext::new(None, Capabilities::new().with_paper_fetcher(Arc::new(StubPapers)));
        let out = reg
            .execute("search_papers", json!({"keywords": ["momentum"], "max_results": 5}), &ctx)
            .await;
        assert!(out.starts_with("Found 2 papers:"), "{out}");
        assert!(out.contains("Authors: A, B, C\n"));
        assert!(out.contains(&format!("Abstract: {}...", "x".repeat(300))));
    }

    #[tokio::test]
    async fn test_missing_capability_is_reported() {
        let mut reg = ToolRegistry::new();
        reg.register_many(paper_definitions());
        let out = reg
            .execute("search_papers", json!({"keywords": ["x"]}), &ToolContext::default())
            .await;
        assert_eq!(out, "[ERROR] tool 'search_papers' failed: paper_fetcher not available");
    }

    #[tokio::test]
    async fn test_fetch_market_data_injects_into_sandbox() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = SandboxManager::new(SandboxConfig {
            base_dir: tmp.path().to_path_buf(),
            ..SandboxConfig::default()
        })
        .create("md")
        .unwrap();
        let sb = Arc::new(sb);
        let ctx = ToolContext::new(
            Some(Arc::clone(&sb)),
            Capabilities::new().with_data_fetcher(Arc::new(StubBars)),
        );
        let mut reg = ToolRegistry::new();
        reg.register_many(market_data_definitions());

        let out = reg
            .execute("fetch_market_data", json!({"symbols": ["AAA", "BBB"]}), &ctx)
            .await;
        assert!(out.starts_with("Injected 2 datasets (2 rows)"), "{out}");
        assert!(sb.root().join("data/AAA.csv").is_file());
        let manifest = std::fs::read_to_string(sb.manifest_path()).unwrap();
        assert!(manifest.contains("\"BBB\": \"data/BBB.csv\""));
    }
}
