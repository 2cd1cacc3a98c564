//! 可选能力与工具运行上下文
//!
//! 每个 Agent 可选的协作方（数据获取、论文检索、浏览器）显式放在 Capabilities 中，
//! 由构造方传入；能力存在与否决定哪些工具会被登记。ToolContext 是执行器唯一可见的运行时环境。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::BrowserSession;
use crate::sandbox::{Dataset, Sandbox};

/// 论文检索结果摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
}

/// 行情/表格数据获取方（实现位于本核心之外）
#[async_trait]
pub trait DataFetcher: Send + Sync {
    /// 按请求描述（品种、时间范围等，由实现自行解释）返回具名数据集
    async fn fetch(&self, request: &Value) -> Result<BTreeMap<String, Dataset>, String>;
}

/// 论文检索方（实现位于本核心之外）
#[async_trait]
pub trait PaperFetcher: Send + Sync {
    async fn search(&self, keywords: &[String], max_results: usize) -> Result<Vec<PaperSummary>, String>;
}

/// 可选能力集合 `{DataFetcher?, PaperFetcher?, Browser?}`
#[derive(Clone, Default)]
pub struct Capabilities {
    pub data_fetcher: Option<Arc<dyn DataFetcher>>,
    pub paper_fetcher: Option<Arc<dyn PaperFetcher>>,
    pub browser: Option<Arc<BrowserSession>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_fetcher(mut self, fetcher: Arc<dyn DataFetcher>) -> Self {
        self.data_fetcher = Some(fetcher);
        self
    }

    pub fn with_paper_fetcher(mut self, fetcher: Arc<dyn PaperFetcher>) -> Self {
        self.paper_fetcher = Some(fetcher);
        self
    }

    pub fn with_browser(mut self, browser: Arc<BrowserSession>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// 日志用：列出已提供的能力名
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.data_fetcher.is_some() {
            names.push("data_fetcher");
        }
        if self.paper_fetcher.is_some() {
            names.push("paper_fetcher");
        }
        if self.browser.is_some() {
            names.push("browser");
        }
        names
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// 工具执行上下文：本次运行的沙箱 + 可选能力
#[derive(Clone, Default, Debug)]
pub struct ToolContext {
    pub sandbox: Option<Arc<Sandbox>>,
    pub capabilities: Capabilities,
}

impl ToolContext {
    pub fn new(sandbox: Option<Arc<Sandbox>>, capabilities: Capabilities) -> Self {
        Self {
            sandbox,
            capabilities,
        }
    }
}
