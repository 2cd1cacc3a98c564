//! 浏览能力：惰性初始化的无头浏览器会话
//!
//! BrowserSession 由调用方显式创建并通过 `Arc` 放入 Capabilities，没有进程级单例。
//! 真正的浏览器（BrowserEngine）在首次 browse / search 时才启动，cleanup 后下次调用重新启动。
//! 所有方法都是阻塞的，工具层通过 `spawn_blocking` 调用；失败转为结构化的错误载荷，不向上抛出。
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium 才能使用 Headless Chrome 引擎。

#[cfg(feature = "browser")]
pub mod chrome;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 浏览参数
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// 页面文本最大字符数
    pub max_text_chars: usize,
    pub navigation_timeout: Duration,
    /// 搜索页基础 URL，`q` / `num` 作为查询参数附加
    pub search_url: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_text_chars: 10_000,
            navigation_timeout: Duration::from_secs(30),
            search_url: "https://www.google.com/search".to_string(),
        }
    }
}

/// 引擎返回的原始页面
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub title: String,
    pub html: String,
}

/// browse 的结果；失败时 text 为错误描述且 error 有值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// 浏览器引擎：导航取页面、搜索结果页解析
pub trait BrowserEngine: Send {
    fn fetch_page(&mut self, url: &str) -> Result<RawPage, String>;

    /// `search_url` 已包含查询参数
    fn search(&mut self, search_url: &str, max_results: usize) -> Result<Vec<SearchHit>, String>;
}

/// 引擎工厂：每次（重新）初始化时调用
pub type EngineFactory =
    Box<dyn Fn(&BrowserConfig) -> Result<Box<dyn BrowserEngine>, String> + Send + Sync>;

/// 浏览会话：持有工厂与惰性创建的引擎
pub struct BrowserSession {
    config: BrowserConfig,
    factory: EngineFactory,
    engine: Mutex<Option<Box<dyn BrowserEngine>>>,
    launches: AtomicUsize,
}

impl BrowserSession {
    pub fn new(config: BrowserConfig, factory: EngineFactory) -> Self {
        Self {
            config,
            factory,
            engine: Mutex::new(None),
            launches: AtomicUsize::new(0),
        }
    }

    /// 探测本机是否可用 Chrome/Chromium；不可用（或未启用 feature）时返回 None
    pub fn detect(config: BrowserConfig) -> Option<Self> {
        #[cfg(feature = "browser")]
        {
            chrome::detect(config)
        }
        #[cfg(not(feature = "browser"))]
        {
            let _ = config;
            tracing::info!("browser feature disabled, browsing tools unavailable");
            None
        }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// 引擎是否已启动
    pub fn is_active(&self) -> bool {
        self.engine.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// 引擎累计启动次数
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// 访问页面并提取可读文本
    pub fn browse(&self, url: &str) -> PageContent {
        tracing::info!(url = %url, "browse webpage");
        match self.with_engine(|engine| engine.fetch_page(url)) {
            Ok(page) => {
                let text = html2text::from_read(page.html.as_bytes(), 120)
                    .unwrap_or_else(|_| page.html.clone());
                PageContent {
                    url: url.to_string(),
                    title: page.title,
                    text: text.chars().take(self.config.max_text_chars).collect(),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "browse failed");
                PageContent {
                    url: url.to_string(),
                    title: String::new(),
                    text: format!("[ERROR] Failed to load page: {e}"),
                    error: Some(e),
                }
            }
        }
    }

    /// 搜索；失败时返回单条 "Search failed" 结果，snippet 为错误描述
    pub fn search(&self, query: &str, max_results: usize) -> Vec<SearchHit> {
        tracing::info!(query = %query, max_results, "web search");
        let result = self.search_url(query, max_results).and_then(|url| {
            self.with_engine(|engine| engine.search(&url, max_results))
        });
        match result {
            Ok(mut hits) => {
                hits.retain(|h| !h.title.is_empty() && !h.url.is_empty());
                hits.truncate(max_results);
                hits
            }
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "search failed");
                vec![SearchHit {
                    title: "Search failed".to_string(),
                    url: String::new(),
                    snippet: e,
                }]
            }
        }
    }

    /// 关闭引擎；下次调用时重新启动
    pub fn cleanup(&self) {
        match self.engine.lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    tracing::info!("browser session cleaned up");
                }
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    fn search_url(&self, query: &str, max_results: usize) -> Result<String, String> {
        reqwest::Url::parse_with_params(
            &self.config.search_url,
            &[("q", query.to_string()), ("num", max_results.to_string())],
        )
        .map(String::from)
        .map_err(|e| format!("invalid search url: {e}"))
    }

    fn with_engine<T>(
        &self,
        f: impl FnOnce(&mut dyn BrowserEngine) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut guard = self.engine.lock().map_err(|e| e.to_string())?;
        if guard.is_none() {
            let engine = (self.factory)(&self.config)?;
            self.launches.fetch_add(1, Ordering::SeqCst);
            tracing::info!("browser engine launched");
            *guard = Some(engine);
        }
        match guard.as_mut() {
            Some(engine) => f(engine.as_mut()),
            None => Err("browser engine unavailable".to_string()),
        }
    }
}
