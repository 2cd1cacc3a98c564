//! Headless Chrome 引擎（feature "browser"）

use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, Tab};

use super::{BrowserConfig, BrowserEngine, BrowserSession, RawPage, SearchHit};

/// 在结果页内一次性提取 `{title, url, snippet}` 列表
const EXTRACT_HITS_JS: &str = r#"
JSON.stringify(Array.from(document.querySelectorAll('div.g')).map(function (g) {
  var a = g.querySelector('a');
  var h = g.querySelector('h3');
  var s = g.querySelector('div[data-sncf]') || g.querySelector('div.VwiC3b') || g.querySelector('span.st');
  return {
    title: h ? h.innerText : '',
    url: a ? a.href : '',
    snippet: s ? s.innerText : ''
  };
}))
"#;

pub struct ChromeEngine {
    browser: Browser,
    timeout: Duration,
}

impl ChromeEngine {
    pub fn launch(config: &BrowserConfig) -> Result<Self, String> {
        let browser = Browser::default()
            .map_err(|e| format!("Chrome launch failed: {}. Install Chrome/Chromium.", e))?;
        tracing::info!("headless chrome launched");
        Ok(Self {
            browser,
            timeout: config.navigation_timeout,
        })
    }

    fn open(&self, url: &str) -> Result<Arc<Tab>, String> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| format!("Browser tab failed: {}", e))?;
        tab.set_default_timeout(self.timeout);
        tab.navigate_to(url)
            .map_err(|e| format!("Navigate failed: {}", e))?;
        tab.wait_until_navigated()
            .map_err(|e| format!("Page load failed: {}", e))?;
        Ok(tab)
    }
}

impl BrowserEngine for ChromeEngine {
    fn fetch_page(&mut self, url: &str) -> Result<RawPage, String> {
        let tab = self.open(url)?;
        let result = (|| -> Result<RawPage, String> {
            let title = tab
                .get_title()
                .map_err(|e| format!("Get title failed: {}", e))?;
            let html = tab
                .get_content()
                .map_err(|e| format!("Get content failed: {}", e))?;
            Ok(RawPage { title, html })
        })();
        let _ = tab.close(true);
        result
    }

    fn search(&mut self, search_url: &str, max_results: usize) -> Result<Vec<SearchHit>, String> {
        let tab = self.open(search_url)?;
        let result = (|| -> Result<Vec<SearchHit>, String> {
            let remote = tab
                .evaluate(EXTRACT_HITS_JS, false)
                .map_err(|e| format!("Extract results failed: {}", e))?;
            let raw = remote
                .value
                .as_ref()
                .and_then(|v| v.as_str())
                .unwrap_or("[]")
                .to_string();
            let mut hits: Vec<SearchHit> =
                serde_json::from_str(&raw).map_err(|e| format!("Parse results failed: {}", e))?;
            hits.truncate(max_results);
            Ok(hits)
        })();
        let _ = tab.close(true);
        result
    }
}

/// 本机存在 Chrome/Chromium 可执行文件时返回会话（不立即启动）
pub fn detect(config: BrowserConfig) -> Option<BrowserSession> {
    match headless_chrome::browser::default_executable() {
        Ok(path) => {
            tracing::info!(chrome = %path.display(), "browser available");
            Some(BrowserSession::new(
                config,
                Box::new(
                    |cfg: &BrowserConfig| -> Result<Box<dyn BrowserEngine>, String> {
                        Ok(Box::new(ChromeEngine::launch(cfg)?))
                    },
                ),
            ))
        }
        Err(e) => {
            tracing::info!(error = %e, "chrome not found, browsing tools unavailable");
            None
        }
    }
}
