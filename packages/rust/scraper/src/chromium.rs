//! Chromium-backed map pages over the DevTools protocol.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetLocaleOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::layout::Point;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use leadscout_shared::{LeadScoutError, Result, ScraperConfig};

use crate::session::{SessionManager, bounded_step};
use crate::surface::MapPage;

/// Flags that keep a headless Chromium lean inside containers.
const LAUNCH_ARGS: &[&str] = &[
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-default-apps",
    "--disable-sync",
    "--disable-translate",
    "--no-first-run",
    "--js-flags=--max-old-space-size=256",
];

fn protocol_err(e: CdpError) -> LeadScoutError {
    LeadScoutError::Discovery(e.to_string())
}

fn click_err(e: CdpError) -> LeadScoutError {
    LeadScoutError::Extraction(e.to_string())
}

/// JSON-encode a string for embedding into a script.
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

// ---------------------------------------------------------------------------
// ChromiumSession
// ---------------------------------------------------------------------------

/// One browser process with a single page.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

#[async_trait]
impl MapPage for ChromiumSession {
    type Handle = Element;

    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await.map_err(protocol_err)?;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        let found = self.page.find_elements(selector).await.map_err(protocol_err)?;
        Ok(!found.is_empty())
    }

    async fn text_of(&self, selector: &str) -> Result<Option<String>> {
        let found = self.page.find_elements(selector).await.map_err(protocol_err)?;
        let Some(el) = found.into_iter().next() else {
            return Ok(None);
        };
        let text = el.inner_text().await.map_err(protocol_err)?;
        Ok(text.map(|t| t.trim().to_string()))
    }

    async fn click_button_with_text(&self, text: &str) -> Result<bool> {
        let script = format!(
            "(() => {{ const b = [...document.querySelectorAll('button')]\
             .find(e => (e.innerText || '').includes({})); \
             if (!b) return false; b.click(); return true; }})()",
            js_string(text)
        );
        let result = self.page.evaluate(script).await.map_err(protocol_err)?;
        Ok(result.into_value::<bool>().unwrap_or(false))
    }

    async fn handles(&self, selector: &str) -> Result<Vec<Element>> {
        self.page.find_elements(selector).await.map_err(protocol_err)
    }

    async fn handle_label(&self, handle: &Element) -> Result<Option<String>> {
        handle.attribute("aria-label").await.map_err(protocol_err)
    }

    async fn scroll_to_bottom(&self, selector: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); \
             if (el) {{ el.scrollTop = el.scrollHeight; }} }})()",
            js_string(selector)
        );
        self.page.evaluate(script).await.map_err(protocol_err)?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<String> {
        self.page.content().await.map_err(protocol_err)
    }

    async fn scroll_into_view_and_click(&self, handle: &Element) -> Result<()> {
        handle.scroll_into_view().await.map_err(click_err)?;
        handle.click().await.map_err(click_err)?;
        Ok(())
    }

    async fn force_click(&self, handle: &Element) -> Result<()> {
        let point = handle.clickable_point().await.map_err(click_err)?;
        self.page.click(point).await.map_err(click_err)?;
        Ok(())
    }

    async fn script_click(&self, handle: &Element) -> Result<()> {
        handle
            .call_js_fn("function() { this.click(); }", false)
            .await
            .map_err(click_err)?;
        Ok(())
    }

    async fn dispatch_click(&self, handle: &Element) -> Result<()> {
        handle
            .call_js_fn(
                "function() { this.dispatchEvent(new MouseEvent('click', \
                 { bubbles: true, cancelable: true, view: window })); }",
                false,
            )
            .await
            .map_err(click_err)?;
        Ok(())
    }

    async fn click_at_center(&self, handle: &Element) -> Result<()> {
        let bbox = handle.bounding_box().await.map_err(click_err)?;
        let center = Point {
            x: bbox.x + bbox.width / 2.0,
            y: bbox.y + bbox.height / 2.0,
        };
        self.page.click(center).await.map_err(click_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChromiumSessions
// ---------------------------------------------------------------------------

/// Launches one Chromium process per session.
pub struct ChromiumSessions {
    config: ScraperConfig,
}

impl ChromiumSessions {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let c = &self.config;
        let mut builder = BrowserConfig::builder()
            .window_size(c.viewport_width, c.viewport_height)
            .viewport(Viewport {
                width: c.viewport_width,
                height: c.viewport_height,
                ..Viewport::default()
            })
            .args(LAUNCH_ARGS.iter().copied())
            .arg(format!("--lang={}", c.locale));
        if !c.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &c.chrome_path {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| LeadScoutError::config(format!("invalid browser config: {e}")))
    }

    async fn prepare_page(&self, browser: &Browser) -> Result<Page> {
        let page = browser.new_page("about:blank").await.map_err(protocol_err)?;

        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(self.config.user_agent.clone())
            .accept_language(self.config.locale.clone())
            .build()
            .map_err(LeadScoutError::Discovery)?;
        page.execute(user_agent).await.map_err(protocol_err)?;
        page.execute(SetLocaleOverrideParams {
            locale: Some(self.config.locale.clone()),
        })
        .await
        .map_err(protocol_err)?;

        Ok(page)
    }
}

#[async_trait]
impl SessionManager for ChromiumSessions {
    type Session = ChromiumSession;

    #[instrument(skip_all)]
    async fn acquire(&self) -> Result<ChromiumSession> {
        let config = self.browser_config()?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| LeadScoutError::Discovery(format!("browser failed to start: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
        });

        match self.prepare_page(&browser).await {
            Ok(page) => {
                info!(locale = %self.config.locale, "browser session ready");
                Ok(ChromiumSession {
                    browser,
                    page,
                    handler,
                })
            }
            Err(e) => {
                let limit = Duration::from_secs(self.config.cleanup_timeout_secs);
                bounded_step("close browser", limit, async {
                    browser.close().await.map(|_| ()).map_err(protocol_err)
                })
                .await;
                handler.abort();
                Err(e)
            }
        }
    }

    #[instrument(skip_all)]
    async fn release(&self, session: ChromiumSession) {
        let ChromiumSession {
            mut browser,
            page,
            handler,
        } = session;
        let limit = Duration::from_secs(self.config.cleanup_timeout_secs);
        let started = std::time::Instant::now();

        bounded_step("close page", limit, async { page.close().await.map_err(protocol_err) }).await;
        bounded_step("close browser", limit, async {
            browser.close().await.map(|_| ()).map_err(protocol_err)
        })
        .await;
        let exited = bounded_step("stop browser process", limit, async {
            browser
                .wait()
                .await
                .map(|_| ())
                .map_err(|e| LeadScoutError::Discovery(e.to_string()))
        })
        .await;
        if !exited {
            bounded_step("kill browser process", limit, async {
                if let Some(Err(e)) = browser.kill().await {
                    return Err(LeadScoutError::Discovery(e.to_string()));
                }
                Ok(())
            })
            .await;
        }
        handler.abort();

        info!(elapsed = ?started.elapsed(), "browser session released");
    }
}
