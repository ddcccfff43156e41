//! In-memory map page used by the crate's tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use leadscout_shared::{LeadScoutError, Result};

use crate::session::SessionManager;
use crate::surface::{LISTING_HANDLE, MapPage, PAGE_HEADING, PANEL_TITLE, RESULTS_FEED, search_url};

// ---------------------------------------------------------------------------
// Scripted content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeListing {
    pub label: Option<String>,
    pub panel_title: String,
    pub website: Option<String>,
    pub address: Option<String>,
    pub failing: usize,
    pub lag: u32,
    pub empty_until_script_click: bool,
}

impl FakeListing {
    pub fn new(name: &str) -> Self {
        Self {
            label: Some(name.into()),
            panel_title: name.into(),
            website: None,
            address: None,
            failing: 0,
            lag: 0,
            empty_until_script_click: false,
        }
    }

    pub fn website(mut self, url: &str) -> Self {
        self.website = Some(url.into());
        self
    }

    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn panel_title(mut self, title: &str) -> Self {
        self.panel_title = title.into();
        self
    }

    /// Panel keeps showing its previous title for `reads` title reads.
    pub fn lagging(mut self, reads: u32) -> Self {
        self.lag = reads;
        self
    }

    /// The first `n` activation attempts error.
    pub fn failing_strategies(mut self, n: usize) -> Self {
        self.failing = n;
        self
    }

    pub fn empty_until_script_click(mut self) -> Self {
        self.empty_until_script_click = true;
        self
    }

    pub fn unlabelled(mut self) -> Self {
        self.label = None;
        self
    }

    fn html(&self) -> String {
        let mut body = format!(r#"<h1 class="DUwDvf">{}</h1>"#, self.panel_title);
        if let Some(url) = &self.website {
            body.push_str(&format!(r#"<a data-item-id="authority" href="{url}">site</a>"#));
        }
        if let Some(address) = &self.address {
            body.push_str(&format!(
                r#"<button data-item-id="address"><div class="fontBodyMedium">{address}</div></button>"#
            ));
        }
        format!("<html><body>{body}</body></html>")
    }
}

#[derive(Debug, Clone)]
pub struct FakeScreen {
    pub feed: bool,
    pub heading: Option<String>,
    pub listings: Vec<FakeListing>,
    pub single: Option<FakeListing>,
    pub initial_visible: usize,
    pub per_scroll: usize,
    pub consent: bool,
}

impl FakeScreen {
    pub fn multi(listings: Vec<FakeListing>) -> Self {
        let n = listings.len();
        Self {
            feed: true,
            heading: Some("結果".into()),
            listings,
            single: None,
            initial_visible: n,
            per_scroll: 0,
            consent: false,
        }
    }

    pub fn empty() -> Self {
        Self::multi(Vec::new())
    }

    pub fn single(listing: FakeListing) -> Self {
        Self {
            feed: false,
            heading: Some(listing.panel_title.clone()),
            listings: Vec::new(),
            single: Some(listing),
            initial_visible: 0,
            per_scroll: 0,
            consent: false,
        }
    }

    /// Only `initial` listings render until the feed is scrolled.
    pub fn paged(mut self, initial: usize, per_scroll: usize) -> Self {
        self.initial_visible = initial;
        self.per_scroll = per_scroll;
        self
    }

    pub fn with_consent(mut self) -> Self {
        self.consent = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeScript {
    by_url: HashMap<String, FakeScreen>,
    fallback: Option<FakeScreen>,
    stalled: bool,
}

impl FakeScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: &str, screen: FakeScreen) -> Self {
        self.by_url.insert(search_url(query), screen);
        self
    }

    pub fn fallback(mut self, screen: FakeScreen) -> Self {
        self.fallback = Some(screen);
        self
    }

    /// Navigation never completes.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }
}

// ---------------------------------------------------------------------------
// FakePage
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct State {
    screen: Option<FakeScreen>,
    visible: usize,
    active: Option<usize>,
    shown_title: String,
    lag_left: u32,
    script_clicked: HashSet<usize>,
    calls: HashMap<usize, usize>,
    log: Vec<(usize, &'static str)>,
    visited: Vec<String>,
    scrolls: u32,
    consent_clicked: bool,
}

pub struct FakePage {
    script: Arc<FakeScript>,
    state: Mutex<State>,
}

impl FakePage {
    pub fn new(script: Arc<FakeScript>) -> Self {
        Self {
            script,
            state: Mutex::new(State::default()),
        }
    }

    /// A page already showing `screen`, whatever URL it is sent to.
    pub fn on(screen: FakeScreen) -> Self {
        let page = Self::new(Arc::new(FakeScript::new().fallback(screen.clone())));
        page.show(screen);
        page
    }

    fn show(&self, screen: FakeScreen) {
        let mut s = self.state.lock().unwrap();
        s.visible = screen.initial_visible.min(screen.listings.len());
        s.screen = Some(screen);
        s.active = None;
        s.shown_title.clear();
    }

    pub fn activation_log(&self) -> Vec<(usize, &'static str)> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn visited(&self) -> Vec<String> {
        self.state.lock().unwrap().visited.clone()
    }

    pub fn scrolls(&self) -> u32 {
        self.state.lock().unwrap().scrolls
    }

    pub fn consent_clicked(&self) -> bool {
        self.state.lock().unwrap().consent_clicked
    }

    fn click(&self, handle: usize, strategy: &'static str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.log.push((handle, strategy));
        let calls = {
            let entry = s.calls.entry(handle).or_insert(0);
            *entry += 1;
            *entry
        };
        let listing = s
            .screen
            .as_ref()
            .and_then(|sc| sc.listings.get(handle))
            .cloned()
            .ok_or_else(|| LeadScoutError::Extraction("detached handle".into()))?;
        if calls <= listing.failing {
            return Err(LeadScoutError::Extraction(format!("{strategy}: not clickable")));
        }
        if s.active != Some(handle) {
            s.active = Some(handle);
            s.lag_left = listing.lag;
        }
        if strategy == "script-click" {
            s.script_clicked.insert(handle);
        }
        Ok(())
    }
}

#[async_trait]
impl MapPage for FakePage {
    type Handle = usize;

    async fn goto(&self, url: &str) -> Result<()> {
        if self.script.stalled {
            std::future::pending::<()>().await;
        }
        self.state.lock().unwrap().visited.push(url.to_string());
        let screen = self
            .script
            .by_url
            .get(url)
            .or(self.script.fallback.as_ref())
            .cloned()
            .ok_or_else(|| LeadScoutError::Discovery(format!("no route to {url}")))?;
        self.show(screen);
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        let s = self.state.lock().unwrap();
        Ok(selector == RESULTS_FEED && s.screen.as_ref().is_some_and(|sc| sc.feed))
    }

    async fn text_of(&self, selector: &str) -> Result<Option<String>> {
        let mut s = self.state.lock().unwrap();
        match selector {
            PAGE_HEADING => Ok(s.screen.as_ref().and_then(|sc| sc.heading.clone())),
            PANEL_TITLE => {
                if let Some(i) = s.active {
                    let listing = s.screen.as_ref().and_then(|sc| sc.listings.get(i)).cloned();
                    if let Some(listing) = listing {
                        if listing.empty_until_script_click && !s.script_clicked.contains(&i) {
                            s.shown_title.clear();
                        } else if s.lag_left > 0 {
                            s.lag_left -= 1;
                        } else {
                            s.shown_title = listing.panel_title.clone();
                        }
                    }
                }
                Ok(Some(s.shown_title.clone()).filter(|t| !t.is_empty()))
            }
            _ => Ok(None),
        }
    }

    async fn click_button_with_text(&self, _text: &str) -> Result<bool> {
        let mut s = self.state.lock().unwrap();
        let found = s.screen.as_ref().is_some_and(|sc| sc.consent);
        s.consent_clicked |= found;
        Ok(found)
    }

    async fn handles(&self, selector: &str) -> Result<Vec<usize>> {
        let s = self.state.lock().unwrap();
        if selector != LISTING_HANDLE {
            return Ok(Vec::new());
        }
        Ok((0..s.visible).collect())
    }

    async fn handle_label(&self, handle: &usize) -> Result<Option<String>> {
        let s = self.state.lock().unwrap();
        Ok(s
            .screen
            .as_ref()
            .and_then(|sc| sc.listings.get(*handle))
            .and_then(|l| l.label.clone()))
    }

    async fn scroll_to_bottom(&self, _selector: &str) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let s = &mut *guard;
        s.scrolls += 1;
        if let Some(sc) = &s.screen {
            s.visible = (s.visible + sc.per_scroll).min(sc.listings.len());
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<String> {
        let s = self.state.lock().unwrap();
        let Some(screen) = &s.screen else {
            return Ok("<html></html>".into());
        };
        if let Some(single) = &screen.single {
            return Ok(single.html());
        }
        Ok(s.active
            .and_then(|i| screen.listings.get(i))
            .map(FakeListing::html)
            .unwrap_or_else(|| "<html><body></body></html>".into()))
    }

    async fn scroll_into_view_and_click(&self, handle: &usize) -> Result<()> {
        self.click(*handle, "scroll-then-click")
    }

    async fn force_click(&self, handle: &usize) -> Result<()> {
        self.click(*handle, "forced-click")
    }

    async fn script_click(&self, handle: &usize) -> Result<()> {
        self.click(*handle, "script-click")
    }

    async fn dispatch_click(&self, handle: &usize) -> Result<()> {
        self.click(*handle, "dispatched-click")
    }

    async fn click_at_center(&self, handle: &usize) -> Result<()> {
        self.click(*handle, "center-click")
    }
}

// ---------------------------------------------------------------------------
// Session manager
// ---------------------------------------------------------------------------

pub struct FakeSessions {
    script: Arc<FakeScript>,
    fail_acquire: bool,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl FakeSessions {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script: Arc::new(script),
            fail_acquire: false,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_acquire: true,
            ..Self::new(FakeScript::new())
        }
    }
}

#[async_trait]
impl SessionManager for FakeSessions {
    type Session = FakePage;

    async fn acquire(&self) -> Result<FakePage> {
        if self.fail_acquire {
            return Err(LeadScoutError::Discovery("browser failed to start".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(FakePage::new(self.script.clone()))
    }

    async fn release(&self, _session: FakePage) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
