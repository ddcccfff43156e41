//! The DOM operations the discovery protocol needs from a rendered map page.
//!
//! Everything above this trait is generic over it: the production
//! implementation drives Chromium over CDP, tests use an in-memory page.

use async_trait::async_trait;
use url::form_urlencoded;

use leadscout_shared::Result;

/// Base of the map search path; the query is appended form-urlencoded.
pub const SEARCH_BASE_URL: &str = "https://www.google.com/maps/search/";

/// Results feed container. Present only on multi-result pages.
pub const RESULTS_FEED: &str = r#"[role="feed"]"#;

/// Generic page heading used for single/multi classification.
pub const PAGE_HEADING: &str = "h1";

/// Heading text the surface shows above a results list.
pub const RESULTS_LABEL: &str = "結果";

/// Title of the shared detail panel.
pub const PANEL_TITLE: &str = "h1.DUwDvf";

/// Anchors for individual listings in the results feed.
pub const LISTING_HANDLE: &str = r#"a[href*="/maps/place/"]"#;

/// Text of the cookie consent button.
pub const CONSENT_BUTTON_TEXT: &str = "同意する";

/// Build the search URL for a free-text query.
pub fn search_url(query: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
    format!("{SEARCH_BASE_URL}{encoded}")
}

/// A live, rendered map page.
///
/// Reads return `Ok(None)`/`Ok(false)` for absent elements; `Err` is reserved
/// for the page itself failing (closed target, protocol error).
#[async_trait]
pub trait MapPage: Send + Sync {
    /// Opaque reference to one listing anchor.
    type Handle: Send + Sync;

    /// Navigate and wait for the navigation event.
    async fn goto(&self, url: &str) -> Result<()>;

    async fn exists(&self, selector: &str) -> Result<bool>;

    /// Trimmed inner text of the first element matching `selector`.
    async fn text_of(&self, selector: &str) -> Result<Option<String>>;

    /// Click the first button whose text contains `text`. Returns whether one was found.
    async fn click_button_with_text(&self, text: &str) -> Result<bool>;

    /// All elements currently matching `selector`, in document order.
    async fn handles(&self, selector: &str) -> Result<Vec<Self::Handle>>;

    /// The handle's accessible label (`aria-label`).
    async fn handle_label(&self, handle: &Self::Handle) -> Result<Option<String>>;

    /// Scroll the container matching `selector` to its bottom.
    async fn scroll_to_bottom(&self, selector: &str) -> Result<()>;

    /// Serialized HTML of the whole page as currently rendered.
    async fn snapshot(&self) -> Result<String>;

    // -- activation primitives, one per strategy --

    /// Bring the handle into view, then click it with actionability checks.
    async fn scroll_into_view_and_click(&self, handle: &Self::Handle) -> Result<()>;

    /// Click without waiting for the element to be actionable.
    async fn force_click(&self, handle: &Self::Handle) -> Result<()>;

    /// Call `click()` on the element from script.
    async fn script_click(&self, handle: &Self::Handle) -> Result<()>;

    /// Dispatch a synthetic bubbling `MouseEvent("click")`.
    async fn dispatch_click(&self, handle: &Self::Handle) -> Result<()>;

    /// Mouse click at the center of the handle's bounding box.
    async fn click_at_center(&self, handle: &Self::Handle) -> Result<()>;
}
