//! Chrome DevTools Protocol surface backend
//!
//! Each surface is a page (tab) of one headless Chromium launched through
//! chromiumoxide. Typed queries are answered by fixed scripts owned by this
//! module; page events are translated into [`SurfaceEvent`]s.
//!
//! Enabled with the `cdp` feature.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetScriptExecutionDisabledParams;
use chromiumoxide::cdp::browser_protocol::page::{
    EventFrameNavigated, EventFrameStartedLoading, EventLoadEventFired,
    EventNavigatedWithinDocument, EventWindowOpen, GetNavigationHistoryParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::CaptureSample;
use crate::surface::{
    CreatedSurface, PopupDecision, QueryResult, SandboxPolicy, SurfaceBackend, SurfaceEvent,
    SurfaceId, SurfaceQuery,
};

const CAPTURE_STATE_JS: &str = r#"({
    scrollX: window.scrollX,
    scrollY: window.scrollY,
    serializedContent: document.documentElement ? document.documentElement.outerHTML : null,
    currentUrl: location.href
})"#;

const HEAD_RESOURCES_JS: &str = r#"Array.from(
    document.head ? document.head.querySelectorAll('script, link[rel~="stylesheet"], style') : []
).map(e => e.outerHTML)"#;

/// Inserts serialized elements into `<head>`. Scripts are recreated so they run.
const INSERT_HEAD_JS: &str = r#"((items) => {
    let n = 0;
    for (const html of items) {
        const t = document.createElement('template');
        t.innerHTML = html;
        const el = t.content.firstElementChild;
        if (!el) continue;
        let node = el;
        if (el.tagName === 'SCRIPT') {
            node = document.createElement('script');
            for (const a of el.attributes) node.setAttribute(a.name, a.value);
            node.textContent = el.textContent;
        }
        document.head.appendChild(node);
        n++;
    }
    return n;
})"#;

/// Launch settings for the browser
#[derive(Debug, Clone)]
pub struct CdpConfig {
    /// Chromium binary; found on `PATH` when unset
    pub executable: Option<PathBuf>,
    /// Show a browser window
    pub headful: bool,
    /// Window size
    pub window_size: (u32, u32),
    /// Queries running longer than this fail as query errors
    pub query_timeout: Duration,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headful: false,
            window_size: (1280, 800),
            query_timeout: Duration::from_secs(5),
        }
    }
}

struct CdpSurface {
    page: Page,
    events: mpsc::UnboundedSender<SurfaceEvent>,
    listeners: Vec<JoinHandle<()>>,
}

/// Surface backend driving Chromium over CDP
pub struct CdpSurfaceBackend {
    browser: Browser,
    handler: JoinHandle<()>,
    surfaces: Mutex<HashMap<SurfaceId, CdpSurface>>,
    next_id: AtomicU64,
    query_timeout: Duration,
}

impl CdpSurfaceBackend {
    /// Launch a browser. `policy` applies browser-wide switches.
    pub async fn launch(config: CdpConfig, policy: &SandboxPolicy) -> Result<Self> {
        let mut builder = BrowserConfig::builder().window_size(config.window_size.0, config.window_size.1);
        if config.headful {
            builder = builder.with_head();
        }
        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }
        if !policy.allow_popups {
            builder = builder.arg("--block-new-web-contents");
        }
        let browser_config = builder.build().map_err(Error::surface_create)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| Error::surface_create(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler error");
                }
            }
        });

        info!("Chromium launched for live surfaces");
        Ok(Self {
            browser,
            handler,
            surfaces: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            query_timeout: config.query_timeout,
        })
    }

    fn page(&self, surface: SurfaceId) -> Result<Page> {
        self.surfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&surface)
            .map(|s| s.page.clone())
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))
    }

    fn emit(&self, surface: SurfaceId, event: SurfaceEvent) {
        if let Some(s) = self
            .surfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&surface)
        {
            let _ = s.events.send(event);
        }
    }

    async fn evaluate<T: DeserializeOwned>(&self, surface: SurfaceId, script: String) -> Result<T> {
        let page = self.page(surface)?;
        let result = tokio::time::timeout(self.query_timeout, page.evaluate(script))
            .await
            .map_err(|_| Error::query(format!("query timed out after {:?}", self.query_timeout)))?
            .map_err(|e| Error::query(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| Error::query(format!("unexpected query result: {e}")))
    }

    /// Run a navigation command in the background and return once it is issued.
    ///
    /// `goto` and `reload` resolve only after the page has loaded; the load
    /// itself is reported through the event stream like any other.
    fn spawn_navigation<F>(&self, surface: SurfaceId, navigation: F) -> Result<()>
    where
        F: std::future::Future<Output = std::result::Result<(), chromiumoxide::error::CdpError>>
            + Send
            + 'static,
    {
        let mut surfaces = self.surfaces.lock().unwrap_or_else(|e| e.into_inner());
        let s = surfaces
            .get_mut(&surface)
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))?;

        let events = s.events.clone();
        s.listeners.retain(|task| !task.is_finished());
        s.listeners.push(tokio::spawn(async move {
            if let Err(e) = navigation.await {
                warn!(surface = %surface, error = %e, "Page load failed");
                let _ = events.send(SurfaceEvent::DidFailLoad {
                    code: -1,
                    description: e.to_string(),
                });
            }
        }));
        Ok(())
    }

    async fn history(&self, surface: SurfaceId) -> Result<(i64, usize)> {
        let page = self.page(surface)?;
        let history = page
            .execute(GetNavigationHistoryParams::default())
            .await
            .map_err(|e| Error::navigation(e.to_string()))?;
        Ok((history.result.current_index, history.result.entries.len()))
    }

    async fn listen(page: &Page, tx: mpsc::UnboundedSender<SurfaceEvent>) -> Result<Vec<JoinHandle<()>>> {
        let listen_err = |e: chromiumoxide::error::CdpError| Error::surface_create(e.to_string());
        let mut listeners = Vec::new();

        let mut started = page.event_listener::<EventFrameStartedLoading>().await.map_err(listen_err)?;
        let main_frame = page.mainframe().await.map_err(listen_err)?;
        let sender = tx.clone();
        listeners.push(tokio::spawn(async move {
            while let Some(event) = started.next().await {
                let top = main_frame.as_ref().map_or(true, |id| *id == event.frame_id);
                if top && sender.send(SurfaceEvent::DidStartLoading).is_err() {
                    break;
                }
            }
        }));

        let mut navigated = page.event_listener::<EventFrameNavigated>().await.map_err(listen_err)?;
        let sender = tx.clone();
        listeners.push(tokio::spawn(async move {
            while let Some(event) = navigated.next().await {
                if event.frame.parent_id.is_some() {
                    continue;
                }
                let url = match &event.frame.url_fragment {
                    Some(fragment) => format!("{}{}", event.frame.url, fragment),
                    None => event.frame.url.clone(),
                };
                if sender.send(SurfaceEvent::DidNavigate { url }).is_err() {
                    break;
                }
            }
        }));

        let mut in_page = page.event_listener::<EventNavigatedWithinDocument>().await.map_err(listen_err)?;
        let sender = tx.clone();
        listeners.push(tokio::spawn(async move {
            while let Some(event) = in_page.next().await {
                let url = event.url.clone();
                if sender.send(SurfaceEvent::DidNavigateInPage { url }).is_err() {
                    break;
                }
            }
        }));

        let mut loaded = page.event_listener::<EventLoadEventFired>().await.map_err(listen_err)?;
        let sender = tx.clone();
        listeners.push(tokio::spawn(async move {
            while loaded.next().await.is_some() {
                if sender.send(SurfaceEvent::DidFinishLoad).is_err() {
                    break;
                }
            }
        }));

        let mut popups = page.event_listener::<EventWindowOpen>().await.map_err(listen_err)?;
        listeners.push(tokio::spawn(async move {
            while let Some(event) = popups.next().await {
                let request = SurfaceEvent::NewSurfaceRequested {
                    url: event.url.clone(),
                    position: None,
                };
                if tx.send(request).is_err() {
                    break;
                }
            }
        }));

        Ok(listeners)
    }
}

impl Drop for CdpSurfaceBackend {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl SurfaceBackend for CdpSurfaceBackend {
    fn name(&self) -> &str {
        "cdp"
    }

    async fn create(&self, initial_url: &str, policy: &SandboxPolicy) -> Result<CreatedSurface> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::surface_create(e.to_string()))?;

        if !policy.javascript {
            page.execute(SetScriptExecutionDisabledParams::new(true))
                .await
                .map_err(|e| Error::surface_create(e.to_string()))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = Self::listen(&page, tx.clone()).await?;
        let id = SurfaceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.surfaces.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id,
            CdpSurface {
                page,
                events: tx,
                listeners,
            },
        );

        self.load_url(id, initial_url).await?;
        Ok(CreatedSurface { id, events: rx })
    }

    async fn destroy(&self, surface: SurfaceId) -> Result<()> {
        let removed = self
            .surfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&surface)
            .ok_or_else(|| Error::SurfaceNotFound(surface.to_string()))?;

        for listener in &removed.listeners {
            listener.abort();
        }
        removed
            .page
            .close()
            .await
            .map_err(|e| Error::Internal(format!("page close failed: {e}")))
    }

    async fn load_url(&self, surface: SurfaceId, url: &str) -> Result<()> {
        let page = self.page(surface)?;
        let url = url.to_string();
        self.spawn_navigation(surface, async move {
            page.goto(url.as_str()).await.map(|_| ())
        })
    }

    async fn reload(&self, surface: SurfaceId) -> Result<()> {
        let page = self.page(surface)?;
        self.spawn_navigation(surface, async move { page.reload().await.map(|_| ()) })
    }

    async fn go_back(&self, surface: SurfaceId) -> Result<()> {
        self.evaluate::<bool>(surface, "(history.back(), true)".to_string())
            .await
            .map(|_| ())
            .map_err(|e| Error::navigation(e.to_string()))
    }

    async fn go_forward(&self, surface: SurfaceId) -> Result<()> {
        self.evaluate::<bool>(surface, "(history.forward(), true)".to_string())
            .await
            .map(|_| ())
            .map_err(|e| Error::navigation(e.to_string()))
    }

    async fn can_go_back(&self, surface: SurfaceId) -> Result<bool> {
        let (current, _) = self.history(surface).await?;
        Ok(current > 0)
    }

    async fn can_go_forward(&self, surface: SurfaceId) -> Result<bool> {
        let (current, len) = self.history(surface).await?;
        Ok(usize::try_from(current + 1).is_ok_and(|next| next < len))
    }

    async fn execute(&self, surface: SurfaceId, query: SurfaceQuery) -> Result<QueryResult> {
        match query {
            SurfaceQuery::CaptureState => {
                let sample: CaptureSample = self.evaluate(surface, CAPTURE_STATE_JS.to_string()).await?;
                Ok(QueryResult::State(sample))
            }
            SurfaceQuery::HeadResources => {
                let resources: Vec<String> = self.evaluate(surface, HEAD_RESOURCES_JS.to_string()).await?;
                Ok(QueryResult::HeadResources(resources))
            }
            SurfaceQuery::InsertHeadResources(resources) => {
                let items = serde_json::to_string(&resources)?;
                let inserted: usize = self
                    .evaluate(surface, format!("{INSERT_HEAD_JS}({items})"))
                    .await?;
                Ok(QueryResult::Inserted(inserted))
            }
            SurfaceQuery::ScrollTo { x, y } => {
                self.evaluate::<bool>(surface, format!("(window.scrollTo({x}, {y}), true)"))
                    .await?;
                Ok(QueryResult::Done)
            }
        }
    }

    async fn resolve_popup(&self, surface: SurfaceId, decision: PopupDecision) -> Result<()> {
        // Popups are blocked at launch unless allowed; nothing to undo per request
        debug!(surface = %surface, decision = ?decision, "Popup resolved");
        Ok(())
    }
}
