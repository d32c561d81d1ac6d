use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::protocol::cdp::Target;
use headless_chrome::{Browser, LaunchOptions, Tab};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dom::resolve_call;
use crate::error::{AgentError, Result};
use crate::page::{LoadWait, Locator, Page, Presence};
use crate::registry::{BrowserSession, LaunchSettings, Launcher};

/// Quiet period after the load event before a network-idle navigation returns.
const NETWORK_QUIET: Duration = Duration::from_millis(1500);

static NEXT_MARKER: AtomicU64 = AtomicU64::new(0);

/// Launches a dedicated Chrome per session.
#[derive(Debug, Default, Clone)]
pub struct ChromeLauncher;

/// One Chrome process, its browser context and the active tab.
pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    context_id: String,
    page: Arc<ChromePage>,
}

impl BrowserSession for ChromeSession {
    fn page(&self) -> Arc<dyn Page> {
        let _ = self.page.tab.activate();
        self.page.clone()
    }

    fn is_alive(&self) -> bool {
        match self.browser.lock().as_ref() {
            Some(browser) => browser.get_version().is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        if let Err(e) = self.page.tab.close(false) {
            debug!(component = "hands", error = %e, "tab close failed");
        }
        let Some(browser) = self.browser.lock().take() else {
            return;
        };
        let dispose = Target::DisposeBrowserContext {
            browser_context_id: self.context_id.clone(),
        };
        if let Err(e) = self.page.tab.call_method(dispose) {
            debug!(component = "hands", error = %e, "browser context dispose failed");
        }
        // Dropping the Browser kills the process.
        drop(browser);
    }
}

impl Launcher for ChromeLauncher {
    type Session = ChromeSession;

    fn launch(&self, id: &str, settings: &LaunchSettings) -> Result<ChromeSession> {
        let options = LaunchOptions {
            headless: settings.headless,
            path: settings.chrome_path.clone().or_else(find_chrome),
            window_size: Some(settings.window),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: settings.idle_timeout,
            ..Default::default()
        };

        info!(component = "hands", session = id, path = ?options.path, "starting Chrome");
        let browser = Browser::new(options).map_err(|e| {
            AgentError::ResourceUnavailable(format!("Browser launch failed: {e:#}"))
        })?;

        let (context_id, tab) = {
            let context = browser.new_context().map_err(|e| {
                AgentError::ResourceUnavailable(format!("no browser context: {e:#}"))
            })?;
            let tab = context
                .new_tab()
                .map_err(|e| AgentError::ResourceUnavailable(format!("no tab: {e:#}")))?;
            (context.get_id().to_string(), tab)
        };
        tab.navigate_to("about:blank").map_err(AgentError::browser)?;

        info!(component = "hands", session = id, "Chrome ready");
        Ok(ChromeSession {
            browser: Mutex::new(Some(browser)),
            context_id,
            page: Arc::new(ChromePage::new(tab)),
        })
    }
}

// Well-known install locations; headless_chrome's own detection runs when none exist.
fn find_chrome() -> Option<PathBuf> {
    let user_local = format!(
        r"C:\Users\{}\AppData\Local\Google\Chrome\Application\chrome.exe",
        std::env::var("USERNAME").unwrap_or_else(|_| "Default".to_string())
    );
    let candidates = [
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        user_local.as_str(),
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

/// `Page` over a headless_chrome tab.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    fn eval_string(&self, script: &str) -> Result<Option<String>> {
        let result = self.tab.evaluate(script, false).map_err(AgentError::browser)?;
        Ok(result.value.and_then(|v| v.as_str().map(String::from)))
    }

    /// Mark the first visible match with a fresh `data-pilot-target` value
    /// and return a CSS selector for it.
    fn tag(&self, locator: &Locator) -> Result<Option<String>> {
        let marker = format!("t{}", NEXT_MARKER.fetch_add(1, Ordering::Relaxed));
        let tagged = self.eval_string(&resolve_call(locator, "tag", &marker))?;
        Ok(tagged.map(|m| format!("[data-pilot-target=\"{m}\"]")))
    }
}

impl Page for ChromePage {
    fn goto(&self, url: &str, wait: LoadWait) -> Result<()> {
        self.tab.navigate_to(url).map_err(AgentError::browser)?;
        match wait {
            LoadWait::NetworkIdle => {
                self.tab.wait_until_navigated().map_err(AgentError::browser)?;
                std::thread::sleep(NETWORK_QUIET);
            }
            LoadWait::ContentLoaded => {
                self.tab.wait_for_element("body").map_err(AgentError::browser)?;
            }
        }
        Ok(())
    }

    fn url(&self) -> Result<String> {
        Ok(self.tab.get_url())
    }

    fn title(&self) -> Result<String> {
        self.tab.get_title().map_err(AgentError::browser)
    }

    fn content(&self) -> Result<String> {
        self.tab.get_content().map_err(AgentError::browser)
    }

    fn body_text(&self) -> Result<String> {
        Ok(self
            .eval_string("document.body ? document.body.innerText : ''")?
            .unwrap_or_default())
    }

    fn presence(&self, locator: &Locator) -> Result<Presence> {
        let state = self.eval_string(&resolve_call(locator, "presence", ""))?;
        Ok(match state.as_deref() {
            Some("visible") => Presence::Visible,
            Some("hidden") => Presence::Hidden,
            _ => Presence::Missing,
        })
    }

    fn click(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let selector = self
            .tag(locator)?
            .ok_or_else(|| AgentError::ElementNotVisible(locator.to_string()))?;
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(&selector, timeout)
            .map_err(|_| AgentError::ActionTimeout {
                what: format!("click {locator}"),
                millis: timeout.as_millis() as u64,
            })?;
        element.click().map_err(AgentError::browser)?;
        Ok(())
    }

    fn fill(&self, locator: &Locator, text: &str) -> Result<()> {
        let selector = self
            .tag(locator)?
            .ok_or_else(|| AgentError::ElementNotVisible(locator.to_string()))?;
        let element = self.tab.find_element(&selector).map_err(AgentError::browser)?;
        element
            .call_js_fn(
                "function () { if ('value' in this) { this.value = ''; } \
                 this.dispatchEvent(new Event('input', { bubbles: true })); }",
                vec![],
                false,
            )
            .map_err(AgentError::browser)?;
        element.type_into(text).map_err(AgentError::browser)?;
        Ok(())
    }

    fn inner_text(&self, locator: &Locator) -> Result<Option<String>> {
        self.eval_string(&resolve_call(locator, "text", ""))
    }

    fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        self.eval_string(&resolve_call(locator, "attr", name))
    }

    fn press_key(&self, key: &str) -> Result<()> {
        self.tab.press_key(key).map_err(AgentError::browser)?;
        Ok(())
    }

    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn run_script(&self, script: &str) -> Result<Option<String>> {
        self.eval_string(script)
    }

    fn screenshot(&self, path: &Path) -> Result<()> {
        let png = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(AgentError::browser)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(AgentError::browser)?;
        }
        std::fs::write(path, png).map_err(|e| {
            warn!(
                component = "hands",
                path = %path.display(),
                error = %e,
                "screenshot not written"
            );
            AgentError::browser(e)
        })
    }
}
