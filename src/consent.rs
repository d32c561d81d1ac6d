use std::time::Duration;

use tracing::debug;

use crate::page::{Locator, Page, Presence};

/// Best-effort removal of cookie banners after a navigation.
pub trait ConsentDismisser: Send + Sync {
    /// Returns true when something was clicked. Safe to call on any page.
    fn try_dismiss(&self, page: &dyn Page) -> bool;
}

/// Heuristic over observed text that flags bot-verification walls.
pub trait ChallengeDetector: Send + Sync {
    fn looks_blocked(&self, title: &str, body_text: &str) -> bool;
}

const CONSENT_BUTTONS: &[&str] = &[
    "Accept all",
    "Accept",
    "Allow all",
    "I agree",
    "Agree",
    "Got it",
    "Okay",
    "OK",
    "Reject all",
    "Reject",
    "Decline",
    "No thanks",
    "Confirm choices",
];

const CONSENT_SELECTORS: &[&str] = &[
    "[aria-label*='accept' i]",
    "[aria-label*='agree' i]",
    "[id*='accept' i]",
    "[id*='agree' i]",
    "[data-testid*='accept' i]",
    "[class*='accept' i]",
];

/// Tries well-known consent buttons by accessible name, then by attribute.
pub struct SelectorConsent {
    click_timeout: Duration,
    settle: Duration,
}

impl Default for SelectorConsent {
    fn default() -> Self {
        Self {
            click_timeout: Duration::from_millis(2000),
            settle: Duration::from_millis(350),
        }
    }
}

impl SelectorConsent {
    fn candidates() -> impl Iterator<Item = Locator> {
        CONSENT_BUTTONS
            .iter()
            .map(|name| Locator::Role {
                role: "button".to_string(),
                name: (*name).to_string(),
            })
            .chain(CONSENT_SELECTORS.iter().map(|s| Locator::Selector((*s).to_string())))
    }
}

impl ConsentDismisser for SelectorConsent {
    fn try_dismiss(&self, page: &dyn Page) -> bool {
        for locator in Self::candidates() {
            if !matches!(page.presence(&locator), Ok(Presence::Visible)) {
                continue;
            }
            match page.click(&locator, self.click_timeout) {
                Ok(()) => {
                    debug!(component = "consent", %locator, "dismissed consent banner");
                    page.pause(self.settle);
                    return true;
                }
                Err(e) => {
                    debug!(component = "consent", %locator, error = %e, "consent click failed")
                }
            }
        }
        false
    }
}

/// Never clicks anything. Used by extraction flows that must not alter the page.
pub struct NoConsent;

impl ConsentDismisser for NoConsent {
    fn try_dismiss(&self, _page: &dyn Page) -> bool {
        false
    }
}

const CHALLENGE_KEYWORDS: &[&str] = &[
    "not a robot",
    "verify you are human",
    "captcha",
    "access denied",
    "unusual traffic",
    "just a moment",
    "checking your browser",
    "cloudflare",
    "enable cookies",
    "are you human",
    "security check",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordDetector;

impl ChallengeDetector for KeywordDetector {
    fn looks_blocked(&self, title: &str, body_text: &str) -> bool {
        let hay = format!("{title} {body_text}").to_lowercase();
        CHALLENGE_KEYWORDS.iter().any(|k| hay.contains(k))
    }
}
