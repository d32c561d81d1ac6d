use serde_json::json;
use tracing::warn;

use crate::consent::ChallengeDetector;
use crate::page::{Locator, Page};
use crate::types::Observation;

/// What goes into `Observation::sample`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObservationMode {
    /// Serialized page HTML.
    #[default]
    Html,
    /// Compact outline of visible interactive elements and short texts.
    Outline,
}

impl ObservationMode {
    /// `html` or `outline`, case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "html" => Some(Self::Html),
            "outline" => Some(Self::Outline),
            _ => None,
        }
    }
}

/// JavaScript injected into the page to produce a simplified DOM outline.
/// Reads the DOM without modifying styles or layout.
///
/// Interactive elements (a, button, input, textarea, select) get sequential
/// ids `[e0]`, `[e1]`, ... via `data-eid`, so the oracle can target them with
/// `[data-eid="[e3]"]`.
pub const OUTLINE_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK']);
  let id = 0;
  const lines = [];
  const seen = new Set();

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function describe(el, tag, eid) {
    const text = (el.textContent || '').trim().slice(0, 60);
    if (tag === 'a') return eid + ' link "' + text + '"';
    if (tag === 'button') return eid + ' button "' + text + '"';
    if (tag === 'select') {
      return eid + ' select [' + [...el.options].map(o => o.text.trim().slice(0, 20)).join('|') + ']';
    }
    let d = eid + ' ' + tag + ' type=' + (el.type || 'text') + ' placeholder="' + (el.placeholder || '') + '"';
    if (el.name) d += ' name=' + el.name;
    if (el.labels && el.labels.length) d += ' label="' + el.labels[0].innerText.trim().slice(0, 40) + '"';
    return d;
  }

  function walk(node, depth) {
    if (depth > 15) return;
    for (const child of node.children) {
      if (SKIP.has(child.tagName) || !isVisible(child)) continue;
      const tag = child.tagName.toLowerCase();
      if (['a','button','input','textarea','select'].includes(tag)) {
        const eid = '[e' + (id++) + ']';
        child.setAttribute('data-eid', eid);
        const desc = describe(child, tag, eid);
        if (!seen.has(desc)) { seen.add(desc); lines.push(desc); }
      } else if (child.children.length === 0) {
        const text = (child.textContent || '').trim();
        if (text.length > 2 && text.length < 200 && !seen.has(text)) {
          seen.add(text);
          lines.push('  "' + text.slice(0, 100) + '"');
        }
      }
      walk(child, depth + 1);
    }
  }

  walk(document.body, 0);
  return lines.join('\n');
})()
"#;

/// Element resolver shared by the Chrome page and the overlay.
///
/// Called as `(target, mode, arg)`. `target` is a serialized [`Locator`]; `mode`
/// is one of `presence`, `tag`, `text`, `attr`, `highlight`.
pub const RESOLVE_JS: &str = r#"
(target, mode, arg) => {
  const norm = s => (s || '').replace(/\s+/g, ' ').trim();
  const low = s => norm(s).toLowerCase();
  const visible = el => {
    if (!el || !el.isConnected) return false;
    const s = getComputedStyle(el);
    if (s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  };
  const ROLES = {
    button: 'button, [role="button"], input[type="button"], input[type="submit"], input[type="reset"]',
    link: 'a[href], [role="link"]',
    textbox: 'input:not([type]), input[type="text"], input[type="email"], input[type="search"], input[type="password"], textarea, [role="textbox"]',
    checkbox: 'input[type="checkbox"], [role="checkbox"]',
  };
  const name = el => norm(el.getAttribute('aria-label') || el.innerText || el.value || el.title);
  const all = sel => [...document.querySelectorAll(sel)];
  const deepest = (els, test) => els.filter(el => test(el) && ![...el.children].some(test));
  const controlFor = label => {
    if (label.control) return label.control;
    const id = label.getAttribute('for');
    return id ? document.getElementById(id) : label.querySelector('input, textarea, select');
  };

  function candidates() {
    switch (target.strategy) {
      case 'role': {
        const els = all(ROLES[target.role] || '[role="' + CSS.escape(target.role) + '"]');
        const want = low(target.name);
        const exact = els.filter(el => low(name(el)) === want);
        return exact.length ? exact : els.filter(el => low(name(el)).includes(want));
      }
      case 'text': {
        const want = norm(target.value);
        return deepest(all('body *'), el => norm(el.innerText) === want);
      }
      case 'label': {
        const want = low(target.value);
        const out = [];
        for (const label of all('label')) {
          const c = low(label.innerText) === want ? controlFor(label) : null;
          if (c) out.push(c);
        }
        for (const el of all('input, textarea, select, [contenteditable="true"]')) {
          if (low(el.getAttribute('aria-label')) === want || low(el.getAttribute('placeholder')) === want) out.push(el);
        }
        return out;
      }
      default: {
        const raw = target.value;
        const byText = want => deepest(all('body *'), el => low(el.innerText).includes(want));
        if (raw.startsWith('text=')) return byText(low(raw.slice(5)));
        try { return all(raw); } catch (_) { return byText(low(raw)); }
      }
    }
  }

  const found = candidates();
  const first = found.find(visible) || null;
  switch (mode) {
    case 'presence':
      return found.length === 0 ? 'missing' : (first ? 'visible' : 'hidden');
    case 'tag':
      all('[data-pilot-target]').forEach(el => el.removeAttribute('data-pilot-target'));
      if (!first) return null;
      first.setAttribute('data-pilot-target', arg);
      return arg;
    case 'text': {
      const el = first || found[0];
      return el ? (el.innerText || el.textContent || '') : null;
    }
    case 'attr': {
      const el = first || found[0];
      return el ? el.getAttribute(arg) : null;
    }
    case 'highlight':
      if (first && window.__pilot_highlight) window.__pilot_highlight(first, arg);
      return first ? 'ok' : null;
  }
  return null;
}
"#;

/// Serialized form of a locator as `RESOLVE_JS` expects it.
pub fn locator_json(locator: &Locator) -> serde_json::Value {
    match locator {
        Locator::Role { role, name } => json!({"strategy": "role", "role": role, "name": name}),
        Locator::Text(value) => json!({"strategy": "text", "value": value}),
        Locator::Label(value) => json!({"strategy": "label", "value": value}),
        Locator::Selector(value) => json!({"strategy": "selector", "value": value}),
    }
}

/// Build a resolver invocation. Every argument is a JSON literal.
pub fn resolve_call(locator: &Locator, mode: &str, arg: &str) -> String {
    format!(
        "({})({}, {}, {})",
        RESOLVE_JS.trim(),
        locator_json(locator),
        serde_json::Value::from(mode),
        serde_json::Value::from(arg)
    )
}

/// Cut `text` to at most `max` chars on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((cut, _)) => format!(
            "{}\n... [truncated, {} total chars]",
            &text[..cut],
            text.chars().count()
        ),
    }
}

/// Capture the page state handed to the oracle. Never fails: anything
/// the page refuses to report becomes a placeholder.
pub fn observe(
    page: &dyn Page,
    mode: ObservationMode,
    max_chars: usize,
    detector: &dyn ChallengeDetector,
) -> Observation {
    let url = page.url().unwrap_or_else(|_| "unknown".into());
    let title = page.title().unwrap_or_else(|_| "untitled".into());

    let raw = match mode {
        ObservationMode::Html => page.content(),
        ObservationMode::Outline => page.run_script(OUTLINE_JS).map(Option::unwrap_or_default),
    }
    .unwrap_or_else(|e| {
        warn!(component = "dom", error = %e, "could not read page content");
        String::new()
    });

    let body = page.body_text().unwrap_or_default();
    let blocked = detector.looks_blocked(&title, &truncate_chars(&body, 2000));
    if blocked {
        warn!(component = "dom", %url, "page looks like a bot-verification wall");
    }

    Observation {
        url,
        title,
        sample: truncate_chars(&raw, max_chars),
        blocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::KeywordDetector;
    use crate::testing::{FixtureElement, FixturePage};

    #[test]
    fn truncation_is_char_safe() {
        let text = "“Q” and more";
        let cut = truncate_chars(text, 3);
        assert!(cut.starts_with("“Q”\n... [truncated, 12 total chars]"));
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn resolver_call_embeds_data_as_literals() {
        let call = resolve_call(&Locator::Selector("a'); alert(1); ('".into()), "presence", "");
        assert!(call.contains(r#""value":"a'); alert(1); ('""#));
        assert!(call.ends_with(r#", "presence", "")"#));
    }

    #[test]
    fn observe_reports_title_url_and_sample() {
        let page = FixturePage::new(vec![FixtureElement::new("span", "“Q”").class("text")])
            .with_location("https://quotes.toscrape.com/", "Quotes to Scrape");
        let obs = observe(&page, ObservationMode::Html, 7000, &KeywordDetector);
        assert_eq!(obs.url, "https://quotes.toscrape.com/");
        assert_eq!(obs.title, "Quotes to Scrape");
        assert!(obs.sample.contains(r#"<span class="text">“Q”</span>"#));
        assert!(!obs.blocked);
    }

    #[test]
    fn outline_mode_uses_script_output() {
        let page = FixturePage::new(vec![FixtureElement::new("button", "Login")])
            .with_outline("[e0] button \"Login\"\n[e1] input placeholder=\"Username\"");
        let obs = observe(&page, ObservationMode::Outline, 7000, &KeywordDetector);
        assert!(obs.sample.starts_with("[e0] button \"Login\""));
        assert!(!obs.sample.contains("<button"));
        assert_eq!(page.scripts_run(), 1);

        assert_eq!(ObservationMode::parse(" Outline "), Some(ObservationMode::Outline));
        assert_eq!(ObservationMode::parse("html"), Some(ObservationMode::Html));
        assert_eq!(ObservationMode::parse("screenshot"), None);
    }

    #[test]
    fn observe_flags_bot_walls() {
        let wall = FixtureElement::new("p", "Checking your browser before accessing");
        let page =
            FixturePage::new(vec![wall]).with_location("https://shop.example/", "Just a moment...");
        let obs = observe(&page, ObservationMode::Html, 7000, &KeywordDetector);
        assert!(obs.blocked);
    }
}
