//! Cosmetic cursor dot and highlight box so a human can follow the agent.
//! Nothing here may influence whether an action succeeds.

use crate::dom::resolve_call;
use crate::error::Result;
use crate::page::{Locator, Page};

pub trait Overlay: Send + Sync {
    fn install_cursor(&self, page: &dyn Page) -> Result<()>;
    fn install_highlighter(&self, page: &dyn Page) -> Result<()>;
    fn highlight(&self, page: &dyn Page, locator: &Locator, label: &str) -> Result<()>;
}

/// Red dot that follows the mouse and flashes a ring on mousedown.
const DOT_JS: &str = r#"
(() => {
  const old = document.getElementById('__pilot_dot');
  if (old) old.remove();
  const dot = document.createElement('div');
  dot.id = '__pilot_dot';
  dot.style.cssText = 'position:fixed;left:200px;top:200px;width:18px;height:18px;border-radius:50%;' +
    'background:red;z-index:2147483647;pointer-events:none;transform:translate(-50%,-50%);' +
    'box-shadow:0 0 0 4px rgba(255,0,0,0.35),0 0 14px rgba(255,0,0,0.85);';
  document.documentElement.appendChild(dot);
  if (window.__pilot_dot_follow) return 'ok';
  window.__pilot_dot_follow = true;
  window.addEventListener('mousemove', e => {
    const d = document.getElementById('__pilot_dot');
    if (d) { d.style.left = e.clientX + 'px'; d.style.top = e.clientY + 'px'; }
  }, true);
  window.addEventListener('mousedown', e => {
    const ring = document.createElement('div');
    ring.style.cssText = 'position:fixed;left:' + e.clientX + 'px;top:' + e.clientY + 'px;width:16px;height:16px;' +
      'border:3px solid red;border-radius:50%;z-index:2147483647;pointer-events:none;transform:translate(-50%,-50%);';
    document.documentElement.appendChild(ring);
    setTimeout(() => ring.remove(), 550);
  }, true);
  return 'ok';
})()
"#;

/// Installs `window.__pilot_highlight(el, label)` which frames an element.
const HIGHLIGHT_JS: &str = r#"
(() => {
  for (const id of ['__pilot_box', '__pilot_label']) {
    const old = document.getElementById(id);
    if (old) old.remove();
  }
  const box = document.createElement('div');
  box.id = '__pilot_box';
  box.style.cssText = 'position:fixed;left:0;top:0;width:0;height:0;border:3px solid deepskyblue;' +
    'border-radius:6px;z-index:2147483646;pointer-events:none;box-sizing:border-box;' +
    'background:rgba(0,191,255,0.06);display:none;';
  const label = document.createElement('div');
  label.id = '__pilot_label';
  label.style.cssText = 'position:fixed;left:0;top:0;max-width:70vw;font:12px system-ui,sans-serif;' +
    'color:white;background:rgba(0,0,0,0.78);padding:4px 6px;border-radius:6px;' +
    'z-index:2147483647;pointer-events:none;display:none;';
  document.documentElement.appendChild(box);
  document.documentElement.appendChild(label);
  window.__pilot_highlight = (el, text) => {
    el.scrollIntoView({block: 'center', inline: 'center'});
    const r = el.getBoundingClientRect();
    Object.assign(box.style, {display: 'block', left: r.left + 'px', top: r.top + 'px',
      width: r.width + 'px', height: r.height + 'px'});
    label.textContent = text;
    Object.assign(label.style, {display: 'block', left: r.left + 'px',
      top: Math.max(0, r.top - 24) + 'px'});
  };
  return 'ok';
})()
"#;

#[derive(Debug, Default, Clone, Copy)]
pub struct DomOverlay;

impl Overlay for DomOverlay {
    fn install_cursor(&self, page: &dyn Page) -> Result<()> {
        page.run_script(DOT_JS).map(drop)
    }

    fn install_highlighter(&self, page: &dyn Page) -> Result<()> {
        page.run_script(HIGHLIGHT_JS).map(drop)
    }

    fn highlight(&self, page: &dyn Page, locator: &Locator, label: &str) -> Result<()> {
        page.run_script(&resolve_call(locator, "highlight", label)).map(drop)
    }
}
