use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use browser_pilot::agent::{AgentEvent, Interjections};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info};

fn to_sse_event(event: &AgentEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.kind()).data(data)
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<String>,
    event_tx: broadcast::Sender<AgentEvent>,
    notes: Interjections,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

#[derive(Deserialize)]
struct NotePayload {
    note: String,
}

/// Bind the UI on `port` (or the next free port up to `port + 9`).
/// Goals arrive on the returned receiver; run progress goes out on the sender.
pub async fn start_server(
    port: u16,
    notes: Interjections,
) -> Result<(mpsc::Receiver<String>, broadcast::Sender<AgentEvent>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let (event_tx, _) = broadcast::channel::<AgentEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
        notes,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/note", post(note_handler))
        .route("/pause", post(pause_handler))
        .route("/resume", post(resume_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(10) {
        if let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            bound = Some((listener, p));
            break;
        }
    }
    let (listener, port) =
        bound.ok_or_else(|| anyhow!("no free port in {port}..{}", port.saturating_add(10)))?;

    info!("web UI at http://localhost:{port}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "web server stopped");
        }
    });

    Ok((cmd_rx, event_tx))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> (StatusCode, &'static str) {
    let command = payload.command.trim().to_string();
    if command.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty command");
    }
    debug!(%command, "POST /command");
    // capacity 1: a second goal waits until the current run ends
    match state.cmd_tx.send(command).await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "agent stopped"),
    }
}

async fn note_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NotePayload>,
) -> &'static str {
    let note = payload.note.trim();
    if !note.is_empty() {
        debug!(%note, "POST /note");
        state.notes.push(note);
    }
    "ok"
}

/// Takes effect before the agent's next step.
async fn pause_handler(State(state): State<Arc<AppState>>) -> &'static str {
    debug!("POST /pause");
    state.notes.pause();
    "ok"
}

async fn resume_handler(State(state): State<Arc<AppState>>) -> &'static str {
    debug!("POST /resume");
    state.notes.resume();
    "ok"
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Browser Pilot</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #0b0d12; color: #dde; font-family: system-ui, sans-serif; height: 100vh; display: flex; flex-direction: column; }
  header { padding: 18px 28px; border-bottom: 1px solid #1c2030; display: flex; gap: 10px; align-items: center; }
  header h1 { font-size: 18px; font-weight: 600; }
  .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  .dot.busy { background: #f59e0b; }
  main { flex: 1; display: flex; flex-direction: column; max-width: 820px; width: 100%; margin: 0 auto; padding: 20px 28px; gap: 12px; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 14px; background: #12151d; border-left: 3px solid #3b82f6; }
  .entry.user { border-color: #6366f1; }
  .entry.step { font-family: ui-monospace, monospace; font-size: 13px; }
  .entry.thinking { border-color: #f59e0b; color: #fcd34d; }
  .entry.error { border-color: #ef4444; color: #fca5a5; }
  .entry.done { border-color: #22c55e; color: #86efac; }
  .entry.note { border-color: #a855f7; color: #d8b4fe; }
  .row { display: flex; gap: 8px; }
  input { flex: 1; background: #12151d; border: 1px solid #252a3a; border-radius: 6px; padding: 10px 14px; color: #fff; font-size: 15px; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 6px; padding: 10px 20px; font-weight: 600; cursor: pointer; }
  button:disabled, input:disabled { opacity: 0.5; cursor: not-allowed; }
</style>
</head>
<body>
  <header><div class="dot" id="dot"></div><h1>Browser Pilot</h1></header>
  <main>
    <div id="log"></div>
    <div class="row">
      <input id="cmd" placeholder="Goal for the agent..." autofocus />
      <button id="send" onclick="sendGoal()">Run</button>
    </div>
    <div class="row">
      <input id="note" placeholder="Note for the running agent..." />
      <button onclick="sendNote()">Note</button>
      <button id="pause" onclick="togglePause()">Pause</button>
    </div>
  </main>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const note = document.getElementById('note');
  const sendBtn = document.getElementById('send');
  const dot = document.getElementById('dot');
  const esc = s => String(s).replace(/</g, '&lt;');

  function add(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    cmd.disabled = b;
    sendBtn.disabled = b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) cmd.focus();
  }

  async function post(path, body) {
    await fetch(path, { method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify(body) });
  }

  async function sendGoal() {
    const text = cmd.value.trim();
    if (!text) return;
    cmd.value = '';
    add('user', '<strong>Goal:</strong> ' + esc(text));
    setBusy(true);
    await post('/command', {command: text});
  }

  async function sendNote() {
    const text = note.value.trim();
    if (!text) return;
    note.value = '';
    add('note', '<strong>Note:</strong> ' + esc(text));
    await post('/note', {note: text});
  }

  let paused = false;
  async function togglePause() {
    paused = !paused;
    document.getElementById('pause').textContent = paused ? 'Resume' : 'Pause';
    add('note', paused ? 'Pause requested' : 'Resumed');
    await post(paused ? '/pause' : '/resume', {});
  }

  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') sendGoal(); });
  note.addEventListener('keydown', e => { if (e.key === 'Enter') sendNote(); });

  const es = new EventSource('/events');
  es.addEventListener('thinking', e => {
    const d = JSON.parse(e.data);
    add('thinking', 'Thinking (step ' + d.step + ', attempt ' + d.attempt + ')');
  });
  es.addEventListener('paused', e => {
    add('note', 'Paused before step ' + JSON.parse(e.data).step);
  });
  es.addEventListener('step', e => {
    const d = JSON.parse(e.data);
    add('step', '<strong>Step ' + d.number + '</strong> ' + esc(d.description));
  });
  es.addEventListener('step_error', e => {
    add('error', '<strong>Error:</strong> ' + esc(JSON.parse(e.data).message));
  });
  es.addEventListener('finished', e => {
    const d = JSON.parse(e.data);
    add('done', '<strong>Done:</strong> ' + esc(d.summary || 'goal reached'));
    setBusy(false);
  });
  es.addEventListener('exhausted', e => {
    add('error', 'Gave up after ' + JSON.parse(e.data).steps + ' steps.');
    setBusy(false);
  });
  es.addEventListener('failed', e => {
    add('error', '<strong>Run failed:</strong> ' + esc(JSON.parse(e.data).message));
    setBusy(false);
  });
</script>
</body>
</html>
"##;
