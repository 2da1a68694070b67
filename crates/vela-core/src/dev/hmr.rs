//! Hot module replacement: change coalescing and client fan-out.
//!
//! ```text
//! file change ─► HmrThrottle (debounce per path) ─► HmrBroadcaster ─► connection 1..N
//! ```
//!
//! The throttle keeps one pending entry per path. Every new event restarts the
//! debounce window, bounded by a maximum wait so a constantly-changing file
//! still flushes. When the window closes, all pending paths go out as a single
//! `update` message.
//!
//! The broadcaster only holds senders. Each [`HmrConnection`] owns its receiver
//! and unregisters itself on drop; a failed send just prunes that sender.

use super::rewrite::SCRIPT_EXTENSIONS;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Websocket path clients connect to.
pub const HMR_PATH: &str = "/__hmr";

/// URL the client runtime is served from.
pub const CLIENT_PATH: &str = "/@vela/client";

/// Upper bound on one batch's lifetime, in debounce windows.
const MAX_WAIT_WINDOWS: u32 = 10;

/// What a client does with a changed path. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    /// Swap the stylesheet in place.
    CssUpdate,
    /// Re-import the module.
    ModuleReload,
    /// Reload the page.
    FullReload,
}

impl UpdateKind {
    /// Kind for a changed file, by extension.
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "css" => Self::CssUpdate,
            "json" => Self::ModuleReload,
            ext if SCRIPT_EXTENSIONS.contains(&ext) => Self::ModuleReload,
            _ => Self::FullReload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HmrUpdate {
    /// Root URL path (`/src/App.tsx`).
    pub path: String,
    pub kind: UpdateKind,
}

impl HmrUpdate {
    #[must_use]
    pub fn new(path: impl Into<String>, kind: UpdateKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Server → client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrPayload {
    Connected {
        version: String,
    },
    Update {
        updates: Vec<HmrUpdate>,
        timestamp: u64,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        column: Option<u32>,
    },
    Restarting,
    #[serde(rename = "config:changed")]
    ConfigChanged {
        path: String,
    },
}

impl HmrPayload {
    /// Single full-reload update for `path`.
    #[must_use]
    pub fn full_reload(path: impl Into<String>) -> Self {
        Self::Update {
            updates: vec![HmrUpdate::new(path, UpdateKind::FullReload)],
            timestamp: now_ms(),
        }
    }
}

#[derive(Default)]
struct Clients {
    next_id: AtomicU64,
    senders: DashMap<u64, mpsc::UnboundedSender<Arc<str>>>,
}

/// Fans serialized payloads out to every open connection.
#[derive(Default)]
pub struct HmrBroadcaster {
    clients: Arc<Clients>,
}

impl HmrBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Its first message is `connected`.
    #[must_use]
    pub fn connect(&self) -> HmrConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.clients.next_id.fetch_add(1, Ordering::Relaxed);
        let hello = HmrPayload::Connected {
            version: crate::VERSION.to_string(),
        };
        if let Ok(text) = serde_json::to_string(&hello) {
            let _ = tx.send(Arc::from(text));
        }
        self.clients.senders.insert(id, tx);
        debug!(client = id, "hmr client connected");

        HmrConnection {
            id,
            clients: Arc::downgrade(&self.clients),
            rx,
        }
    }

    /// Send `payload` to every connection; returns how many accepted it.
    pub fn broadcast(&self, payload: &HmrPayload) -> usize {
        let text: Arc<str> = match serde_json::to_string(payload) {
            Ok(text) => Arc::from(text),
            Err(err) => {
                debug!(error = %err, "cannot serialize hmr payload");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for entry in self.clients.senders.iter() {
            if entry.value().send(text.clone()).is_ok() {
                delivered += 1;
            } else {
                gone.push(*entry.key());
            }
        }
        for id in gone {
            debug!(client = id, "hmr delivery failed, dropping client");
            self.clients.senders.remove(&id);
        }
        delivered
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.senders.len()
    }
}

/// One client's view of the broadcast stream.
pub struct HmrConnection {
    id: u64,
    clients: Weak<Clients>,
    rx: mpsc::UnboundedReceiver<Arc<str>>,
}

impl HmrConnection {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next serialized payload; `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }
}

impl Drop for HmrConnection {
    fn drop(&mut self) {
        if let Some(clients) = self.clients.upgrade() {
            clients.senders.remove(&self.id);
            debug!(client = self.id, "hmr client disconnected");
        }
    }
}

/// Debounces updates per path before broadcasting them as one batch.
#[derive(Clone)]
pub struct HmrThrottle {
    tx: mpsc::UnboundedSender<HmrUpdate>,
}

impl HmrThrottle {
    /// Start the throttle task on the current runtime.
    #[must_use]
    pub fn spawn(broadcaster: Arc<HmrBroadcaster>, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_throttle(rx, broadcaster, window, window * MAX_WAIT_WINDOWS));
        Self { tx }
    }

    pub fn notify(&self, update: HmrUpdate) {
        if self.tx.send(update).is_err() {
            debug!("hmr throttle stopped, update dropped");
        }
    }
}

async fn run_throttle(
    mut rx: mpsc::UnboundedReceiver<HmrUpdate>,
    broadcaster: Arc<HmrBroadcaster>,
    window: Duration,
    max_wait: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut pending = BTreeMap::new();
        merge(&mut pending, first);
        let cap = Instant::now() + max_wait;

        loop {
            let deadline = (Instant::now() + window).min(cap);
            tokio::select! {
                next = rx.recv() => match next {
                    Some(update) => merge(&mut pending, update),
                    None => break,
                },
                () = tokio::time::sleep_until(deadline) => break,
            }
        }

        let updates: Vec<HmrUpdate> = pending
            .into_iter()
            .map(|(path, kind)| HmrUpdate { path, kind })
            .collect();
        let count = updates.len();
        let delivered = broadcaster.broadcast(&HmrPayload::Update {
            updates,
            timestamp: now_ms(),
        });
        debug!(count, delivered, "hmr flush");
    }
}

/// Keep the most severe kind per path.
fn merge(pending: &mut BTreeMap<String, UpdateKind>, update: HmrUpdate) {
    pending
        .entry(update.path)
        .and_modify(|kind| *kind = (*kind).max(update.kind))
        .or_insert(update.kind);
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Prefix for every served browser module; gives it `import.meta.hot`.
#[must_use]
pub fn module_preamble(url: &str) -> String {
    let owner = serde_json::to_string(url).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "import {{ createHotContext as __vela_createHotContext }} from \"{CLIENT_PATH}\";\nimport.meta.hot = __vela_createHotContext({owner});\n"
    )
}

/// Browser runtime served at [`CLIENT_PATH`].
pub const CLIENT_RUNTIME: &str = r#"// vela HMR client
const hotModules = new Map();
const disposers = new Map();
const pruners = new Map();
const dataMap = new Map();
const listeners = new Map();

let socket;
let connected = false;

function connect() {
  const protocol = location.protocol === 'https:' ? 'wss' : 'ws';
  socket = new WebSocket(`${protocol}://${location.host}/__hmr`);
  socket.addEventListener('open', () => {
    connected = true;
  });
  socket.addEventListener('message', (event) => handleMessage(JSON.parse(event.data)));
  socket.addEventListener('close', () => {
    if (connected) {
      connected = false;
      console.log('[vela] server connection lost, waiting for restart...');
      waitForServer();
    }
  });
}

async function waitForServer() {
  for (;;) {
    await new Promise((resolve) => setTimeout(resolve, 1000));
    try {
      await fetch(location.href, { method: 'HEAD' });
      location.reload();
      return;
    } catch {}
  }
}

function emit(event, data) {
  (listeners.get(event) || []).forEach((cb) => cb(data));
}

function handleMessage(msg) {
  switch (msg.type) {
    case 'connected':
      console.log(`[vela] connected (v${msg.version}).`);
      break;
    case 'update':
      hideErrorOverlay();
      for (const update of msg.updates) {
        applyUpdate(update, msg.timestamp);
      }
      break;
    case 'error':
      console.error(`[vela] ${msg.message}`);
      showErrorOverlay(msg);
      break;
    case 'restarting':
      console.log('[vela] server restarting...');
      break;
    case 'config:changed':
      console.log(`[vela] ${msg.path} changed.`);
      break;
  }
  emit(msg.type, msg);
}

async function applyUpdate({ path, kind }, timestamp) {
  if (kind === 'full-reload') {
    location.reload();
    return;
  }
  if (kind === 'css-update') {
    document.querySelectorAll('link[rel="stylesheet"]').forEach((link) => {
      const url = new URL(link.href);
      if (url.pathname === path) {
        url.searchParams.set('t', String(timestamp));
        link.href = url.toString();
      }
    });
    if (hotModules.has(path)) {
      await import(`${path}?import&t=${timestamp}`);
    }
    return;
  }

  const hot = hotModules.get(path);
  if (!hot || !hot.selfAccepted) {
    location.reload();
    return;
  }
  const dispose = disposers.get(path);
  if (dispose) dispose(dataMap.get(path));
  try {
    const fresh = await import(`${path}?t=${timestamp}`);
    hot.callbacks.forEach((cb) => cb(fresh));
    console.log(`[vela] hot updated: ${path}`);
  } catch (err) {
    console.error(`[vela] hot update failed for ${path}`, err);
    location.reload();
  }
}

export function showErrorOverlay(err) {
  let overlay = document.getElementById('__vela_error_overlay');
  if (!overlay) {
    overlay = document.createElement('div');
    overlay.id = '__vela_error_overlay';
    overlay.style.cssText =
      'position:fixed;inset:0;background:rgba(0,0,0,0.9);color:#ff5555;padding:32px;' +
      'font-family:monospace;font-size:15px;white-space:pre-wrap;overflow:auto;z-index:2147483647';
    overlay.addEventListener('click', hideErrorOverlay);
    document.body.appendChild(overlay);
  }
  const where = err.file ? `${err.file}${err.line ? `:${err.line}:${err.column || 0}` : ''}\n\n` : '';
  overlay.textContent = `${where}${err.message}`;
  overlay.style.display = 'block';
}

function hideErrorOverlay() {
  const overlay = document.getElementById('__vela_error_overlay');
  if (overlay) overlay.style.display = 'none';
}

export function createHotContext(owner) {
  if (!dataMap.has(owner)) dataMap.set(owner, {});
  const entry = { selfAccepted: false, callbacks: [] };
  hotModules.set(owner, entry);

  return {
    get data() {
      return dataMap.get(owner);
    },
    accept(cb) {
      entry.selfAccepted = true;
      if (typeof cb === 'function') entry.callbacks.push(cb);
    },
    dispose(cb) {
      disposers.set(owner, cb);
    },
    prune(cb) {
      pruners.set(owner, cb);
    },
    invalidate() {
      location.reload();
    },
    on(event, cb) {
      if (!listeners.has(event)) listeners.set(event, []);
      listeners.get(event).push(cb);
    },
  };
}

connect();
"#;
