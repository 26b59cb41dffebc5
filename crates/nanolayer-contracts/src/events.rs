use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::generation::StudioPhase;

pub type EventPayload = Map<String, Value>;

/// Append-only structured log of a studio session (`events.jsonl`).
///
/// Every line is one compact JSON object carrying `type`, `session_id`,
/// `seq`, `phase` and `ts`, followed by the caller payload. Payload keys win
/// on collision. `seq` counts the lines of the session from zero in file
/// order; `phase` is the studio phase when the event was recorded.
/// Clones share the same file and counter, so worker threads can log too.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(
        &self,
        event_type: &str,
        phase: StudioPhase,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut next_seq = self
            .inner
            .next_seq
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut event = Map::new();
        event.insert("type".to_string(), json!(event_type));
        event.insert("session_id".to_string(), json!(self.inner.session_id));
        event.insert("seq".to_string(), json!(*next_seq));
        event.insert("phase".to_string(), json!(phase.as_str()));
        event.insert("ts".to_string(), json!(now_utc_iso()));
        event.extend(payload);

        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed to open {}", self.inner.path.display()))?;
        file.write_all(format!("{line}\n").as_bytes())?;
        // Only lines that reached the file consume a number.
        *next_seq += 1;

        Ok(Value::Object(event))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
