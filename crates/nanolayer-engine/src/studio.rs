use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ScopedJoinHandle};

use nanolayer_contracts::chat::{ChatMessage, ConversationLog, MessageRole};
use nanolayer_contracts::events::{EventPayload, EventWriter};
use nanolayer_contracts::generation::{GenerationState, StudioPhase};
use nanolayer_contracts::layers::{AssetStore, ImageData, Layer, SplitRole};
use nanolayer_contracts::prompts::{
    BASE_SUCCESS_NOTICE, SPLIT_FAILURE_NOTICE, SPLIT_STARTED_NOTICE, SPLIT_SUCCESS_NOTICE,
};
use serde_json::{json, Map, Value};

use crate::error::GenerationError;
use crate::gateway::ImageGateway;

/// What a call to one of the studio entry points amounted to. The effects
/// themselves are observed through the read accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Rejected up front; nothing changed.
    Ignored,
    Succeeded,
    /// A failure notice was posted; no layer was committed.
    Failed,
}

#[derive(Debug)]
struct StudioState {
    messages: ConversationLog,
    layers: AssetStore,
    generation: GenerationState,
}

/// Owns the conversation log, the asset store and the busy flag, and drives
/// the gateway on behalf of the presentation layer.
///
/// Entry points take `&self`: a presentation thread can keep reading
/// snapshots while a request is in flight. The state lock is never held
/// across a gateway call, and every update a reader can observe is made in
/// one critical section.
pub struct Studio<G> {
    gateway: G,
    state: Mutex<StudioState>,
    events: Option<EventWriter>,
}

impl<G: ImageGateway> Studio<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            state: Mutex::new(StudioState {
                messages: ConversationLog::with_welcome(),
                layers: AssetStore::new(),
                generation: GenerationState::idle(),
            }),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        let (messages, layers) = {
            let state = self.lock();
            (state.messages.messages().len(), state.layers.len())
        };
        self.emit(
            "session_started",
            json!({
                "messages": messages,
                "layers": layers,
            }),
        );
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn event_writer(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.messages().to_vec()
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.messages().len()
    }

    /// Layers, most recent first.
    pub fn layers(&self) -> Vec<Layer> {
        self.lock().layers.iter().cloned().collect()
    }

    pub fn assets(&self) -> AssetStore {
        self.lock().layers.clone()
    }

    pub fn layer(&self, id: &str) -> Option<Layer> {
        self.lock().layers.get(id).cloned()
    }

    pub fn generation_state(&self) -> GenerationState {
        self.lock().generation
    }

    /// Generates a new ORIGINAL layer from `text`.
    ///
    /// Ignored when the prompt is blank or another request is in flight.
    pub fn submit_prompt(&self, text: &str) -> RequestOutcome {
        if text.trim().is_empty() {
            self.emit_ignored("submit_prompt", "empty_prompt");
            return RequestOutcome::Ignored;
        }
        {
            let mut state = self.lock();
            if !state.generation.try_begin(StudioPhase::GeneratingBase) {
                drop(state);
                self.emit_ignored("submit_prompt", "busy");
                return RequestOutcome::Ignored;
            }
            state.messages.push(MessageRole::User, text);
        }
        let busy = BusyGuard::new(&self.state);
        self.emit("prompt_submitted", json!({ "prompt": text }));

        let generated = panic::catch_unwind(AssertUnwindSafe(|| self.gateway.generate_base(text)))
            .unwrap_or_else(|_| Err(GenerationError::upstream("image gateway panicked")));
        let created = generated.map(|image| Layer::original(image, text));

        let committed = busy.settle(|state| {
            let committed = created.and_then(|layer| {
                let layer_id = layer.id.clone();
                let summary = layer.summary();
                state
                    .layers
                    .prepend_original(layer)
                    .map_err(|err| GenerationError::upstream(format!("{err:#}")))?;
                state.messages.push_related(
                    MessageRole::Model,
                    BASE_SUCCESS_NOTICE,
                    Some(layer_id),
                );
                Ok(summary)
            });
            if let Err(err) = &committed {
                state.messages.push(MessageRole::System, err.user_notice());
            }
            committed
        });

        match committed {
            Ok(summary) => {
                self.emit("layer_created", Value::Object(summary));
                RequestOutcome::Succeeded
            }
            Err(failure) => {
                self.emit(
                    "generation_failed",
                    json!({
                        "operation": "generate_base",
                        "error_kind": failure.kind(),
                        "error": failure.to_string(),
                    }),
                );
                RequestOutcome::Failed
            }
        }
    }

    /// Splits an ORIGINAL layer into SUBJECT and BACKGROUND layers.
    ///
    /// Both gateway calls run concurrently and are always awaited together.
    /// The pair is committed only if both succeed. Ignored when the id does
    /// not name an ORIGINAL layer or another request is in flight.
    pub fn request_split(&self, original_layer_id: &str) -> RequestOutcome {
        let source = {
            let mut state = self.lock();
            let source = state
                .layers
                .original(original_layer_id)
                .map(|layer| layer.image.clone());
            let Some(source) = source else {
                drop(state);
                self.emit_ignored("request_split", "unknown_original");
                return RequestOutcome::Ignored;
            };
            if !state.generation.try_begin(StudioPhase::SplittingLayers) {
                drop(state);
                self.emit_ignored("request_split", "busy");
                return RequestOutcome::Ignored;
            }
            state.messages.push_related(
                MessageRole::Model,
                SPLIT_STARTED_NOTICE,
                Some(original_layer_id.to_string()),
            );
            source
        };
        let busy = BusyGuard::new(&self.state);
        self.emit("split_started", json!({ "original_id": original_layer_id }));

        let (subject, background) = self.run_split(&source);
        let (subject, background) = match (subject, background) {
            (Ok(subject), Ok(background)) => (
                Layer::derived(SplitRole::Subject, subject, original_layer_id),
                Layer::derived(SplitRole::Background, background, original_layer_id),
            ),
            (subject, background) => {
                busy.settle(|state| {
                    state.messages.push(MessageRole::System, SPLIT_FAILURE_NOTICE);
                });
                self.emit(
                    "split_failed",
                    json!({
                        "original_id": original_layer_id,
                        "subject_error": subject.err().map(|err| error_text(&err)),
                        "background_error": background.err().map(|err| error_text(&err)),
                    }),
                );
                return RequestOutcome::Failed;
            }
        };

        let subject_id = subject.id.clone();
        let background_id = background.id.clone();
        let summaries = [subject.summary(), background.summary()];
        let committed = busy.settle(|state| {
            let committed = state.layers.prepend_split(subject, background);
            let (role, notice) = if committed.is_ok() {
                (MessageRole::Model, SPLIT_SUCCESS_NOTICE)
            } else {
                (MessageRole::System, SPLIT_FAILURE_NOTICE)
            };
            state
                .messages
                .push_related(role, notice, Some(original_layer_id.to_string()));
            committed
        });

        if let Err(err) = committed {
            self.emit(
                "split_failed",
                json!({
                    "original_id": original_layer_id,
                    "error": format!("{err:#}"),
                }),
            );
            return RequestOutcome::Failed;
        }
        for summary in summaries {
            self.emit("layer_created", Value::Object(summary));
        }
        self.emit(
            "split_committed",
            json!({
                "original_id": original_layer_id,
                "subject_id": subject_id,
                "background_id": background_id,
            }),
        );
        RequestOutcome::Succeeded
    }

    fn run_split(
        &self,
        source: &ImageData,
    ) -> (
        Result<ImageData, GenerationError>,
        Result<ImageData, GenerationError>,
    ) {
        thread::scope(|scope| {
            let subject = scope.spawn(|| self.gateway.generate_layer(source, SplitRole::Subject));
            let background =
                scope.spawn(|| self.gateway.generate_layer(source, SplitRole::Background));
            (
                join_layer(subject, SplitRole::Subject),
                join_layer(background, SplitRole::Background),
            )
        })
    }

    fn lock(&self) -> MutexGuard<'_, StudioState> {
        lock_state(&self.state)
    }

    fn emit_ignored(&self, operation: &str, reason: &str) {
        self.emit(
            "request_ignored",
            json!({
                "operation": operation,
                "reason": reason,
            }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        if let Some(events) = self.events.as_ref() {
            let phase = self.lock().generation.phase();
            // Logging never changes the outcome of a request.
            let _ = events.emit(event_type, phase, map_object(payload));
        }
    }
}

/// Returns the studio to idle when dropped, so a panic past the point of
/// entering a busy phase cannot leave the flag set. `settle` performs the
/// final state update and the return to idle in one critical section.
struct BusyGuard<'a> {
    state: &'a Mutex<StudioState>,
    armed: bool,
}

impl<'a> BusyGuard<'a> {
    fn new(state: &'a Mutex<StudioState>) -> Self {
        Self { state, armed: true }
    }

    fn settle<R>(mut self, update: impl FnOnce(&mut StudioState) -> R) -> R {
        let mut state = lock_state(self.state);
        let out = update(&mut state);
        state.generation.finish();
        self.armed = false;
        out
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock_state(self.state).generation.finish();
        }
    }
}

fn lock_state(state: &Mutex<StudioState>) -> MutexGuard<'_, StudioState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_layer(
    handle: ScopedJoinHandle<'_, Result<ImageData, GenerationError>>,
    role: SplitRole,
) -> Result<ImageData, GenerationError> {
    handle.join().unwrap_or_else(|_| {
        Err(GenerationError::split_failed(
            role,
            GenerationError::upstream("split worker panicked"),
        ))
    })
}

fn error_text(err: &GenerationError) -> String {
    let root = err.root();
    if std::ptr::eq(root, err) {
        err.to_string()
    } else {
        format!("{err}: {root}")
    }
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
