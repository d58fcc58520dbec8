use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use falboard_contracts::events::{EventPayload, EventWriter};
use falboard_contracts::form::{Completion, FormState, PendingSubmission, RequestState};
use falboard_contracts::models::ParamValue;
use serde_json::{json, Value};

use crate::client::{GenerationClient, GenerationRequest, GenerationResponse, DEFAULT_POLL_INTERVAL};
use crate::http::error_chain_text;

const ERROR_DETAIL_MAX_CHARS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub poll_interval: Duration,
    pub logs: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            logs: true,
        }
    }
}

struct WorkerDone {
    pending: PendingSubmission,
    outcome: Result<GenerationResponse>,
}

/// A form bound to a generation client. Every state change is mirrored to
/// the event log.
pub struct FormSession {
    form: FormState,
    client: Arc<dyn GenerationClient>,
    events: EventWriter,
    options: RequestOptions,
    done_tx: Sender<WorkerDone>,
    done_rx: Receiver<WorkerDone>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl FormSession {
    pub fn new(
        form: FormState,
        client: Arc<dyn GenerationClient>,
        events: EventWriter,
        options: RequestOptions,
    ) -> Result<Self> {
        let (done_tx, done_rx) = mpsc::channel();
        let session = Self {
            form,
            client,
            events,
            options,
            done_tx,
            done_rx,
            workers: Vec::new(),
        };
        session.emit(
            "session_started",
            json!({
                "client": session.client.name(),
                "model_id": session.form.selected_model(),
                "poll_interval_ms": session.options.poll_interval.as_millis() as u64,
                "logs": session.options.logs,
            }),
        )?;
        Ok(session)
    }

    pub fn form(&self) -> &FormState {
        &self.form
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn request_state(&self) -> &RequestState {
        self.form.request_state()
    }

    pub fn select_model(&mut self, model_id: &str) -> Result<()> {
        let was_in_flight = self.form.is_in_flight();
        self.form.select_model(model_id)?;
        self.emit(
            "model_selected",
            json!({
                "model_id": model_id,
                "fields": self.form.payload(),
                "abandoned_request": was_in_flight,
            }),
        )?;
        Ok(())
    }

    pub fn set_field_text(&mut self, name: &str, raw: &str) -> Result<ParamValue> {
        let stored = self.form.set_field_text(name, raw)?.clone();
        self.emit_field_updated(name, &stored)?;
        Ok(stored)
    }

    pub fn set_field_value(&mut self, name: &str, value: ParamValue) -> Result<ParamValue> {
        let stored = self.form.set_field_value(name, value)?.clone();
        self.emit_field_updated(name, &stored)?;
        Ok(stored)
    }

    pub fn set_streaming(&mut self, streaming: bool) -> Result<()> {
        self.form.set_streaming(streaming);
        self.emit("field_updated", json!({"field": "streaming", "value": streaming}))?;
        Ok(())
    }

    pub fn randomize_seed(&mut self) -> Result<Option<i64>> {
        let seed = self.form.randomize_seed();
        if let Some(seed) = seed {
            self.emit("seed_randomized", json!({"seed": seed}))?;
        }
        Ok(seed)
    }

    /// Runs one generation on the calling thread and returns the final state.
    pub fn submit(&mut self) -> Result<RequestState> {
        let pending = self.begin()?;
        let outcome = self.client.subscribe(&self.request_for(&pending));
        self.finish(WorkerDone { pending, outcome });
        Ok(self.form.request_state().clone())
    }

    /// Starts a generation on a worker thread. The result is applied by
    /// [`FormSession::poll_completion`] or [`FormSession::wait_completion`].
    pub fn submit_in_background(&mut self) -> Result<()> {
        let pending = self.begin()?;
        let request = self.request_for(&pending);
        let client = Arc::clone(&self.client);
        let done_tx = self.done_tx.clone();
        let worker_pending = pending.clone();
        let spawned = thread::Builder::new()
            .name(format!("falboard-generation-{}", pending.epoch))
            .spawn(move || {
                let outcome = client.subscribe(&request);
                let _ = done_tx.send(WorkerDone {
                    pending: worker_pending,
                    outcome,
                });
            });
        match spawned {
            Ok(handle) => {
                self.workers.push(handle);
                Ok(())
            }
            Err(err) => {
                let err = anyhow::Error::new(err).context("generation worker spawn failed");
                let detail = error_chain_text(&err, ERROR_DETAIL_MAX_CHARS);
                self.finish(WorkerDone {
                    pending,
                    outcome: Err(err),
                });
                anyhow::bail!(detail)
            }
        }
    }

    /// Applies every finished worker result without blocking. Returns true
    /// when the visible request state changed.
    pub fn poll_completion(&mut self) -> bool {
        let mut changed = false;
        while let Ok(done) = self.done_rx.try_recv() {
            changed |= self.finish(done);
        }
        self.reap_workers();
        changed
    }

    /// Blocks until a current result lands or `timeout` passes. Stale results
    /// that arrive meanwhile are discarded and waiting continues.
    pub fn wait_completion(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(done) => {
                    if self.finish(done) {
                        self.reap_workers();
                        return Ok(true);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow::anyhow!("generation worker channel closed"))
                }
            }
        }
    }

    fn begin(&mut self) -> Result<PendingSubmission> {
        let pending = match self.form.begin_submit() {
            Ok(pending) => pending,
            Err(err) => {
                self.record("submit_rejected", json!({"reason": err.to_string()}));
                return Err(err).context("submit rejected");
            }
        };
        let started = self.emit(
            "generation_started",
            json!({
                "model_id": pending.model_id,
                "epoch": pending.epoch,
                "payload": pending.payload,
            }),
        );
        if let Err(err) = started {
            // Nothing will ever complete this epoch.
            self.form.abort(&pending);
            return Err(err);
        }
        Ok(pending)
    }

    fn request_for(&self, pending: &PendingSubmission) -> GenerationRequest {
        GenerationRequest {
            model_id: pending.model_id.clone(),
            input: pending.payload.clone(),
            poll_interval: self.options.poll_interval,
            logs: self.options.logs,
        }
    }

    // The form transition happens first; event writes after it are best-effort.
    fn finish(&mut self, done: WorkerDone) -> bool {
        let WorkerDone { pending, outcome } = done;
        let (request_id, logs, detail, urls) = match outcome {
            Ok(response) => {
                let urls = response.image_urls();
                (response.request_id, response.logs, None, Ok(urls))
            }
            Err(err) => {
                let detail = error_chain_text(&err, ERROR_DETAIL_MAX_CHARS);
                (None, Vec::new(), Some(detail), Err(err))
            }
        };

        match self.form.complete(&pending, urls) {
            Completion::Stale => {
                self.record(
                    "generation_discarded",
                    json!({
                        "model_id": pending.model_id,
                        "epoch": pending.epoch,
                        "current_epoch": self.form.epoch(),
                        "logs": logs,
                    }),
                );
                false
            }
            Completion::Applied(state) => {
                for message in &logs {
                    self.record(
                        "generation_log",
                        json!({"epoch": pending.epoch, "message": message}),
                    );
                }
                match state {
                    RequestState::Succeeded(urls) => self.record(
                        "generation_succeeded",
                        json!({
                            "model_id": pending.model_id,
                            "epoch": pending.epoch,
                            "request_id": request_id,
                            "urls": urls,
                        }),
                    ),
                    other => {
                        let message = match &other {
                            RequestState::Failed(message) => message.clone(),
                            other => other.label().to_string(),
                        };
                        self.record(
                            "generation_failed",
                            json!({
                                "model_id": pending.model_id,
                                "epoch": pending.epoch,
                                "request_id": request_id,
                                "message": message,
                                "detail": detail.map(Value::String).unwrap_or(Value::Null),
                            }),
                        );
                    }
                }
                true
            }
        }
    }

    // Workers for abandoned requests are never joined while running; a hung
    // remote call must not block the session.
    fn reap_workers(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .workers
            .drain(..)
            .partition(|handle| handle.is_finished());
        for handle in finished {
            let _ = handle.join();
        }
        self.workers = running;
    }

    fn emit_field_updated(&self, name: &str, value: &ParamValue) -> Result<()> {
        self.emit(
            "field_updated",
            json!({"field": name, "value": value.to_json()}),
        )
    }

    fn record(&self, event_type: &str, payload: Value) {
        let _ = self.emit(event_type, payload);
    }

    fn emit(&self, event_type: &str, payload: Value) -> Result<()> {
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        self.events.emit(event_type, payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{bail, Result};
    use falboard_contracts::events::EventWriter;
    use falboard_contracts::form::{
        FormError, FormState, RequestState, GENERATION_FAILED_MESSAGE, NO_IMAGES_MESSAGE,
    };
    use falboard_contracts::models::{ModelRegistry, ParamValue};
    use serde_json::{json, Value};

    use super::{FormSession, RequestOptions};
    use crate::client::{GenerationClient, GenerationRequest, GenerationResponse};

    const DEMO_MODELS: &str = r#"[
        {"id": "demo/fast", "label": "Fast", "parameters": [
            {"name": "prompt", "type": "string", "description": "Prompt."},
            {"name": "steps", "type": "integer", "description": "Steps.",
             "default": 4, "min": 1, "max": 10, "step": 1}
        ]},
        {"id": "demo/other", "label": "Other", "parameters": [
            {"name": "prompt", "type": "string", "description": "Prompt."},
            {"name": "seed", "type": "integer", "description": "Seed."}
        ]}
    ]"#;

    /// Replies with a fixed image list, or fails, and records every request.
    struct StubClient {
        images: Option<Vec<&'static str>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl StubClient {
        fn returning(images: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                images: Some(images),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                images: None,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl GenerationClient for StubClient {
        fn name(&self) -> &str {
            "stub"
        }

        fn subscribe(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            let Some(images) = self.images.as_ref() else {
                bail!("upstream timed out");
            };
            let images: Vec<Value> = images.iter().map(|url| json!({"url": url})).collect();
            Ok(GenerationResponse {
                request_id: Some("req-stub".to_string()),
                data: json!({ "images": images }),
                logs: vec!["queued".to_string()],
            })
        }
    }

    /// Holds each call until the test releases it with a response.
    struct GatedClient {
        started: Mutex<Sender<String>>,
        release: Mutex<Receiver<Vec<&'static str>>>,
    }

    impl GenerationClient for GatedClient {
        fn name(&self) -> &str {
            "gated"
        }

        fn subscribe(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
            let _ = self.started.lock().unwrap().send(request.model_id.clone());
            let images = self.release.lock().unwrap().recv()?;
            let images: Vec<Value> = images.iter().map(|url| json!({"url": url})).collect();
            Ok(GenerationResponse {
                request_id: None,
                data: json!({ "images": images }),
                logs: vec!["released".to_string()],
            })
        }
    }

    fn session_with(
        client: Arc<dyn GenerationClient>,
        events: EventWriter,
    ) -> Result<FormSession> {
        let registry = Arc::new(ModelRegistry::from_json(DEMO_MODELS)?);
        let form = FormState::new(registry, Some("demo/fast"))?;
        FormSession::new(form, client, events, RequestOptions::default())
    }

    fn event_types(path: &std::path::Path) -> Result<Vec<String>> {
        let raw = fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    #[test]
    fn submit_success_reaches_succeeded() -> Result<()> {
        let client = StubClient::returning(vec!["http://x/1.png"]);
        let mut session = session_with(client.clone(), EventWriter::disabled("s"))?;
        assert_eq!(
            session.form().field_value("steps"),
            Some(&ParamValue::Integer(4))
        );
        session.set_field_text("prompt", "cat")?;

        let state = session.submit()?;
        assert_eq!(
            state,
            RequestState::Succeeded(vec!["http://x/1.png".to_string()])
        );

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model_id, "demo/fast");
        assert_eq!(seen[0].input.get("prompt"), Some(&json!("cat")));
        assert_eq!(seen[0].input.get("steps"), Some(&json!(4)));
        assert_eq!(seen[0].input.get("streaming"), Some(&json!(false)));
        assert_eq!(seen[0].poll_interval, Duration::from_millis(5000));
        assert!(seen[0].logs);
        Ok(())
    }

    #[test]
    fn submit_with_empty_images_fails() -> Result<()> {
        let client = StubClient::returning(Vec::new());
        let mut session = session_with(client, EventWriter::disabled("s"))?;
        session.set_field_text("prompt", "cat")?;
        assert_eq!(
            session.submit()?,
            RequestState::Failed(NO_IMAGES_MESSAGE.to_string())
        );
        Ok(())
    }

    #[test]
    fn client_error_becomes_failed_state_with_logged_detail() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let client = StubClient::failing();
        let mut session = session_with(client, EventWriter::new(&path, "s"))?;
        session.set_field_text("prompt", "cat")?;
        assert_eq!(
            session.submit()?,
            RequestState::Failed(GENERATION_FAILED_MESSAGE.to_string())
        );

        let raw = fs::read_to_string(&path)?;
        let failed = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .find(|row| row["type"] == json!("generation_failed"))
            .expect("missing generation_failed");
        assert_eq!(failed["message"], json!(GENERATION_FAILED_MESSAGE));
        assert_eq!(failed["detail"], json!("upstream timed out"));
        Ok(())
    }

    #[test]
    fn empty_prompt_never_reaches_client() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let client = StubClient::returning(vec!["http://x/1.png"]);
        let mut session = session_with(client.clone(), EventWriter::new(&path, "s"))?;

        let err = session.submit().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormError>(),
            Some(FormError::Validation(_))
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.request_state(), &RequestState::Idle);
        assert!(event_types(&path)?.contains(&"submit_rejected".to_string()));
        Ok(())
    }

    #[test]
    fn unknown_model_is_not_found() -> Result<()> {
        let client = StubClient::returning(vec!["http://x/1.png"]);
        let mut session = session_with(client, EventWriter::disabled("s"))?;
        session.set_field_text("prompt", "cat")?;
        assert!(session.select_model("unknown").is_err());
        assert_eq!(session.form().selected_model(), "demo/fast");
        assert_eq!(
            session.form().field_value("prompt"),
            Some(&ParamValue::String("cat".to_string()))
        );
        Ok(())
    }

    #[test]
    fn background_result_is_applied_on_wait() -> Result<()> {
        let client = StubClient::returning(vec!["http://x/1.png", "http://x/2.png"]);
        let mut session = session_with(client, EventWriter::disabled("s"))?;
        session.set_field_text("prompt", "cat")?;
        session.submit_in_background()?;
        assert!(session.wait_completion(Duration::from_secs(5))?);
        assert_eq!(
            session.request_state(),
            &RequestState::Succeeded(vec![
                "http://x/1.png".to_string(),
                "http://x/2.png".to_string()
            ])
        );
        Ok(())
    }

    #[test]
    fn stale_background_result_does_not_overwrite_new_model() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let (client, started_rx, release_tx) = gated_client();
        let mut session = session_with(client, EventWriter::new(&path, "s"))?;
        session.set_field_text("prompt", "cat")?;
        session.submit_in_background()?;
        assert_eq!(
            started_rx.recv_timeout(Duration::from_secs(5))?,
            "demo/fast"
        );

        assert!(matches!(
            session.submit_in_background().unwrap_err().downcast_ref::<FormError>(),
            Some(FormError::InFlight)
        ));
        session.select_model("demo/other")?;
        assert_eq!(session.request_state(), &RequestState::Idle);

        release_tx.send(vec!["http://x/stale.png"])?;
        assert!(!session.wait_completion(Duration::from_millis(500))?);
        assert_eq!(session.request_state(), &RequestState::Idle);
        assert_eq!(session.form().selected_model(), "demo/other");

        let types = event_types(&path)?;
        assert!(types.contains(&"generation_discarded".to_string()));
        assert!(!types.contains(&"generation_succeeded".to_string()));
        assert!(!types.contains(&"generation_log".to_string()));
        Ok(())
    }

    fn gated_client() -> (Arc<GatedClient>, Receiver<String>, Sender<Vec<&'static str>>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let client = Arc::new(GatedClient {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        (client, started_rx, release_tx)
    }

    #[test]
    fn unwritable_event_log_does_not_leave_submit_in_flight() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let client = StubClient::returning(vec!["http://x/1.png"]);
        let mut session = session_with(client.clone(), EventWriter::new(&path, "s"))?;
        session.set_field_text("prompt", "cat")?;

        fs::remove_file(&path)?;
        fs::create_dir(&path)?;
        assert!(session.submit().is_err());
        assert_eq!(session.request_state(), &RequestState::Idle);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);

        fs::remove_dir(&path)?;
        assert_eq!(
            session.submit()?,
            RequestState::Succeeded(vec!["http://x/1.png".to_string()])
        );
        Ok(())
    }

    #[test]
    fn result_is_applied_even_when_event_log_breaks_mid_request() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let (client, started_rx, release_tx) = gated_client();
        let mut session = session_with(client, EventWriter::new(&path, "s"))?;
        session.set_field_text("prompt", "cat")?;
        session.submit_in_background()?;
        started_rx.recv_timeout(Duration::from_secs(5))?;

        fs::remove_file(&path)?;
        fs::create_dir(&path)?;
        release_tx.send(vec!["http://x/1.png"])?;
        assert!(session.wait_completion(Duration::from_secs(5))?);
        assert_eq!(
            session.request_state(),
            &RequestState::Succeeded(vec!["http://x/1.png".to_string()])
        );
        Ok(())
    }

    #[test]
    fn session_events_follow_request_lifecycle() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let client = StubClient::returning(vec!["http://x/1.png"]);
        let mut session = session_with(client, EventWriter::new(&path, "s"))?;
        session.set_field_text("prompt", "cat")?;
        session.set_streaming(true)?;
        session.submit()?;

        let types = event_types(&path)?;
        let position = |name: &str| {
            types
                .iter()
                .position(|value| value == name)
                .unwrap_or_else(|| panic!("missing {name}"))
        };
        assert!(position("session_started") < position("field_updated"));
        assert!(position("field_updated") < position("generation_started"));
        assert!(position("generation_started") < position("generation_log"));
        assert!(position("generation_log") < position("generation_succeeded"));
        Ok(())
    }

    #[test]
    fn randomize_seed_only_when_model_has_seed() -> Result<()> {
        let client = StubClient::returning(vec!["http://x/1.png"]);
        let mut session = session_with(client, EventWriter::disabled("s"))?;
        assert_eq!(session.randomize_seed()?, None);
        session.select_model("demo/other")?;
        let seed = session.randomize_seed()?.expect("seed parameter present");
        assert!((0..1_000_000).contains(&seed));
        Ok(())
    }
}
