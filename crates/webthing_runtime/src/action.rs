//! Action engine
//!
//! Governs an action's lifecycle from submission through completion, error,
//! or cancellation. Submission validates every declared input parameter,
//! registers the action, and enqueues it on a bounded work queue consumed
//! by a fixed pool of background workers, so a burst of submissions never
//! costs one task per action and never blocks the submitter.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use webthing_types::{Schema, Value};

use crate::NotificationHub;

// ─────────────────────────────────────────────────────────────────────────────
// Action Status
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of one action instance
///
/// Transitions are monotonic: `Created → Pending → (Completed | Error)`,
/// with `Cancelled` reachable from `Created` or `Pending`. A terminal state
/// is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActionStatus {
    /// Submitted and queued, execution not yet begun
    Created = 0,
    /// Execution has begun
    Pending = 1,
    /// The handler returned successfully
    Completed = 2,
    /// The handler failed; the detail is recorded on the action
    Error = 3,
    /// Cancelled before or during execution
    Cancelled = 4,
}

impl ActionStatus {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Pending,
            2 => Self::Completed,
            3 => Self::Error,
            _ => Self::Cancelled,
        }
    }

    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Error | ActionStatus::Cancelled
        )
    }

    fn can_advance_to(&self, to: ActionStatus) -> bool {
        matches!(
            (self, to),
            (ActionStatus::Created, ActionStatus::Pending)
                | (ActionStatus::Created, ActionStatus::Cancelled)
                | (ActionStatus::Pending, ActionStatus::Completed)
                | (ActionStatus::Pending, ActionStatus::Error)
                | (ActionStatus::Pending, ActionStatus::Cancelled)
        )
    }

    /// Wire spelling of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Created => "created",
            ActionStatus::Pending => "pending",
            ActionStatus::Completed => "completed",
            ActionStatus::Error => "error",
            ActionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────────────────

/// Cooperative cancellation signal handed to action bodies
///
/// The engine never kills a running body; the body is expected to observe
/// the signal and return [`ActionError::Cancelled`].
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Check whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Action Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of an action body during execution
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Result type for action bodies
pub type ActionResult<T> = Result<T, ActionError>;

/// Submission failures, surfaced to the caller as values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid input parameter: {parameter}")]
    InvalidInput { parameter: String },

    #[error("engine is shutting down")]
    ShuttingDown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Action
// ─────────────────────────────────────────────────────────────────────────────

/// One invocation of a named operation, with tracked lifecycle
pub struct Action {
    id: uuid::Uuid,
    name: String,
    thing: String,
    href: String,
    input: BTreeMap<String, Value>,
    status: AtomicU8,
    time_requested: DateTime<Utc>,
    time_completed: Mutex<Option<DateTime<Utc>>>,
    error: Mutex<Option<String>>,
    cancel_tx: watch::Sender<bool>,
}

impl Action {
    fn new(
        name: String,
        thing: String,
        base_href: &str,
        input: BTreeMap<String, Value>,
    ) -> Self {
        let id = uuid::Uuid::new_v4();
        let (cancel_tx, _) = watch::channel(false);
        Self {
            href: format!("{base_href}/actions/{name}/{id}"),
            id,
            name,
            thing,
            input,
            status: AtomicU8::new(ActionStatus::Created as u8),
            time_requested: Utc::now(),
            time_completed: Mutex::new(None),
            error: Mutex::new(None),
            cancel_tx,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the Thing this action was submitted on
    pub fn thing(&self) -> &str {
        &self.thing
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn input(&self) -> &BTreeMap<String, Value> {
        &self.input
    }

    /// Current status (lock-free read)
    pub fn status(&self) -> ActionStatus {
        ActionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn time_requested(&self) -> DateTime<Utc> {
        self.time_requested
    }

    /// Set exactly when the action enters `Completed` or `Error`
    pub fn time_completed(&self) -> Option<DateTime<Utc>> {
        *self.time_completed.lock()
    }

    /// Recorded failure detail, present only in the `Error` state
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    fn cancel_signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.cancel_tx.subscribe(),
        }
    }

    /// Attempt a monotonic status transition; false if disallowed
    fn advance(&self, to: ActionStatus) -> bool {
        let mut current = self.status.load(Ordering::SeqCst);
        loop {
            if !ActionStatus::from_u8(current).can_advance_to(to) {
                return false;
            }
            match self.status.compare_exchange(
                current,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if matches!(to, ActionStatus::Completed | ActionStatus::Error) {
            *self.time_completed.lock() = Some(Utc::now());
        }
        true
    }

    fn set_error(&self, detail: String) {
        *self.error.lock() = Some(detail);
    }

    /// Wire description: `{"href", "status", "timeRequested", "input"?,
    /// "timeCompleted"?, "error"?}`
    pub fn describe(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("href".to_string(), self.href.as_str().into());
        map.insert("status".to_string(), self.status().as_str().into());
        map.insert(
            "timeRequested".to_string(),
            self.time_requested
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into(),
        );
        if !self.input.is_empty() {
            let input: serde_json::Map<String, serde_json::Value> = self
                .input
                .iter()
                .map(|(k, v)| (k.clone(), v.to_wire()))
                .collect();
            map.insert("input".to_string(), serde_json::Value::Object(input));
        }
        if let Some(completed) = self.time_completed() {
            map.insert(
                "timeCompleted".to_string(),
                completed.to_rfc3339_opts(SecondsFormat::Millis, true).into(),
            );
        }
        if let Some(error) = self.error() {
            map.insert("error".to_string(), error.into());
        }
        serde_json::Value::Object(map)
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

/// Context passed to an executing action body
pub struct ActionContext {
    input: BTreeMap<String, Value>,
    cancel: CancelSignal,
}

impl ActionContext {
    /// The validated, typed input parameters
    pub fn input(&self) -> &BTreeMap<String, Value> {
        &self.input
    }

    pub fn get_input(&self, name: &str) -> Option<&Value> {
        self.input.get(name)
    }

    pub fn get_input_bool(&self, name: &str) -> Option<bool> {
        self.input.get(name).and_then(Value::as_bool)
    }

    pub fn get_input_i64(&self, name: &str) -> Option<i64> {
        self.input.get(name).and_then(Value::as_i64)
    }

    pub fn get_input_f64(&self, name: &str) -> Option<f64> {
        self.input.get(name).and_then(Value::as_f64)
    }

    pub fn get_input_str(&self, name: &str) -> Option<&str> {
        self.input.get(name).and_then(Value::as_str)
    }

    /// The cooperative cancellation signal for this invocation
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// An action body, registered once per action name
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Execute one invocation
    ///
    /// Runs on a background worker. Long-running bodies must observe
    /// `ctx.cancel_signal()` and return [`ActionError::Cancelled`] when it
    /// trips; the engine never forcibly terminates a body.
    async fn perform(&self, ctx: ActionContext) -> ActionResult<()>;
}

/// Registered metadata and implementation for one action name
pub struct ActionDescriptor {
    handler: Arc<dyn ActionHandler>,
    input: Vec<(String, Schema)>,
    title: Option<String>,
    description: Option<String>,
}

impl ActionDescriptor {
    pub fn new(handler: impl ActionHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            input: Vec::new(),
            title: None,
            description: None,
        }
    }

    /// Declare an input parameter with its own schema
    pub fn with_input(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.input.push((name.into(), schema));
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Action-type metadata for the Thing description
    pub fn describe_type(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(title) = &self.title {
            map.insert("title".to_string(), title.as_str().into());
        }
        if let Some(desc) = &self.description {
            map.insert("description".to_string(), desc.as_str().into());
        }
        if !self.input.is_empty() {
            let properties: serde_json::Map<String, serde_json::Value> = self
                .input
                .iter()
                .map(|(name, schema)| (name.clone(), schema.describe()))
                .collect();
            map.insert(
                "input".to_string(),
                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                }),
            );
        }
        serde_json::Value::Object(map)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Action Engine
// ─────────────────────────────────────────────────────────────────────────────

struct Job {
    action: Arc<Action>,
    handler: Arc<dyn ActionHandler>,
}

/// Per-Thing action submission, execution, and bookkeeping
pub struct ActionEngine {
    thing: String,
    descriptors: HashMap<String, Arc<ActionDescriptor>>,
    live: DashMap<uuid::Uuid, Arc<Action>>,
    order: Mutex<VecDeque<Arc<Action>>>,
    queue_tx: Mutex<Option<mpsc::Sender<Job>>>,
    accepting: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    hub: Arc<NotificationHub>,
    base_href: String,
    max_completed: usize,
}

impl ActionEngine {
    /// Build the engine and spawn its worker pool
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn new(
        thing: impl Into<String>,
        base_href: impl Into<String>,
        descriptors: HashMap<String, Arc<ActionDescriptor>>,
        hub: Arc<NotificationHub>,
        queue_depth: usize,
        worker_count: usize,
        max_completed: usize,
    ) -> Self {
        let thing = thing.into();
        let (queue_tx, queue_rx) = mpsc::channel(queue_depth.max(1));
        let shared_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let mut workers = Vec::with_capacity(worker_count.max(1));
        for _ in 0..worker_count.max(1) {
            let rx = Arc::clone(&shared_rx);
            let hub = Arc::clone(&hub);
            let thing_name = thing.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(rx, thing_name, hub).await;
            }));
        }

        Self {
            thing,
            descriptors,
            live: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            queue_tx: Mutex::new(Some(queue_tx)),
            accepting: AtomicBool::new(true),
            workers: Mutex::new(workers),
            hub,
            base_href: base_href.into(),
            max_completed,
        }
    }

    /// Names of the registered action types
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    /// Registered metadata for one action type
    pub fn descriptor(&self, name: &str) -> Option<&ActionDescriptor> {
        self.descriptors.get(name).map(Arc::as_ref)
    }

    /// Submit a new action invocation
    ///
    /// Validates every declared parameter against its own schema; on any
    /// failure no action is created. On success the action is registered
    /// and queued, and submission returns without waiting for execution.
    pub async fn submit(
        &self,
        name: &str,
        wire_input: &serde_json::Value,
    ) -> Result<Arc<Action>, SubmitError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError::ShuttingDown);
        }
        let descriptor = self
            .descriptors
            .get(name)
            .ok_or_else(|| SubmitError::UnknownAction(name.to_string()))?;

        let input = convert_input(descriptor, wire_input)?;

        let queue_tx = self
            .queue_tx
            .lock()
            .clone()
            .ok_or(SubmitError::ShuttingDown)?;

        // Created and registered under the order lock so time_requested is
        // monotonic per Thing in submission order.
        let action = {
            let mut order = self.order.lock();
            let action = Arc::new(Action::new(
                name.to_string(),
                self.thing.clone(),
                &self.base_href,
                input,
            ));
            self.live.insert(action.id(), Arc::clone(&action));
            order.push_back(Arc::clone(&action));
            self.evict_completed(&mut order);
            action
        };

        let job = Job {
            action: Arc::clone(&action),
            handler: Arc::clone(&descriptor.handler),
        };
        if queue_tx.send(job).await.is_err() {
            self.forget(&action);
            return Err(SubmitError::ShuttingDown);
        }

        tracing::debug!(
            thing = %self.thing,
            action = %name,
            id = %action.id(),
            "action submitted"
        );
        Ok(action)
    }

    /// Look up a live action by name and id
    pub fn get(&self, name: &str, id: uuid::Uuid) -> Option<Arc<Action>> {
        self.live
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|action| action.name() == name)
    }

    /// Actions in submission order, optionally filtered by name
    pub fn actions(&self, name: Option<&str>) -> Vec<Arc<Action>> {
        self.order
            .lock()
            .iter()
            .filter(|a| name.map_or(true, |n| a.name() == n))
            .cloned()
            .collect()
    }

    /// Remove an action; a non-terminal one gets its cancel signal tripped
    pub fn remove(&self, name: &str, id: uuid::Uuid) -> bool {
        let Some(action) = self.get(name, id) else {
            return false;
        };
        if !action.status().is_terminal() {
            action.cancel();
        }
        self.forget(&action);
        tracing::debug!(thing = %self.thing, action = %name, id = %id, "action removed");
        true
    }

    fn forget(&self, action: &Arc<Action>) {
        self.live.remove(&action.id());
        self.order.lock().retain(|a| a.id() != action.id());
    }

    /// Evict oldest terminal actions beyond the completed-action bound
    fn evict_completed(&self, order: &mut VecDeque<Arc<Action>>) {
        if self.max_completed == 0 {
            return;
        }
        let mut terminal = order.iter().filter(|a| a.status().is_terminal()).count();
        while terminal > self.max_completed {
            let Some(pos) = order.iter().position(|a| a.status().is_terminal()) else {
                break;
            };
            if let Some(evicted) = order.remove(pos) {
                self.live.remove(&evicted.id());
            }
            terminal -= 1;
        }
    }

    /// Stop accepting submissions, cancel outstanding work, await workers
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        // Closing the queue lets workers drain what is already enqueued and
        // then exit; the cancel signals make that drain fast.
        self.queue_tx.lock().take();
        for entry in self.live.iter() {
            if !entry.value().status().is_terminal() {
                entry.value().cancel();
            }
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(thing = %self.thing, error = ?err, "worker task panicked");
            }
        }
        tracing::info!(thing = %self.thing, "action engine stopped");
    }
}

/// Convert and validate every declared parameter; all-or-nothing.
fn convert_input(
    descriptor: &ActionDescriptor,
    wire_input: &serde_json::Value,
) -> Result<BTreeMap<String, Value>, SubmitError> {
    let empty = serde_json::Map::new();
    let obj = match wire_input {
        serde_json::Value::Null => &empty,
        serde_json::Value::Object(obj) => obj,
        _ => {
            return Err(SubmitError::InvalidInput {
                parameter: "input".to_string(),
            })
        }
    };

    for key in obj.keys() {
        if !descriptor.input.iter().any(|(name, _)| name == key) {
            return Err(SubmitError::InvalidInput {
                parameter: key.clone(),
            });
        }
    }

    let mut input = BTreeMap::new();
    for (name, schema) in &descriptor.input {
        let wire_field = obj.get(name).unwrap_or(&serde_json::Value::Null);
        let native = schema
            .interpret(wire_field)
            .map_err(|_| SubmitError::InvalidInput {
                parameter: name.clone(),
            })?;
        if !schema.is_valid(&native) {
            return Err(SubmitError::InvalidInput {
                parameter: name.clone(),
            });
        }
        input.insert(name.clone(), native);
    }
    Ok(input)
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker Loop
// ─────────────────────────────────────────────────────────────────────────────

async fn worker_loop(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    thing: String,
    hub: Arc<NotificationHub>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };
        run_job(job, &thing, &hub).await;
    }
}

async fn run_job(job: Job, thing: &str, hub: &NotificationHub) {
    let action = job.action;

    // Cancelled while still queued: never starts.
    if action.is_cancelled() {
        if action.advance(ActionStatus::Cancelled) {
            hub.action_status(action.name(), action.describe());
        }
        return;
    }

    if !action.advance(ActionStatus::Pending) {
        return;
    }
    hub.action_status(action.name(), action.describe());

    let ctx = ActionContext {
        input: action.input().clone(),
        cancel: action.cancel_signal(),
    };

    match job.handler.perform(ctx).await {
        Ok(()) => {
            if action.advance(ActionStatus::Completed) {
                tracing::debug!(
                    thing = %thing,
                    action = %action.name(),
                    id = %action.id(),
                    "action completed"
                );
                hub.action_status(action.name(), action.describe());
            }
        }
        Err(ActionError::Cancelled) => {
            if action.advance(ActionStatus::Cancelled) {
                hub.action_status(action.name(), action.describe());
            }
        }
        Err(err) => {
            action.set_error(err.to_string());
            if action.advance(ActionStatus::Error) {
                tracing::error!(
                    thing = %thing,
                    action = %action.name(),
                    id = %action.id(),
                    error = %err,
                    "action failed"
                );
                hub.action_status(action.name(), action.describe());
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use webthing_types::DataType;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl ActionHandler for NoopHandler {
        async fn perform(&self, _ctx: ActionContext) -> ActionResult<()> {
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait::async_trait]
    impl ActionHandler for FailingHandler {
        async fn perform(&self, _ctx: ActionContext) -> ActionResult<()> {
            Err(ActionError::failed("hardware unreachable"))
        }
    }

    struct WaitForCancelHandler;

    #[async_trait::async_trait]
    impl ActionHandler for WaitForCancelHandler {
        async fn perform(&self, ctx: ActionContext) -> ActionResult<()> {
            let mut cancel = ctx.cancel_signal();
            cancel.cancelled().await;
            Err(ActionError::Cancelled)
        }
    }

    fn engine_with(descriptors: Vec<(&str, ActionDescriptor)>) -> ActionEngine {
        let hub = Arc::new(NotificationHub::new("lamp"));
        let descriptors = descriptors
            .into_iter()
            .map(|(name, d)| (name.to_string(), Arc::new(d)))
            .collect();
        ActionEngine::new("lamp", "/things/lamp", descriptors, hub, 16, 2, 8)
    }

    fn fade_descriptor(handler: impl ActionHandler) -> ActionDescriptor {
        ActionDescriptor::new(handler)
            .with_input(
                "brightness",
                Schema::new(DataType::Int32)
                    .with_minimum(0.0)
                    .with_maximum(100.0),
            )
            .with_input("duration", Schema::new(DataType::Int32).with_minimum(1.0))
    }

    async fn wait_terminal(action: &Arc<Action>) {
        for _ in 0..100 {
            if action.status().is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("action never reached a terminal state");
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let engine = engine_with(vec![("fade", fade_descriptor(NoopHandler))]);

        let action = engine
            .submit("fade", &serde_json::json!({"brightness": 50, "duration": 1000}))
            .await
            .unwrap();
        assert!(matches!(
            action.status(),
            ActionStatus::Created | ActionStatus::Pending | ActionStatus::Completed
        ));

        wait_terminal(&action).await;
        assert_eq!(action.status(), ActionStatus::Completed);
        let completed = action.time_completed().unwrap();
        assert!(completed >= action.time_requested());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let engine = engine_with(vec![]);
        let result = engine.submit("ghost", &serde_json::Value::Null).await;
        assert!(matches!(
            result,
            Err(SubmitError::UnknownAction(ref name)) if name == "ghost"
        ));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_input_creates_no_action() {
        let engine = engine_with(vec![("fade", fade_descriptor(NoopHandler))]);

        let result = engine
            .submit("fade", &serde_json::json!({"brightness": 150, "duration": 1000}))
            .await;
        assert!(matches!(
            result,
            Err(SubmitError::InvalidInput { ref parameter }) if parameter == "brightness"
        ));
        assert!(engine.actions(None).is_empty());

        // A missing required parameter also fails.
        let result = engine
            .submit("fade", &serde_json::json!({"brightness": 50}))
            .await;
        assert!(matches!(result, Err(SubmitError::InvalidInput { .. })));

        // An undeclared parameter is rejected.
        let result = engine
            .submit(
                "fade",
                &serde_json::json!({"brightness": 50, "duration": 1, "bogus": true}),
            )
            .await;
        assert!(matches!(
            result,
            Err(SubmitError::InvalidInput { ref parameter }) if parameter == "bogus"
        ));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_handler_error_is_recorded() {
        let engine = engine_with(vec![("fade", fade_descriptor(FailingHandler))]);

        let action = engine
            .submit("fade", &serde_json::json!({"brightness": 1, "duration": 1}))
            .await
            .unwrap();
        wait_terminal(&action).await;

        assert_eq!(action.status(), ActionStatus::Error);
        assert_eq!(action.error().as_deref(), Some("hardware unreachable"));
        assert!(action.time_completed().is_some());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_pending_action_cancels() {
        let engine = engine_with(vec![(
            "wait",
            ActionDescriptor::new(WaitForCancelHandler),
        )]);

        let action = engine.submit("wait", &serde_json::Value::Null).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(action.status(), ActionStatus::Pending);

        assert!(engine.remove("wait", action.id()));
        wait_terminal(&action).await;
        assert_eq!(action.status(), ActionStatus::Cancelled);
        // Cancellation is not completion: no completion timestamp.
        assert!(action.time_completed().is_none());
        assert!(engine.get("wait", action.id()).is_none());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let engine = engine_with(vec![("noop", ActionDescriptor::new(NoopHandler))]);
        let action = engine.submit("noop", &serde_json::Value::Null).await.unwrap();
        wait_terminal(&action).await;
        assert_eq!(action.status(), ActionStatus::Completed);

        // Late transitions are rejected outright.
        assert!(!action.advance(ActionStatus::Pending));
        assert!(!action.advance(ActionStatus::Cancelled));
        assert_eq!(action.status(), ActionStatus::Completed);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_submission_order_and_monotonic_time_requested() {
        let engine = engine_with(vec![("noop", ActionDescriptor::new(NoopHandler))]);
        for _ in 0..5 {
            engine.submit("noop", &serde_json::Value::Null).await.unwrap();
        }
        let actions = engine.actions(Some("noop"));
        assert_eq!(actions.len(), 5);
        assert!(actions
            .windows(2)
            .all(|w| w[0].time_requested() <= w[1].time_requested()));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_submissions() {
        let engine = engine_with(vec![("noop", ActionDescriptor::new(NoopHandler))]);
        engine.shutdown().await;
        let result = engine.submit("noop", &serde_json::Value::Null).await;
        assert!(matches!(result, Err(SubmitError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_status_notifications_in_transition_order() {
        use crate::{NotificationSink, Selector, SinkClosed};

        struct Capture(parking_lot::Mutex<Vec<String>>);
        impl NotificationSink for Capture {
            fn deliver(&self, frame: &serde_json::Value) -> Result<(), SinkClosed> {
                let status = frame["data"]["noop"]["status"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.0.lock().push(status);
                Ok(())
            }
        }

        let hub = Arc::new(NotificationHub::new("lamp"));
        let sink = Arc::new(Capture(parking_lot::Mutex::new(Vec::new())));
        hub.subscribe(Selector::Actions, sink.clone());

        let descriptors = [(
            "noop".to_string(),
            Arc::new(ActionDescriptor::new(NoopHandler)),
        )]
        .into_iter()
        .collect();
        let engine = ActionEngine::new("lamp", "/things/lamp", descriptors, hub, 16, 1, 8);

        let action = engine.submit("noop", &serde_json::Value::Null).await.unwrap();
        wait_terminal(&action).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let statuses = sink.0.lock().clone();
        assert_eq!(statuses, vec!["pending", "completed"]);
        engine.shutdown().await;
    }
}
