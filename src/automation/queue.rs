//! Single-flight FIFO executor for OS-state-mutating actions.
//!
//! Submissions never block each other; only execution is serialized. The
//! runner task is spawned on the first enqueue and exits when the queue
//! drains. Queue state lives behind one mutex and is never touched outside it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{AutomationError, AutomationResult};
use crate::types::ActionReceipt;

/// Message given to queued items resolved by [`AutomationQueue::stop_all`].
pub const STOP_ALL_MESSAGE: &str = "Cancelled by automation_stop";

type Operation =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, AutomationResult<ActionReceipt>> + Send>;

struct QueueItem {
    id: Uuid,
    label: String,
    operation: Operation,
    reply: oneshot::Sender<AutomationResult<ActionReceipt>>,
}

struct Running {
    id: Uuid,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueItem>,
    current: Option<Running>,
    runner_active: bool,
}

/// FIFO queue that runs at most one operation at a time.
#[derive(Clone, Default)]
pub struct AutomationQueue {
    state: Arc<Mutex<QueueState>>,
}

impl AutomationQueue {
    /// Create an idle queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit `operation` and wait for its receipt.
    ///
    /// The operation receives a cancellation token that [`stop_all`](Self::stop_all)
    /// trips while it runs; it must poll the token at safe points. Returning
    /// [`AutomationError::Cancelled`] resolves the caller with a `cancelled`
    /// receipt. Any other error is returned to this caller only.
    pub async fn enqueue<F, Fut>(
        &self,
        label: impl Into<String>,
        operation: F,
    ) -> AutomationResult<ActionReceipt>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = AutomationResult<ActionReceipt>> + Send + 'static,
    {
        let label = label.into();
        let (reply, receipt) = oneshot::channel();
        let item = QueueItem {
            id: Uuid::new_v4(),
            label: label.clone(),
            operation: Box::new(move |cancel| Box::pin(operation(cancel))),
            reply,
        };

        let start_runner = {
            let mut state = self.state.lock();
            state.pending.push_back(item);
            !std::mem::replace(&mut state.runner_active, true)
        };
        if start_runner {
            tokio::spawn(run_loop(self.state.clone()));
        }

        receipt.await.map_err(|_| {
            AutomationError::Failed(format!("automation runner dropped action {label}"))
        })?
    }

    /// Cancel everything: resolve waiting items with a cancelled receipt and
    /// signal the running item. Returns the number of items affected.
    pub fn stop_all(&self) -> usize {
        let (drained, signalled) = {
            let mut state = self.state.lock();
            let drained: Vec<QueueItem> = state.pending.drain(..).collect();
            let signalled = match &state.current {
                Some(running) => {
                    running.cancel.cancel();
                    debug!(action_id = %running.id, "signalled running action");
                    true
                }
                None => false,
            };
            (drained, signalled)
        };

        let count = drained.len() + usize::from(signalled);
        for item in drained {
            let receipt = ActionReceipt::cancelled(item.id.to_string(), STOP_ALL_MESSAGE);
            let _ = item.reply.send(Ok(receipt));
        }
        info!(cancelled = count, "automation queue stopped");
        count
    }

    /// Items waiting to start
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether an item is currently executing
    pub fn is_busy(&self) -> bool {
        self.state.lock().current.is_some()
    }
}

async fn run_loop(state: Arc<Mutex<QueueState>>) {
    loop {
        let (item, cancel) = {
            let mut guard = state.lock();
            match guard.pending.pop_front() {
                Some(item) => {
                    let cancel = CancellationToken::new();
                    guard.current = Some(Running {
                        id: item.id,
                        cancel: cancel.clone(),
                    });
                    (item, cancel)
                }
                None => {
                    guard.current = None;
                    guard.runner_active = false;
                    return;
                }
            }
        };

        let QueueItem {
            id,
            label,
            operation,
            reply,
        } = item;
        debug!(action_id = %id, %label, "starting action");

        let outcome = match tokio::spawn(operation(cancel)).await {
            Ok(outcome) => outcome,
            Err(err) => Err(AutomationError::Failed(format!("action {label} aborted: {err}"))),
        };

        let resolved = match outcome {
            Ok(mut receipt) => {
                if receipt.action_id.is_empty() {
                    receipt.action_id = id.to_string();
                }
                Ok(receipt)
            }
            Err(AutomationError::Cancelled) => Ok(ActionReceipt::cancelled(
                id.to_string(),
                format!("Action {label} was cancelled"),
            )),
            Err(err) => {
                warn!(action_id = %id, %label, error = %err, "action failed");
                Err(err)
            }
        };

        state.lock().current = None;
        if reply.send(resolved).is_err() {
            debug!(action_id = %id, "caller went away before receipt");
        }
    }
}
