//! Mid-execution message injection queue.
//!
//! Any task may push while `execute` is running; the orchestrator drains
//! at its three drain points. Cloning yields another handle to the same
//! queue, which is how the Event Dispatcher and the `orchestrator.inject`
//! capability share it.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Literal prefix identifying drained messages as mid-execution additions.
/// This is the only text the model sees — not a separate system message.
pub const INJECTION_PREAMBLE: &str =
    "[The user sent additional messages while you were working. \
     Incorporate this into your current task:]";

/// Unbounded FIFO of user-supplied steering messages.
#[derive(Clone, Default)]
pub struct InjectionQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl InjectionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a steering message. Callable from any task; never blocks.
    pub fn inject(&self, text: impl Into<String>) {
        self.inner.lock().push_back(text.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Take all pending messages in arrival order.
    #[must_use]
    pub fn drain(&self) -> Vec<String> {
        self.inner.lock().drain(..).collect()
    }
}

/// Join drained messages into the single synthesized user message.
#[must_use]
pub fn synthesize_injection(messages: &[String]) -> String {
    let mut out = String::from(INJECTION_PREAMBLE);
    for msg in messages {
        out.push_str("\n- ");
        out.push_str(msg);
    }
    out
}
