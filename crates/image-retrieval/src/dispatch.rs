//! Callback execution contexts

use crate::options::CallbackContext;
use tokio::sync::mpsc;
use tracing::debug;

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

/// Serial context that runs callbacks one at a time in submission order.
///
/// [`MainContext::spawn`] drives it from a Tokio task. Applications with a
/// real UI thread use [`MainContext::channel`] and drain the returned
/// [`MainQueue`] from that thread instead.
#[derive(Clone)]
pub struct MainContext {
    tx: mpsc::UnboundedSender<Callback>,
}

/// Receiving end of a [`MainContext`]
pub struct MainQueue {
    rx: mpsc::UnboundedReceiver<Callback>,
}

impl MainContext {
    /// Must be called from within a Tokio runtime
    pub fn spawn() -> Self {
        let (context, queue) = Self::channel();
        tokio::spawn(queue.run());
        context
    }

    pub fn channel() -> (Self, MainQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MainQueue { rx })
    }

    pub(crate) fn run(&self, callback: Callback) {
        if self.tx.send(callback).is_err() {
            debug!("Main context is gone, dropping callback");
        }
    }
}

impl MainQueue {
    /// Run callbacks until every [`MainContext`] is dropped
    pub async fn run(mut self) {
        while let Some(callback) = self.rx.recv().await {
            callback();
        }
    }

    /// Run whatever is queued right now. Returns how many callbacks ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.rx.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }
}

pub(crate) fn dispatch(main: &MainContext, context: CallbackContext, callback: Callback) {
    match context {
        CallbackContext::Main => main.run(callback),
        CallbackContext::Background => {
            tokio::task::spawn_blocking(callback);
        }
        CallbackContext::Inline => callback(),
    }
}
