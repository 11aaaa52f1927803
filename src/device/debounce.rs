use std::future::Future;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::channel::oneshot;
use futures::StreamExt;
use log::debug;
use tokio::spawn;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

enum DebounceMessage<T> {
    Value(T),
    Flush(oneshot::Sender<()>),
}

/// Runs `action` with the last value passed to [`Debouncer::call`], once no new value has
/// arrived for `delay`. Each call pushes the deadline back. The action is awaited before the
/// next value is looked at, so at most one action runs at a time. Cancelling also abandons an
/// action that is still running.
pub struct Debouncer<T> {
    sender: UnboundedSender<DebounceMessage<T>>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F, Fut>(delay: Duration, mut action: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, mut receiver) = unbounded::<DebounceMessage<T>>();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        spawn(async move {
            let mut pending: Option<T> = None;
            let deadline = sleep(delay);
            tokio::pin!(deadline);

            'mainloop: loop {
                let run_now = tokio::select! {
                    biased;

                    _ = task_cancel.cancelled() => {
                        break 'mainloop;
                    },
                    next = receiver.next() => {
                        match next {
                            Some(DebounceMessage::Value(value)) => {
                                pending = Some(value);
                                deadline.as_mut().reset(Instant::now() + delay);
                                None
                            },
                            Some(DebounceMessage::Flush(done)) => Some(Some(done)),
                            None => break 'mainloop,
                        }
                    },
                    _ = &mut deadline, if pending.is_some() => Some(None),
                };

                let Some(done) = run_now else {
                    continue 'mainloop;
                };

                if let Some(value) = pending.take() {
                    tokio::select! {
                        biased;

                        _ = task_cancel.cancelled() => {
                            debug!("Debouncer stopped while running its action");
                            break 'mainloop;
                        },
                        _ = action(value) => {},
                    }
                }

                if let Some(done) = done {
                    let _ = done.send(());
                }
            }

            if pending.is_some() {
                debug!("Debouncer stopped; dropping pending value");
            }
        });

        Debouncer { sender, cancel }
    }

    /// Replaces the pending value and restarts the delay.
    pub fn call(&self, value: T) {
        if self.sender.unbounded_send(DebounceMessage::Value(value)).is_err() {
            debug!("Debouncer is stopped; value ignored");
        }
    }

    /// Runs the action for the pending value right away, and waits for it.
    /// Returns immediately when nothing is pending or the debouncer is stopped.
    pub async fn flush(&self) {
        let (done, finished) = oneshot::channel();
        if self.sender.unbounded_send(DebounceMessage::Flush(done)).is_err() {
            return;
        }

        // an error only means the debouncer stopped before the flush ran
        let _ = finished.await;
    }

    /// Drops the pending value, if any, and abandons a running action. Later calls are ignored.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
