//! Server-side timers for temporary annotations.
//!
//! A timer never touches room state directly. When it fires it posts a
//! message back into the room's mailbox, and the actor claims the timer entry
//! before removing anything. A timer that was cancelled while its message was
//! already queued finds no entry and is ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::model::AnnotationId;

/// Lifetime of a temporary annotation.
pub const ANNOTATION_TTL: Duration = Duration::from_millis(3000);

pub struct ExpiryScheduler<M: Send + 'static> {
    ttl: Duration,
    timers: HashMap<AnnotationId, JoinHandle<()>>,
    notify: mpsc::WeakUnboundedSender<M>,
    on_expire: fn(AnnotationId) -> M,
}

impl<M: Send + 'static> ExpiryScheduler<M> {
    /// Timers post `on_expire(id)` to `notify`. Only a weak handle is kept, so
    /// pending timers do not keep a closed mailbox alive.
    pub fn new(notify: &mpsc::UnboundedSender<M>, on_expire: fn(AnnotationId) -> M) -> Self {
        Self {
            ttl: ANNOTATION_TTL,
            timers: HashMap::new(),
            notify: notify.downgrade(),
            on_expire,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn schedule(&mut self, id: &str) {
        let notify = self.notify.clone();
        let message = (self.on_expire)(id.to_string());
        let ttl = self.ttl;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(sender) = notify.upgrade() {
                let _ = sender.send(message);
            }
        });

        if let Some(previous) = self.timers.insert(id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Cancel a pending timer. Returns whether one was pending.
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.timers.remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called when a timer's message is received. Returns `false` when the
    /// timer was cancelled in the meantime.
    pub fn claim(&mut self, id: &str) -> bool {
        self.timers.remove(id).is_some()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        count
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.timers.contains_key(id)
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}

impl<M: Send + 'static> Drop for ExpiryScheduler<M> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn scheduler() -> (ExpiryScheduler<AnnotationId>, mpsc::UnboundedSender<AnnotationId>, mpsc::UnboundedReceiver<AnnotationId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = ExpiryScheduler::new(&tx, |id| id);
        (scheduler, tx, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_ttl() {
        let (mut scheduler, _tx, mut rx) = scheduler();
        let start = Instant::now();
        scheduler.schedule("ann_1");
        assert!(scheduler.is_pending("ann_1"));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, "ann_1");
        let elapsed = start.elapsed();
        assert!(elapsed >= ANNOTATION_TTL);
        assert!(elapsed < ANNOTATION_TTL + Duration::from_millis(10));

        assert!(scheduler.claim("ann_1"));
        assert!(!scheduler.claim("ann_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (mut scheduler, _tx, mut rx) = scheduler();
        scheduler.schedule("ann_1");
        assert!(scheduler.cancel("ann_1"));
        assert!(!scheduler.cancel("ann_1"));

        tokio::time::sleep(ANNOTATION_TTL * 2).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_after_cancel_is_refused() {
        let (mut scheduler, _tx, mut rx) = scheduler();
        scheduler.schedule("ann_1");

        // Let the timer post its message, then cancel before it is handled
        let fired = rx.recv().await.unwrap();
        scheduler.cancel(&fired);
        assert!(!scheduler.claim(&fired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (mut scheduler, _tx, mut rx) = scheduler();
        scheduler.schedule("ann_1");
        scheduler.schedule("ann_2");
        assert_eq!(scheduler.cancel_all(), 2);

        tokio::time::sleep(ANNOTATION_TTL * 2).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_mailbox_is_not_kept_alive() {
        let (mut scheduler, tx, mut rx) = scheduler();
        scheduler.schedule("ann_1");
        drop(tx);

        // The only strong sender is gone, so the channel closes
        assert!(rx.recv().await.is_none());
    }
}
