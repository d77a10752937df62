use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Unbounded, thread-safe FIFO of messages.
///
/// Bridges the I/O worker and the application. Every operation takes the
/// lock once and never holds it across I/O.
#[derive(Debug)]
pub struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // Queue contents stay consistent even if a holder panicked.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one message.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.available.notify_all();
    }

    /// Append messages in order.
    pub fn push_all(&self, items: impl IntoIterator<Item = T>) {
        let mut queue = self.lock();
        let before = queue.len();
        queue.extend(items);
        let added = queue.len() > before;
        drop(queue);
        if added {
            self.available.notify_all();
        }
    }

    /// Put messages back at the front, keeping their relative order, ahead
    /// of anything enqueued since they were taken.
    pub fn requeue_front(&self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        let mut queue = self.lock();
        for item in items.into_iter().rev() {
            queue.push_front(item);
        }
        drop(queue);
        self.available.notify_all();
    }

    /// Remove up to `count` messages from the front.
    pub fn take(&self, count: usize) -> Vec<T> {
        let mut queue = self.lock();
        let n = count.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Remove every queued message.
    pub fn take_all(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Like [`take`](Self::take), but waits up to `timeout` for at least one
    /// message. Returns an empty vector on timeout. A timeout too large to
    /// represent as a deadline (such as `Duration::MAX`) waits indefinitely.
    pub fn wait_take(&self, count: usize, timeout: Duration) -> Vec<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.lock();
        while queue.is_empty() {
            queue = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Vec::new();
                    }
                    match self.available.wait_timeout(queue, remaining) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => self
                    .available
                    .wait(queue)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            };
        }
        let n = count.min(queue.len());
        queue.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every queued message. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let n = queue.len();
        queue.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn unbounded_wait_takes_late_message() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                mailbox.push("late");
            })
        };
        assert_eq!(mailbox.wait_take(1, Duration::MAX), vec!["late"]);
        producer.join().expect("producer should finish");
    }

    #[test]
    fn fifo_order() {
        let mailbox = Mailbox::new();
        mailbox.push(1);
        mailbox.push_all([2, 3, 4]);
        assert_eq!(mailbox.len(), 4);
        assert_eq!(mailbox.take(2), vec![1, 2]);
        assert_eq!(mailbox.take(10), vec![3, 4]);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn requeue_goes_ahead_of_newer_messages() {
        let mailbox = Mailbox::new();
        mailbox.push_all(["a", "b", "c"]);
        let taken = mailbox.take_all();
        mailbox.push("d");
        mailbox.requeue_front(taken[1..].to_vec());
        assert_eq!(mailbox.take_all(), vec!["b", "c", "d"]);
    }

    #[test]
    fn clear_reports_dropped() {
        let mailbox = Mailbox::new();
        mailbox.push_all([1, 2, 3]);
        assert_eq!(mailbox.clear(), 3);
        assert_eq!(mailbox.clear(), 0);
    }

    #[test]
    fn wait_take_times_out_empty() {
        let mailbox: Mailbox<u8> = Mailbox::new();
        let start = Instant::now();
        assert!(mailbox.wait_take(1, Duration::from_millis(20)).is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_take_wakes_on_push() {
        let mailbox = Arc::new(Mailbox::new());
        let producer = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                mailbox.push_all(["x", "y"]);
            })
        };
        let got = mailbox.wait_take(usize::MAX, Duration::from_secs(5));
        producer.join().expect("producer should finish");
        assert!(!got.is_empty());
        assert_eq!(got[0], "x");
    }
}
