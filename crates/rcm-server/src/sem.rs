use parking_lot::{Condvar, Mutex};

/// Counting semaphore.
///
/// Used as the worker pools' work signal and as the dispatcher's run gate.
pub(crate) struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub(crate) fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Increment the count, waking one waiter.
    pub(crate) fn post(&self) {
        self.post_n(1);
    }

    /// Increment the count by `n`, waking up to `n` waiters.
    pub(crate) fn post_n(&self, n: usize) {
        if n == 0 {
            return;
        }
        *self.count.lock() += n;
        if n == 1 {
            self.cond.notify_one();
        } else {
            self.cond.notify_all();
        }
    }

    /// Block until the count is positive, then decrement it.
    pub(crate) fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn wait_consumes_posted_count() {
        let sem = Semaphore::new(2);
        sem.wait();
        sem.wait();
        assert_eq!(sem.available(), 0);
        sem.post();
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn post_n_wakes_that_many_waiters() {
        let sem = Arc::new(Semaphore::new(0));
        let woke = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let sem = sem.clone();
                let woke = woke.clone();
                thread::spawn(move || {
                    sem.wait();
                    woke.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(woke.load(Ordering::SeqCst), 0);

        sem.post_n(3);
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(woke.load(Ordering::SeqCst), 3);
        assert_eq!(sem.available(), 0);
    }
}
