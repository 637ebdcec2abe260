use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between a worker and its owner.
///
/// Long-running calls poll it at well-defined points and sleep through
/// [`CancelToken::sleep`], which wakes as soon as the flag is raised.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: Mutex<bool>,
    wake: Condvar,
    children: Mutex<Vec<Weak<TokenState>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TokenState {
    fn cancel(&self) {
        {
            let mut cancelled = lock(&self.cancelled);
            *cancelled = true;
            self.wake.notify_all();
        }
        let children = std::mem::take(&mut *lock(&self.children));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Cancels `child` whenever this token is cancelled, including when
    /// that has already happened. The child can still be cancelled alone.
    pub fn link(&self, child: &CancelToken) {
        {
            let mut children = lock(&self.inner.children);
            children.retain(|existing| existing.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        if self.is_cancelled() {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.lock()
    }

    /// Sleeps for `duration`; returns `true` if cancelled before or during the wait.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.lock();
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = match self.inner.wake.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        lock(&self.inner.cancelled)
    }
}

/// Stop token of the run currently holding an activity's [`RunFlag`].
#[derive(Debug, Default)]
pub struct ActiveRun {
    current: Mutex<Option<CancelToken>>,
}

impl ActiveRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh token for a run that is about to start.
    pub fn arm(&self) -> CancelToken {
        let token = CancelToken::new();
        *lock(&self.current) = Some(token.clone());
        token
    }

    /// Token of the armed run, arming one if none is installed.
    pub fn token(&self) -> CancelToken {
        lock(&self.current)
            .get_or_insert_with(CancelToken::new)
            .clone()
    }

    pub fn clear(&self) {
        *lock(&self.current) = None;
    }

    /// Cancels the armed run; `false` when nothing is armed.
    pub fn stop(&self) -> bool {
        match lock(&self.current).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Re-entry gate for activities that must never run twice at once.
#[derive(Debug, Clone, Default)]
pub struct RunFlag {
    active: Arc<AtomicBool>,
}

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the flag, or returns `None` when the activity is already running.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                active: Arc::clone(&self.active),
            })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Holds a [`RunFlag`] raised until dropped.
#[derive(Debug)]
pub struct RunGuard {
    active: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sleep_runs_to_completion_without_cancel() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn cancel_wakes_a_sleeping_worker() {
        let token = CancelToken::new();
        let worker = {
            let token = token.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let cancelled = token.sleep(Duration::from_secs(10));
                (cancelled, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        token.cancel();
        let (cancelled, elapsed) = worker.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn linked_child_follows_its_parent() {
        let parent = CancelToken::new();
        let child = CancelToken::new();
        parent.link(&child);
        let sleeper = {
            let child = child.clone();
            thread::spawn(move || child.sleep(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(30));
        parent.cancel();
        assert!(sleeper.join().unwrap());
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancelling_a_child_leaves_the_parent_alone() {
        let parent = CancelToken::new();
        let child = CancelToken::new();
        parent.link(&child);
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn linking_under_a_cancelled_parent_cancels_at_once() {
        let parent = CancelToken::new();
        parent.cancel();
        let child = CancelToken::new();
        parent.link(&child);
        assert!(child.is_cancelled());
    }

    #[test]
    fn active_run_stops_only_while_armed() {
        let runs = ActiveRun::new();
        assert!(!runs.stop());
        let token = runs.arm();
        assert!(runs.stop());
        assert!(token.is_cancelled());
        runs.clear();
        assert!(!runs.stop());
    }

    #[test]
    fn run_flag_rejects_second_claim_until_released() {
        let flag = RunFlag::new();
        let guard = flag.try_acquire().expect("first claim");
        assert!(flag.is_active());
        assert!(flag.try_acquire().is_none());
        drop(guard);
        assert!(!flag.is_active());
        assert!(flag.try_acquire().is_some());
    }
}
