//! Named critical sections.
//!
//! One async mutex per logical resource name ("roster", "polls",
//! "recruits:<tab-id>"). Same-name sections run one at a time in acquisition
//! order (tokio's mutex queues waiters FIFO); different names never contend.
//!
//! Each section body runs on its own spawned task and the caller awaits its
//! join handle, so a caller that goes away mid-section (dropped request) does
//! not abort a half-applied sequence of backing-service writes. The guard is
//! released on every exit path: normal return, error, or panic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rollcall_core::StoreError;
use tracing::{debug, warn};

type Sections = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

#[derive(Debug, Default)]
pub struct LockRegistry {
    sections: Sections,
    acquire_timeout: Option<Duration>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound how long a caller waits for a busy section before failing with
    /// [`StoreError::Busy`]. `None` waits indefinitely.
    pub fn with_acquire_timeout(timeout: Option<Duration>) -> Self {
        Self {
            sections: Sections::default(),
            acquire_timeout: timeout,
        }
    }

    /// Run `f` while holding the section named `name`.
    pub async fn with_lock<F, Fut, T>(&self, name: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let section = self.section(name);
        let sections = Arc::clone(&self.sections);
        let timeout = self.acquire_timeout;
        let owned_name = name.to_string();

        let handle = tokio::spawn(async move {
            let acquired = match timeout {
                Some(limit) => {
                    tokio::time::timeout(limit, Arc::clone(&section).lock_owned())
                        .await
                        .ok()
                }
                None => Some(Arc::clone(&section).lock_owned().await),
            };
            let result = match acquired {
                Some(guard) => {
                    debug!(section = %owned_name, "critical section entered");
                    let result = f().await;
                    drop(guard);
                    result
                }
                None => Err(StoreError::Busy {
                    name: owned_name.clone(),
                }),
            };
            release(&sections, &owned_name, section);
            result
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(section = %name, error = %e, "critical section did not complete");
                // A panicking body unwinds through its guard, but the map entry
                // is left behind; prune it so the registry does not grow.
                prune(&self.sections, name);
                Err(StoreError::Interrupted {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Number of sections currently tracked (held or waited on).
    pub fn tracked(&self) -> usize {
        self.sections.lock().len()
    }

    fn section(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.sections.lock();
        Arc::clone(map.entry(name.to_string()).or_default())
    }
}

/// Drop our handle and forget the section if nobody else is holding or
/// waiting on it.
fn release(sections: &Sections, name: &str, section: Arc<tokio::sync::Mutex<()>>) {
    let mut map = sections.lock();
    if Arc::strong_count(&section) == 2 {
        map.remove(name);
    }
    drop(section);
}

fn prune(sections: &Sections, name: &str) {
    let mut map = sections.lock();
    if let Some(section) = map.get(name) {
        if Arc::strong_count(section) == 1 {
            map.remove(name);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn same_name_sections_never_overlap() {
        let locks = Arc::new(LockRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                locks
                    .with_lock("roster", move || async move {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn different_names_run_concurrently() {
        let locks = Arc::new(LockRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for name in ["polls", "buttons", "roster"] {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                locks
                    .with_lock(name, move || async move {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn error_releases_the_section() {
        let locks = LockRegistry::new();
        let err = locks
            .with_lock("polls", || async {
                Err::<(), _>(StoreError::Conflict("poll is closed".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let ok = locks.with_lock("polls", || async { Ok(5) }).await.unwrap();
        assert_eq!(ok, 5);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn panic_releases_the_section_and_reports_interrupted() {
        let locks = LockRegistry::new();
        let err = locks
            .with_lock("polls", || async {
                if true {
                    panic!("boom");
                }
                Ok::<(), StoreError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Interrupted { .. }));

        let ok = locks.with_lock("polls", || async { Ok(1) }).await.unwrap();
        assert_eq!(ok, 1);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn dropped_caller_does_not_abort_the_section() {
        let locks = Arc::new(LockRegistry::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let caller = {
            let locks = Arc::clone(&locks);
            let finished = Arc::clone(&finished);
            tokio::spawn(async move {
                locks
                    .with_lock("roster", move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn bounded_wait_reports_busy() {
        let locks = Arc::new(LockRegistry::with_acquire_timeout(Some(
            Duration::from_millis(20),
        )));

        let holder = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .with_lock("roster", || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = locks
            .with_lock("roster", || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Busy { ref name } if name == "roster"));
        holder.await.unwrap().unwrap();
    }
}
