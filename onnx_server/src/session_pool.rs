use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, MutexGuard,
};

/// Fixed set of exclusively-owned runtimes handed out round-robin.
///
/// Callers run on blocking threads, so a plain mutex is enough.
pub struct SessionPool<S> {
    sessions: Vec<Mutex<S>>,
    round_robin_counter: AtomicUsize,
}

impl<S> SessionPool<S> {
    pub fn new(sessions: Vec<S>) -> anyhow::Result<Self> {
        if sessions.is_empty() {
            anyhow::bail!("session pool needs at least one session");
        }
        Ok(Self {
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            round_robin_counter: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Lock the next session in turn. A poisoned slot yields `None`.
    pub fn acquire(&self) -> Option<MutexGuard<'_, S>> {
        let idx = self.round_robin_counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        self.sessions[idx].lock().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn empty_pool_is_rejected() {
        assert!(SessionPool::<u8>::new(Vec::new()).is_err());
    }

    #[test]
    fn acquisition_cycles_through_sessions() {
        let pool = SessionPool::new(vec![0usize, 1, 2]).unwrap();
        let order: Vec<usize> = (0..6).map(|_| *pool.acquire().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn concurrent_callers_share_the_pool() {
        let pool = Arc::new(SessionPool::new(vec![0u64, 0]).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        *pool.acquire().unwrap() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total: u64 = (0..2).map(|_| *pool.acquire().unwrap()).sum();
        assert_eq!(total, 800);
    }
}
