//! Shared application state for all routes. The model is an immutable snapshot swapped on metadata change.

use crate::config::ResolvedModel;
use crate::settings::Settings;
use sqlx::PgPool;
use std::sync::{Arc, RwLock};

/// Process-wide model snapshot. The lock only guards the pointer swap; readers clone the `Arc`
/// and keep using their snapshot even if a newer model is installed meanwhile.
#[derive(Clone, Default)]
pub struct ModelHandle {
    inner: Arc<RwLock<Arc<ResolvedModel>>>,
}

impl ModelHandle {
    pub fn new(model: ResolvedModel) -> Self {
        ModelHandle {
            inner: Arc::new(RwLock::new(Arc::new(model))),
        }
    }

    pub fn snapshot(&self) -> Arc<ResolvedModel> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn swap(&self, model: ResolvedModel) {
        let next = Arc::new(model);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!("entity model swapped");
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub model: ModelHandle,
    pub settings: Arc<Settings>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolved::fixtures::blog_model;

    #[test]
    fn readers_keep_their_snapshot_across_swaps() {
        let handle = ModelHandle::new(blog_model());
        let before = handle.snapshot();
        handle.swap(ResolvedModel::default());
        assert!(before.lookup("post").is_ok());
        assert!(handle.snapshot().lookup("post").is_err());
    }

    #[test]
    fn concurrent_readers_see_whole_models() {
        let handle = ModelHandle::new(blog_model());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let h = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let m = h.snapshot();
                        let n = m.entities().count();
                        assert!(n == 0 || n == 5);
                    }
                })
            })
            .collect();
        for i in 0..50 {
            if i % 2 == 0 {
                handle.swap(ResolvedModel::default());
            } else {
                handle.swap(blog_model());
            }
        }
        for r in readers {
            r.join().unwrap();
        }
    }
}
