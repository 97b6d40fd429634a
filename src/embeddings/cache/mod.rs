
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Arc<Vec<f32>>>,
    // Insertion order, used for eviction when bounded
    order: VecDeque<String>,
}

/// Memoizes embeddings by exact input string.
///
/// Shared between the embedder and the vector store so that clearing the store
/// also forgets every cached vector.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingCache {
    state: Arc<Mutex<CacheState>>,
    capacity: Option<usize>,
}

impl EmbeddingCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache that evicts its oldest entries beyond `capacity`
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::default(),
            capacity: Some(capacity.max(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock cannot leave the map half-written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn get(&self, text: &str) -> Option<Arc<Vec<f32>>> {
        self.lock().entries.get(text).map(Arc::clone)
    }

    #[inline]
    pub fn insert(&self, text: String, embedding: Vec<f32>) -> Arc<Vec<f32>> {
        let embedding = Arc::new(embedding);
        let mut state = self.lock();

        if state
            .entries
            .insert(text.clone(), Arc::clone(&embedding))
            .is_none()
        {
            state.order.push_back(text);
        }

        if let Some(capacity) = self.capacity {
            while state.entries.len() > capacity {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                state.entries.remove(&oldest);
            }
        }

        embedding
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn clear(&self) {
        let mut state = self.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.order.clear();
        debug!("Cleared {} cached embeddings", count);
    }
}
