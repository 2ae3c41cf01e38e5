//! Object cache shared by all threads using one resolver.
//!
//! Besides the LRU map the cache tracks which objects are being resolved and by whom:
//! a thread asking for an object another thread is already loading waits for it instead
//! of repeating the work, and a thread that comes back to an object it is itself still
//! loading gets [`Error::ReferenceCycle`].

use crate::{Error, Object, ObjectId, Result};
use log::trace;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

pub(crate) struct ObjectCache {
    state: Mutex<State>,
    ready: Condvar,
    max_depth: usize,
}

struct State {
    objects: LruCache<ObjectId, Arc<Object>>,
    // Which thread owns the load of each object.
    loading: HashMap<ObjectId, ThreadId>,
    // Objects each thread is in the middle of resolving, outermost first.
    stacks: HashMap<ThreadId, Vec<ObjectId>>,
}

/// Outcome of [`ObjectCache::claim`].
pub(crate) enum Claim<'a> {
    Hit(Arc<Object>),
    /// The caller must load the object and hand it to [`Loading::finish`].
    Miss(Loading<'a>),
}

/// An object being loaded by the current thread. Dropping it without calling
/// [`Loading::finish`] releases the claim without caching anything.
pub(crate) struct Loading<'a> {
    cache: &'a ObjectCache,
    id: ObjectId,
    owner: bool,
}

impl ObjectCache {
    pub fn new(capacity: NonZeroUsize, max_depth: usize) -> Self {
        ObjectCache {
            state: Mutex::new(State {
                objects: LruCache::new(capacity),
                loading: HashMap::new(),
                stacks: HashMap::new(),
            }),
            ready: Condvar::new(),
            max_depth,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look `id` up, or claim the right to load it.
    pub fn claim(&self, id: ObjectId) -> Result<Claim<'_>> {
        let me = thread::current().id();
        let mut state = self.lock();
        loop {
            if let Some(object) = state.objects.get(&id) {
                return Ok(Claim::Hit(object.clone()));
            }

            let stack = state.stacks.get(&me).map(Vec::as_slice).unwrap_or_default();
            if stack.contains(&id) {
                return Err(Error::ReferenceCycle(id));
            }
            if stack.len() >= self.max_depth {
                return Err(Error::ReferenceLimit);
            }
            let busy = !stack.is_empty();

            let owner = match state.loading.get(&id).copied() {
                None => {
                    state.loading.insert(id, me);
                    true
                }
                // Waiting while holding claims of our own could deadlock against the owner.
                Some(_) if busy => {
                    trace!("object {id:?} is loading elsewhere, loading it independently");
                    false
                }
                Some(_) => {
                    state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
                    continue;
                }
            };
            state.stacks.entry(me).or_default().push(id);
            return Ok(Claim::Miss(Loading { cache: self, id, owner }));
        }
    }

    #[cfg(test)]
    fn get(&self, id: ObjectId) -> Option<Arc<Object>> {
        self.lock().objects.get(&id).cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().objects.len()
    }

    /// Nested resolutions the current thread is inside of.
    #[cfg(test)]
    fn depth(&self) -> usize {
        let me = thread::current().id();
        self.lock().stacks.get(&me).map_or(0, Vec::len)
    }
}

impl Loading<'_> {
    pub fn finish(self, object: Arc<Object>) {
        self.cache.lock().objects.put(self.id, object);
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut state = self.cache.lock();
        if let Some(stack) = state.stacks.get_mut(&me) {
            if let Some(position) = stack.iter().rposition(|id| *id == self.id) {
                stack.remove(position);
            }
            if stack.is_empty() {
                state.stacks.remove(&me);
            }
        }
        if self.owner {
            state.loading.remove(&self.id);
            drop(state);
            self.cache.ready.notify_all();
        }
    }
}
