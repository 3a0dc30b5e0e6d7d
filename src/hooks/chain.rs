use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::{HookId, Priority};
use crate::aslr::NominalAddress;
use crate::image::Code;

pub(crate) type Interceptor<A, R> = Arc<dyn for<'c> Fn(&Chain<'c, A, R>, A) -> R + Send + Sync>;

pub(crate) struct Entry<A, R> {
    pub(crate) id: HookId,
    pub(crate) owner: Arc<str>,
    pub(crate) priority: Priority,
    pub(crate) enabled: Arc<AtomicBool>,
    pub(crate) interceptor: Interceptor<A, R>,
}

impl<A, R> Clone for Entry<A, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            owner: self.owner.clone(),
            priority: self.priority,
            enabled: self.enabled.clone(),
            interceptor: self.interceptor.clone(),
        }
    }
}

/// The "call original" capability of one interceptor, scoped to its position in the chain.
///
/// Every interceptor receives one of these. [`Chain::call_original`] continues with
/// the next enabled interceptor, or reaches the unhooked implementation when the
/// current interceptor is the last one. Not calling it skips everything downstream,
/// the original included.
pub struct Chain<'c, A, R> {
    target: NominalAddress,
    entries: &'c [Entry<A, R>],
    position: usize,
    original: &'c Code<A, R>,
}

impl<'c, A, R> Chain<'c, A, R> {
    /// Forwards `args` downstream and returns whatever comes back.
    pub fn call_original(&self, args: A) -> R {
        dispatch(self.target, self.entries, self.position + 1, self.original, args)
    }

    /// The hooked target.
    pub fn target(&self) -> NominalAddress {
        self.target
    }

    /// The consumer that registered the interceptor currently running.
    pub fn owner(&self) -> &str {
        &self.entries[self.position].owner
    }

    /// Whether this is the last enabled interceptor, so `call_original` reaches the original.
    pub fn is_last(&self) -> bool {
        next_enabled(self.entries, self.position + 1).is_none()
    }
}

fn next_enabled<A, R>(entries: &[Entry<A, R>], from: usize) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, entry)| entry.enabled.load(Ordering::Acquire))
        .map(|(index, _)| index)
}

pub(crate) fn dispatch<A, R>(
    target: NominalAddress,
    entries: &[Entry<A, R>],
    from: usize,
    original: &Code<A, R>,
    args: A,
) -> R {
    match next_enabled(entries, from) {
        Some(position) => {
            let chain = Chain {
                target,
                entries,
                position,
                original,
            };
            (entries[position].interceptor)(&chain, args)
        }
        None => original(args),
    }
}

/// The ordered interceptors of one target, plus the code they wrap.
///
/// The entry list is copy-on-write: dispatch works on a snapshot, so an
/// interceptor can register or remove hooks without deadlocking the call it
/// is part of. Such changes apply from the next call on.
pub(crate) struct TypedChain<A, R> {
    target: NominalAddress,
    original: Code<A, R>,
    entries: RwLock<Arc<Vec<Entry<A, R>>>>,
}

impl<A: 'static, R: 'static> TypedChain<A, R> {
    pub(crate) fn new(target: NominalAddress, original: Code<A, R>) -> Self {
        Self {
            target,
            original,
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Entry<A, R>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Inserts after every entry of the same or an earlier priority.
    pub(crate) fn insert(&self, entry: Entry<A, R>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::clone(&entries);

        let position = next
            .iter()
            .position(|existing| existing.priority > entry.priority)
            .unwrap_or(next.len());
        next.insert(position, entry);

        *entries = Arc::new(next);
    }

    /// Runs the chain from its head. This is the body of the installed trampoline.
    pub(crate) fn invoke(&self, args: A) -> R {
        let entries = self.snapshot();
        dispatch(self.target, &entries, 0, &self.original, args)
    }

    /// Runs the chain downstream of the interceptor `id`.
    pub(crate) fn invoke_after(&self, id: HookId, args: A) -> Option<R> {
        let entries = self.snapshot();
        let position = entries.iter().position(|entry| entry.id == id)?;
        Some(dispatch(self.target, &entries, position + 1, &self.original, args))
    }
}

/// The signature-independent operations the manager needs on a chain.
pub(crate) trait ChainOps: Send + Sync {
    fn remove(&self, id: HookId) -> bool;

    fn remove_owner(&self, owner: &str) -> Vec<HookId>;

    fn ids(&self) -> Vec<HookId>;

    fn enabled_flag(&self, id: HookId) -> Option<Arc<AtomicBool>>;

    fn len(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

impl<A: 'static, R: 'static> ChainOps for TypedChain<A, R> {
    fn remove(&self, id: HookId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.iter().any(|entry| entry.id == id) {
            return false;
        }

        let next = entries.iter().filter(|entry| entry.id != id).cloned().collect();
        *entries = Arc::new(next);
        true
    }

    fn remove_owner(&self, owner: &str) -> Vec<HookId> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let (removed, kept): (Vec<_>, Vec<_>) = entries
            .iter()
            .cloned()
            .partition(|entry| &*entry.owner == owner);

        *entries = Arc::new(kept);
        removed.into_iter().map(|entry| entry.id).collect()
    }

    fn ids(&self) -> Vec<HookId> {
        self.snapshot().iter().map(|entry| entry.id).collect()
    }

    fn enabled_flag(&self, id: HookId) -> Option<Arc<AtomicBool>> {
        self.snapshot()
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.enabled.clone())
    }

    fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
