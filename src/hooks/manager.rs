use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::chain::{ChainOps, Chain, Entry, TypedChain};
use super::{ForeignFn, HookId, HookMode, Priority};
use crate::aslr::{NominalAddress, ResolvedAddress};
use crate::error::{Error, Result};
use crate::image::{Code, ProcessImage};

/// Everything known about one hooked target.
///
/// Created the first time the target is hooked and kept until the manager is
/// dropped: the trampoline closes over the chain, so the record is never
/// replaced once installed.
struct HookRecord {
    name: &'static str,
    resolved: ResolvedAddress,
    mode: HookMode,
    chain: Arc<dyn ChainOps>,
}

/// The capability handed to whoever registered an interceptor.
#[derive(Clone)]
pub struct HookHandle {
    target: NominalAddress,
    id: HookId,
    enabled: Arc<AtomicBool>,
    chain: Arc<dyn ChainOps>,
}

impl HookHandle {
    pub fn target(&self) -> NominalAddress {
        self.target
    }

    pub fn id(&self) -> HookId {
        self.id
    }

    /// Continues the chain after this handle's interceptor.
    ///
    /// This is the same capability as [`Chain::call_original`], for interceptors that
    /// keep their handle around (for example in a `OnceCell`) rather than using the
    /// chain they are given.
    ///
    /// # Errors
    /// * [`Error::SignatureMismatch`] - `A`/`R` are not the target's signature
    /// * [`Error::StaleHandle`] - the interceptor was unhooked
    pub fn call_original<A: 'static, R: 'static>(&self, args: A) -> Result<R> {
        let chain = self
            .chain
            .as_any()
            .downcast_ref::<TypedChain<A, R>>()
            .ok_or(Error::SignatureMismatch { target: self.target })?;

        chain
            .invoke_after(self.id, args)
            .ok_or(Error::StaleHandle { target: self.target })
    }

    /// Enables or disables the interceptor. A disabled interceptor keeps its position
    /// in the chain but is passed over by dispatch.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_registered(&self) -> bool {
        self.chain.ids().contains(&self.id)
    }
}

impl std::fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookHandle")
            .field("target", &self.target)
            .field("id", &self.id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Owns every hooked target of one process image.
///
/// Registration and removal are serialised by an internal lock and are expected
/// to happen during initialisation and teardown. Dispatch never takes that
/// lock, interceptors run synchronously on the thread that made the host call.
pub struct HookManager {
    image: Arc<ProcessImage>,
    records: Mutex<HashMap<NominalAddress, HookRecord>>,
    next_id: AtomicU64,
}

impl HookManager {
    pub fn new(image: Arc<ProcessImage>) -> Self {
        Self {
            image,
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn image(&self) -> &Arc<ProcessImage> {
        &self.image
    }

    fn records(&self) -> MutexGuard<'_, HashMap<NominalAddress, HookRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `interceptor` on `target`.
    ///
    /// The first registration for a target resolves its address and installs the
    /// trampoline. Later ones join the existing chain, ordered by `priority` and then
    /// by registration.
    ///
    /// # Errors
    /// * [`Error::HookConflict`] - an exclusive hook is requested on a target with live
    ///   interceptors, or any hook on a target holding an exclusive one
    /// * [`Error::SignatureMismatch`] - the target was hooked or defined with another signature
    /// * [`Error::AddressResolution`] - the target is not in the symbol table
    pub fn hook<A, R, F>(
        &self,
        target: &ForeignFn<A, R>,
        owner: &str,
        priority: Priority,
        mode: HookMode,
        interceptor: F,
    ) -> Result<HookHandle>
    where
        A: 'static,
        R: 'static,
        F: for<'c> Fn(&Chain<'c, A, R>, A) -> R + Send + Sync + 'static,
    {
        let nominal = target.address();
        let mut records = self.records();

        if !records.contains_key(&nominal) {
            let record = self.install(target, mode)?;
            records.insert(nominal, record);
        }

        let record = records
            .get_mut(&nominal)
            .ok_or(Error::UnknownTarget { target: nominal })?;

        if record.chain.len() > 0 && (record.mode == HookMode::Exclusive || mode == HookMode::Exclusive) {
            tracing::debug!(
                target_fn = record.name,
                owner,
                existing = ?record.mode,
                requested = ?mode,
                "rejected conflicting hook"
            );
            return Err(Error::HookConflict {
                target: nominal,
                existing: record.mode,
                requested: mode,
            });
        }

        let chain = record
            .chain
            .as_any()
            .downcast_ref::<TypedChain<A, R>>()
            .ok_or(Error::SignatureMismatch { target: nominal })?;

        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let enabled = Arc::new(AtomicBool::new(true));

        chain.insert(Entry {
            id,
            owner: Arc::from(owner),
            priority,
            enabled: enabled.clone(),
            interceptor: Arc::new(interceptor),
        });
        record.mode = mode;

        tracing::debug!(
            target_fn = record.name,
            address = %record.resolved,
            owner,
            ?priority,
            ?mode,
            chain_len = record.chain.len(),
            "registered interceptor"
        );

        Ok(HookHandle {
            target: nominal,
            id,
            enabled,
            chain: record.chain.clone(),
        })
    }

    /// Registers the only interceptor `target` may ever have while it is hooked.
    pub fn hook_exclusive<A, R, F>(&self, target: &ForeignFn<A, R>, owner: &str, interceptor: F) -> Result<HookHandle>
    where
        A: 'static,
        R: 'static,
        F: for<'c> Fn(&Chain<'c, A, R>, A) -> R + Send + Sync + 'static,
    {
        self.hook(target, owner, Priority::Normal, HookMode::Exclusive, interceptor)
    }

    /// Registers one of many cooperating interceptors on `target`.
    pub fn hook_shared<A, R, F>(
        &self,
        target: &ForeignFn<A, R>,
        owner: &str,
        priority: Priority,
        interceptor: F,
    ) -> Result<HookHandle>
    where
        A: 'static,
        R: 'static,
        F: for<'c> Fn(&Chain<'c, A, R>, A) -> R + Send + Sync + 'static,
    {
        self.hook(target, owner, priority, HookMode::Shared, interceptor)
    }

    fn install<A: 'static, R: 'static>(&self, target: &ForeignFn<A, R>, mode: HookMode) -> Result<HookRecord> {
        let mut installed = None;

        let resolved = self.image.patch(target, |original| {
            let chain = Arc::new(TypedChain::new(target.address(), original));
            installed = Some(chain.clone());

            let trampoline: Code<A, R> = Arc::new(move |args| chain.invoke(args));
            trampoline
        })?;

        let chain = installed.ok_or(Error::UnknownTarget { target: target.address() })?;

        tracing::info!(
            target_fn = target.name(),
            nominal = %target.address(),
            address = %resolved,
            convention = ?target.convention(),
            "installed trampoline"
        );

        Ok(HookRecord {
            name: target.name(),
            resolved,
            mode,
            chain,
        })
    }

    /// Looks up the head of the chain on `target` without registering anything.
    pub fn find_hook_by_address(&self, target: NominalAddress) -> Option<HookHandle> {
        let records = self.records();
        let record = records.get(&target)?;
        let id = record.chain.ids().into_iter().next()?;

        self.handle_for(target, record, id)
    }

    fn handle_for(&self, target: NominalAddress, record: &HookRecord, id: HookId) -> Option<HookHandle> {
        Some(HookHandle {
            target,
            id,
            enabled: record.chain.enabled_flag(id)?,
            chain: record.chain.clone(),
        })
    }

    /// Removes one interceptor from its chain.
    ///
    /// An emptied chain keeps its trampoline, which from then on passes every call
    /// straight to the original implementation.
    pub fn unhook(&self, handle: &HookHandle) -> Result<()> {
        let records = self.records();
        let record = records
            .get(&handle.target)
            .ok_or(Error::StaleHandle { target: handle.target })?;

        if !record.chain.remove(handle.id) {
            return Err(Error::StaleHandle { target: handle.target });
        }

        let remaining = record.chain.len();
        tracing::debug!(target_fn = record.name, id = ?handle.id, remaining, "removed interceptor");
        if remaining == 0 {
            tracing::debug!(target_fn = record.name, "trampoline is now a passthrough");
        }

        Ok(())
    }

    /// Removes every interceptor registered by `owner`, returning how many were removed.
    pub fn unhook_owner(&self, owner: &str) -> usize {
        let records = self.records();

        let removed: usize = records
            .values()
            .map(|record| record.chain.remove_owner(owner).len())
            .sum();

        tracing::info!(owner, removed, "removed interceptors of owner");
        removed
    }

    pub fn is_installed(&self, target: NominalAddress) -> bool {
        self.records().contains_key(&target)
    }

    pub fn chain_len(&self, target: NominalAddress) -> usize {
        self.records()
            .get(&target)
            .map(|record| record.chain.len())
            .unwrap_or(0)
    }

    /// The admission mode of `target`'s most recent registration, if it was ever hooked.
    pub fn mode(&self, target: NominalAddress) -> Option<HookMode> {
        self.records().get(&target).map(|record| record.mode)
    }
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let records = self.records();
        let mut map = f.debug_map();
        for (target, record) in records.iter() {
            map.entry(target, &record.chain.len());
        }
        map.finish()
    }
}
