//! Reference-counted, type-tagged resource registry.
//!
//! Every opaque runtime object (buffers, devices, semaphores, lists, ...) is
//! registered here and addressed by a [`Handle`]. A handle carries the kind
//! tag plus a slot generation, so a handle that outlives its object resolves
//! to [`RegistryError::InvalidHandle`] instead of aliasing a newer entry.
//!
//! [`Ref`] is the owning form: it holds exactly one count, retains on clone
//! and releases on drop. Raw handles never own anything.

use crate::resource::{Resource, ResourceKind};
use crate::sync::{Arc, Mutex};
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Handle kind disagrees with what the caller expected
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: ResourceKind,
        actual: ResourceKind,
    },

    /// Handle was released (stale generation) or never registered
    #[error("invalid or released handle {0}")]
    InvalidHandle(Handle),

    /// Live-entry limit reached
    #[error("resource registry exhausted (limit {limit})")]
    Exhausted { limit: usize },
}

/// Non-owning reference to a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
    kind: ResourceKind,
}

impl Handle {
    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}.{}", self.kind, self.index, self.generation)
    }
}

struct Entry {
    kind: ResourceKind,
    count: usize,
    // Always an `Arc<T>` for the `T` the entry was registered with.
    object: Box<dyn Any + Send + Sync>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Slots {
    fn entry(&self, handle: Handle) -> Result<&Entry, RegistryError> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(RegistryError::InvalidHandle(handle))
    }

    fn entry_mut(&mut self, handle: Handle) -> Result<&mut Entry, RegistryError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(RegistryError::InvalidHandle(handle))
    }
}

/// Registry of all live resources of one instance.
pub struct ResourceRegistry {
    slots: Mutex<Slots>,
    limit: Option<usize>,
}

impl ResourceRegistry {
    /// Create an unbounded registry
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            limit: None,
        }
    }

    /// Create a registry that refuses registrations past `limit` live entries
    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            limit: Some(limit),
        }
    }

    /// Wrap `object` in a new entry with a count of one.
    pub fn register<T>(&self, object: Arc<T>) -> Result<Handle, RegistryError>
    where
        T: Resource + ?Sized,
    {
        let mut slots = self.slots.lock();
        if let Some(limit) = self.limit {
            if slots.live >= limit {
                return Err(RegistryError::Exhausted { limit });
            }
        }

        let entry = Entry {
            kind: T::KIND,
            count: 1,
            object: Box::new(object),
        };

        let index = match slots.free.pop() {
            Some(index) => {
                slots.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                let index = slots.slots.len() as u32;
                slots.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                index
            }
        };
        slots.live += 1;

        Ok(Handle {
            index,
            generation: slots.slots[index as usize].generation,
            kind: T::KIND,
        })
    }

    /// Register `object` and return the owning reference.
    pub fn register_ref<T>(self: &Arc<Self>, object: Arc<T>) -> Result<Ref, RegistryError>
    where
        T: Resource + ?Sized,
    {
        let handle = self.register(object)?;
        Ok(Ref::adopt(self.clone(), handle))
    }

    /// Resolve `handle` to its native object, checking the kind tag first.
    pub fn resolve<T>(&self, handle: Handle) -> Result<Arc<T>, RegistryError>
    where
        T: Resource + ?Sized,
    {
        self.resolve_any(handle, T::KIND)?;
        let slots = self.slots.lock();
        let entry = slots.entry(handle)?;
        entry
            .object
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(RegistryError::TypeMismatch {
                expected: T::KIND,
                actual: entry.kind,
            })
    }

    /// Kind-checked lookup for callers that do not name the concrete type.
    pub fn resolve_any(&self, handle: Handle, expected: ResourceKind) -> Result<(), RegistryError> {
        if handle.kind != expected {
            return Err(RegistryError::TypeMismatch {
                expected,
                actual: handle.kind,
            });
        }
        let slots = self.slots.lock();
        let entry = slots.entry(handle)?;
        if entry.kind != expected {
            return Err(RegistryError::TypeMismatch {
                expected,
                actual: entry.kind,
            });
        }
        Ok(())
    }

    /// Increment the count. Returns the new count.
    pub fn retain(&self, handle: Handle) -> Result<usize, RegistryError> {
        let mut slots = self.slots.lock();
        let entry = slots.entry_mut(handle)?;
        entry.count += 1;
        Ok(entry.count)
    }

    /// Decrement the count, destroying the object when it reaches zero.
    /// Returns the remaining count.
    pub fn release(&self, handle: Handle) -> Result<usize, RegistryError> {
        let doomed = {
            let mut slots = self.slots.lock();
            let entry = slots.entry_mut(handle)?;
            entry.count -= 1;
            if entry.count > 0 {
                return Ok(entry.count);
            }

            let slot = &mut slots.slots[handle.index as usize];
            let doomed = slot.entry.take();
            slot.generation = slot.generation.wrapping_add(1);
            slots.free.push(handle.index);
            slots.live -= 1;
            doomed
        };

        // Destructors run unlocked: a dying list releases its own elements.
        drop(doomed);
        Ok(0)
    }

    /// Current count of a live handle
    pub fn ref_count(&self, handle: Handle) -> Result<usize, RegistryError> {
        let slots = self.slots.lock();
        Ok(slots.entry(handle)?.count)
    }

    /// Whether `handle` still names a live entry
    pub fn is_live(&self, handle: Handle) -> bool {
        self.slots.lock().entry(handle).is_ok()
    }

    /// Number of live entries
    pub fn live_count(&self) -> usize {
        self.slots.lock().live
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("live", &self.live_count())
            .field("limit", &self.limit)
            .finish()
    }
}

/// Owning reference: one count on a registry entry.
pub struct Ref {
    registry: Arc<ResourceRegistry>,
    handle: Handle,
}

impl Ref {
    /// Take ownership of one count the caller already holds on `handle`.
    pub fn adopt(registry: Arc<ResourceRegistry>, handle: Handle) -> Self {
        Self { registry, handle }
    }

    /// Retain `handle` and wrap the new count.
    pub fn retain(registry: &Arc<ResourceRegistry>, handle: Handle) -> Result<Self, RegistryError> {
        registry.retain(handle)?;
        Ok(Self::adopt(registry.clone(), handle))
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.handle.kind
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn resolve<T>(&self) -> Result<Arc<T>, RegistryError>
    where
        T: Resource + ?Sized,
    {
        self.registry.resolve::<T>(self.handle)
    }

    /// Give up ownership without releasing; the caller now owns the count.
    pub fn into_handle(self) -> Handle {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }
}

impl Clone for Ref {
    fn clone(&self) -> Self {
        let retained = self.registry.retain(self.handle);
        debug_assert!(retained.is_ok(), "live Ref pointed at a dead entry");
        Self {
            registry: self.registry.clone(),
            handle: self.handle,
        }
    }
}

impl Drop for Ref {
    fn drop(&mut self) {
        let released = self.registry.release(self.handle);
        debug_assert!(released.is_ok(), "double release of {}", self.handle);
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry) && self.handle == other.handle
    }
}

impl Eq for Ref {}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({})", self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Resource for Tracked {
        const KIND: ResourceKind = ResourceKind::Buffer;
    }

    #[derive(Debug)]
    struct Untracked;

    impl Resource for Untracked {
        const KIND: ResourceKind = ResourceKind::Device;
    }

    fn tracked() -> (Arc<Tracked>, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Tracked {
                drops: drops.clone(),
            }),
            drops,
        )
    }

    #[test]
    fn test_register_starts_at_one() {
        let registry = ResourceRegistry::new();
        let (object, _) = tracked();
        let handle = registry.register(object).unwrap();
        assert_eq!(handle.kind(), ResourceKind::Buffer);
        assert_eq!(registry.ref_count(handle).unwrap(), 1);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_release_once_destroys_and_invalidates() {
        let registry = ResourceRegistry::new();
        let (object, drops) = tracked();
        let handle = registry.register(object).unwrap();

        assert_eq!(registry.release(handle).unwrap(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.resolve::<Tracked>(handle).err(),
            Some(RegistryError::InvalidHandle(handle))
        );
        assert!(registry.release(handle).is_err());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_checks_kind() {
        let registry = ResourceRegistry::new();
        let (object, _) = tracked();
        let handle = registry.register(object).unwrap();

        let err = registry.resolve::<Untracked>(handle).unwrap_err();
        assert_eq!(
            err,
            RegistryError::TypeMismatch {
                expected: ResourceKind::Device,
                actual: ResourceKind::Buffer,
            }
        );
        assert!(registry.resolve::<Tracked>(handle).is_ok());
    }

    #[test]
    fn test_stale_handle_does_not_alias_reused_slot() {
        let registry = ResourceRegistry::new();
        let (first, _) = tracked();
        let old = registry.register(first).unwrap();
        registry.release(old).unwrap();

        let (second, _) = tracked();
        let new = registry.register(second).unwrap();
        assert_eq!(old.index(), new.index());
        assert!(registry.resolve::<Tracked>(old).is_err());
        assert!(registry.resolve::<Tracked>(new).is_ok());
    }

    #[test]
    fn test_ref_clone_and_drop() {
        let registry = Arc::new(ResourceRegistry::new());
        let (object, drops) = tracked();
        let first = registry.register_ref(object).unwrap();
        let handle = first.handle();

        let second = first.clone();
        assert_eq!(registry.ref_count(handle).unwrap(), 2);
        drop(first);
        assert_eq!(registry.ref_count(handle).unwrap(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_limit_reports_exhaustion() {
        let registry = ResourceRegistry::with_limit(1);
        let (a, _) = tracked();
        let (b, _) = tracked();
        let handle = registry.register(a).unwrap();
        assert_eq!(
            registry.register(b).unwrap_err(),
            RegistryError::Exhausted { limit: 1 }
        );
        registry.release(handle).unwrap();
        let (c, _) = tracked();
        assert!(registry.register(c).is_ok());
    }

    #[test]
    fn test_last_release_from_other_thread() {
        let registry = Arc::new(ResourceRegistry::new());
        let (object, drops) = tracked();
        let owned = registry.register_ref(object).unwrap();
        let clones: Vec<Ref> = (0..8).map(|_| owned.clone()).collect();
        drop(owned);

        let threads: Vec<_> = clones
            .into_iter()
            .map(|r| std::thread::spawn(move || drop(r)))
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(registry.live_count(), 0);
    }
}
