// In: src/proxy/registry.rs

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use hashbrown::HashMap;

use crate::bridge::guard::MainThreadGuard;
use crate::error::{BridgeError, Result};
use crate::host::{FinalizerToken, HostBound, HostObject, HostScope, WeakHostObject};
use crate::proxy::lifetime::LifetimeProxy;

/// Identity of a native value: the address of its shared allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyKey(usize);

impl ProxyKey {
    pub fn of<T: ?Sized>(native: &Arc<T>) -> Self {
        ProxyKey(Arc::as_ptr(native) as *const () as usize)
    }
}

/// Marks a host object as the registered view of a native value.
struct RegisteredView {
    key: ProxyKey,
    generation: u64,
}

/// Host-side proxy attached to a host object by [`ProxyRegistry::proxy_for`].
struct AttachedProxy<P: ?Sized>(Arc<P>);

struct RegistryEntry {
    generation: u64,
    host: HostBound<WeakHostObject>,
    hook: FinalizerToken,
    proxy: Box<dyn Any + Send + Sync>,
}

impl Drop for RegistryEntry {
    // Unhook from a host object that outlives its entry, so its finalizer
    // cannot fire against a registry that has moved on.
    fn drop(&mut self) {
        if let Ok(weak) = self.host.get() {
            if let Some(host) = weak.upgrade() {
                host.clear_finalizer(self.hook);
                host.take_internal::<RegisteredView>();
            }
        }
    }
}

struct RegistryInner {
    guard: MainThreadGuard,
    entries: Mutex<HashMap<ProxyKey, RegistryEntry>>,
    next_generation: AtomicU64,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<ProxyKey, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_if_current(&self, key: ProxyKey, generation: u64) {
        let removed = {
            let mut entries = self.lock();
            match entries.get(&key) {
                Some(entry) if entry.generation == generation => entries.remove(&key),
                _ => None,
            }
        };
        if removed.is_some() {
            log::trace!("proxy registry: host view {:?} collected", key);
        }
    }
}

/// De-duplicates host views of native values.
///
/// At most one live host object exists per native value: asking twice returns
/// the same object. The registry holds host objects weakly; when one is
/// collected its entry is removed by a finalizer and the borrowed proxy inside
/// goes with it. The native value itself is never destroyed from here.
///
/// Created once per module instance on the host thread, and only used there.
#[derive(Clone)]
pub struct ProxyRegistry {
    inner: Arc<RegistryInner>,
    scope: HostScope,
}

impl ProxyRegistry {
    pub fn new(scope: &HostScope) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                guard: scope.guard().clone(),
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
            scope: scope.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the host object representing `native`, creating it with `wrap`
    /// on first use.
    pub fn host_view_of<T>(
        &self,
        native: &Arc<T>,
        wrap: impl FnOnce(&Arc<T>) -> Result<HostObject>,
    ) -> Result<HostObject>
    where
        T: Send + Sync + 'static,
    {
        self.inner.guard.ensure_host_thread("ProxyRegistry::host_view_of")?;
        let key = ProxyKey::of(native);

        if let Some(existing) = self.lookup(key, native)? {
            return Ok(existing);
        }

        // Built outside the lock: `wrap` runs host code.
        let host = wrap(native)?;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        host.set_internal(RegisteredView { key, generation });

        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let hook = host.add_finalizer(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove_if_current(key, generation);
            }
        });

        let entry = RegistryEntry {
            generation,
            host: HostBound::new(&self.scope, "registered host view", host.downgrade()),
            hook,
            proxy: Box::new(LifetimeProxy::borrowed(std::any::type_name::<T>(), native)),
        };
        let replaced = self.inner.lock().insert(key, entry);
        drop(replaced);
        log_metric!("event" = "proxy_registered", "key" = &key.0, "generation" = &generation);
        Ok(host)
    }

    fn lookup<T>(&self, key: ProxyKey, native: &Arc<T>) -> Result<Option<HostObject>>
    where
        T: Send + Sync + 'static,
    {
        let entries = self.inner.lock();
        let Some(entry) = entries.get(&key) else {
            return Ok(None);
        };
        // A different value may have been allocated at a recycled address.
        let same_native = entry
            .proxy
            .downcast_ref::<LifetimeProxy<T>>()
            .is_some_and(|proxy| proxy.points_to(native));
        if !same_native {
            return Ok(None);
        }
        Ok(entry.host.get()?.upgrade())
    }

    /// The native value behind a host object created by [`host_view_of`](Self::host_view_of).
    pub fn native_view_of<T>(&self, host: &HostObject) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.inner.guard.ensure_host_thread("ProxyRegistry::native_view_of")?;
        let (key, generation) = host
            .internal::<RegisteredView>()
            .map(|view| (view.key, view.generation))
            .ok_or_else(|| {
                BridgeError::ProxyReleased(format!("{:?} is not a registered view", host))
            })?;

        let entries = self.inner.lock();
        entries
            .get(&key)
            .filter(|entry| entry.generation == generation)
            .and_then(|entry| entry.proxy.downcast_ref::<LifetimeProxy<T>>())
            .and_then(LifetimeProxy::upgrade)
            .ok_or_else(|| BridgeError::ProxyReleased(std::any::type_name::<T>().to_string()))
    }

    /// Returns the native proxy for a host object, building it on first use.
    ///
    /// The proxy is borrowed in the sense that the host object keeps it: it
    /// lives as long as the host object, and is destroyed exactly once when
    /// the host object is collected.
    pub fn proxy_for<P>(
        &self,
        host: &HostObject,
        build: impl FnOnce(&HostObject) -> Result<P>,
    ) -> Result<Arc<P>>
    where
        P: Send + Sync + 'static,
    {
        self.inner.guard.ensure_host_thread("ProxyRegistry::proxy_for")?;
        if let Some(attached) = host.internal::<AttachedProxy<P>>() {
            return Ok(Arc::clone(&attached.0));
        }
        let proxy = Arc::new(build(host)?);
        host.set_internal(AttachedProxy(Arc::clone(&proxy)));
        Ok(proxy)
    }

    /// Drops every entry. Host views that are still alive are unhooked and no
    /// longer resolve to a native value.
    pub fn clear(&self) {
        let drained: Vec<RegistryEntry> = {
            let mut entries = self.inner.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        if !drained.is_empty() {
            log::debug!("proxy registry: releasing {} live view(s)", drained.len());
        }
        drop(drained);
    }
}

impl fmt::Debug for ProxyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRuntime;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;

    struct Native {
        name: String,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Native {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn native(name: &str, drops: &Arc<AtomicUsize>) -> Arc<Native> {
        Arc::new(Native {
            name: name.to_string(),
            drops: Arc::clone(drops),
        })
    }

    fn wrap(n: &Arc<Native>) -> Result<HostObject> {
        let obj = HostObject::with_class("Native");
        obj.set("name", n.name.as_str());
        Ok(obj)
    }

    #[test]
    fn test_same_native_yields_same_host_object() {
        let rt = HostRuntime::new("registry");
        let registry = ProxyRegistry::new(&rt);
        let drops = Arc::new(AtomicUsize::new(0));
        let value = native("a", &drops);

        let first = registry.host_view_of(&value, wrap).unwrap();
        let second = registry.host_view_of(&value, wrap).unwrap();
        assert!(HostObject::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        let back: Arc<Native> = registry.native_view_of(&first).unwrap();
        assert!(Arc::ptr_eq(&back, &value));
    }

    #[test]
    fn test_collected_view_is_removed_and_native_survives() {
        let rt = HostRuntime::new("registry");
        let registry = ProxyRegistry::new(&rt);
        let drops = Arc::new(AtomicUsize::new(0));
        let value = native("a", &drops);

        let view = registry.host_view_of(&value, wrap).unwrap();
        drop(view);
        assert!(registry.is_empty());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        // A fresh view is created on the next request.
        let again = registry.host_view_of(&value, wrap).unwrap();
        assert_eq!(registry.len(), 1);
        drop(again);
        drop(value);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_view_reports_released_native() {
        let rt = HostRuntime::new("registry");
        let registry = ProxyRegistry::new(&rt);
        let drops = Arc::new(AtomicUsize::new(0));
        let value = native("a", &drops);

        let view = registry.host_view_of(&value, wrap).unwrap();
        drop(value);
        assert!(matches!(
            registry.native_view_of::<Native>(&view),
            Err(BridgeError::ProxyReleased(_))
        ));
    }

    #[test]
    fn test_clear_unhooks_live_views() {
        let rt = HostRuntime::new("registry");
        let registry = ProxyRegistry::new(&rt);
        let drops = Arc::new(AtomicUsize::new(0));
        let value = native("a", &drops);

        let view = registry.host_view_of(&value, wrap).unwrap();
        assert_eq!(view.finalizer_count(), 1);
        registry.clear();
        assert_eq!(view.finalizer_count(), 0);
        assert!(registry.native_view_of::<Native>(&view).is_err());
        drop(view);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_proxy_for_builds_once_and_dies_with_host_object() {
        let rt = HostRuntime::new("registry");
        let registry = ProxyRegistry::new(&rt);
        let builds = Rc::new(Cell::new(0));
        let drops = Arc::new(AtomicUsize::new(0));
        let host = HostObject::new();

        let make = |_: &HostObject| {
            builds.set(builds.get() + 1);
            Ok(Native {
                name: "proxy".into(),
                drops: Arc::clone(&drops),
            })
        };
        let a = registry.proxy_for(&host, make).unwrap();
        let b = registry.proxy_for(&host, make).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.get(), 1);

        drop((a, b));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(host);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
