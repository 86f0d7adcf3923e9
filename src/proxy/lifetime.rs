// In: src/proxy/lifetime.rs

use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{BridgeError, Result};

/// Who is responsible for destroying the native value behind a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// The proxy owns the value; destroying the proxy destroys it.
    Owned,
    /// The value is owned elsewhere; the proxy only observes it.
    Borrowed,
}

enum NativeSlot<T: ?Sized> {
    Owned(Box<T>),
    Borrowed(Weak<T>),
}

/// A handle on a native value whose ownership mode is fixed at construction.
///
/// An owned proxy drops its value with itself. A borrowed proxy never drops
/// the value and reports [`BridgeError::ProxyReleased`] once the real owner
/// has let it go.
pub struct LifetimeProxy<T: ?Sized + 'static> {
    label: &'static str,
    slot: NativeSlot<T>,
}

impl<T: ?Sized + 'static> LifetimeProxy<T> {
    pub fn owned(label: &'static str, value: Box<T>) -> Self {
        Self {
            label,
            slot: NativeSlot::Owned(value),
        }
    }

    pub fn borrowed(label: &'static str, native: &Arc<T>) -> Self {
        Self {
            label,
            slot: NativeSlot::Borrowed(Arc::downgrade(native)),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn ownership(&self) -> Ownership {
        match self.slot {
            NativeSlot::Owned(_) => Ownership::Owned,
            NativeSlot::Borrowed(_) => Ownership::Borrowed,
        }
    }

    pub fn is_live(&self) -> bool {
        match &self.slot {
            NativeSlot::Owned(_) => true,
            NativeSlot::Borrowed(weak) => weak.strong_count() > 0,
        }
    }

    /// Runs `f` against the native value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        match &self.slot {
            NativeSlot::Owned(value) => Ok(f(value)),
            NativeSlot::Borrowed(weak) => weak
                .upgrade()
                .map(|native| f(&native))
                .ok_or_else(|| BridgeError::ProxyReleased(self.label.to_string())),
        }
    }

    /// Mutable access, owned proxies only.
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        match &mut self.slot {
            NativeSlot::Owned(value) => Ok(f(value)),
            NativeSlot::Borrowed(_) => Err(BridgeError::CallerError(format!(
                "{} is borrowed and cannot be mutated through its proxy",
                self.label
            ))),
        }
    }

    /// The shared native value, borrowed proxies only.
    pub fn upgrade(&self) -> Option<Arc<T>> {
        match &self.slot {
            NativeSlot::Owned(_) => None,
            NativeSlot::Borrowed(weak) => weak.upgrade(),
        }
    }

    /// Whether this proxy points at exactly `native`.
    pub fn points_to(&self, native: &Arc<T>) -> bool {
        match &self.slot {
            NativeSlot::Owned(_) => false,
            NativeSlot::Borrowed(weak) => {
                std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(native)) && weak.strong_count() > 0
            }
        }
    }

    /// Hands an owned value over to a new owner.
    pub fn into_owned(self) -> Result<Box<T>> {
        match self.slot {
            NativeSlot::Owned(value) => Ok(value),
            NativeSlot::Borrowed(_) => Err(BridgeError::CallerError(format!(
                "{} is borrowed; ownership cannot be transferred",
                self.label
            ))),
        }
    }
}

impl<T: ?Sized + 'static> fmt::Debug for LifetimeProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeProxy")
            .field("label", &self.label)
            .field("ownership", &self.ownership())
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_owned_proxy_destroys_value_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let proxy = LifetimeProxy::owned("counted", Box::new(Counted(drops.clone())));
        assert_eq!(proxy.ownership(), Ownership::Owned);
        assert!(proxy.with(|_| ()).is_ok());

        drop(proxy);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_borrowed_proxy_never_destroys_value() {
        let drops = Arc::new(AtomicUsize::new(0));
        let native = Arc::new(Counted(drops.clone()));
        let proxy = LifetimeProxy::borrowed("counted", &native);
        assert!(proxy.points_to(&native));

        drop(proxy);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(native);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_borrowed_proxy_reports_released_owner() {
        let native = Arc::new(41u32);
        let proxy = LifetimeProxy::borrowed("answer", &native);
        assert_eq!(proxy.with(|n| n + 1).unwrap(), 42);

        drop(native);
        assert!(!proxy.is_live());
        assert_eq!(
            proxy.with(|n| *n),
            Err(BridgeError::ProxyReleased("answer".into()))
        );
        assert!(proxy.into_owned().is_err());
    }

    #[test]
    fn test_owned_trait_object_can_be_handed_over() {
        let proxy: LifetimeProxy<dyn Fn() -> u8 + Send> =
            LifetimeProxy::owned("thunk", Box::new(|| 8));
        let thunk = proxy.into_owned().unwrap();
        assert_eq!(thunk(), 8);
    }
}
