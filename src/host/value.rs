// In: src/host/value.rs

//! The host's dynamic values.
//!
//! Everything in here is host-thread only: objects and functions are `Rc`
//! based and therefore `!Send`. Native code never holds these directly; it
//! goes through a [`HostBound`](super::HostBound) cell or a bridge.

use std::any::{Any, TypeId};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use hashbrown::HashMap;

use crate::error::{BridgeError, Result};

/// The largest integer a host `Number` represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

//==================================================================================
// I. Exceptions
//==================================================================================

/// A value raised by host-side logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostException {
    pub message: String,
}

impl HostException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(format!("TypeError: {}", message.into()))
    }
}

impl fmt::Display for HostException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HostException {}

//==================================================================================
// II. Values
//==================================================================================

#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<HostValue>),
    Object(HostObject),
    Function(HostFunction),
}

impl HostValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::BigInt(_) => "bigint",
            HostValue::String(_) => "string",
            HostValue::Bytes(_) => "buffer",
            HostValue::Array(_) => "array",
            HostValue::Object(obj) => obj.class_name(),
            HostValue::Function(_) => "function",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            HostValue::Function(func) => Some(func),
            _ => None,
        }
    }

    /// Truthiness, as the host's `ToBoolean` would compute it.
    pub fn to_bool(&self) -> bool {
        match self {
            HostValue::Undefined | HostValue::Null => false,
            HostValue::Bool(b) => *b,
            HostValue::Number(n) => *n != 0.0 && !n.is_nan(),
            HostValue::BigInt(i) => *i != 0,
            HostValue::String(s) => !s.is_empty(),
            HostValue::Bytes(_)
            | HostValue::Array(_)
            | HostValue::Object(_)
            | HostValue::Function(_) => true,
        }
    }

    /// Numeric coercion, `NaN` where the host would produce it.
    pub fn to_number(&self) -> f64 {
        match self {
            HostValue::Null => 0.0,
            HostValue::Bool(b) => f64::from(u8::from(*b)),
            HostValue::Number(n) => *n,
            HostValue::BigInt(i) => *i as f64,
            HostValue::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// String coercion. Objects defer to their own `toString` when they have one.
    pub fn to_display_string(&self) -> String {
        match self {
            HostValue::Undefined => "undefined".to_string(),
            HostValue::Null => "null".to_string(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                format!("{}", *n as i64)
            }
            HostValue::Number(n) => n.to_string(),
            HostValue::BigInt(i) => i.to_string(),
            HostValue::String(s) => s.clone(),
            HostValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            HostValue::Array(items) => items
                .iter()
                .map(HostValue::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
            HostValue::Object(obj) => match obj.call_method("toString", &[]) {
                Ok(HostValue::String(s)) => s,
                _ => "[object Object]".to_string(),
            },
            HostValue::Function(_) => "function".to_string(),
        }
    }

    /// Converts an integer-valued host number to a `u64` without losing precision.
    ///
    /// `Number` must be integral, non-negative and at most 2^53 - 1; `BigInt`
    /// must fit in 64 unsigned bits; strings must be plain decimal.
    pub fn to_u64_lossless(&self) -> Result<u64> {
        match self {
            HostValue::Number(n) => {
                if !n.is_finite() || n.fract() != 0.0 {
                    return Err(BridgeError::SizeConversion(format!(
                        "{} is not an integer",
                        n
                    )));
                }
                if *n < 0.0 {
                    return Err(BridgeError::SizeConversion(format!(
                        "{} is negative; size must be greater than or equal to 0",
                        n
                    )));
                }
                if *n > MAX_SAFE_INTEGER {
                    return Err(BridgeError::SizeConversion(format!(
                        "{} exceeds the exact integer range of a number, use a bigint",
                        n
                    )));
                }
                Ok(*n as u64)
            }
            HostValue::BigInt(i) => u64::try_from(*i)
                .map_err(|_| BridgeError::SizeConversion(format!("{} does not fit in 64 bits", i))),
            HostValue::String(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|e| BridgeError::SizeConversion(format!("'{}': {}", s, e))),
            other => Err(BridgeError::SizeConversion(format!(
                "expected an integer, got {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => f.write_str("Undefined"),
            HostValue::Null => f.write_str("Null"),
            HostValue::Bool(b) => write!(f, "Bool({})", b),
            HostValue::Number(n) => write!(f, "Number({})", n),
            HostValue::BigInt(i) => write!(f, "BigInt({})", i),
            HostValue::String(s) => write!(f, "String({:?})", s),
            HostValue::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            HostValue::Array(items) => f.debug_list().entries(items).finish(),
            HostValue::Object(obj) => write!(f, "{:?}", obj),
            HostValue::Function(_) => f.write_str("Function"),
        }
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Number(v)
    }
}

impl From<u32> for HostValue {
    fn from(v: u32) -> Self {
        HostValue::Number(f64::from(v))
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::String(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::String(v)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(v: Vec<u8>) -> Self {
        HostValue::Bytes(v)
    }
}

impl From<HostObject> for HostValue {
    fn from(v: HostObject) -> Self {
        HostValue::Object(v)
    }
}

impl From<HostFunction> for HostValue {
    fn from(v: HostFunction) -> Self {
        HostValue::Function(v)
    }
}

//==================================================================================
// III. Functions
//==================================================================================

type HostFn = dyn Fn(&[HostValue]) -> std::result::Result<HostValue, HostException>;

/// A host callable.
#[derive(Clone)]
pub struct HostFunction(Rc<HostFn>);

impl HostFunction {
    pub fn new(
        f: impl Fn(&[HostValue]) -> std::result::Result<HostValue, HostException> + 'static,
    ) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[HostValue]) -> std::result::Result<HostValue, HostException> {
        (self.0)(args)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction")
    }
}

//==================================================================================
// IV. Objects
//==================================================================================

/// Identifies one weak finalizer registered on a [`HostObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizerToken(u64);

type Finalizer = Box<dyn FnOnce()>;

struct ObjectInner {
    class: &'static str,
    props: RefCell<HashMap<String, HostValue>>,
    getters: RefCell<HashMap<String, HostFunction>>,
    internals: RefCell<HashMap<TypeId, Box<dyn Any>>>,
    finalizers: RefCell<Vec<(FinalizerToken, Finalizer)>>,
    next_token: Cell<u64>,
}

impl Drop for ObjectInner {
    // Collection of the object: weak finalizers run before the internal slots go.
    fn drop(&mut self) {
        let finalizers = std::mem::take(self.finalizers.get_mut());
        for (_, finalize) in finalizers {
            finalize();
        }
    }
}

/// A garbage-collected host object.
///
/// The object is collected when the last strong reference is dropped, at
/// which point every finalizer still registered runs exactly once. Native
/// state attached with [`set_internal`](Self::set_internal) is dropped right
/// after, like a wrapped native object whose wrapper was collected.
#[derive(Clone)]
pub struct HostObject(Rc<ObjectInner>);

impl Default for HostObject {
    fn default() -> Self {
        Self::new()
    }
}

impl HostObject {
    pub fn new() -> Self {
        Self::with_class("Object")
    }

    pub fn with_class(class: &'static str) -> Self {
        Self(Rc::new(ObjectInner {
            class,
            props: RefCell::new(HashMap::new()),
            getters: RefCell::new(HashMap::new()),
            internals: RefCell::new(HashMap::new()),
            finalizers: RefCell::new(Vec::new()),
            next_token: Cell::new(0),
        }))
    }

    /// Builds a plain object from `(key, value)` pairs.
    pub fn with_props<I, K, V>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<HostValue>,
    {
        let obj = Self::new();
        for (key, value) in props {
            obj.set(key, value);
        }
        obj
    }

    pub fn class_name(&self) -> &'static str {
        self.0.class
    }

    /// Property lookup; absent keys read as `Undefined`. Accessor properties
    /// are computed on every read, and a failing getter reads as `Undefined`.
    pub fn get(&self, key: &str) -> HostValue {
        if let Some(value) = self.0.props.borrow().get(key) {
            return value.clone();
        }
        // Cloned out so the getter may touch this object.
        let getter = self.0.getters.borrow().get(key).cloned();
        match getter {
            Some(getter) => getter.call(&[]).unwrap_or_else(|e| {
                log::warn!("getter '{}' of {} raised: {}", key, self.0.class, e.message);
                HostValue::Undefined
            }),
            None => HostValue::Undefined,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<HostValue>) {
        let key = key.into();
        self.0.getters.borrow_mut().remove(&key);
        self.0.props.borrow_mut().insert(key, value.into());
    }

    /// Defines `key` as an accessor property backed by `getter`.
    pub fn define_getter(&self, key: impl Into<String>, getter: HostFunction) {
        let key = key.into();
        self.0.props.borrow_mut().remove(&key);
        self.0.getters.borrow_mut().insert(key, getter);
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.props.borrow().contains_key(key) || self.0.getters.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.0.props.borrow().keys().cloned().collect();
        keys.extend(self.0.getters.borrow().keys().cloned());
        keys.sort();
        keys
    }

    /// Calls the function stored under `key`.
    pub fn call_method(
        &self,
        key: &str,
        args: &[HostValue],
    ) -> std::result::Result<HostValue, HostException> {
        // Clone out first so the callee may touch this object's properties.
        let value = self.get(key);
        match value {
            HostValue::Function(func) => func.call(args),
            other => Err(HostException::type_error(format!(
                "{} is not a function (got {})",
                key,
                other.type_name()
            ))),
        }
    }

    // --- Internal native slots (one per Rust type) ---

    pub fn set_internal<T: Any>(&self, value: T) {
        self.0
            .internals
            .borrow_mut()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn internal<T: Any>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.0.internals.borrow(), |slots| {
            slots
                .get(&TypeId::of::<T>())
                .and_then(|slot| slot.downcast_ref::<T>())
        })
        .ok()
    }

    pub fn internal_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.0.internals.borrow_mut(), |slots| {
            slots
                .get_mut(&TypeId::of::<T>())
                .and_then(|slot| slot.downcast_mut::<T>())
        })
        .ok()
    }

    pub fn has_internal<T: Any>(&self) -> bool {
        self.0.internals.borrow().contains_key(&TypeId::of::<T>())
    }

    pub fn take_internal<T: Any>(&self) -> Option<T> {
        let slot = self.0.internals.borrow_mut().remove(&TypeId::of::<T>())?;
        slot.downcast::<T>().ok().map(|boxed| *boxed)
    }

    // --- Weak finalization hooks ---

    /// Registers `finalize` to run when this object is collected.
    pub fn add_finalizer(&self, finalize: impl FnOnce() + 'static) -> FinalizerToken {
        let token = FinalizerToken(self.0.next_token.get());
        self.0.next_token.set(token.0 + 1);
        self.0
            .finalizers
            .borrow_mut()
            .push((token, Box::new(finalize)));
        token
    }

    /// Removes a finalizer without running it. Returns whether it was still registered.
    pub fn clear_finalizer(&self, token: FinalizerToken) -> bool {
        let removed = {
            let mut finalizers = self.0.finalizers.borrow_mut();
            finalizers
                .iter()
                .position(|(t, _)| *t == token)
                .map(|idx| finalizers.remove(idx))
        };
        // Dropped outside the borrow: the closure may own other host objects.
        removed.is_some()
    }

    pub fn finalizer_count(&self) -> usize {
        self.0.finalizers.borrow().len()
    }

    pub fn downgrade(&self) -> WeakHostObject {
        WeakHostObject(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:p})", self.0.class, Rc::as_ptr(&self.0))
    }
}

/// A reference that does not keep its [`HostObject`] alive.
#[derive(Clone)]
pub struct WeakHostObject(Weak<ObjectInner>);

impl WeakHostObject {
    pub fn upgrade(&self) -> Option<HostObject> {
        self.0.upgrade().map(HostObject)
    }

    pub fn is_collected(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl fmt::Debug for WeakHostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakHostObject(collected={})", self.is_collected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_conversion_accepts_integral_numbers_and_bigints() {
        assert_eq!(HostValue::Number(10.0).to_u64_lossless().unwrap(), 10);
        assert_eq!(
            HostValue::BigInt(i128::from(u64::MAX)).to_u64_lossless().unwrap(),
            u64::MAX
        );
        assert_eq!(HostValue::from("42").to_u64_lossless().unwrap(), 42);
    }

    #[test]
    fn test_size_conversion_rejects_lossy_values() {
        for value in [
            HostValue::Number(-1.0),
            HostValue::Number(1.5),
            HostValue::Number(f64::INFINITY),
            HostValue::Number(MAX_SAFE_INTEGER + 2.0),
            HostValue::BigInt(i128::from(u64::MAX) + 1),
            HostValue::BigInt(-3),
            HostValue::Null,
        ] {
            let err = value.to_u64_lossless().unwrap_err();
            assert!(matches!(err, BridgeError::SizeConversion(_)), "{:?}", value);
        }
    }

    #[test]
    fn test_finalizers_run_once_on_collection() {
        let ran = Rc::new(Cell::new(0));
        let obj = HostObject::new();
        let counter = ran.clone();
        obj.add_finalizer(move || counter.set(counter.get() + 1));
        let weak = obj.downgrade();
        let alias = obj.clone();

        drop(obj);
        assert_eq!(ran.get(), 0);
        drop(alias);
        assert_eq!(ran.get(), 1);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_cleared_finalizer_never_runs() {
        let ran = Rc::new(Cell::new(false));
        let obj = HostObject::new();
        let flag = ran.clone();
        let token = obj.add_finalizer(move || flag.set(true));

        assert!(obj.clear_finalizer(token));
        assert!(!obj.clear_finalizer(token));
        drop(obj);
        assert!(!ran.get());
    }

    #[test]
    fn test_internal_slots_are_typed() {
        let obj = HostObject::with_class("Thing");
        obj.set_internal(7u32);
        obj.set_internal(String::from("seven"));

        assert_eq!(*obj.internal::<u32>().unwrap(), 7);
        assert_eq!(obj.internal::<String>().unwrap().as_str(), "seven");
        *obj.internal_mut::<u32>().unwrap() += 1;
        assert_eq!(obj.take_internal::<u32>(), Some(8));
        assert!(obj.internal::<u32>().is_none());
    }

    #[test]
    fn test_getter_is_computed_on_each_read() {
        let reads = Rc::new(Cell::new(0u32));
        let obj = HostObject::new();
        let counter = reads.clone();
        obj.define_getter(
            "count",
            HostFunction::new(move |_| {
                counter.set(counter.get() + 1);
                Ok(HostValue::from(counter.get()))
            }),
        );
        assert_eq!(reads.get(), 0);
        assert!(obj.has("count"));
        assert_eq!(obj.keys(), vec!["count".to_string()]);
        assert_eq!(obj.get("count").to_number(), 1.0);
        assert_eq!(obj.get("count").to_number(), 2.0);

        obj.set("count", 10.0);
        assert_eq!(obj.get("count").to_number(), 10.0);
        assert_eq!(reads.get(), 2);
    }

    #[test]
    fn test_string_coercion_uses_to_string_method() {
        let obj = HostObject::new();
        obj.set(
            "toString",
            HostFunction::new(|_| Ok(HostValue::from("custom"))),
        );
        assert_eq!(HostValue::from(obj).to_display_string(), "custom");
        assert_eq!(HostValue::Number(4.0).to_display_string(), "4");
    }
}
