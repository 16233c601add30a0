//! Dynamically typed list used to pass argument/result lists across the
//! type-erased module call boundary.
//!
//! Every slot remembers the kind it was written with, and every accessor
//! checks it: reading an `i32` slot through `get_f32` is a
//! [`ListError::KindMismatch`], never a reinterpretation.

use crate::registry::{Handle, Ref};
use crate::resource::{Resource, ResourceKind};
use crate::sync::{Mutex, MutexGuard};
use crate::value::{Value, ValueType};
use std::fmt;
use thiserror::Error;

/// Kind of value stored in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Slot created by `resize` and never written
    Undefined,
    I32,
    I64,
    F32,
    F64,
    NullRef,
    Ref(ResourceKind),
}

impl ElementKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::I32(_) => ElementKind::I32,
            Value::I64(_) => ElementKind::I64,
            Value::F32(_) => ElementKind::F32,
            Value::F64(_) => ElementKind::F64,
            Value::Ref(None) => ElementKind::NullRef,
            Value::Ref(Some(r)) => ElementKind::Ref(r.kind()),
        }
    }

    fn is_ref(self) -> bool {
        matches!(self, ElementKind::NullRef | ElementKind::Ref(_))
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Undefined => write!(f, "undefined"),
            ElementKind::I32 => write!(f, "i32"),
            ElementKind::I64 => write!(f, "i64"),
            ElementKind::F32 => write!(f, "f32"),
            ElementKind::F64 => write!(f, "f64"),
            ElementKind::NullRef => write!(f, "null ref"),
            ElementKind::Ref(kind) => write!(f, "ref<{}>", kind),
        }
    }
}

/// List-wide element constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// Any kind per slot
    Variant,
    /// Every slot must hold this value type
    Value(ValueType),
    /// Every slot must hold a (nullable) ref of this resource kind
    Resource(ResourceKind),
}

impl ElementType {
    fn admits(self, kind: ElementKind) -> bool {
        match (self, kind) {
            (ElementType::Variant, _) => true,
            (_, ElementKind::Undefined) => true,
            (ElementType::Value(ValueType::I32), ElementKind::I32)
            | (ElementType::Value(ValueType::I64), ElementKind::I64)
            | (ElementType::Value(ValueType::F32), ElementKind::F32)
            | (ElementType::Value(ValueType::F64), ElementKind::F64) => true,
            (ElementType::Value(ValueType::Ref), k) => k.is_ref(),
            (ElementType::Resource(_), ElementKind::NullRef) => true,
            (ElementType::Resource(want), ElementKind::Ref(got)) => want == got,
            _ => false,
        }
    }
}

/// List errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListError {
    /// Slot holds a different kind than the accessor (or constraint) expects
    #[error("list element {index}: expected {expected}, found {actual}")]
    KindMismatch {
        index: usize,
        expected: String,
        actual: ElementKind,
    },

    #[error("list index {index} out of bounds (size {size})")]
    OutOfBounds { index: usize, size: usize },

    #[error("list capacity {requested} exceeds limit {limit}")]
    CapacityExceeded { requested: usize, limit: usize },
}

/// Ordered heterogeneous list.
#[derive(Clone, PartialEq)]
pub struct TypedList {
    element_type: ElementType,
    items: Vec<Option<Value>>,
}

impl TypedList {
    pub fn new(element_type: ElementType, capacity: usize) -> Self {
        Self {
            element_type,
            items: Vec::with_capacity(capacity),
        }
    }

    /// Unconstrained list
    pub fn variant() -> Self {
        Self::new(ElementType::Variant, 0)
    }

    /// Build a variant list holding `values` in order
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            element_type: ElementType::Variant,
            items: values.into_iter().map(Some).collect(),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.items.reserve(additional);
    }

    /// Grow with `Undefined` slots or shrink, releasing dropped refs.
    pub fn resize(&mut self, new_size: usize) {
        self.items.resize(new_size, None);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn get_kind(&self, index: usize) -> Result<ElementKind, ListError> {
        Ok(match self.slot(index)? {
            Some(value) => ElementKind::of(value),
            None => ElementKind::Undefined,
        })
    }

    /// Read any defined slot
    pub fn get_value(&self, index: usize) -> Result<Value, ListError> {
        match self.slot(index)? {
            Some(value) => Ok(value.clone()),
            None => Err(mismatch(index, "defined value", ElementKind::Undefined)),
        }
    }

    /// Overwrite a slot, releasing whatever ref it held.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<(), ListError> {
        self.check_admits(index, &value)?;
        let size = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(ListError::OutOfBounds { index, size })?;
        *slot = Some(value);
        Ok(())
    }

    pub fn push_value(&mut self, value: Value) -> Result<(), ListError> {
        self.check_admits(self.items.len(), &value)?;
        self.items.push(Some(value));
        Ok(())
    }

    pub fn get_i32(&self, index: usize) -> Result<i32, ListError> {
        match self.slot(index)? {
            Some(Value::I32(v)) => Ok(*v),
            other => Err(mismatch(index, "i32", kind_of(other))),
        }
    }

    pub fn set_i32(&mut self, index: usize, value: i32) -> Result<(), ListError> {
        self.set_value(index, Value::I32(value))
    }

    pub fn get_i64(&self, index: usize) -> Result<i64, ListError> {
        match self.slot(index)? {
            Some(Value::I64(v)) => Ok(*v),
            other => Err(mismatch(index, "i64", kind_of(other))),
        }
    }

    pub fn set_i64(&mut self, index: usize, value: i64) -> Result<(), ListError> {
        self.set_value(index, Value::I64(value))
    }

    pub fn get_f32(&self, index: usize) -> Result<f32, ListError> {
        match self.slot(index)? {
            Some(Value::F32(v)) => Ok(*v),
            other => Err(mismatch(index, "f32", kind_of(other))),
        }
    }

    pub fn set_f32(&mut self, index: usize, value: f32) -> Result<(), ListError> {
        self.set_value(index, Value::F32(value))
    }

    pub fn get_f64(&self, index: usize) -> Result<f64, ListError> {
        match self.slot(index)? {
            Some(Value::F64(v)) => Ok(*v),
            other => Err(mismatch(index, "f64", kind_of(other))),
        }
    }

    pub fn set_f64(&mut self, index: usize, value: f64) -> Result<(), ListError> {
        self.set_value(index, Value::F64(value))
    }

    /// Borrow a ref slot's handle without retaining it.
    ///
    /// The handle is only valid while the list keeps the element.
    pub fn get_ref_assign(&self, index: usize) -> Result<Option<Handle>, ListError> {
        match self.slot(index)? {
            Some(Value::Ref(r)) => Ok(r.as_ref().map(Ref::handle)),
            other => Err(mismatch(index, "ref", kind_of(other))),
        }
    }

    /// Read a ref slot, retaining the returned reference.
    pub fn get_ref_retain(&self, index: usize) -> Result<Option<Ref>, ListError> {
        match self.slot(index)? {
            Some(Value::Ref(r)) => Ok(r.clone()),
            other => Err(mismatch(index, "ref", kind_of(other))),
        }
    }

    /// Read a ref slot that must be null or of resource type `T`.
    pub fn get_ref_retain_as<T>(&self, index: usize) -> Result<Option<Ref>, ListError>
    where
        T: Resource + ?Sized,
    {
        match self.slot(index)? {
            Some(Value::Ref(None)) => Ok(None),
            Some(Value::Ref(Some(r))) if r.kind() == T::KIND => Ok(Some(r.clone())),
            other => Err(mismatch(
                index,
                &format!("ref<{}>", T::KIND),
                kind_of(other),
            )),
        }
    }

    /// Store a ref, retaining it on write.
    pub fn set_ref_retain(&mut self, index: usize, value: Option<&Ref>) -> Result<(), ListError> {
        self.set_value(index, Value::Ref(value.cloned()))
    }

    /// Store a ref, taking over the caller's count (no extra retain).
    pub fn set_ref_move(&mut self, index: usize, value: Option<Ref>) -> Result<(), ListError> {
        self.set_value(index, Value::Ref(value))
    }

    /// Iterate defined values in order
    pub fn values(&self) -> impl Iterator<Item = Option<&Value>> {
        self.items.iter().map(Option::as_ref)
    }

    /// Consume the list, failing on any undefined slot
    pub fn into_values(self) -> Result<Vec<Value>, ListError> {
        self.items
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| mismatch(index, "defined value", ElementKind::Undefined))
            })
            .collect()
    }

    fn slot(&self, index: usize) -> Result<Option<&Value>, ListError> {
        self.items
            .get(index)
            .map(Option::as_ref)
            .ok_or(ListError::OutOfBounds {
                index,
                size: self.items.len(),
            })
    }

    fn check_admits(&self, index: usize, value: &Value) -> Result<(), ListError> {
        let kind = ElementKind::of(value);
        if self.element_type.admits(kind) {
            Ok(())
        } else {
            Err(ListError::KindMismatch {
                index,
                expected: format!("{:?}", self.element_type),
                actual: kind,
            })
        }
    }
}

impl fmt::Debug for TypedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedList")
            .field("element_type", &self.element_type)
            .field("items", &self.items)
            .finish()
    }
}

fn kind_of(slot: Option<&Value>) -> ElementKind {
    slot.map(ElementKind::of).unwrap_or(ElementKind::Undefined)
}

fn mismatch(index: usize, expected: &str, actual: ElementKind) -> ListError {
    ListError::KindMismatch {
        index,
        expected: expected.to_string(),
        actual,
    }
}

/// A list living in the registry, so it can sit in registers and nest.
#[derive(Debug)]
pub struct SharedList {
    inner: Mutex<TypedList>,
    max_capacity: Option<usize>,
}

impl SharedList {
    pub fn new(list: TypedList) -> Self {
        Self {
            inner: Mutex::new(list),
            max_capacity: None,
        }
    }

    /// Refuse growth beyond `limit` elements
    pub fn with_max_capacity(list: TypedList, limit: usize) -> Self {
        Self {
            inner: Mutex::new(list),
            max_capacity: Some(limit),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TypedList> {
        self.inner.lock()
    }

    /// Resize, honouring the capacity limit
    pub fn resize(&self, new_size: usize) -> Result<(), ListError> {
        self.check_capacity(new_size)?;
        self.inner.lock().resize(new_size);
        Ok(())
    }

    pub fn push_value(&self, value: Value) -> Result<(), ListError> {
        let mut list = self.inner.lock();
        self.check_capacity(list.size() + 1)?;
        list.push_value(value)
    }

    fn check_capacity(&self, requested: usize) -> Result<(), ListError> {
        match self.max_capacity {
            Some(limit) if requested > limit => {
                Err(ListError::CapacityExceeded { requested, limit })
            }
            _ => Ok(()),
        }
    }
}

impl Resource for SharedList {
    const KIND: ResourceKind = ResourceKind::List;
}
