//! Property tests for the registry and list laws

use crate::list::{ElementKind, ListError, TypedList};
use crate::registry::ResourceRegistry;
use crate::resource::{Resource, ResourceKind};
use crate::sync::Arc;
use crate::value::Value;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Counted(Arc<AtomicUsize>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Resource for Counted {
    const KIND: ResourceKind = ResourceKind::Semaphore;
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::I32),
        any::<i64>().prop_map(Value::I64),
        (-1.0e6f32..1.0e6f32).prop_map(Value::F32),
        (-1.0e12f64..1.0e12f64).prop_map(Value::F64),
    ]
}

proptest! {
    #[test]
    fn retain_release_balances(retains in 0usize..64) {
        let registry = ResourceRegistry::new();
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = registry.register(Arc::new(Counted(drops.clone()))).unwrap();

        for _ in 0..retains {
            registry.retain(handle).unwrap();
        }
        for _ in 0..retains {
            registry.release(handle).unwrap();
        }
        prop_assert_eq!(registry.ref_count(handle).unwrap(), 1);
        prop_assert_eq!(drops.load(Ordering::SeqCst), 0);

        registry.release(handle).unwrap();
        prop_assert_eq!(drops.load(Ordering::SeqCst), 1);
        prop_assert!(registry.ref_count(handle).is_err());
    }

    #[test]
    fn same_kind_read_returns_written_value(values in prop::collection::vec(scalar(), 1..32)) {
        let mut list = TypedList::variant();
        list.resize(values.len());
        for (i, value) in values.iter().enumerate() {
            match value {
                Value::I32(v) => list.set_i32(i, *v).unwrap(),
                Value::I64(v) => list.set_i64(i, *v).unwrap(),
                Value::F32(v) => list.set_f32(i, *v).unwrap(),
                Value::F64(v) => list.set_f64(i, *v).unwrap(),
                Value::Ref(_) => unreachable!(),
            }
        }
        for (i, value) in values.iter().enumerate() {
            match value {
                Value::I32(v) => prop_assert_eq!(list.get_i32(i).unwrap(), *v),
                Value::I64(v) => prop_assert_eq!(list.get_i64(i).unwrap(), *v),
                Value::F32(v) => prop_assert_eq!(list.get_f32(i).unwrap(), *v),
                Value::F64(v) => prop_assert_eq!(list.get_f64(i).unwrap(), *v),
                Value::Ref(_) => unreachable!(),
            }
        }
    }

    #[test]
    fn mismatched_read_always_fails(value in scalar()) {
        let mut list = TypedList::variant();
        list.push_value(value.clone()).unwrap();
        let stored = list.get_kind(0).unwrap();

        let results = [
            (ElementKind::I32, list.get_i32(0).map(|_| ())),
            (ElementKind::I64, list.get_i64(0).map(|_| ())),
            (ElementKind::F32, list.get_f32(0).map(|_| ())),
            (ElementKind::F64, list.get_f64(0).map(|_| ())),
        ];
        for (kind, result) in results {
            if kind == stored {
                prop_assert!(result.is_ok());
            } else {
                let is_kind_mismatch = matches!(result, Err(ListError::KindMismatch { .. }));
                prop_assert!(is_kind_mismatch);
            }
        }
        let ref_read_fails = matches!(list.get_ref_retain(0), Err(ListError::KindMismatch { .. }));
        prop_assert!(ref_read_fails);
    }
}
