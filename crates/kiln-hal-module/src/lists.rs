//! Typed-list accessors for buffer view elements.
//!
//! Host code that builds argument lists for bytecode (or reads results back)
//! uses these instead of the untyped ref accessors so a slot holding some
//! other resource is reported as a kind mismatch.

use kiln_hal::BufferView;
use kiln_types::{ElementKind, Handle, ListError, Ref, Resource, ResourceKind, TypedList};
use kiln_vm::VmError;

fn not_a_view(index: usize, kind: ResourceKind) -> VmError {
    ListError::KindMismatch {
        index,
        expected: format!("ref<{}>", BufferView::KIND),
        actual: ElementKind::Ref(kind),
    }
    .into()
}

/// Borrow the buffer view handle at `index` without retaining it.
pub fn list_get_buffer_view_assign(list: &TypedList, index: usize) -> Result<Option<Handle>, VmError> {
    match list.get_ref_assign(index)? {
        Some(handle) if handle.kind() != BufferView::KIND => Err(not_a_view(index, handle.kind())),
        other => Ok(other),
    }
}

/// Retained reference to the buffer view at `index`.
pub fn list_get_buffer_view_retain(list: &TypedList, index: usize) -> Result<Option<Ref>, VmError> {
    Ok(list.get_ref_retain_as::<BufferView>(index)?)
}

/// Store a buffer view (or null) at `index`, retaining it.
pub fn list_set_buffer_view_retain(
    list: &mut TypedList,
    index: usize,
    view: Option<&Ref>,
) -> Result<(), VmError> {
    if let Some(view) = view {
        if view.kind() != BufferView::KIND {
            return Err(not_a_view(index, view.kind()));
        }
    }
    list.set_ref_retain(index, view)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_hal::{Buffer, BufferUsage, ElementType as HalElementType, EncodingType, MemoryType};
    use kiln_types::sync::Arc;
    use kiln_types::{ElementType, ResourceRegistry};

    fn view_and_buffer(registry: &Arc<ResourceRegistry>) -> (Ref, Ref) {
        let buffer = Arc::new(Buffer::allocate(MemoryType::HOST_LOCAL, BufferUsage::all(), 16));
        let view = BufferView::create(
            buffer.clone(),
            vec![4],
            HalElementType::Float32,
            EncodingType::DenseRowMajor,
        )
        .unwrap();
        (
            registry.register_ref(Arc::new(view)).unwrap(),
            registry.register_ref(buffer).unwrap(),
        )
    }

    #[test]
    fn test_set_and_get_buffer_view() {
        let registry = Arc::new(ResourceRegistry::new());
        let (view, _) = view_and_buffer(&registry);
        let mut list = TypedList::new(ElementType::Resource(ResourceKind::BufferView), 2);
        list.resize(2);

        list_set_buffer_view_retain(&mut list, 0, Some(&view)).unwrap();
        list_set_buffer_view_retain(&mut list, 1, None).unwrap();

        let retained = list_get_buffer_view_retain(&list, 0).unwrap().unwrap();
        assert_eq!(retained.handle(), view.handle());
        assert_eq!(list_get_buffer_view_assign(&list, 0).unwrap(), Some(view.handle()));
        assert_eq!(list_get_buffer_view_assign(&list, 1).unwrap(), None);
    }

    #[test]
    fn test_other_resource_is_kind_mismatch() {
        let registry = Arc::new(ResourceRegistry::new());
        let (_, buffer) = view_and_buffer(&registry);
        let mut list = TypedList::variant();
        list.resize(1);

        let err = list_set_buffer_view_retain(&mut list, 0, Some(&buffer)).unwrap_err();
        assert!(matches!(err, VmError::KindMismatch { .. }), "{:?}", err);

        list.set_ref_retain(0, Some(&buffer)).unwrap();
        assert!(list_get_buffer_view_assign(&list, 0).is_err());
        assert!(list_get_buffer_view_retain(&list, 0).is_err());
    }
}
