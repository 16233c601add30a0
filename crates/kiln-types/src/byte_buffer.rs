//! Read-only byte buffers (module rodata exposed as refs).

use crate::resource::{Resource, ResourceKind};
use crate::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Arc<[u8]>,
}

impl ByteBuffer {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Contents as UTF-8, if valid
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::new(Arc::from(bytes))
    }
}

impl Resource for ByteBuffer {
    const KIND: ResourceKind = ResourceKind::ByteBuffer;
}
