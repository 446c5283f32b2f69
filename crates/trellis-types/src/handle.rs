use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a decoded application value.
///
/// The lifecycle core never looks inside; only the codec supplied by the
/// class-metadata layer knows the concrete type. Clones share the same
/// allocation, so two handles to "the same" decoded object compare equal
/// under [`OpaqueHandle::ptr_eq`].
#[derive(Clone)]
pub struct OpaqueHandle(Arc<dyn Any + Send + Sync>);

impl OpaqueHandle {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the value as `T`, if that is its concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns `true` if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation. Only meaningful while a handle is
    /// alive; never use it as a persistent key.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// A weak handle that does not keep the value alive.
    pub fn downgrade(&self) -> WeakHandle {
        WeakHandle(Arc::downgrade(&self.0))
    }
}

impl fmt::Debug for OpaqueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueHandle({:#x})", self.addr())
    }
}

/// Non-owning counterpart of [`OpaqueHandle`].
#[derive(Clone)]
pub struct WeakHandle(std::sync::Weak<dyn Any + Send + Sync>);

impl WeakHandle {
    /// Recover a strong handle if the value is still alive.
    pub fn upgrade(&self) -> Option<OpaqueHandle> {
        self.0.upgrade().map(OpaqueHandle)
    }
}

impl fmt::Debug for WeakHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakHandle")
    }
}
