//! Deduplication of kernel arguments during one generation or binding pass.

use std::collections::BTreeMap;

use crate::{
    error::FuseError,
    expression::{ArrayInfo, BufferHandle},
    DType,
};

/// How repeated buffers are turned into kernel arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingPolicy {
    /// The same buffer is passed only once, every occurrence shares one kernel parameter
    #[default]
    BindToHandle,
    /// Every occurrence gets its own kernel parameter
    BindAllUnique,
}

/// Pass scoped table from buffer identity to argument id.
/// Scalars and other values without identity pass None and always get a fresh id.
#[derive(Debug)]
pub struct Binder {
    policy: BindingPolicy,
    memory: BTreeMap<BufferHandle, u32>,
    /// Dtype of the first view of every shared buffer
    dtypes: BTreeMap<BufferHandle, DType>,
    current_arg: u32,
}

impl Binder {
    pub const fn new(policy: BindingPolicy) -> Binder {
        Binder { policy, memory: BTreeMap::new(), dtypes: BTreeMap::new(), current_arg: 0 }
    }

    pub const fn policy(&self) -> BindingPolicy {
        self.policy
    }

    /// Id used to name the kernel parameter of this handle
    pub fn get(&mut self, handle: Option<BufferHandle>) -> u32 {
        match (self.policy, handle) {
            (BindingPolicy::BindToHandle, Some(handle)) => {
                if let Some(&id) = self.memory.get(&handle) {
                    id
                } else {
                    let id = self.next();
                    self.memory.insert(handle, id);
                    id
                }
            }
            _ => self.next(),
        }
    }

    /// Id of an array view. Views sharing one kernel parameter must agree on dtype.
    pub fn get_array(&mut self, array: &ArrayInfo) -> Result<u32, FuseError> {
        if self.policy == BindingPolicy::BindToHandle {
            let dtype = *self.dtypes.entry(array.handle).or_insert(array.dtype);
            if dtype != array.dtype {
                return Err(FuseError::invalid_expression(format!(
                    "Buffer {:#x} is viewed as both {dtype} and {}",
                    array.handle.0, array.dtype
                )));
            }
        }
        Ok(self.get(Some(array.handle)))
    }

    /// Returns true if arguments of this handle must be set, that is on first sighting
    pub fn bind(&mut self, handle: Option<BufferHandle>) -> bool {
        match (self.policy, handle) {
            (BindingPolicy::BindToHandle, Some(handle)) => {
                if self.memory.contains_key(&handle) {
                    false
                } else {
                    let id = self.next();
                    self.memory.insert(handle, id);
                    true
                }
            }
            _ => true,
        }
    }

    fn next(&mut self) -> u32 {
        let id = self.current_arg;
        self.current_arg += 1;
        id
    }
}

#[test]
fn bind_to_handle_dedups() {
    let mut binder = Binder::new(BindingPolicy::BindToHandle);
    let a = binder.get(Some(BufferHandle(10)));
    let s = binder.get(None);
    let b = binder.get(Some(BufferHandle(10)));
    let c = binder.get(Some(BufferHandle(11)));
    assert_eq!(a, b);
    assert_ne!(a, s);
    assert_ne!(a, c);
    assert_ne!(s, c);
}

#[test]
fn bind_reports_first_sighting() {
    let mut binder = Binder::new(BindingPolicy::BindToHandle);
    assert!(binder.bind(Some(BufferHandle(3))));
    assert!(!binder.bind(Some(BufferHandle(3))));
    assert!(binder.bind(None));
    assert!(binder.bind(None));
    let mut binder = Binder::new(BindingPolicy::BindAllUnique);
    assert!(binder.bind(Some(BufferHandle(3))));
    assert!(binder.bind(Some(BufferHandle(3))));
}

#[test]
fn mixed_dtype_views_are_rejected() {
    let mut binder = Binder::new(BindingPolicy::BindToHandle);
    let x = ArrayInfo::vector(BufferHandle(7), DType::F32, 16);
    let y = ArrayInfo { dtype: DType::F64, ..x };
    assert!(binder.get_array(&x).is_ok());
    assert!(matches!(binder.get_array(&y), Err(FuseError::InvalidExpression(_))));
    let mut binder = Binder::new(BindingPolicy::BindAllUnique);
    assert!(binder.get_array(&x).is_ok());
    assert!(binder.get_array(&y).is_ok());
}
