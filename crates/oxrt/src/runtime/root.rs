//! The root `Object` class and its four universal operations.
//!
//! Every class inherits these slots from the root:
//!
//! | Index | Slot                 | Default                              |
//! |-------|----------------------|--------------------------------------|
//! | 0     | [`Object::DESCRIBE`] | `ClassName@0xaddress`                |
//! | 1     | [`Object::HASH`]     | hash of the instance address         |
//! | 2     | [`Object::IS_EQUAL`] | identity                             |
//! | 3     | [`Object::COPY`]     | a new strong reference to the object |
//!
//! Rust's `PartialEq`, `Hash` and `Display` on [`Object`] and [`Id`] dispatch
//! through these slots, so overrides are honored by collections and
//! formatting.

use crate::error::Result;
use crate::runtime::class::{ClassDef, ClassDescriptor};
use crate::runtime::interface::{InterfaceBuilder, Slot};
use crate::runtime::lifecycle::{Initializer, allocate};
use crate::runtime::object::{Id, Object};
use std::alloc::Layout;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Descriptor of the root class, `Object`.
pub static OBJECT: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "Object",
    superclass: None,
    instance: Layout::new::<Object>(),
    interface: Some(object_interface),
    dealloc: None,
});

fn object_interface(interface: &mut InterfaceBuilder) {
    interface
        .declare(&Object::DESCRIBE, describe)
        .declare(&Object::HASH, hash)
        .declare(&Object::IS_EQUAL, is_equal)
        .declare(&Object::COPY, copy);
}

fn describe(this: &Object) -> String {
    format!("{}@{:#x}", this.class().name(), this.address())
}

fn hash(this: &Object) -> u64 {
    fxhash::hash64(&this.address())
}

fn is_equal(this: &Object, other: &Object) -> bool {
    std::ptr::eq(this, other)
}

fn copy(this: &Object) -> Id<Object> {
    this.retain()
}

impl Object {
    /// Human readable description.
    pub const DESCRIBE: Slot<fn(&Object) -> String> = Slot::new(0, "describe");

    /// Hash consistent with [`Object::IS_EQUAL`].
    pub const HASH: Slot<fn(&Object) -> u64> = Slot::new(1, "hash");

    /// Value equality.
    pub const IS_EQUAL: Slot<fn(&Object, &Object) -> bool> = Slot::new(2, "is_equal");

    /// Copy of the instance. Immutable classes may return the instance itself.
    pub const COPY: Slot<fn(&Object) -> Id<Object>> = Slot::new(3, "copy");

    /// Number of slots declared by the root class. Direct subclasses of
    /// `Object` declare their first new slot at this index.
    pub const SLOT_COUNT: usize = 4;

    /// Initializer of the root level. Does nothing and never fails.
    ///
    /// # Errors
    ///
    /// Never.
    pub fn init(_init: &mut Initializer<'_, Object>) -> Result<()> {
        Ok(())
    }

    /// Creates a plain instance of the root class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`](crate::Error::OutOfMemory) if the
    /// allocator fails.
    pub fn new() -> Result<Id<Object>> {
        allocate::<Object>()?.initialize(Object::init)
    }

    /// Calls [`Object::DESCRIBE`].
    #[must_use]
    pub fn describe(&self) -> String {
        (self.method(&Self::DESCRIBE))(self)
    }

    /// Calls [`Object::HASH`].
    #[must_use]
    pub fn hash_code(&self) -> u64 {
        (self.method(&Self::HASH))(self)
    }

    /// Calls [`Object::IS_EQUAL`] with `self` as the receiver.
    #[must_use]
    pub fn is_equal(&self, other: &Object) -> bool {
        (self.method(&Self::IS_EQUAL))(self, other)
    }

    /// Calls [`Object::COPY`].
    #[must_use]
    pub fn copy(&self) -> Id<Object> {
        (self.method(&Self::COPY))(self)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class().name())
            .field("address", &format_args!("{:#x}", self.address()))
            .field("retain_count", &self.retain_count())
            .finish()
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Calls a slot on a receiver.
///
/// `send!(receiver, SLOT, args...)` looks `SLOT` up in the receiver's
/// interface table and calls it with the receiver's header followed by
/// `args`. The receiver may be anything that dereferences to an
/// [`Instance`](crate::Instance): `&Object`, `Id<T>`, `&T`.
///
/// # Panics
///
/// Sending a slot the receiver's class does not implement is a contract
/// violation.
///
/// # Example
///
/// ```rust
/// use oxrt::{Object, send};
///
/// let object = Object::new().unwrap();
/// let copy = send!(object, Object::COPY);
///
/// assert!(send!(object, Object::IS_EQUAL, &copy));
/// assert_eq!(send!(copy, Object::HASH), object.hash_code());
/// ```
#[macro_export]
macro_rules! send {
    ($receiver:expr, $slot:expr $(, $arg:expr)* $(,)?) => {
        match $receiver {
            ref receiver => {
                use $crate::Instance as _;
                let object: &$crate::Object = receiver.as_object();
                (object.method(&$slot))(object $(, $arg)*)
            }
        }
    };
}
