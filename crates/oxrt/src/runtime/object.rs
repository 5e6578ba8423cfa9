//! Object headers, instance types and reference-counted handles for the
//! `OxRT` runtime.
//!
//! This module implements the object model with:
//! - A fixed [`Object`] header at offset zero of every instance
//! - The [`Instance`] trait tying a Rust struct to its class descriptor
//! - [`Id`], an owning handle whose `Clone` retains and `Drop` releases
//! - Raw [`retain`] / [`release`] entry points for manual ownership
//!
//! # Memory Layout
//!
//! Every instance starts with the header, followed by the fields of each
//! class level in superclass-first order:
//!
//! ```text
//! +-------------+------------------+---------------+-----------------+
//! | class       | interface table  | ref count     | subclass fields |
//! +-------------+------------------+---------------+-----------------+
//! ```
//!
//! Because every instance type is `#[repr(C)]` and embeds its superclass's
//! instance type as its first field, a pointer to any instance is also a
//! valid pointer to every ancestor's instance, the header included.
//!
//! Method and `dealloc` receivers are header references that
//! [`Object::cast`] widens to the whole instance. The runtime derives every
//! such reference from the allocation's own pointer, and the widening is
//! accepted by the Tree Borrows aliasing model; check with
//! `MIRIFLAGS=-Zmiri-tree-borrows cargo miri test`.
//!
//! # Thread Safety
//!
//! Reference counts are atomic and every instance type is `Send + Sync`, so
//! handles may be retained, released and upcast on any thread. Mutable
//! instance fields need their own synchronization, see
//! [`Lock`](crate::runtime::Lock).

use crate::error::{Error, Result, fatal};
use crate::runtime::class::{Class, ClassDescriptor};
use crate::runtime::interface::{InterfaceTable, Slot};
use crate::runtime::lifecycle;
use crate::runtime::root::OBJECT;
use crate::runtime::sync::{CountViolation, Decrement, RefCount};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

/// The header shared by every instance.
///
/// `Object` is also the instance type of the root class, so `&Object` is the
/// uniform way to refer to an instance of any class. Instances are never
/// created as Rust values; they are allocated by the runtime and reached
/// through [`Id`] or references derived from one.
#[repr(C)]
pub struct Object {
    class: Class,
    interface: &'static InterfaceTable,
    ref_count: RefCount,
}

impl Object {
    /// Builds the header of a fresh instance with a count of 1.
    pub(crate) fn header(class: Class) -> Object {
        Object {
            class,
            interface: class.interface(),
            ref_count: RefCount::new(1),
        }
    }

    /// Returns the instance's class.
    #[must_use]
    pub fn class(&self) -> Class {
        self.class
    }

    /// Returns the interface table used for dispatch on this instance.
    #[must_use]
    pub fn interface(&self) -> &'static InterfaceTable {
        self.interface
    }

    /// Returns the current reference count.
    ///
    /// The count can change concurrently; use it for diagnostics and tests.
    #[must_use]
    pub fn retain_count(&self) -> usize {
        self.ref_count.get()
    }

    /// Returns the instance's address.
    #[must_use]
    pub fn address(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }

    /// Returns `true` if the instance's class is `class` or inherits from it.
    #[must_use]
    pub fn is_kind_of(&self, class: Class) -> bool {
        self.class.is_subclass_of(class)
    }

    /// Returns `true` if the instance's class is exactly `class`.
    #[must_use]
    pub fn is_instance_of(&self, class: Class) -> bool {
        self.class == class
    }

    /// Views this instance as a `T` if its class is a kind of `T`'s class.
    #[must_use]
    pub fn downcast_ref<T: Instance>(&self) -> Option<&T> {
        if self.is_kind_of(T::class()) {
            // SAFETY: the instance was allocated for a subclass of T's class,
            // whose instance type starts with T (`Instance` contract).
            Some(unsafe { &*std::ptr::from_ref(self).cast::<T>() })
        } else {
            None
        }
    }

    /// Mutable counterpart of [`Object::downcast_ref`].
    #[must_use]
    pub fn downcast_mut<T: Instance>(&mut self) -> Option<&mut T> {
        if self.is_kind_of(T::class()) {
            // SAFETY: as in `downcast_ref`; exclusivity comes from `&mut self`.
            Some(unsafe { &mut *std::ptr::from_mut(self).cast::<T>() })
        } else {
            None
        }
    }

    /// Views this instance as a `T`.
    ///
    /// Used inside method implementations, which receive `&Object` but are
    /// only ever installed on classes whose instances are `T`s.
    ///
    /// # Panics
    ///
    /// An instance that is not a kind of `T`'s class is a contract violation.
    #[must_use]
    #[track_caller]
    pub fn cast<T: Instance>(&self) -> &T {
        match self.downcast_ref() {
            Some(this) => this,
            None => fatal(self.invalid_cast::<T>()),
        }
    }

    /// Mutable counterpart of [`Object::cast`].
    ///
    /// # Panics
    ///
    /// An instance that is not a kind of `T`'s class is a contract violation.
    #[must_use]
    #[track_caller]
    pub fn cast_mut<T: Instance>(&mut self) -> &mut T {
        let err = self.invalid_cast::<T>();
        match self.downcast_mut() {
            Some(this) => this,
            None => fatal(err),
        }
    }

    /// Looks up the implementation of `slot` for this instance.
    ///
    /// # Panics
    ///
    /// Calling a slot the receiver's class leaves unimplemented, or one its
    /// table does not have, is a contract violation.
    ///
    /// # Example
    ///
    /// ```rust
    /// use oxrt::{Object, Id};
    ///
    /// let object: Id = Object::new().unwrap();
    /// let describe = object.method(&Object::DESCRIBE);
    /// assert!(describe(&object).starts_with("Object@"));
    /// ```
    #[must_use]
    #[track_caller]
    pub fn method<F: Copy + 'static>(&self, slot: &Slot<F>) -> F {
        match self.interface.lookup(slot) {
            Ok(implementation) => implementation,
            Err(err) => fatal(err),
        }
    }

    /// Looks up the implementation of `slot`, reporting failures.
    ///
    /// # Errors
    ///
    /// See [`InterfaceTable::lookup`].
    pub fn try_method<F: Copy + 'static>(&self, slot: &Slot<F>) -> Result<F> {
        self.interface.lookup(slot)
    }

    /// Returns `true` if calling `slot` on this instance would succeed.
    #[must_use]
    pub fn responds_to<F: Copy + 'static>(&self, slot: &Slot<F>) -> bool {
        self.interface.lookup(slot).is_ok()
    }

    /// Takes a new strong reference to this instance.
    ///
    /// # Panics
    ///
    /// Retaining an instance that is being deallocated, or past the counter's
    /// range, is a contract violation.
    #[must_use]
    #[track_caller]
    pub fn retain(&self) -> Id<Object> {
        self.increment();
        // SAFETY: the count was just incremented on a live instance.
        unsafe { Id::from_retained(NonNull::from(self)) }
    }

    #[track_caller]
    pub(crate) fn increment(&self) {
        if let Err(violation) = self.ref_count.increment() {
            fatal(self.count_error(violation));
        }
    }

    fn count_error(&self, violation: CountViolation) -> Error {
        let class = self.class.name();
        let address = self.address();
        match violation {
            CountViolation::Underflow => Error::OverRelease { class, address },
            CountViolation::Resurrection => Error::RetainDuringDealloc { class, address },
            CountViolation::Overflow => Error::RefCountOverflow { class, address },
        }
    }

    fn invalid_cast<T: Instance>(&self) -> Error {
        Error::InvalidCast {
            class: self.class.name(),
            target: T::descriptor().name(),
        }
    }
}

/// A Rust type laid out as the instances of one class.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - the type is `#[repr(C)]`
/// - its first field is the superclass's instance type (`Object` for direct
///   subclasses of the root)
/// - `descriptor().def().instance` is `Layout::new::<Self>()`
/// - every field declared at this level is valid when zero-filled, since the
///   runtime zeroes storage before initializers run
///
/// Instance types are `Send + Sync`: any handle can be upcast to `Id<Object>`,
/// moved to another thread and downcast back, so the runtime cannot track
/// thread affinity per type. Types holding a `Cell` or an `Rc` are rejected:
///
/// ```compile_fail
/// use oxrt::{ClassDef, ClassDescriptor, Instance, Object, OBJECT};
/// use std::alloc::Layout;
/// use std::cell::Cell;
///
/// #[repr(C)]
/// struct Local {
///     object: Object,
///     hits: Cell<u64>,
/// }
///
/// static LOCAL: ClassDescriptor = ClassDescriptor::new(ClassDef {
///     name: "Local",
///     superclass: Some(&OBJECT),
///     instance: Layout::new::<Local>(),
///     interface: None,
///     dealloc: None,
/// });
///
/// unsafe impl Instance for Local {
///     fn descriptor() -> &'static ClassDescriptor {
///         &LOCAL
///     }
/// }
/// ```
///
/// The runtime never runs `Drop` for instance types. Fields that own
/// resources must be released by the class's `dealloc` function.
///
/// # Example
///
/// ```rust
/// use oxrt::{ClassDef, ClassDescriptor, Instance, Object, OBJECT};
/// use std::alloc::Layout;
///
/// #[repr(C)]
/// struct Counter {
///     object: Object,
///     value: i64,
/// }
///
/// static COUNTER: ClassDescriptor = ClassDescriptor::new(ClassDef {
///     name: "Counter",
///     superclass: Some(&OBJECT),
///     instance: Layout::new::<Counter>(),
///     interface: None,
///     dealloc: None,
/// });
///
/// unsafe impl Instance for Counter {
///     fn descriptor() -> &'static ClassDescriptor {
///         &COUNTER
///     }
/// }
///
/// assert_eq!(Counter::class().instance_size(), 32);
/// ```
pub unsafe trait Instance: Sized + Send + Sync + 'static {
    /// Returns the descriptor of the class whose instances are `Self`.
    fn descriptor() -> &'static ClassDescriptor;

    /// Returns the resolved class, resolving it on first use.
    ///
    /// # Panics
    ///
    /// Panics if the descriptor is malformed.
    #[must_use]
    fn class() -> Class {
        Class::resolve(Self::descriptor())
    }

    /// Views this instance through its header.
    fn as_object(&self) -> &Object {
        // SAFETY: `Self` is `#[repr(C)]` with the header at offset 0.
        unsafe { &*std::ptr::from_ref(self).cast::<Object>() }
    }
}

// SAFETY: the header is its own instance type.
unsafe impl Instance for Object {
    fn descriptor() -> &'static ClassDescriptor {
        &OBJECT
    }
}

/// An owning, reference-counted handle to an instance.
///
/// `Clone` retains and `Drop` releases; the instance is deallocated when the
/// last handle goes away. `Id<T>` dereferences to `T`, and
/// [`Instance::as_object`] reaches the header.
///
/// Functions on `Id` are associated functions (`Id::retain_count(&id)`) so
/// they never shadow methods of `T`.
///
/// # Example
///
/// ```rust
/// use oxrt::{Id, Object};
///
/// let first: Id = Object::new().unwrap();
/// let second = first.clone();
///
/// assert!(Id::ptr_eq(&first, &second));
/// assert_eq!(Id::retain_count(&first), 2);
///
/// drop(second);
/// assert_eq!(Id::retain_count(&first), 1);
/// ```
pub struct Id<T: Instance = Object> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

impl<T: Instance> Id<T> {
    /// Takes ownership of one already counted reference.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live, fully initialized instance whose class is a
    /// kind of `T`'s class, and the caller must transfer one reference to the
    /// new handle.
    pub(crate) unsafe fn from_retained(ptr: NonNull<T>) -> Self {
        Id {
            ptr,
            _owns: PhantomData,
        }
    }

    /// Returns a raw pointer to the instance without affecting the count.
    #[must_use]
    pub fn as_ptr(this: &Self) -> *const T {
        this.ptr.as_ptr()
    }

    /// Returns the current reference count.
    #[must_use]
    pub fn retain_count(this: &Self) -> usize {
        this.as_object().retain_count()
    }

    /// Returns `true` if both handles refer to the same instance.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Converts into a handle to the header type.
    #[must_use]
    pub fn upcast(this: Self) -> Id<Object> {
        let ptr = this.ptr.cast::<Object>();
        std::mem::forget(this);
        // SAFETY: the reference held by `this` moves to the new handle.
        unsafe { Id::from_retained(ptr) }
    }

    /// Gives up the handle without releasing.
    ///
    /// The reference must later be returned with [`Id::from_raw`] or
    /// [`release`].
    #[must_use = "the reference leaks unless passed to `Id::from_raw` or `release`"]
    pub fn into_raw(this: Self) -> *const Object {
        let ptr = this.ptr.cast::<Object>().as_ptr().cast_const();
        std::mem::forget(this);
        ptr
    }
}

impl Id<Object> {
    /// Reclaims a reference previously given up with [`Id::into_raw`] or
    /// taken with [`retain`].
    ///
    /// Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point to a live instance, and the caller must own
    /// one reference to it, which moves into the handle.
    pub unsafe fn from_raw(ptr: *const Object) -> Option<Id<Object>> {
        // SAFETY: forwarded to the caller.
        NonNull::new(ptr.cast_mut()).map(|ptr| unsafe { Id::from_retained(ptr) })
    }

    /// Converts into a handle to `T` if the instance is a kind of `T`'s class.
    ///
    /// # Errors
    ///
    /// Returns the handle unchanged if the class does not match.
    pub fn downcast<T: Instance>(self) -> std::result::Result<Id<T>, Id<Object>> {
        if self.is_kind_of(T::class()) {
            let ptr = self.ptr.cast::<T>();
            std::mem::forget(self);
            // SAFETY: the class check upholds `from_retained`'s contract and
            // the reference moves to the new handle.
            Ok(unsafe { Id::from_retained(ptr) })
        } else {
            Err(self)
        }
    }
}

impl<T: Instance> Deref for Id<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the handle keeps the instance alive.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Instance> Clone for Id<T> {
    fn clone(&self) -> Self {
        self.as_object().increment();
        // SAFETY: the count was just incremented.
        unsafe { Id::from_retained(self.ptr) }
    }
}

impl<T: Instance> Drop for Id<T> {
    fn drop(&mut self) {
        // SAFETY: the handle owns one reference.
        unsafe { release_object(self.ptr.cast()) }
    }
}

// SAFETY: the count is atomic, class metadata is immutable and every instance
// type is `Send + Sync`, including the real class behind an upcast handle.
unsafe impl<T: Instance> Send for Id<T> {}

// SAFETY: see `Send`.
unsafe impl<T: Instance> Sync for Id<T> {}

impl<T: Instance> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_object() == other.as_object()
    }
}

impl<T: Instance> Eq for Id<T> {}

impl<T: Instance> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_object().hash(state);
    }
}

impl<T: Instance> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_object(), f)
    }
}

impl<T: Instance> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_object(), f)
    }
}

/// Increments the reference count of `object` and returns it.
///
/// A null pointer is returned unchanged.
///
/// # Safety
///
/// A non-null `object` must point to a live instance.
///
/// # Panics
///
/// Retaining an instance that is being deallocated is a contract violation.
pub unsafe fn retain(object: *const Object) -> *const Object {
    // SAFETY: forwarded to the caller.
    if let Some(object) = unsafe { object.as_ref() } {
        object.increment();
    }
    object
}

/// Decrements the reference count of `object`, deallocating it at zero.
///
/// A null pointer is ignored.
///
/// # Safety
///
/// A non-null `object` must point to a live instance, and the caller must give
/// up one reference it owns.
///
/// # Panics
///
/// Releasing an instance whose count is already zero is a contract violation.
pub unsafe fn release(object: *const Object) {
    if let Some(ptr) = NonNull::new(object.cast_mut()) {
        // SAFETY: forwarded to the caller.
        unsafe { release_object(ptr) }
    }
}

/// Drops one reference to the instance at `ptr`.
///
/// # Safety
///
/// `ptr` must point to a live instance and the caller must own one reference.
pub(crate) unsafe fn release_object(ptr: NonNull<Object>) {
    // SAFETY: the caller's reference keeps the instance alive until the
    // decrement below.
    let object = unsafe { ptr.as_ref() };
    match object.ref_count.decrement() {
        Ok(Decrement::Alive) => {}
        // SAFETY: the count reached zero, no other reference exists.
        Ok(Decrement::Zero) => unsafe { lifecycle::deallocate(ptr) },
        Err(violation) => fatal(object.count_error(violation)),
    }
}
