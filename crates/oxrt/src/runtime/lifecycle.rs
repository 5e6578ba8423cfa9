//! Allocation, chained initialization and deallocation of instances.
//!
//! Creating an instance takes two steps:
//!
//! 1. [`allocate`] reserves zero-filled storage for the class's instance and
//!    writes the header with a count of 1.
//! 2. [`Allocation::initialize`] runs the leaf class's initializer, which must
//!    first run its superclass's initializer through
//!    [`Initializer::init_super`], and so on up to [`Object::init`]. The root
//!    level therefore completes first and each level sees its ancestors'
//!    fields already set up.
//!
//! If any level fails, the levels that did complete are torn down leaf to root
//! with their `dealloc` functions, the storage is freed and the error is
//! returned. An instance is only ever handed out fully initialized.
//!
//! When the last reference to an instance is released the runtime runs the
//! `dealloc` function of every level, leaf first, then frees the storage.
//!
//! ```rust
//! use oxrt::{ClassDef, ClassDescriptor, Id, Instance, Object, OBJECT, allocate};
//! use std::alloc::Layout;
//!
//! #[repr(C)]
//! struct Temperature {
//!     object: Object,
//!     kelvin: f64,
//! }
//!
//! static TEMPERATURE: ClassDescriptor = ClassDescriptor::new(ClassDef {
//!     name: "Temperature",
//!     superclass: Some(&OBJECT),
//!     instance: Layout::new::<Temperature>(),
//!     interface: None,
//!     dealloc: None,
//! });
//!
//! unsafe impl Instance for Temperature {
//!     fn descriptor() -> &'static ClassDescriptor {
//!         &TEMPERATURE
//!     }
//! }
//!
//! fn temperature(kelvin: f64) -> oxrt::Result<Id<Temperature>> {
//!     allocate::<Temperature>()?.initialize(|init| {
//!         init.init_super(Object::init)?;
//!         if kelvin < 0.0 {
//!             return Err(init.fail("below absolute zero"));
//!         }
//!         init.this().kelvin = kelvin;
//!         Ok(())
//!     })
//! }
//!
//! assert_eq!(temperature(300.0).unwrap().kelvin, 300.0);
//! assert!(temperature(-1.0).is_err());
//! ```

use crate::error::{Error, Result, fatal};
use crate::runtime::class::Class;
use crate::runtime::object::{Id, Instance, Object};
use std::alloc::{self, Layout};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use tracing::{trace, warn};

/// Reserves storage for a new instance of `T`'s class.
///
/// The storage is zero-filled and carries a valid header. Nothing else about
/// the instance is initialized until [`Allocation::initialize`] runs.
///
/// # Errors
///
/// Returns [`Error::OutOfMemory`] if the allocator fails.
///
/// # Panics
///
/// A malformed class, or a class whose declared layout is not `T`'s, is fatal.
pub fn allocate<T: Instance>() -> Result<Allocation<T>> {
    let class = T::class();
    let declared = class.instance_layout();
    let actual = Layout::new::<T>();

    if declared != actual {
        fatal(Error::LayoutMismatch {
            class: class.name(),
            ty: type_name::<T>(),
            declared: declared.size(),
            actual: actual.size(),
        });
    }

    allocate_storage(class)
}

/// Reserves storage for a new instance of `class`, seen through its header.
///
/// Useful when the class is only known at run time, for example after
/// [`class_for_name`](crate::runtime::class_for_name).
///
/// # Errors
///
/// Returns [`Error::OutOfMemory`] if the allocator fails.
pub fn allocate_class(class: Class) -> Result<Allocation<Object>> {
    allocate_storage(class)
}

fn allocate_storage<T: Instance>(class: Class) -> Result<Allocation<T>> {
    let layout = class.instance_layout();

    // SAFETY: resolution guarantees the layout is at least a header, so it is
    // never zero-sized.
    let raw = unsafe { alloc::alloc_zeroed(layout) };
    let Some(ptr) = NonNull::new(raw.cast::<Object>()) else {
        warn!(
            class = class.name(),
            size = layout.size(),
            "allocation failed"
        );
        return Err(Error::OutOfMemory {
            class: class.name(),
            size: layout.size(),
        });
    };

    // SAFETY: fresh storage sized and aligned for at least a header.
    unsafe { ptr.as_ptr().write(Object::header(class)) };

    trace!(
        class = class.name(),
        size = layout.size(),
        address = ptr.as_ptr() as usize,
        "allocated instance"
    );

    Ok(Allocation {
        ptr: ptr.cast(),
        class,
        completed: None,
    })
}

/// Storage for an instance that has not finished initialization.
///
/// Dropping an `Allocation` tears down the levels that completed and frees the
/// storage.
#[must_use = "an allocation does nothing until initialized"]
pub struct Allocation<T: Instance> {
    ptr: NonNull<T>,
    class: Class,
    /// Depth of the deepest level whose initializer completed.
    completed: Option<usize>,
}

impl<T: Instance> Allocation<T> {
    /// Returns the class being instantiated.
    #[must_use]
    pub fn class(&self) -> Class {
        self.class
    }

    /// Runs the leaf initializer and hands out the finished instance.
    ///
    /// `init` runs for the allocated class's level and must call
    /// [`Initializer::init_super`] for the superclass level before touching its
    /// own fields.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any level's initializer. The levels
    /// that completed are torn down and the storage is freed before returning.
    ///
    /// # Panics
    ///
    /// Finishing a level without its superclass's level having completed is a
    /// contract violation.
    pub fn initialize<F>(mut self, init: F) -> Result<Id<T>>
    where
        F: FnOnce(&mut Initializer<'_, T>) -> Result<()>,
    {
        let class = self.class;
        let object = self.ptr.cast::<Object>();

        match run_level(object, class, &mut self.completed, init) {
            Ok(()) => {
                let ptr = self.ptr;
                std::mem::forget(self);
                trace!(
                    class = class.name(),
                    address = ptr.as_ptr() as usize,
                    "initialized instance"
                );
                // SAFETY: every level completed; the allocation's reference
                // moves to the handle.
                Ok(unsafe { Id::from_retained(ptr) })
            }
            Err(err) => {
                warn!(class = class.name(), error = %err, "initialization failed");
                Err(err)
            }
        }
    }
}

impl<T: Instance> Drop for Allocation<T> {
    fn drop(&mut self) {
        // SAFETY: the storage is still owned by this allocation and only the
        // recorded levels were set up.
        unsafe { teardown(self.ptr.cast(), self.class, self.completed) }
    }
}

impl<T: Instance> fmt::Debug for Allocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("class", &self.class.name())
            .field("completed", &self.completed)
            .finish()
    }
}

/// Access to a partially built instance while one class level initializes.
pub struct Initializer<'a, T: Instance> {
    object: NonNull<Object>,
    level: Class,
    completed: &'a mut Option<usize>,
    _level: PhantomData<&'a mut T>,
}

impl<T: Instance> Initializer<'_, T> {
    /// Returns this level's view of the instance.
    pub fn this(&mut self) -> &mut T {
        // SAFETY: the storage holds an instance of a subclass of this level,
        // whose instance type starts with `T`.
        unsafe { &mut *self.object.as_ptr().cast::<T>() }
    }

    /// Returns the instance header.
    #[must_use]
    pub fn object(&self) -> &Object {
        // SAFETY: the header was written by `allocate`.
        unsafe { self.object.as_ref() }
    }

    /// Returns the class level being initialized.
    #[must_use]
    pub fn class(&self) -> Class {
        self.level
    }

    /// Runs the superclass level's initializer.
    ///
    /// # Errors
    ///
    /// Returns whatever `init` returns.
    ///
    /// # Panics
    ///
    /// `S` must be the direct superclass of this level.
    #[track_caller]
    pub fn init_super<S, F>(&mut self, init: F) -> Result<()>
    where
        S: Instance,
        F: FnOnce(&mut Initializer<'_, S>) -> Result<()>,
    {
        let superclass = S::class();
        if self.level.superclass() != Some(superclass) {
            fatal(Error::BrokenInitChain {
                class: self.level.name(),
                detail: "init_super called with a class that is not the direct superclass",
            });
        }
        run_level(self.object, superclass, self.completed, init)
    }

    /// Builds the error an initializer returns to reject its arguments.
    #[must_use]
    pub fn fail(&self, reason: impl Into<String>) -> Error {
        Error::InitializationFailed {
            class: self.level.name(),
            reason: reason.into(),
        }
    }
}

impl<T: Instance> fmt::Debug for Initializer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initializer")
            .field("level", &self.level.name())
            .field("completed", &*self.completed)
            .finish()
    }
}

#[track_caller]
fn run_level<T, F>(
    object: NonNull<Object>,
    level: Class,
    completed: &mut Option<usize>,
    init: F,
) -> Result<()>
where
    T: Instance,
    F: FnOnce(&mut Initializer<'_, T>) -> Result<()>,
{
    let mut initializer = Initializer {
        object,
        level,
        completed,
        _level: PhantomData,
    };
    init(&mut initializer)?;

    let depth = level.depth();
    if *initializer.completed != depth.checked_sub(1) {
        fatal(Error::BrokenInitChain {
            class: level.name(),
            detail: if depth == 0 {
                "root initializer ran more than once"
            } else {
                "initializer finished without running its superclass initializer"
            },
        });
    }

    *initializer.completed = Some(depth);
    Ok(())
}

/// Runs every level's `dealloc` function, leaf first, and frees the storage.
///
/// # Safety
///
/// `ptr` must point to a fully initialized instance with no references left.
pub(crate) unsafe fn deallocate(ptr: NonNull<Object>) {
    // SAFETY: the caller guarantees the instance is still readable.
    let class = unsafe { ptr.as_ref() }.class();
    // SAFETY: forwarded; a live instance has all levels initialized.
    unsafe { teardown(ptr, class, Some(class.depth())) }
}

/// Runs the `dealloc` functions of levels up to `completed` and frees the
/// storage.
unsafe fn teardown(ptr: NonNull<Object>, class: Class, completed: Option<usize>) {
    if let Some(completed) = completed {
        for level in class.ancestors().filter(|level| level.depth() <= completed) {
            if let Some(dealloc) = level.descriptor().def().dealloc {
                // SAFETY: no other reference to the instance exists.
                dealloc(unsafe { &mut *ptr.as_ptr() });
            }
        }
    }

    trace!(
        class = class.name(),
        address = ptr.as_ptr() as usize,
        levels = completed.map_or(0, |depth| depth + 1),
        "deallocated instance"
    );

    // SAFETY: allocated in `allocate_storage` with this class's layout.
    unsafe { alloc::dealloc(ptr.as_ptr().cast(), class.instance_layout()) };
}
