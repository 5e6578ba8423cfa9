//! `OxRT`: a class-based object runtime for Rust
//!
//! `OxRT` gives Rust code the object model of classic object-oriented
//! runtimes, built from ordinary structs and function pointers:
//!
//! - **Single inheritance** from one root class, `Object`
//! - **Dynamic dispatch** through per-class interface tables with O(1) lookup
//! - **Reference counting** with atomic retain/release and chained
//!   deallocation
//! - **Chained initialization** where superclass levels complete first and
//!   failures tear down only what was built
//! - **Reflection** by class name, superclass chain and slot listing
//!
//! # Architecture
//!
//! A class is a `static` [`ClassDescriptor`] paired with a `#[repr(C)]` Rust
//! struct that embeds its superclass's instance type as its first field. The
//! runtime resolves descriptors lazily, exactly once, into [`Class`] handles.
//! Instances live in runtime-allocated storage and are owned through [`Id`]
//! handles.
//!
//! # Example
//!
//! ```rust
//! use oxrt::{ClassDef, ClassDescriptor, Id, Instance, InterfaceBuilder, Object, OBJECT};
//! use oxrt::{Slot, allocate, send};
//! use std::alloc::Layout;
//!
//! #[repr(C)]
//! struct Counter {
//!     object: Object,
//!     value: i64,
//! }
//!
//! const GET: Slot<fn(&Object) -> i64> = Slot::new(Object::SLOT_COUNT, "get");
//!
//! fn counter_get(this: &Object) -> i64 {
//!     this.cast::<Counter>().value
//! }
//!
//! fn counter_describe(this: &Object) -> String {
//!     format!("Counter({})", counter_get(this))
//! }
//!
//! fn counter_interface(interface: &mut InterfaceBuilder) {
//!     interface
//!         .implement(&Object::DESCRIBE, counter_describe)
//!         .declare(&GET, counter_get);
//! }
//!
//! static COUNTER: ClassDescriptor = ClassDescriptor::new(ClassDef {
//!     name: "Counter",
//!     superclass: Some(&OBJECT),
//!     instance: Layout::new::<Counter>(),
//!     interface: Some(counter_interface),
//!     dealloc: None,
//! });
//!
//! unsafe impl Instance for Counter {
//!     fn descriptor() -> &'static ClassDescriptor {
//!         &COUNTER
//!     }
//! }
//!
//! let counter: Id<Counter> = allocate::<Counter>()?.initialize(|init| {
//!     init.init_super(Object::init)?;
//!     init.this().value = 3;
//!     Ok(())
//! })?;
//!
//! assert_eq!(send!(counter, GET), 3);
//!
//! // Dispatch through the root type still reaches the override.
//! let object: Id = Id::upcast(counter);
//! assert_eq!(object.to_string(), "Counter(3)");
//! # Ok::<(), oxrt::Error>(())
//! ```

pub mod error;
pub mod runtime;

// Re-export commonly used types
pub use error::{Error, ErrorKind, Result, fatal};
pub use runtime::{
    Allocation, Class, ClassDef, ClassDescriptor, Condition, Id, Initializer, Instance,
    InterfaceBuilder, InterfaceTable, Lock, LockGuard, OBJECT, Object, Slot, SlotInfo, all_classes,
    allocate, allocate_class, class_for_name, release, resolve_class, retain,
};
