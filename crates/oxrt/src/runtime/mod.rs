//! `OxRT` runtime module.
//!
//! # Architecture
//!
//! The runtime is organized into several modules:
//!
//! - [`class`]: class descriptors, resolution and the class registry
//! - [`interface`]: typed slots and per-class interface tables
//! - [`object`]: the object header, instance types and reference counting
//! - [`lifecycle`]: allocation, chained initialization and deallocation
//! - [`root`]: the root `Object` class and its universal operations
//! - [`sync`]: locks and condition variables for instance state
//!
//! # Example
//!
//! ```rust
//! use oxrt::runtime::{Class, OBJECT, class_for_name};
//!
//! let object = Class::resolve(&OBJECT);
//! assert_eq!(class_for_name("Object"), Some(object));
//! ```

pub mod class;
pub mod interface;
pub mod lifecycle;
pub mod object;
pub mod root;
pub mod sync;

pub use class::{
    Ancestors, Class, ClassDef, ClassDescriptor, all_classes, class_for_name, resolve_class,
};
pub use interface::{InterfaceBuilder, InterfaceTable, Slot, SlotInfo};
pub use lifecycle::{Allocation, Initializer, allocate, allocate_class};
pub use object::{Id, Instance, Object, release, retain};
pub use root::OBJECT;
pub use sync::{Condition, Lock, LockGuard, RefCount};
