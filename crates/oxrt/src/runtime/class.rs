//! Class descriptors, resolution and the class registry for the `OxRT` runtime.
//!
//! This module implements the class system with:
//! - Static, `const`-constructible class descriptors
//! - Lazy, exactly-once resolution of a descriptor into a [`Class`]
//! - Single inheritance rooted at the runtime's `Object` class
//! - A global name index for reflection
//!
//! # Architecture
//!
//! A class is declared as a `static` [`ClassDescriptor`]; the descriptor's
//! address is its identity. Nothing happens until the class is first needed.
//! [`Class::resolve`] then resolves the superclass chain root first, checks the
//! declared instance layout, builds the interface table by copying the
//! superclass's table and running the descriptor's `interface` function, and
//! publishes the result.
//!
//! Resolved classes are leaked and never deallocated:
//! - `Class` is a `Copy` handle to `'static` metadata
//! - Each descriptor resolves to exactly one `Class`
//! - Class metadata is immutable once published
//!
//! # Thread Safety
//!
//! Resolution may race from any number of threads. Each descriptor carries its
//! own lock; the first thread builds the class while the others wait and then
//! observe the published result. Locks are taken leaf to root along a single
//! superclass chain, so concurrent resolutions never wait on each other in a
//! cycle. The name index is a `parking_lot::RwLock` over an `FxHashMap`.

use crate::error::{Error, Result, fatal};
use crate::runtime::interface::{InterfaceBuilder, InterfaceTable, Slot, SlotInfo};
use crate::runtime::object::Object;
use crate::runtime::root::OBJECT;
use crate::runtime::sync::Lock;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use tracing::debug;

/// Declaration of a class.
///
/// All fields are plain data so that descriptors can be built in `static`
/// initializers:
///
/// ```rust
/// use oxrt::{ClassDef, ClassDescriptor, Object, OBJECT};
/// use std::alloc::Layout;
///
/// #[repr(C)]
/// struct Point {
///     object: Object,
///     x: f64,
///     y: f64,
/// }
///
/// static POINT: ClassDescriptor = ClassDescriptor::new(ClassDef {
///     name: "Point",
///     superclass: Some(&OBJECT),
///     instance: Layout::new::<Point>(),
///     interface: None,
///     dealloc: None,
/// });
/// ```
#[derive(Clone, Copy)]
pub struct ClassDef {
    /// Unique class name.
    pub name: &'static str,
    /// Superclass descriptor. Only the root `Object` class has none.
    pub superclass: Option<&'static ClassDescriptor>,
    /// Size and alignment of one instance, header included.
    pub instance: Layout,
    /// Populates the interface table. `None` inherits the superclass's table
    /// unchanged.
    ///
    /// Runs while the class is being resolved. It may use classes that are
    /// already resolved; resolving any other class from here fails with
    /// [`Error::ReentrantResolution`].
    pub interface: Option<fn(&mut InterfaceBuilder)>,
    /// Releases what this level's initializer acquired. Run leaf to root when
    /// an instance dies.
    pub dealloc: Option<fn(&mut Object)>,
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("superclass", &self.superclass.map(ClassDescriptor::name))
            .field("instance", &self.instance)
            .field("interface", &self.interface.is_some())
            .field("dealloc", &self.dealloc.is_some())
            .finish()
    }
}

/// A statically allocated class declaration and its resolution state.
///
/// Descriptors are compared by address; declare each class exactly once as a
/// `static` item.
pub struct ClassDescriptor {
    def: ClassDef,
    class: OnceLock<Class>,
    resolving: Lock<()>,
}

impl ClassDescriptor {
    /// Wraps a class declaration.
    #[must_use]
    pub const fn new(def: ClassDef) -> Self {
        ClassDescriptor {
            def,
            class: OnceLock::new(),
            resolving: Lock::new(()),
        }
    }

    /// Returns the declared class name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.def.name
    }

    /// Returns the class declaration.
    #[must_use]
    pub const fn def(&self) -> &ClassDef {
        &self.def
    }

    /// Returns the class if this descriptor has already been resolved.
    #[must_use]
    pub fn resolved(&self) -> Option<Class> {
        self.class.get().copied()
    }

    fn key(&'static self) -> usize {
        std::ptr::from_ref(self) as usize
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.def.name)
            .field("resolved", &self.class.get().is_some())
            .finish()
    }
}

/// Resolved class metadata. Leaked on publication, never freed.
pub(crate) struct ClassInner {
    name: &'static str,
    superclass: Option<Class>,
    descriptor: &'static ClassDescriptor,
    instance: Layout,
    depth: usize,
    interface: InterfaceTable,
}

/// Global name index of resolved classes.
struct ClassRegistry {
    classes: RwLock<FxHashMap<&'static str, Class>>,
}

static REGISTRY: OnceLock<ClassRegistry> = OnceLock::new();

fn registry() -> &'static ClassRegistry {
    REGISTRY.get_or_init(|| ClassRegistry {
        classes: RwLock::new(FxHashMap::default()),
    })
}

thread_local! {
    /// Set while this thread runs an `interface` function.
    static IN_INTERFACE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running an `interface` function until dropped.
struct InterfaceScope;

impl InterfaceScope {
    fn enter() -> Self {
        IN_INTERFACE.set(true);
        InterfaceScope
    }

    fn active() -> bool {
        IN_INTERFACE.get()
    }
}

impl Drop for InterfaceScope {
    fn drop(&mut self) {
        IN_INTERFACE.set(false);
    }
}

/// A resolved class.
///
/// `Class` is a cheap `Copy` handle. Two handles are equal exactly when they
/// refer to the same resolved descriptor.
#[derive(Clone, Copy)]
pub struct Class {
    pub(crate) inner: &'static ClassInner,
}

impl Class {
    /// Resolves `descriptor`, building the class on first use.
    ///
    /// Idempotent: every call for the same descriptor returns the same class.
    ///
    /// # Panics
    ///
    /// Configuration errors are fatal here. Use [`Class::try_resolve`] to
    /// inspect them instead.
    ///
    /// # Example
    ///
    /// ```rust
    /// use oxrt::{Class, OBJECT};
    ///
    /// let object = Class::resolve(&OBJECT);
    /// assert_eq!(object.name(), "Object");
    /// assert!(object.superclass().is_none());
    /// assert_eq!(Class::resolve(&OBJECT), object);
    /// ```
    #[must_use]
    pub fn resolve(descriptor: &'static ClassDescriptor) -> Class {
        match Self::try_resolve(descriptor) {
            Ok(class) => class,
            Err(err) => fatal(err),
        }
    }

    /// Resolves `descriptor`, reporting configuration errors.
    ///
    /// A descriptor that failed to resolve stays unresolved; the same error is
    /// reported again on the next attempt.
    ///
    /// # Errors
    ///
    /// - [`Error::InheritanceCycle`] if the descriptor reaches itself through
    ///   its superclass chain
    /// - [`Error::MissingRootAncestor`] if the chain ends at a descriptor other
    ///   than the root `Object` class
    /// - [`Error::InstanceTooSmall`] / [`Error::InstanceMisaligned`] for a
    ///   layout that cannot embed the superclass's instance
    /// - [`Error::ClassAlreadyExists`] if another descriptor took the name
    /// - [`Error::ReentrantResolution`] if called from an `interface` function
    ///   for a class that is not resolved yet
    /// - any slot layout error reported by the interface builder
    pub fn try_resolve(descriptor: &'static ClassDescriptor) -> Result<Class> {
        if let Some(class) = descriptor.class.get() {
            return Ok(*class);
        }

        // Interface functions run under a resolution lock and must never wait
        // on another one.
        if InterfaceScope::active() {
            return Err(Error::ReentrantResolution {
                class: descriptor.name(),
            });
        }

        check_chain(descriptor)?;
        let _resolving = descriptor.resolving.lock();

        // Lost the race: another thread published while we waited.
        if let Some(class) = descriptor.class.get() {
            return Ok(*class);
        }

        let superclass = match descriptor.def.superclass {
            Some(parent) => Some(Self::try_resolve(parent)?),
            None => None,
        };
        let class = build(descriptor, superclass)?;

        // The lock is held, so this descriptor is still empty.
        let _ = descriptor.class.set(class);
        Ok(class)
    }

    /// Returns the class name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Returns the superclass, `None` for the root class.
    #[must_use]
    pub fn superclass(&self) -> Option<Class> {
        self.inner.superclass
    }

    /// Returns the descriptor this class was resolved from.
    #[must_use]
    pub fn descriptor(&self) -> &'static ClassDescriptor {
        self.inner.descriptor
    }

    /// Returns the size in bytes of one instance, header included.
    #[must_use]
    pub fn instance_size(&self) -> usize {
        self.inner.instance.size()
    }

    /// Returns the layout of one instance.
    #[must_use]
    pub fn instance_layout(&self) -> Layout {
        self.inner.instance
    }

    /// Returns the number of superclasses between this class and the root.
    ///
    /// The root class has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Returns the class's interface table.
    #[must_use]
    pub fn interface(&self) -> &'static InterfaceTable {
        &self.inner.interface
    }

    /// Returns `true` if `self` is `other` or inherits from it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use oxrt::{Class, OBJECT};
    ///
    /// let object = Class::resolve(&OBJECT);
    /// assert!(object.is_subclass_of(object));
    /// ```
    #[must_use]
    pub fn is_subclass_of(&self, other: Class) -> bool {
        // Depth bounds the walk: an ancestor is never deeper than its subclass.
        let Some(steps) = self.depth().checked_sub(other.depth()) else {
            return false;
        };
        self.ancestors().nth(steps) == Some(other)
    }

    /// Iterates over this class and its superclasses, leaf first.
    pub fn ancestors(&self) -> Ancestors {
        Ancestors { next: Some(*self) }
    }

    /// Iterates over the interface table entries.
    pub fn slots(&self) -> impl Iterator<Item = SlotInfo> {
        self.inner.interface.slots()
    }

    /// Returns `true` if instances of this class implement `slot`.
    #[must_use]
    pub fn responds_to<F: Copy + 'static>(&self, slot: &Slot<F>) -> bool {
        self.inner.interface.lookup(slot).is_ok()
    }

    /// Returns the class that installed the current entry for `slot`.
    #[must_use]
    pub fn provider_of<F>(&self, slot: &Slot<F>) -> Option<Class> {
        let info = self.inner.interface.slot(slot.index())?;
        if info.name != slot.name() {
            return None;
        }
        self.ancestors().find(|class| class.name() == info.provider)
    }

    /// Returns the resolved classes whose direct superclass is this class.
    #[must_use]
    pub fn subclasses(&self) -> Vec<Class> {
        let mut subclasses: Vec<Class> = registry()
            .classes
            .read()
            .values()
            .filter(|class| class.superclass() == Some(*self))
            .copied()
            .collect();
        subclasses.sort_by_key(Class::name);
        subclasses
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner, other.inner)
    }
}

impl Eq for Class {}

impl Hash for Class {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.inner, state);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name())
            .field("superclass", &self.superclass().map(|class| class.name()))
            .field("instance_size", &self.instance_size())
            .field("slots", &self.inner.interface.len())
            .finish()
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Iterator over a class and its superclasses. See [`Class::ancestors`].
#[derive(Debug, Clone)]
pub struct Ancestors {
    next: Option<Class>,
}

impl Iterator for Ancestors {
    type Item = Class;

    fn next(&mut self) -> Option<Class> {
        let current = self.next?;
        self.next = current.superclass();
        Some(current)
    }
}

/// Resolves `descriptor`. Shorthand for [`Class::resolve`].
#[must_use]
pub fn resolve_class(descriptor: &'static ClassDescriptor) -> Class {
    Class::resolve(descriptor)
}

/// Looks up a resolved class by name.
///
/// Only classes that have been resolved are known to the registry.
///
/// # Example
///
/// ```rust
/// use oxrt::{Class, OBJECT, class_for_name};
///
/// let object = Class::resolve(&OBJECT);
/// assert_eq!(class_for_name("Object"), Some(object));
/// assert_eq!(class_for_name("NoSuchClass"), None);
/// ```
#[must_use]
pub fn class_for_name(name: &str) -> Option<Class> {
    registry().classes.read().get(name).copied()
}

/// Returns every resolved class, sorted by name.
#[must_use]
pub fn all_classes() -> Vec<Class> {
    let mut classes: Vec<Class> = registry().classes.read().values().copied().collect();
    classes.sort_by_key(Class::name);
    classes
}

/// Walks the static superclass chain before any lock is taken.
fn check_chain(descriptor: &'static ClassDescriptor) -> Result<()> {
    let mut seen = Vec::new();
    let mut current = descriptor;

    loop {
        if seen.contains(&current.key()) {
            return Err(Error::InheritanceCycle {
                class: descriptor.name(),
            });
        }
        seen.push(current.key());

        match current.def.superclass {
            Some(parent) => current = parent,
            None if std::ptr::eq(current, &OBJECT) => return Ok(()),
            None => {
                return Err(Error::MissingRootAncestor {
                    class: current.name(),
                });
            }
        }
    }
}

fn check_layout(def: &ClassDef, superclass: Option<Class>) -> Result<()> {
    let (parent, required) = match superclass {
        Some(parent) => (parent.name(), parent.instance_layout()),
        None => ("object header", Layout::new::<Object>()),
    };

    if def.instance.size() < required.size() {
        return Err(Error::InstanceTooSmall {
            class: def.name,
            size: def.instance.size(),
            superclass: parent,
            required: required.size(),
        });
    }
    if def.instance.align() < required.align() {
        return Err(Error::InstanceMisaligned {
            class: def.name,
            align: def.instance.align(),
            required: required.align(),
        });
    }
    Ok(())
}

fn build(descriptor: &'static ClassDescriptor, superclass: Option<Class>) -> Result<Class> {
    let def = &descriptor.def;
    check_layout(def, superclass)?;

    if class_for_name(def.name).is_some() {
        return Err(Error::ClassAlreadyExists { name: def.name });
    }

    let mut builder =
        InterfaceBuilder::inherit(def.name, superclass.map(|parent| parent.interface()));
    if let Some(interface) = def.interface {
        let _scope = InterfaceScope::enter();
        interface(&mut builder);
    }
    let interface = builder.finish()?;

    let mut classes = registry().classes.write();
    // Checked again under the write lock: another descriptor may have taken
    // the name while the interface was being built.
    if classes.contains_key(def.name) {
        return Err(Error::ClassAlreadyExists { name: def.name });
    }

    let inner: &'static ClassInner = Box::leak(Box::new(ClassInner {
        name: def.name,
        superclass,
        descriptor,
        instance: def.instance,
        depth: superclass.map_or(0, |parent| parent.depth() + 1),
        interface,
    }));
    let class = Class { inner };
    classes.insert(def.name, class);
    drop(classes);

    debug!(
        class = class.name(),
        superclass = superclass.map(|parent| parent.name()),
        instance_size = class.instance_size(),
        slots = class.interface().len(),
        "resolved class"
    );

    Ok(class)
}
