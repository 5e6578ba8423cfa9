//! Interface tables and typed slots for the `OxRT` runtime.
//!
//! Every class owns one [`InterfaceTable`]: an indexed array of method
//! implementations. A subclass's table starts as a copy of its superclass's
//! table, so slot `i` means the same operation at every level of a hierarchy.
//! Overriding replaces the entry at an existing index, new operations are
//! appended after the inherited ones.
//!
//! # Typed slots
//!
//! Slots are named by [`Slot`] constants that carry the index, a name and the
//! implementation's function signature as a type parameter:
//!
//! ```rust
//! use oxrt::{Object, Slot};
//!
//! const AREA: Slot<fn(&Object) -> f64> = Slot::new(Object::SLOT_COUNT, "area");
//! assert_eq!(AREA.index(), 4);
//! ```
//!
//! Lookups index the table directly and then check the stored function's type,
//! so a call costs one bounds check, one name check and one `TypeId` compare,
//! independent of how deep the receiver's class sits in the hierarchy.
//!
//! # Thread Safety
//!
//! Tables are built once during class resolution and never mutated afterwards.
//! Entries hold `Send + Sync` function pointers, so tables are shared freely.

use crate::error::{Error, Result};
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed index into an interface table.
///
/// `F` is the implementation's function pointer type, for example
/// `fn(&Object) -> String`. Slot constants are declared next to the class that
/// introduces the operation and shared by all of its subclasses.
pub struct Slot<F> {
    index: usize,
    name: &'static str,
    _signature: PhantomData<fn() -> F>,
}

impl<F> Slot<F> {
    /// Creates a slot constant at `index`.
    ///
    /// The index of a class's first new slot is its superclass's slot count;
    /// the runtime rejects slot constants that disagree with the table layout
    /// when the class is resolved.
    #[must_use]
    pub const fn new(index: usize, name: &'static str) -> Self {
        Slot {
            index,
            name,
            _signature: PhantomData,
        }
    }

    /// Returns the slot's position in the table.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Returns the slot's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<F> Clone for Slot<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for Slot<F> {}

impl<F> fmt::Debug for Slot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("signature", &type_name::<F>())
            .finish()
    }
}

/// Public view of one table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// Position in the table.
    pub index: usize,
    /// Slot name.
    pub name: &'static str,
    /// Rust type name of the implementation signature.
    pub signature: &'static str,
    /// Class that installed the current entry.
    pub provider: &'static str,
    /// `false` when the entry is explicitly unimplemented.
    pub implemented: bool,
}

type Implementation = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct Entry {
    name: &'static str,
    signature: TypeId,
    signature_name: &'static str,
    provider: &'static str,
    implementation: Option<Implementation>,
}

impl Entry {
    fn info(&self, index: usize) -> SlotInfo {
        SlotInfo {
            index,
            name: self.name,
            signature: self.signature_name,
            provider: self.provider,
            implemented: self.implementation.is_some(),
        }
    }

    fn is<F: 'static>(&self, slot: &Slot<F>) -> bool {
        std::ptr::eq(self.name, slot.name) || self.name == slot.name
    }
}

/// The immutable method table of one class.
pub struct InterfaceTable {
    class: &'static str,
    entries: Box<[Entry]>,
}

impl InterfaceTable {
    /// Returns the name of the class owning this table.
    #[must_use]
    pub fn class_name(&self) -> &'static str {
        self.class
    }

    /// Returns the number of slots, inherited ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the implementation stored for `slot`.
    ///
    /// # Errors
    ///
    /// - [`Error::NoSuchSlot`] if the table has no slot of that name at that
    ///   index (the receiver is not a kind of the slot's declaring class)
    /// - [`Error::Unimplemented`] if the entry is explicitly unimplemented
    /// - [`Error::SlotSignatureMismatch`] if `F` is not the stored signature
    pub fn lookup<F: Copy + 'static>(&self, slot: &Slot<F>) -> Result<F> {
        let entry = self
            .entries
            .get(slot.index)
            .filter(|entry| entry.is(slot))
            .ok_or(Error::NoSuchSlot {
                class: self.class,
                slot: slot.name,
                index: slot.index,
            })?;

        let implementation = entry.implementation.as_ref().ok_or(Error::Unimplemented {
            class: self.class,
            slot: entry.name,
        })?;

        implementation
            .downcast_ref::<F>()
            .copied()
            .ok_or(Error::SlotSignatureMismatch {
                class: self.class,
                slot: entry.name,
                expected: entry.signature_name,
                found: type_name::<F>(),
            })
    }

    /// Returns the entry at `index`.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<SlotInfo> {
        self.entries.get(index).map(|entry| entry.info(index))
    }

    /// Iterates over all entries in index order.
    pub fn slots(&self) -> impl Iterator<Item = SlotInfo> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| entry.info(index))
    }
}

impl fmt::Debug for InterfaceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceTable")
            .field("class", &self.class)
            .field("slots", &self.slots().collect::<Vec<_>>())
            .finish()
    }
}

/// Builds a class's interface table during resolution.
///
/// The builder is handed to the descriptor's `interface` function with the
/// superclass's entries already copied in. Calls chain:
///
/// ```rust
/// # use oxrt::{InterfaceBuilder, Object, Slot};
/// const AREA: Slot<fn(&Object) -> f64> = Slot::new(Object::SLOT_COUNT, "area");
///
/// fn describe_shape(_this: &Object) -> String {
///     "shape".to_owned()
/// }
///
/// fn shape_interface(interface: &mut InterfaceBuilder) {
///     interface
///         .implement(&Object::DESCRIBE, describe_shape)
///         .declare_abstract(&AREA);
/// }
/// # let _ = shape_interface;
/// ```
///
/// The first inconsistency is remembered and fails the resolution with a
/// configuration error; later calls are still accepted so the interface
/// function can stay straight-line code.
pub struct InterfaceBuilder {
    class: &'static str,
    entries: Vec<Entry>,
    error: Option<Error>,
}

impl InterfaceBuilder {
    pub(crate) fn inherit(class: &'static str, parent: Option<&InterfaceTable>) -> Self {
        InterfaceBuilder {
            class,
            entries: parent
                .map(|table| table.entries.to_vec())
                .unwrap_or_default(),
            error: None,
        }
    }

    /// Returns the name of the class being built.
    #[must_use]
    pub fn class_name(&self) -> &'static str {
        self.class
    }

    /// Returns the current number of slots.
    ///
    /// This is the index the next [`declare`](Self::declare) must use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no slot has been inherited or declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overrides an inherited slot with `implementation`.
    pub fn implement<F>(&mut self, slot: &Slot<F>, implementation: F) -> &mut Self
    where
        F: Copy + Send + Sync + 'static,
    {
        if let Some(index) = self.existing(slot) {
            self.entries[index].implementation = Some(Arc::new(implementation));
            self.entries[index].provider = self.class;
        }
        self
    }

    /// Marks an inherited slot as unimplemented for this class and its
    /// subclasses. Calling it afterwards is a contract violation until a
    /// subclass implements it again.
    pub fn unimplement<F: 'static>(&mut self, slot: &Slot<F>) -> &mut Self {
        if let Some(index) = self.existing(slot) {
            self.entries[index].implementation = None;
            self.entries[index].provider = self.class;
        }
        self
    }

    /// Appends a new slot implemented by `implementation`.
    pub fn declare<F>(&mut self, slot: &Slot<F>, implementation: F) -> &mut Self
    where
        F: Copy + Send + Sync + 'static,
    {
        self.append(slot, Some(Arc::new(implementation)));
        self
    }

    /// Appends a new slot without an implementation.
    ///
    /// Subclasses are expected to [`implement`](Self::implement) it.
    pub fn declare_abstract<F: 'static>(&mut self, slot: &Slot<F>) -> &mut Self {
        self.append(slot, None);
        self
    }

    pub(crate) fn finish(self) -> Result<InterfaceTable> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(InterfaceTable {
                class: self.class,
                entries: self.entries.into_boxed_slice(),
            }),
        }
    }

    fn existing<F: 'static>(&mut self, slot: &Slot<F>) -> Option<usize> {
        let Some(entry) = self.entries.get(slot.index) else {
            self.unknown(slot);
            return None;
        };

        if !entry.is(slot) {
            self.unknown(slot);
            return None;
        }

        if entry.signature != TypeId::of::<F>() {
            let err = Error::SlotSignatureMismatch {
                class: self.class,
                slot: slot.name,
                expected: entry.signature_name,
                found: type_name::<F>(),
            };
            self.record(err);
            return None;
        }

        Some(slot.index)
    }

    fn append<F: 'static>(&mut self, slot: &Slot<F>, implementation: Option<Implementation>) {
        let expected = self
            .entries
            .iter()
            .position(|entry| entry.is(slot))
            .unwrap_or(self.entries.len());

        if slot.index != self.entries.len() || expected != self.entries.len() {
            let err = Error::SlotLayoutMismatch {
                class: self.class,
                slot: slot.name,
                expected,
                index: slot.index,
            };
            self.record(err);
            return;
        }

        self.entries.push(Entry {
            name: slot.name,
            signature: TypeId::of::<F>(),
            signature_name: type_name::<F>(),
            provider: self.class,
            implementation,
        });
    }

    fn unknown<F>(&mut self, slot: &Slot<F>) {
        let declared = self
            .entries
            .iter()
            .position(|entry| entry.name == slot.name);
        let err = match declared {
            Some(expected) => Error::SlotLayoutMismatch {
                class: self.class,
                slot: slot.name,
                expected,
                index: slot.index,
            },
            None => Error::UnknownSlot {
                class: self.class,
                slot: slot.name,
                index: slot.index,
            },
        };
        self.record(err);
    }

    fn record(&mut self, err: Error) {
        self.error.get_or_insert(err);
    }
}

impl fmt::Debug for InterfaceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceBuilder")
            .field("class", &self.class)
            .field("len", &self.entries.len())
            .field("error", &self.error)
            .finish()
    }
}
