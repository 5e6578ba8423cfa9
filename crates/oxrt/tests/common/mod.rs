// Common test fixtures for integration tests
//
// This module declares a small class hierarchy shared by the integration
// tests:
//
//   Object
//   ├── Counter
//   ├── Shape            (abstract `area`)
//   │   ├── Circle
//   │   └── Square
//   ├── Tracked
//   │   └── TrackedChild
//   │       └── TrackedLeaf
//   ├── Buffer
//   └── Account

#![allow(dead_code)]

use oxrt::{
    ClassDef, ClassDescriptor, Id, Initializer, Instance, InterfaceBuilder, Lock, OBJECT, Object,
    Result, Slot, allocate, fatal,
};
use std::alloc::Layout;
use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

// ============================================================================
// Counter
// ============================================================================

/// Instance of `Counter`: the header plus one 8 byte field.
#[repr(C)]
pub struct Counter {
    object: Object,
    value: AtomicI64,
}

pub const COUNTER_VALUE: Slot<fn(&Object) -> i64> = Slot::new(Object::SLOT_COUNT, "value");
pub const COUNTER_ADD: Slot<fn(&Object, i64) -> i64> = Slot::new(Object::SLOT_COUNT + 1, "add");

fn counter_value(this: &Object) -> i64 {
    this.cast::<Counter>().value.load(Ordering::SeqCst)
}

fn counter_add(this: &Object, delta: i64) -> i64 {
    let counter = this.cast::<Counter>();
    counter.value.fetch_add(delta, Ordering::SeqCst) + delta
}

fn counter_describe(this: &Object) -> String {
    format!("Counter({})", counter_value(this))
}

fn counter_interface(interface: &mut InterfaceBuilder) {
    interface
        .implement(&Object::DESCRIBE, counter_describe)
        .declare(&COUNTER_VALUE, counter_value)
        .declare(&COUNTER_ADD, counter_add);
}

pub static COUNTER: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "Counter",
    superclass: Some(&OBJECT),
    instance: Layout::new::<Counter>(),
    interface: Some(counter_interface),
    dealloc: None,
});

unsafe impl Instance for Counter {
    fn descriptor() -> &'static ClassDescriptor {
        &COUNTER
    }
}

impl Counter {
    pub fn new(start: i64) -> Result<Id<Counter>> {
        allocate::<Counter>()?.initialize(|init| {
            init.init_super(Object::init)?;
            *init.this().value.get_mut() = start;
            Ok(())
        })
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Shape, Circle, Square
// ============================================================================

#[repr(C)]
pub struct Shape {
    object: Object,
}

pub const SHAPE_AREA: Slot<fn(&Object) -> f64> = Slot::new(Object::SLOT_COUNT, "area");

fn shape_interface(interface: &mut InterfaceBuilder) {
    interface.declare_abstract(&SHAPE_AREA);
}

pub static SHAPE: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "Shape",
    superclass: Some(&OBJECT),
    instance: Layout::new::<Shape>(),
    interface: Some(shape_interface),
    dealloc: None,
});

unsafe impl Instance for Shape {
    fn descriptor() -> &'static ClassDescriptor {
        &SHAPE
    }
}

impl Shape {
    pub fn init(init: &mut Initializer<'_, Shape>) -> Result<()> {
        init.init_super(Object::init)
    }

    /// Creates a bare `Shape`, whose `area` is unimplemented.
    pub fn new() -> Result<Id<Shape>> {
        allocate::<Shape>()?.initialize(Shape::init)
    }
}

#[repr(C)]
pub struct Circle {
    shape: Shape,
    radius: f64,
}

fn circle_area(this: &Object) -> f64 {
    let radius = this.cast::<Circle>().radius;
    PI * radius * radius
}

fn circle_describe(this: &Object) -> String {
    format!("Circle(r={})", this.cast::<Circle>().radius)
}

fn circle_is_equal(this: &Object, other: &Object) -> bool {
    other
        .downcast_ref::<Circle>()
        .is_some_and(|other| other.radius == this.cast::<Circle>().radius)
}

fn circle_hash(this: &Object) -> u64 {
    this.cast::<Circle>().radius.to_bits()
}

fn circle_copy(this: &Object) -> Id<Object> {
    match Circle::new(this.cast::<Circle>().radius) {
        Ok(circle) => Id::upcast(circle),
        Err(err) => fatal(err),
    }
}

fn circle_interface(interface: &mut InterfaceBuilder) {
    interface
        .implement(&SHAPE_AREA, circle_area)
        .implement(&Object::DESCRIBE, circle_describe)
        .implement(&Object::IS_EQUAL, circle_is_equal)
        .implement(&Object::HASH, circle_hash)
        .implement(&Object::COPY, circle_copy);
}

pub static CIRCLE: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "Circle",
    superclass: Some(&SHAPE),
    instance: Layout::new::<Circle>(),
    interface: Some(circle_interface),
    dealloc: None,
});

unsafe impl Instance for Circle {
    fn descriptor() -> &'static ClassDescriptor {
        &CIRCLE
    }
}

impl Circle {
    pub fn new(radius: f64) -> Result<Id<Circle>> {
        allocate::<Circle>()?.initialize(|init| {
            init.init_super(Shape::init)?;
            if radius.is_nan() || radius < 0.0 {
                return Err(init.fail("radius must be a non-negative number"));
            }
            init.this().radius = radius;
            Ok(())
        })
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

#[repr(C)]
pub struct Square {
    shape: Shape,
    side: f64,
}

fn square_area(this: &Object) -> f64 {
    let side = this.cast::<Square>().side;
    side * side
}

fn square_interface(interface: &mut InterfaceBuilder) {
    interface.implement(&SHAPE_AREA, square_area);
}

pub static SQUARE: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "Square",
    superclass: Some(&SHAPE),
    instance: Layout::new::<Square>(),
    interface: Some(square_interface),
    dealloc: None,
});

unsafe impl Instance for Square {
    fn descriptor() -> &'static ClassDescriptor {
        &SQUARE
    }
}

impl Square {
    pub fn new(side: f64) -> Result<Id<Square>> {
        allocate::<Square>()?.initialize(|init| {
            init.init_super(Shape::init)?;
            init.this().side = side;
            Ok(())
        })
    }
}

// ============================================================================
// Tracked hierarchy: records every dealloc call
// ============================================================================

/// `(tag, level)` for every dealloc call made on a tracked instance.
pub static DEALLOC_LOG: Lock<Vec<(u64, &'static str)>> = Lock::new(Vec::new());

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

/// Returns a tag no other tracked instance uses.
pub fn next_tag() -> u64 {
    NEXT_TAG.fetch_add(1, Ordering::Relaxed)
}

/// Returns the levels deallocated for `tag`, in call order.
pub fn deallocs_for(tag: u64) -> Vec<&'static str> {
    DEALLOC_LOG
        .lock()
        .iter()
        .filter(|(at, _)| *at == tag)
        .map(|(_, level)| *level)
        .collect()
}

fn record(object: &Object, level: &'static str) {
    let tag = object.cast::<Tracked>().tag;
    DEALLOC_LOG.lock().push((tag, level));
}

/// Level whose initializer rejects the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Nowhere,
    Tracked,
    Child,
    Leaf,
}

#[repr(C)]
pub struct Tracked {
    object: Object,
    tag: u64,
}

#[repr(C)]
pub struct TrackedChild {
    tracked: Tracked,
    child_ready: bool,
}

#[repr(C)]
pub struct TrackedLeaf {
    child: TrackedChild,
    leaf_ready: bool,
}

fn tracked_dealloc(object: &mut Object) {
    record(object, "Tracked");
}

fn tracked_child_dealloc(object: &mut Object) {
    record(object, "TrackedChild");
}

fn tracked_leaf_dealloc(object: &mut Object) {
    record(object, "TrackedLeaf");
}

pub static TRACKED: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "Tracked",
    superclass: Some(&OBJECT),
    instance: Layout::new::<Tracked>(),
    interface: None,
    dealloc: Some(tracked_dealloc),
});

pub static TRACKED_CHILD: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "TrackedChild",
    superclass: Some(&TRACKED),
    instance: Layout::new::<TrackedChild>(),
    interface: None,
    dealloc: Some(tracked_child_dealloc),
});

pub static TRACKED_LEAF: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "TrackedLeaf",
    superclass: Some(&TRACKED_CHILD),
    instance: Layout::new::<TrackedLeaf>(),
    interface: None,
    dealloc: Some(tracked_leaf_dealloc),
});

unsafe impl Instance for Tracked {
    fn descriptor() -> &'static ClassDescriptor {
        &TRACKED
    }
}

unsafe impl Instance for TrackedChild {
    fn descriptor() -> &'static ClassDescriptor {
        &TRACKED_CHILD
    }
}

unsafe impl Instance for TrackedLeaf {
    fn descriptor() -> &'static ClassDescriptor {
        &TRACKED_LEAF
    }
}

impl Tracked {
    fn init(init: &mut Initializer<'_, Tracked>, tag: u64, fail: FailAt) -> Result<()> {
        init.init_super(Object::init)?;
        // Set before failing so the instance stays identifiable.
        init.this().tag = tag;
        if fail == FailAt::Tracked {
            return Err(init.fail("tracked level rejected"));
        }
        Ok(())
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }
}

impl TrackedChild {
    fn init(init: &mut Initializer<'_, TrackedChild>, tag: u64, fail: FailAt) -> Result<()> {
        init.init_super(|tracked: &mut Initializer<'_, Tracked>| {
            Tracked::init(tracked, tag, fail)
        })?;
        if fail == FailAt::Child {
            return Err(init.fail("child level rejected"));
        }
        init.this().child_ready = true;
        Ok(())
    }

    pub fn new(fail: FailAt) -> (u64, Result<Id<TrackedChild>>) {
        let tag = next_tag();
        let result = allocate::<TrackedChild>()
            .and_then(|allocation| allocation.initialize(|init| Self::init(init, tag, fail)));
        (tag, result)
    }
}

impl TrackedLeaf {
    pub fn new(fail: FailAt) -> (u64, Result<Id<TrackedLeaf>>) {
        let tag = next_tag();
        let result = allocate::<TrackedLeaf>().and_then(|allocation| {
            allocation.initialize(|init| {
                init.init_super(|child: &mut Initializer<'_, TrackedChild>| {
                    TrackedChild::init(child, tag, fail)
                })?;
                if fail == FailAt::Leaf {
                    return Err(init.fail("leaf level rejected"));
                }
                init.this().leaf_ready = true;
                Ok(())
            })
        });
        (tag, result)
    }

    pub fn is_ready(&self) -> bool {
        self.leaf_ready && self.child.child_ready
    }

    pub fn tag(&self) -> u64 {
        self.child.tracked.tag
    }
}

// ============================================================================
// Buffer: owns heap data released by its dealloc function
// ============================================================================

#[repr(C)]
pub struct Buffer {
    object: Object,
    data: Option<Arc<Vec<u8>>>,
}

fn buffer_dealloc(object: &mut Object) {
    object.cast_mut::<Buffer>().data = None;
}

fn buffer_is_equal(this: &Object, other: &Object) -> bool {
    other
        .downcast_ref::<Buffer>()
        .is_some_and(|other| other.bytes() == this.cast::<Buffer>().bytes())
}

fn buffer_hash(this: &Object) -> u64 {
    fxhash::hash64(this.cast::<Buffer>().bytes())
}

fn buffer_copy(this: &Object) -> Id<Object> {
    let bytes = this.cast::<Buffer>().bytes().to_vec();
    match Buffer::new(Arc::new(bytes)) {
        Ok(buffer) => Id::upcast(buffer),
        Err(err) => fatal(err),
    }
}

fn buffer_interface(interface: &mut InterfaceBuilder) {
    interface
        .implement(&Object::IS_EQUAL, buffer_is_equal)
        .implement(&Object::HASH, buffer_hash)
        .implement(&Object::COPY, buffer_copy);
}

pub static BUFFER: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "Buffer",
    superclass: Some(&OBJECT),
    instance: Layout::new::<Buffer>(),
    interface: Some(buffer_interface),
    dealloc: Some(buffer_dealloc),
});

unsafe impl Instance for Buffer {
    fn descriptor() -> &'static ClassDescriptor {
        &BUFFER
    }
}

impl Buffer {
    pub fn new(data: Arc<Vec<u8>>) -> Result<Id<Buffer>> {
        allocate::<Buffer>()?.initialize(|init| {
            init.init_super(Object::init)?;
            init.this().data = Some(data);
            Ok(())
        })
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().map(Vec::as_slice).unwrap_or_default()
    }
}

// ============================================================================
// Account: mutable state behind a lock
// ============================================================================

#[repr(C)]
pub struct Account {
    object: Object,
    balance: Lock<i64>,
}

pub static ACCOUNT: ClassDescriptor = ClassDescriptor::new(ClassDef {
    name: "Account",
    superclass: Some(&OBJECT),
    instance: Layout::new::<Account>(),
    interface: None,
    dealloc: None,
});

unsafe impl Instance for Account {
    fn descriptor() -> &'static ClassDescriptor {
        &ACCOUNT
    }
}

impl Account {
    pub fn new(opening: i64) -> Result<Id<Account>> {
        allocate::<Account>()?.initialize(|init| {
            init.init_super(Object::init)?;
            *init.this().balance.lock() = opening;
            Ok(())
        })
    }

    pub fn deposit(&self, amount: i64) {
        self.balance.synchronized(|balance| *balance += amount);
    }

    pub fn balance(&self) -> i64 {
        *self.balance.lock()
    }
}
