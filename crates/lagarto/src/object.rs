//! The hybrid object: dense integer-indexed elements plus a 16-ary,
//! depth-4 trie over interned-key nibbles.
//!
//! Both halves of the property map live in one `slots` array: interior
//! trie nodes are 16-entry dispatch vectors of slot indices, leaves hold a
//! property. Slot 0 is the universal undefined leaf, slot 1 the root node,
//! and an edge of 0 means "absent". Deleting a member zeroes its edge and
//! leaves the orphaned leaf for [`Obj::pack`] to reclaim.
//!
//! Environments are ordinary objects whose prototype is the lexical
//! parent scope, which is why the prototype-chain lookup below doubles as
//! the scope-chain lookup.

use std::rc::Rc;

use crate::{
    chars,
    context::Context,
    engine::Engine,
    exception::ErrorKind,
    heap::{Heap, HeapId},
    interp::{self, NativeFn},
    key::{Key, KeyTable},
    op::FunctionTemplate,
    text::Text,
    value::{Place, PropFlags, SlotRef, Value},
    Run,
};

/// Largest index the dense element store accepts; larger indices fall back
/// to interned decimal keys.
pub(crate) const ELEMENT_MAX: u32 = 0xff_ffff;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct ObjFlags: u8 {
        /// Extensions forbidden (`Object.preventExtensions` and friends).
        const SEALED = 0x01;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct FuncFlags: u8 {
        /// The environment must survive the call (closures capture it).
        const NEED_HEAP = 0x01;
        /// The body references `arguments`.
        const NEED_ARGUMENTS = 0x02;
        /// Calls ignore the provided `this` in favour of `bound_this`.
        const USE_BOUND_THIS = 0x04;
        const STRICT = 0x08;
    }
}

/// One property: the value plus its attributes, and — when it occupies a
/// hashmap leaf — the key it was filed under.
#[derive(Debug, Clone)]
pub(crate) struct Property {
    pub value: Value,
    pub key: Key,
    pub flags: PropFlags,
}

impl Property {
    pub(crate) fn new(value: Value, key: Key, flags: PropFlags) -> Self {
        Self { value, key, flags }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Interior trie node: one slot index per nibble.
    Node([u16; 16]),
    /// A live property.
    Leaf(Property),
    /// A deleted leaf awaiting [`Obj::pack`].
    Free,
}

/// What a heap object is, beyond its property storage.
#[derive(Debug, Clone, Default)]
pub(crate) enum ObjectKind {
    #[default]
    Plain,
    Global,
    Array,
    Arguments,
    Math,
    Json,
    String(Box<str>),
    Number(f64),
    Boolean(bool),
    Date(f64),
    Error(ErrorData),
    Regexp(RegexpData),
    Function(Box<FunctionData>),
    Host,
}

#[derive(Debug, Clone)]
pub(crate) struct ErrorData {
    pub kind: ErrorKind,
    /// Source span the error was raised from, for diagnostics.
    pub text: Text,
}

#[derive(Debug, Clone)]
pub(crate) struct RegexpData {
    pub program: Rc<fancy_regex::Regex>,
    pub source: Box<str>,
    pub global: bool,
    pub ignore_case: bool,
    pub multiline: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum FunctionBody {
    Template(Rc<FunctionTemplate>),
    Native(NativeFn),
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionData {
    pub body: FunctionBody,
    /// The lexical environment instantiated calls chain to.
    pub environment: HeapId,
    /// Captured `with` object, when the closure was made inside one.
    pub ref_object: Option<HeapId>,
    /// Accessor twin, or the target of a bound function.
    pub pair: Option<HeapId>,
    pub bound_this: Option<Value>,
    /// Arguments prepended by `bind`.
    pub bound_arguments: Vec<Value>,
    pub flags: FuncFlags,
    pub parameter_count: u32,
    pub name: Option<Key>,
    pub text: Text,
}

impl ObjectKind {
    /// The `[[Class]]` name used by `Object.prototype.toString`.
    pub(crate) fn class_name(&self) -> &'static str {
        match self {
            ObjectKind::Plain | ObjectKind::Host => "Object",
            ObjectKind::Global => "global",
            ObjectKind::Array => "Array",
            ObjectKind::Arguments => "Arguments",
            ObjectKind::Math => "Math",
            ObjectKind::Json => "JSON",
            ObjectKind::String(_) => "String",
            ObjectKind::Number(_) => "Number",
            ObjectKind::Boolean(_) => "Boolean",
            ObjectKind::Date(_) => "Date",
            ObjectKind::Error(_) => "Error",
            ObjectKind::Regexp(_) => "RegExp",
            ObjectKind::Function(_) => "Function",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Obj {
    pub prototype: Option<HeapId>,
    pub kind: ObjectKind,
    pub flags: ObjFlags,
    /// Trie nodes and property leaves; see the module comment.
    pub slots: Vec<Slot>,
    /// Dense element storage. Holes are `None`.
    pub elements: Vec<Option<Property>>,
    /// Logical element count; may exceed `elements.len()` when a script
    /// forces a length past `ELEMENT_MAX`.
    pub element_count: u32,
}

impl Obj {
    pub(crate) fn new(prototype: Option<HeapId>) -> Self {
        Self::with_kind(ObjectKind::Plain, prototype)
    }

    pub(crate) fn with_kind(kind: ObjectKind, prototype: Option<HeapId>) -> Self {
        Self {
            prototype,
            kind,
            flags: ObjFlags::empty(),
            slots: vec![
                Slot::Leaf(Property::new(Value::Undefined, Key::NONE, PropFlags::empty())),
                Slot::Node([0; 16]),
            ],
            elements: Vec::new(),
            element_count: 0,
        }
    }

    pub(crate) fn function_data(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn function_data_mut(&mut self) -> Option<&mut FunctionData> {
        match &mut self.kind {
            ObjectKind::Function(data) => Some(data),
            _ => None,
        }
    }

    /// Descends the trie; 0 when any edge on the path is absent.
    pub(crate) fn get_slot(&self, key: Key) -> u16 {
        let nibbles = key.nibbles();
        let mut slot = 1usize;
        for nibble in nibbles {
            let Slot::Node(edges) = &self.slots[slot] else {
                return 0;
            };
            let next = edges[nibble];
            if next == 0 {
                return 0;
            }
            slot = next as usize;
        }
        slot as u16
    }

    pub(crate) fn leaf(&self, slot: u16) -> Option<&Property> {
        match self.slots.get(slot as usize) {
            Some(Slot::Leaf(property)) => Some(property),
            _ => None,
        }
    }

    pub(crate) fn leaf_mut(&mut self, slot: u16) -> Option<&mut Property> {
        match self.slots.get_mut(slot as usize) {
            Some(Slot::Leaf(property)) => Some(property),
            _ => None,
        }
    }

    /// Inserts or overwrites a member, allocating the missing tail of the
    /// trie path. Returns the leaf slot index.
    pub(crate) fn add_member(&mut self, key: Key, value: Value, flags: PropFlags) -> u16 {
        debug_assert!(!key.is_none());
        let nibbles = key.nibbles();
        let mut slot = 1usize;
        let mut depth = 0usize;

        while depth < 4 {
            let Slot::Node(edges) = &self.slots[slot] else {
                unreachable!("trie interior expected on a partial path")
            };
            let next = edges[nibbles[depth]] as usize;
            if next != 0 {
                slot = next;
                depth += 1;
                continue;
            }
            // Allocate the remaining interior nodes plus the leaf.
            while depth < 4 {
                if self.slots.len() >= u16::MAX as usize {
                    panic!("object hashmap exhausted");
                }
                let new_index = self.slots.len() as u16;
                let Slot::Node(edges) = &mut self.slots[slot] else {
                    unreachable!("trie interior expected while extending")
                };
                edges[nibbles[depth]] = new_index;
                self.slots.push(if depth == 3 {
                    Slot::Leaf(Property::new(Value::Undefined, key, PropFlags::empty()))
                } else {
                    Slot::Node([0; 16])
                });
                slot = new_index as usize;
                depth += 1;
            }
            break;
        }

        self.slots[slot] = Slot::Leaf(Property::new(value, key, flags));
        slot as u16
    }

    /// Clears a member. Fails (false) on sealed slots; absent members
    /// delete successfully per ES5.
    pub(crate) fn delete_member(&mut self, key: Key) -> bool {
        let nibbles = key.nibbles();
        let mut slot = 1usize;
        for nibble in &nibbles[..3] {
            let Slot::Node(edges) = &self.slots[slot] else {
                return true;
            };
            let next = edges[*nibble] as usize;
            if next == 0 {
                return true;
            }
            slot = next;
        }
        let parent = slot;
        let Slot::Node(edges) = &self.slots[parent] else {
            return true;
        };
        let leaf = edges[nibbles[3]] as usize;
        if leaf == 0 {
            return true;
        }
        if let Slot::Leaf(property) = &self.slots[leaf] {
            if property.flags.contains(PropFlags::SEALED) {
                return false;
            }
            self.slots[leaf] = Slot::Free;
        }
        let Slot::Node(edges) = &mut self.slots[parent] else {
            unreachable!("leaf parent is interior")
        };
        edges[nibbles[3]] = 0;
        true
    }

    pub(crate) fn delete_element(&mut self, index: u32) -> bool {
        if let Some(slot) = self.elements.get_mut(index as usize) {
            if let Some(property) = slot
                && property.flags.contains(PropFlags::SEALED)
            {
                return false;
            }
            *slot = None;
        }
        true
    }

    /// Compacts the hashmap: live leaves move to the front (slots 2…) in
    /// creation order and the trie is rebuilt after them. Every live key
    /// resolves to the same property afterwards.
    pub(crate) fn pack(&mut self) {
        let leaves: Vec<Property> = self.slots[2..]
            .iter()
            .filter_map(|slot| match slot {
                Slot::Leaf(property) => Some(property.clone()),
                _ => None,
            })
            .collect();

        self.slots.truncate(1);
        self.slots.push(Slot::Node([0; 16]));
        for property in &leaves {
            self.slots.push(Slot::Leaf(property.clone()));
        }

        // Rebuild interior nodes after the leaf block.
        for (position, property) in leaves.iter().enumerate() {
            let leaf_index = (2 + position) as u16;
            let nibbles = property.key.nibbles();
            let mut slot = 1usize;
            for nibble in &nibbles[..3] {
                let next = {
                    let Slot::Node(edges) = &self.slots[slot] else {
                        unreachable!("pack rebuilds interiors only")
                    };
                    edges[*nibble] as usize
                };
                slot = if next == 0 {
                    let new_index = self.slots.len();
                    self.slots.push(Slot::Node([0; 16]));
                    let Slot::Node(edges) = &mut self.slots[slot] else {
                        unreachable!("pack rebuilds interiors only")
                    };
                    edges[*nibble] = new_index as u16;
                    new_index
                } else {
                    next
                };
            }
            let Slot::Node(edges) = &mut self.slots[slot] else {
                unreachable!("pack rebuilds interiors only")
            };
            edges[nibbles[3]] = leaf_index;
        }

        self.slots.shrink_to_fit();
        self.elements.shrink_to_fit();
    }

    /// Number of live leaves plus interior nodes; diagnostics and tests.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Reserves trie capacity for `members` additional members.
    pub(crate) fn reserve_slots(&mut self, members: usize) {
        self.slots.reserve(members * 4);
    }

    /// Iterates live hashmap leaves in slot order.
    pub(crate) fn leaves(&self) -> impl Iterator<Item = (u16, &Property)> {
        self.slots.iter().enumerate().skip(2).filter_map(|(index, slot)| match slot {
            Slot::Leaf(property) => Some((index as u16, property)),
            _ => None,
        })
    }

    pub(crate) fn element_capacity_for(size: u32) -> u32 {
        if size < 4 {
            4
        } else if size < 64 {
            size.next_power_of_two()
        } else if size > ELEMENT_MAX {
            ELEMENT_MAX + 1
        } else {
            // 64-entry chunks past the power-of-two band.
            ((size - 1) | 63) + 1
        }
    }

    /// Grows or truncates the element store to `size`. Truncation stops
    /// short of trailing sealed elements: the final length is adjusted
    /// upward to cover them and `true` is reported back.
    pub(crate) fn resize_elements(&mut self, size: u32, keys: &KeyTable) -> bool {
        if size > self.element_count {
            let physical = size.min(ELEMENT_MAX + 1) as usize;
            if physical > self.elements.len() {
                let target = Self::element_capacity_for(physical as u32) as usize;
                self.elements.reserve(target.saturating_sub(self.elements.len()));
                self.elements.resize(physical, None);
            }
            self.element_count = size;
            return false;
        }

        let mut until = size;

        if self.element_count > ELEMENT_MAX {
            // Indices past the dense store live as decimal-keyed members.
            let mut sealed_members: Vec<Key> = Vec::new();
            let mut doomed: Vec<Key> = Vec::new();
            for (_, property) in self.leaves() {
                let Some(index) = chars::scan_element(keys.text_of(property.key)) else {
                    continue;
                };
                if index >= until {
                    if property.flags.contains(PropFlags::SEALED) {
                        sealed_members.push(property.key);
                        until = until.max(index + 1);
                    } else {
                        doomed.push(property.key);
                    }
                }
            }
            for key in doomed {
                self.delete_member(key);
            }
            if until > size {
                self.element_count = until;
                return true;
            }
            self.element_count = self.elements.len() as u32;
        }

        for index in (size as usize)..self.elements.len() {
            if let Some(property) = &self.elements[index]
                && property.flags.contains(PropFlags::SEALED)
                && index as u32 >= until
            {
                until = index as u32 + 1;
            }
        }

        if self.elements.len() > until as usize {
            self.elements.truncate(until as usize);
        }

        if until > size {
            self.element_count = until;
            return true;
        }
        self.element_count = size;
        false
    }

    /// GC traversal: pushes every child pool id.
    pub(crate) fn collect_child_ids(&self, work: &mut Vec<HeapId>) {
        if let Some(prototype) = self.prototype {
            work.push(prototype);
        }
        for property in self.elements.iter().flatten() {
            if let Some(id) = crate::heap::value_child_id(&property.value) {
                work.push(id);
            }
        }
        for (_, property) in self.leaves() {
            if let Some(id) = crate::heap::value_child_id(&property.value) {
                work.push(id);
            }
        }
        if let ObjectKind::Function(data) = &self.kind {
            work.push(data.environment);
            work.extend(data.ref_object);
            work.extend(data.pair);
            if let Some(bound) = &data.bound_this
                && let Some(id) = crate::heap::value_child_id(bound)
            {
                work.push(id);
            }
            for value in &data.bound_arguments {
                if let Some(id) = crate::heap::value_child_id(value) {
                    work.push(id);
                }
            }
            if let FunctionBody::Template(template) = &data.body {
                template.collect_child_ids(work);
            }
        }
    }
}

/// How a property designator classifies: dense index or interned key.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PropertyKey {
    Element(u32),
    Member(Key),
}

// --- lookup ---------------------------------------------------------------

/// Walks the prototype chain for a member. With `AS_OWN` the chain is
/// consulted only for slots whose flags intersect the mask (which is how
/// "own data property or inherited accessor" lookups are phrased).
pub(crate) fn member_ref(heap: &Heap, start: HeapId, key: Key, flags: PropFlags) -> Option<SlotRef> {
    let lookup_chain = !flags.contains(PropFlags::AS_OWN);
    let mut current = start;
    loop {
        let obj = heap.object(current);
        let slot = obj.get_slot(key);
        if slot != 0
            && let Some(property) = obj.leaf(slot)
            && (lookup_chain || current == start || property.flags.intersects(flags))
        {
            return Some(SlotRef { owner: current, place: Place::Slot(slot) });
        }
        current = obj.prototype?;
    }
}

/// Walks the prototype chain for a dense element. Indices past
/// `ELEMENT_MAX` fall back to the decimal member spelling.
pub(crate) fn element_ref(heap: &Heap, keys: &KeyTable, start: HeapId, index: u32, flags: PropFlags) -> Option<SlotRef> {
    if index > ELEMENT_MAX {
        let key = keys.search(&index.to_string())?;
        return member_ref(heap, start, key, flags);
    }
    let lookup_chain = !flags.contains(PropFlags::AS_OWN);
    let mut current = start;
    loop {
        let obj = heap.object(current);
        if (index as usize) < obj.elements.len()
            && let Some(property) = &obj.elements[index as usize]
            && (lookup_chain || current == start || property.flags.intersects(flags))
        {
            return Some(SlotRef { owner: current, place: Place::Element(index) });
        }
        current = obj.prototype?;
    }
}

pub(crate) fn read_slot(heap: &Heap, slot_ref: SlotRef) -> Property {
    let obj = heap.object(slot_ref.owner);
    match slot_ref.place {
        Place::Slot(slot) => obj.leaf(slot).cloned().unwrap_or_else(|| {
            Property::new(Value::Undefined, Key::NONE, PropFlags::empty())
        }),
        Place::Element(index) => obj
            .elements
            .get(index as usize)
            .and_then(Clone::clone)
            .unwrap_or_else(|| Property::new(Value::Undefined, Key::NONE, PropFlags::empty())),
    }
}

pub(crate) fn write_slot(heap: &mut Heap, slot_ref: SlotRef, property: Property) {
    let obj = heap.object_mut(slot_ref.owner);
    match slot_ref.place {
        Place::Slot(slot) => {
            if let Some(existing) = obj.leaf_mut(slot) {
                *existing = property;
            }
        }
        Place::Element(index) => {
            if (index as usize) < obj.elements.len() {
                obj.elements[index as usize] = Some(property);
            }
        }
    }
}

// --- engine-level object operations ---------------------------------------

impl Engine {
    /// Classifies a primitive property designator into an element index or
    /// an interned key. Creation of new keys routes through the warning
    /// diagnostics.
    pub(crate) fn classify_property(&mut self, property: &Value) -> PropertyKey {
        debug_assert!(property.is_primitive());
        match property {
            Value::Key(key) => PropertyKey::Member(*key),
            Value::Integer(i) if *i >= 0 => PropertyKey::Element(*i as u32),
            Value::Binary(b)
                if *b >= 0.0
                    && *b < f64::from(u32::MAX)
                    // Float-narrowing comparison kept from the original
                    // engine: near-2^24 values classify as elements.
                    && (*b as f32) == ((*b as u32) as f32) =>
            {
                PropertyKey::Element(*b as u32)
            }
            value if value.is_string() => {
                let bytes = crate::value::string_slice(self, value).to_owned();
                match chars::scan_element(&bytes) {
                    Some(index) => PropertyKey::Element(index),
                    None => PropertyKey::Member(self.make_key(&bytes)),
                }
            }
            other => {
                let spelling = primitive_spelling(self, other);
                match chars::scan_element(&spelling) {
                    Some(index) => PropertyKey::Element(index),
                    None => PropertyKey::Member(self.make_key(&spelling)),
                }
            }
        }
    }

    pub(crate) fn key_of_index(&mut self, index: u32, create: bool) -> Key {
        let spelling = index.to_string();
        if create {
            self.make_key(&spelling)
        } else {
            self.keys.search(&spelling).unwrap_or(Key::NONE)
        }
    }

    /// Reads through a located slot, invoking getters.
    pub(crate) fn get_value(&mut self, cx: &mut Context<'_>, this: HeapId, slot_ref: Option<SlotRef>) -> Run<Value> {
        let Some(slot_ref) = slot_ref else {
            return Ok(Value::Undefined);
        };
        let property = read_slot(&self.heap, slot_ref);
        if property.flags.intersects(PropFlags::ACCESSOR) {
            let function = property.value.object_id().expect("accessor slots hold a function");
            let target = if property.flags.contains(PropFlags::GETTER) {
                Some(function)
            } else {
                self.heap.object(function).function_data().and_then(|data| data.pair)
            };
            return match target {
                Some(getter) => interp::call_function(cx, self, getter, Value::Object(this), &[], false),
                None => Ok(Value::Undefined),
            };
        }
        Ok(property.value)
    }

    /// Writes through a located slot, invoking setters and enforcing the
    /// readonly rules.
    pub(crate) fn put_value(&mut self, cx: &mut Context<'_>, this: HeapId, slot_ref: SlotRef, value: Value) -> Run<Value> {
        let property = read_slot(&self.heap, slot_ref);

        if property.flags.intersects(PropFlags::ACCESSOR) {
            let function = property.value.object_id().expect("accessor slots hold a function");
            let target = if property.flags.contains(PropFlags::SETTER) {
                Some(function)
            } else {
                self.heap.object(function).function_data().and_then(|data| data.pair)
            };
            match target {
                Some(setter) => {
                    interp::call_function(cx, self, setter, Value::Object(this), &[value], false)?;
                }
                None if cx.strict() => {
                    return Err(self.readonly_error(cx, &property));
                }
                None => {}
            }
            return Ok(value);
        }

        if property.flags.contains(PropFlags::READONLY) {
            if cx.strict() {
                return Err(self.readonly_error(cx, &property));
            }
            return Ok(value);
        }

        // Assignment preserves the slot's existing attributes.
        write_slot(&mut self.heap, slot_ref, Property::new(value, property.key, property.flags));
        Ok(value)
    }

    fn readonly_error(&mut self, cx: &mut Context<'_>, property: &Property) -> crate::Thrown {
        let name = if property.key.is_none() {
            "property".to_owned()
        } else {
            format!("'{}'", self.keys.text_of(property.key))
        };
        cx.type_error(self, format!("{name} is read-only"))
    }

    pub(crate) fn get_member(&mut self, cx: &mut Context<'_>, id: HeapId, key: Key) -> Run<Value> {
        let slot_ref = member_ref(&self.heap, id, key, PropFlags::empty());
        self.get_value(cx, id, slot_ref)
    }

    pub(crate) fn get_element(&mut self, cx: &mut Context<'_>, id: HeapId, index: u32) -> Run<Value> {
        if let ObjectKind::String(bytes) = &self.heap.object(id).kind {
            return Ok(string_element(bytes, index));
        }
        let slot_ref = element_ref(&self.heap, &self.keys, id, index, PropFlags::empty());
        self.get_value(cx, id, slot_ref)
    }

    pub(crate) fn get_property(&mut self, cx: &mut Context<'_>, id: HeapId, property: Value) -> Run<Value> {
        match self.classify_property(&property) {
            PropertyKey::Element(index) => self.get_element(cx, id, index),
            PropertyKey::Member(key) => self.get_member(cx, id, key),
        }
    }

    pub(crate) fn put_member(&mut self, cx: &mut Context<'_>, id: HeapId, key: Key, value: Value) -> Run<Value> {
        if let Some(slot_ref) = member_ref(&self.heap, id, key, PropFlags::AS_OWN | PropFlags::ACCESSOR) {
            return self.put_value(cx, id, slot_ref, value);
        }
        if let Some(prototype) = self.heap.object(id).prototype
            && let Some(slot_ref) = member_ref(&self.heap, prototype, key, PropFlags::empty())
        {
            let inherited = read_slot(&self.heap, slot_ref);
            if inherited.flags.contains(PropFlags::READONLY) {
                let name = self.keys.text_of(key).to_owned();
                return Err(cx.type_error(self, format!("'{name}' is readonly")));
            }
        }
        if self.heap.object(id).flags.contains(ObjFlags::SEALED) {
            return Err(cx.type_error(self, "object is not extensible".to_owned()));
        }
        self.heap.object_mut(id).add_member(key, value, PropFlags::empty());
        Ok(value)
    }

    pub(crate) fn put_element(&mut self, cx: &mut Context<'_>, id: HeapId, index: u32, value: Value) -> Run<Value> {
        if index > ELEMENT_MAX {
            let key = self.key_of_index(index, true);
            return self.put_member(cx, id, key, value);
        }

        if let Some(slot_ref) = element_ref(&self.heap, &self.keys, id, index, PropFlags::AS_OWN | PropFlags::ACCESSOR) {
            return self.put_value(cx, id, slot_ref, value);
        }
        if let Some(prototype) = self.heap.object(id).prototype
            && let Some(slot_ref) = element_ref(&self.heap, &self.keys, prototype, index, PropFlags::empty())
        {
            let inherited = read_slot(&self.heap, slot_ref);
            if inherited.flags.contains(PropFlags::READONLY) {
                return Err(cx.type_error(self, format!("'{index}' is readonly")));
            }
        }
        if self.heap.object(id).flags.contains(ObjFlags::SEALED) {
            return Err(cx.type_error(self, "object is not extensible".to_owned()));
        }
        self.add_element(id, index, value, PropFlags::empty());
        Ok(value)
    }

    pub(crate) fn put_property(&mut self, cx: &mut Context<'_>, id: HeapId, property: Value, value: Value) -> Run<Value> {
        match self.classify_property(&property) {
            PropertyKey::Element(index) => self.put_element(cx, id, index, value),
            PropertyKey::Member(key) => self.put_member(cx, id, key, value),
        }
    }

    pub(crate) fn add_element(&mut self, id: HeapId, index: u32, value: Value, flags: PropFlags) {
        if index > ELEMENT_MAX {
            let key = self.key_of_index(index, true);
            self.heap.object_mut(id).add_member(key, value, flags);
            return;
        }
        let keys = &self.keys;
        let obj = self.heap.object_mut(id);
        if obj.element_count <= index {
            obj.resize_elements(index + 1, keys);
        }
        if obj.elements.len() <= index as usize {
            obj.elements.resize(index as usize + 1, None);
        }
        obj.elements[index as usize] = Some(Property::new(value, Key::NONE, flags));
    }

    pub(crate) fn add_property(&mut self, id: HeapId, property: Value, value: Value, flags: PropFlags) {
        match self.classify_property(&property) {
            PropertyKey::Element(index) => self.add_element(id, index, value, flags),
            PropertyKey::Member(key) => {
                self.heap.object_mut(id).add_member(key, value, flags);
            }
        }
    }

    pub(crate) fn delete_property(&mut self, id: HeapId, property: Value) -> bool {
        match self.classify_property(&property) {
            PropertyKey::Element(index) => {
                if index > ELEMENT_MAX {
                    let key = self.key_of_index(index, false);
                    if key.is_none() {
                        return true;
                    }
                    return self.heap.object_mut(id).delete_member(key);
                }
                self.heap.object_mut(id).delete_element(index)
            }
            PropertyKey::Member(key) => self.heap.object_mut(id).delete_member(key),
        }
    }

    /// Interns a key, forwarding any "discouraged name" warning to the
    /// diagnostics stream.
    pub(crate) fn make_key(&mut self, spelling: &str) -> Key {
        let made = self.keys.make(spelling, crate::key::KeyFlags::COPY_ON_CREATE);
        if let Some(warning) = made.warning {
            self.env_writer.write_diag(&warning);
        }
        made.key
    }
}

/// Character-at-index read on a String object, 16-bit indexed. An index
/// landing on the trailing half of a surrogate pair yields the
/// replacement character; `charCodeAt` computes real unit values.
fn string_element(bytes: &str, index: u32) -> Value {
    let (offset, inside_pair) = crate::text::byte_offset_of_unit(bytes, index as usize);
    if inside_pair {
        return Value::Buffer(crate::value::InlineBuffer::try_from_str("\u{fffd}").expect("fits inline"));
    }
    match bytes[offset..].chars().next() {
        Some(c) => {
            let mut tmp = [0u8; 4];
            Value::Buffer(crate::value::InlineBuffer::try_from_str(c.encode_utf8(&mut tmp)).expect("char fits inline"))
        }
        None => Value::Undefined,
    }
}

/// Stringifies a non-string primitive for key classification without
/// running script.
fn primitive_spelling(vm: &Engine, value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_owned(),
        Value::Null => "null".to_owned(),
        Value::Bool(true) => "true".to_owned(),
        Value::Bool(false) => "false".to_owned(),
        Value::Integer(i) => chars::binary_to_string(f64::from(*i), 10),
        Value::Binary(b) => chars::binary_to_string(*b, 10),
        other => crate::value::string_slice(vm, other).to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyFlags, KeyTable};

    fn keys_with(names: &[&str]) -> (KeyTable, Vec<Key>) {
        let mut table = KeyTable::new();
        let keys = names.iter().map(|n| table.make(n, KeyFlags::empty()).key).collect();
        (table, keys)
    }

    #[test]
    fn added_members_resolve_through_the_trie() {
        let (_, keys) = keys_with(&["alpha", "beta", "gamma"]);
        let mut obj = Obj::new(None);
        for (i, key) in keys.iter().enumerate() {
            obj.add_member(*key, Value::Integer(i as i32), PropFlags::empty());
        }
        for (i, key) in keys.iter().enumerate() {
            let slot = obj.get_slot(*key);
            assert_ne!(slot, 0);
            let property = obj.leaf(slot).unwrap();
            assert!(matches!(property.value, Value::Integer(v) if v == i as i32));
            assert_eq!(property.key, *key);
        }
    }

    #[test]
    fn delete_detaches_the_leaf() {
        let (_, keys) = keys_with(&["alpha"]);
        let mut obj = Obj::new(None);
        obj.add_member(keys[0], Value::Integer(7), PropFlags::empty());
        assert!(obj.delete_member(keys[0]));
        assert_eq!(obj.get_slot(keys[0]), 0);
        assert_eq!(obj.leaves().count(), 0);
    }

    #[test]
    fn sealed_members_refuse_deletion() {
        let (_, keys) = keys_with(&["alpha"]);
        let mut obj = Obj::new(None);
        obj.add_member(keys[0], Value::Integer(7), PropFlags::SEALED);
        assert!(!obj.delete_member(keys[0]));
        assert_ne!(obj.get_slot(keys[0]), 0);
    }

    #[test]
    fn pack_preserves_resolution_and_orders_leaves() {
        let (_, keys) = keys_with(&["one", "two", "three", "four"]);
        let mut obj = Obj::new(None);
        for (i, key) in keys.iter().enumerate() {
            obj.add_member(*key, Value::Integer(i as i32), PropFlags::empty());
        }
        obj.delete_member(keys[1]);
        let before = obj.slot_count();
        obj.pack();
        assert!(obj.slot_count() <= before);

        // Live leaves sit at slots 2.. in creation order.
        let live: Vec<Key> = obj.leaves().map(|(_, p)| p.key).collect();
        assert_eq!(live, vec![keys[0], keys[2], keys[3]]);
        for (position, key) in [keys[0], keys[2], keys[3]].iter().enumerate() {
            assert_eq!(obj.get_slot(*key), (2 + position) as u16, "slot of {key:?}");
        }
        assert_eq!(obj.get_slot(keys[1]), 0);
    }

    #[test]
    fn resize_respects_sealed_trailing_elements() {
        let (table, _) = keys_with(&[]);
        let mut obj = Obj::new(None);
        obj.elements = vec![
            Some(Property::new(Value::Integer(0), Key::NONE, PropFlags::empty())),
            Some(Property::new(Value::Integer(1), Key::NONE, PropFlags::SEALED)),
            Some(Property::new(Value::Integer(2), Key::NONE, PropFlags::empty())),
        ];
        obj.element_count = 3;
        let adjusted = obj.resize_elements(0, &table);
        assert!(adjusted);
        assert_eq!(obj.element_count, 2);
        assert!(obj.elements[1].is_some());
    }

    #[test]
    fn element_capacity_bands() {
        assert_eq!(Obj::element_capacity_for(1), 4);
        assert_eq!(Obj::element_capacity_for(9), 16);
        assert_eq!(Obj::element_capacity_for(65), 128);
        assert_eq!(Obj::element_capacity_for(200), 256);
    }
}
