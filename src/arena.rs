//! Type arena and handles
//!
//! Every tracked type is an index into a shared arena of implementation
//! records. Handles and instances reference types only through that index,
//! so a reload can swap the record behind the index and every reference
//! created before the reload observes the new members with its identity
//! unchanged. Member definitions can opt out of patching by being sealed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::RuntimeError;
use crate::module::Module;
use crate::package::Package;
use crate::value::Value;

/// Member names that shadow a type's inherent slots. The patch pass never
/// copies these; arity and constructor linkage stay with the old record.
pub const RESERVED_MEMBERS: &[&str] = &["constructor", "prototype", "length", "arguments"];

/// A native member implementation, invoked with the receiving instance
pub type NativeFn = Arc<dyn Fn(&Instance, &[Value]) -> Value + Send + Sync>;

/// The value of one member definition
#[derive(Clone)]
pub enum MemberValue {
    /// Plain data
    Data(Value),
    /// Callable behavior
    Func(NativeFn),
    /// A nested/static type
    Type(TypeHandle),
}

impl fmt::Debug for MemberValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberValue::Data(value) => write!(f, "Data({value})"),
            MemberValue::Func(_) => write!(f, "Func"),
            MemberValue::Type(handle) => write!(f, "Type({})", handle.name()),
        }
    }
}

/// One member definition
#[derive(Debug, Clone)]
pub struct Member {
    pub value: MemberValue,
    /// Sealed members are never overwritten by patching
    pub sealed: bool,
}

impl Member {
    pub fn data(value: Value) -> Self {
        Self { value: MemberValue::Data(value), sealed: false }
    }

    pub fn func(f: NativeFn) -> Self {
        Self { value: MemberValue::Func(f), sealed: false }
    }

    pub fn nested(handle: TypeHandle) -> Self {
        Self { value: MemberValue::Type(handle), sealed: false }
    }

    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }
}

/// Provenance of a tracked type: where it came from and how many times it
/// has been patched
#[derive(Clone)]
pub struct Provenance {
    pub module: Weak<Module>,
    pub package: Weak<Package>,
    pub version: u64,
}

impl fmt::Debug for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provenance")
            .field("module", &self.module.upgrade().map(|m| m.file().to_path_buf()))
            .field("package", &self.package.upgrade().map(|p| p.name().to_string()))
            .field("version", &self.version)
            .finish()
    }
}

/// The current implementation record of one type
#[derive(Debug, Clone, Default)]
pub struct TypeImpl {
    /// Type name; replaced on patch
    pub name: String,
    /// Constructor argument count; inherent slot, never patched
    pub arity: usize,
    /// Own member definitions (data, accessors, nested types)
    pub statics: BTreeMap<String, Member>,
    /// The shared behavior surface every instance delegates to
    pub methods: BTreeMap<String, Member>,
    /// Attached once the registry tracks the type
    pub provenance: Option<Provenance>,
}

impl TypeImpl {
    /// Overlay `fresh` member definitions on this record, producing the
    /// patched record. Reserved slots and members sealed here are kept;
    /// members absent from `fresh` are kept (orphaned, stale behavior).
    pub(crate) fn patched_with(&self, fresh: &TypeImpl) -> TypeImpl {
        let mut merged = self.clone();
        merged.name = fresh.name.clone();
        Self::overlay(&mut merged.statics, &self.statics, &fresh.statics);
        Self::overlay(&mut merged.methods, &self.methods, &fresh.methods);
        merged
    }

    fn overlay(
        out: &mut BTreeMap<String, Member>,
        old: &BTreeMap<String, Member>,
        fresh: &BTreeMap<String, Member>,
    ) {
        for (key, member) in fresh {
            if RESERVED_MEMBERS.contains(&key.as_str()) {
                continue;
            }
            if old.get(key).is_some_and(|m| m.sealed) {
                continue;
            }
            out.insert(key.clone(), member.clone());
        }
    }
}

/// Arena of type implementation records
pub struct TypeArena {
    slots: RwLock<Vec<TypeImpl>>,
}

impl TypeArena {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { slots: RwLock::new(Vec::new()) })
    }

    /// Intern a record and return its handle
    pub fn insert(self: &Arc<Self>, imp: TypeImpl) -> TypeHandle {
        let mut slots = self.slots.write();
        let index = slots.len();
        slots.push(imp);
        TypeHandle { arena: self.clone(), index }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn with<R>(&self, index: usize, f: impl FnOnce(&TypeImpl) -> R) -> R {
        f(&self.slots.read()[index])
    }

    fn with_mut<R>(&self, index: usize, f: impl FnOnce(&mut TypeImpl) -> R) -> R {
        f(&mut self.slots.write()[index])
    }
}

impl fmt::Debug for TypeArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeArena({} slots)", self.len())
    }
}

/// A stable reference to one type. Equality is identity: two handles are
/// equal iff they index the same arena slot.
#[derive(Clone)]
pub struct TypeHandle {
    arena: Arc<TypeArena>,
    index: usize,
}

impl TypeHandle {
    /// The type's current name
    pub fn name(&self) -> String {
        self.arena.with(self.index, |imp| imp.name.clone())
    }

    /// Constructor argument count
    pub fn arity(&self) -> usize {
        self.arena.with(self.index, |imp| imp.arity)
    }

    /// The provenance record attached by the registry, if tracked
    pub fn provenance(&self) -> Option<Provenance> {
        self.arena.with(self.index, |imp| imp.provenance.clone())
    }

    /// One own member definition
    pub fn static_member(&self, key: &str) -> Option<Member> {
        self.arena.with(self.index, |imp| imp.statics.get(key).cloned())
    }

    /// Snapshot of the own member definitions, in key order
    pub fn statics(&self) -> Vec<(String, Member)> {
        self.arena.with(self.index, |imp| {
            imp.statics.iter().map(|(k, m)| (k.clone(), m.clone())).collect()
        })
    }

    /// One instance-level operation
    pub fn method(&self, name: &str) -> Option<Member> {
        self.arena.with(self.index, |imp| imp.methods.get(name).cloned())
    }

    /// Define or replace an own member
    pub fn define_static(&self, key: &str, member: Member) {
        self.arena.with_mut(self.index, |imp| {
            imp.statics.insert(key.to_string(), member);
        });
    }

    /// Define or replace an instance-level operation
    pub fn define_method(&self, name: &str, member: Member) {
        self.arena.with_mut(self.index, |imp| {
            imp.methods.insert(name.to_string(), member);
        });
    }

    /// Construct an instance delegating to this type
    pub fn instantiate(&self) -> Instance {
        Instance { ty: self.clone(), fields: RwLock::new(BTreeMap::new()) }
    }

    /// Snapshot of the current record
    pub(crate) fn snapshot(&self) -> TypeImpl {
        self.arena.with(self.index, |imp| imp.clone())
    }

    /// Swap the record behind this handle
    pub(crate) fn replace(&self, imp: TypeImpl) {
        self.arena.with_mut(self.index, |slot| *slot = imp);
    }

    pub(crate) fn set_provenance(&self, provenance: Provenance) {
        self.arena.with_mut(self.index, |imp| imp.provenance = Some(provenance));
    }

    pub(crate) fn set_provenance_version(&self, version: u64) {
        self.arena.with_mut(self.index, |imp| {
            if let Some(provenance) = imp.provenance.as_mut() {
                provenance.version = version;
            }
        });
    }

    pub(crate) fn identity(&self) -> (usize, usize) {
        (Arc::as_ptr(&self.arena) as usize, self.index)
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena) && self.index == other.index
    }
}

impl Eq for TypeHandle {}

impl std::hash::Hash for TypeHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = self.provenance().map(|p| p.version).unwrap_or(0);
        write!(f, "TypeHandle({}@{version})", self.name())
    }
}

/// Builder for type implementation records
pub struct TypeBuilder {
    imp: TypeImpl,
}

impl TypeBuilder {
    pub fn new(name: &str) -> Self {
        Self { imp: TypeImpl { name: name.to_string(), ..TypeImpl::default() } }
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.imp.arity = arity;
        self
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.imp.statics.insert(key.to_string(), Member::data(value));
        self
    }

    pub fn with_sealed_data(mut self, key: &str, value: Value) -> Self {
        self.imp.statics.insert(key.to_string(), Member::data(value).sealed());
        self
    }

    pub fn with_static_type(mut self, key: &str, handle: TypeHandle) -> Self {
        self.imp.statics.insert(key.to_string(), Member::nested(handle));
        self
    }

    pub fn with_method(
        mut self,
        name: &str,
        f: impl Fn(&Instance, &[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.imp.methods.insert(name.to_string(), Member::func(Arc::new(f)));
        self
    }

    pub fn with_sealed_method(
        mut self,
        name: &str,
        f: impl Fn(&Instance, &[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.imp
            .methods
            .insert(name.to_string(), Member::func(Arc::new(f)).sealed());
        self
    }

    /// Intern the record into `arena`
    pub fn build(self, arena: &Arc<TypeArena>) -> TypeHandle {
        arena.insert(self.imp)
    }
}

/// An object constructed from a type. Behavior is resolved through the type
/// handle on every call, so patched operations take effect immediately.
pub struct Instance {
    ty: TypeHandle,
    fields: RwLock<BTreeMap<String, Value>>,
}

impl Instance {
    /// The type this instance delegates to
    pub fn ty(&self) -> &TypeHandle {
        &self.ty
    }

    /// Provenance of the instance's type
    pub fn provenance(&self) -> Option<Provenance> {
        self.ty.provenance()
    }

    /// Invoke an instance-level operation
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let member = self.ty.method(name).ok_or_else(|| RuntimeError::MissingMember {
            type_name: self.ty.name(),
            member: name.to_string(),
        })?;
        match member.value {
            MemberValue::Func(f) => Ok(f(self, args)),
            _ => Err(RuntimeError::NotCallable {
                type_name: self.ty.name(),
                member: name.to_string(),
            }),
        }
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.read().get(field).cloned()
    }

    pub fn set(&self, field: &str, value: Value) {
        self.fields.write().insert(field.to_string(), value);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({})", self.ty.name())
    }
}
