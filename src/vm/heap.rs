use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::intrinsics::{IntrinsicFunction, Intrinsics};
use super::store::ObjectStore;
use super::value::{ObjectId, Value};
use crate::realm::{Exception, NativeFunction, Realm};

/// Identifies the global environment an object was created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvironmentId(u32);

/// A property slot. Accessors hold function objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Data(Value),
    Accessor {
        get: Option<ObjectId>,
        set: Option<ObjectId>,
    },
}

pub type ScriptBody = dyn Fn(&mut Realm, Value, Vec<Value>) -> Result<Value, Exception>;

/// A function written in the untrusted realm.
#[derive(Clone)]
pub struct ScriptFunction {
    pub name: Rc<str>,
    pub body: Rc<ScriptBody>,
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum FunctionData {
    Native(Rc<NativeFunction>),
    Script(ScriptFunction),
    Intrinsic(IntrinsicFunction),
}

#[derive(Debug, Clone)]
pub enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Error,
    Function(FunctionData),
}

#[derive(Debug)]
struct ObjectData {
    environment: EnvironmentId,
    prototype: Option<ObjectId>,
    kind: ObjectKind,
    properties: HashMap<Rc<str>, Property>,
    /// Own keys in definition order.
    keys: Vec<Rc<str>>,
}

/// In-process [`ObjectStore`] used when no engine is attached.
///
/// Objects are never collected; a heap lives exactly as long as the realm that
/// owns it.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<ObjectData>,
    environments: u32,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self, id: ObjectId) -> &ObjectData {
        &self.objects[id.index()]
    }

    fn data_mut(&mut self, id: ObjectId) -> &mut ObjectData {
        &mut self.objects[id.index()]
    }
}

impl ObjectStore for Heap {
    fn create_environment(&mut self) -> (EnvironmentId, ObjectId, Intrinsics) {
        let environment = EnvironmentId(self.environments);
        self.environments += 1;
        let intrinsics = Intrinsics::create(self, environment);
        let global = intrinsics.global;
        (environment, global, intrinsics)
    }

    fn allocate(
        &mut self,
        environment: EnvironmentId,
        prototype: Option<ObjectId>,
        kind: ObjectKind,
    ) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(ObjectData {
            environment,
            prototype,
            kind,
            properties: HashMap::new(),
            keys: Vec::new(),
        });
        id
    }

    fn contains(&self, id: ObjectId) -> bool {
        id.index() < self.objects.len()
    }

    fn environment_of(&self, id: ObjectId) -> EnvironmentId {
        self.data(id).environment
    }

    fn prototype_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.data(id).prototype
    }

    fn set_prototype(&mut self, id: ObjectId, prototype: Option<ObjectId>) {
        self.data_mut(id).prototype = prototype;
    }

    fn kind(&self, id: ObjectId) -> &ObjectKind {
        &self.data(id).kind
    }

    fn set_kind(&mut self, id: ObjectId, kind: ObjectKind) {
        self.data_mut(id).kind = kind;
    }

    fn get_own(&self, id: ObjectId, key: &str) -> Option<&Property> {
        self.data(id).properties.get(key)
    }

    fn own_keys(&self, id: ObjectId) -> Vec<Rc<str>> {
        self.data(id).keys.clone()
    }

    fn define(&mut self, id: ObjectId, key: &str, property: Property) {
        let data = self.data_mut(id);
        let key: Rc<str> = Rc::from(key);
        if data.properties.insert(key.clone(), property).is_none() {
            data.keys.push(key);
        }
    }

    fn delete(&mut self, id: ObjectId, key: &str) -> bool {
        let data = self.data_mut(id);
        if data.properties.remove(key).is_some() {
            data.keys.retain(|existing| &**existing != key);
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.objects.len()
    }
}
