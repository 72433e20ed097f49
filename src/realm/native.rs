use std::fmt;
use std::rc::Rc;

use super::exceptions::Exception;
use super::Realm;
use crate::vm::Value;

pub type NativeResult = Result<Value, Exception>;

/// `this`, arguments and `new.target` of one native call, as seen by interceptors.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub this: Value,
    pub arguments: Vec<Value>,
    /// `Some` when invoked as a constructor.
    pub new_target: Option<Value>,
}

impl CallContext {
    pub fn new(this: Value, arguments: Vec<Value>) -> Self {
        Self {
            this,
            arguments,
            new_target: None,
        }
    }

    pub fn argument(&self, index: usize) -> Value {
        self.arguments.get(index).cloned().unwrap_or_default()
    }

    /// The argument at `index`, or `None` when absent or `undefined`.
    pub fn optional_argument(&self, index: usize) -> Option<Value> {
        self.arguments
            .get(index)
            .filter(|value| !value.is_undefined())
            .cloned()
    }

    pub fn is_construct_call(&self) -> bool {
        self.new_target.is_some()
    }
}

pub type Implementation = dyn Fn(&mut Realm, &mut CallContext) -> NativeResult;
pub type Before = Rc<dyn Fn(&mut Realm, &mut CallContext) -> Result<(), Exception>>;
pub type After = Rc<dyn Fn(&mut Realm, Value, &CallContext) -> NativeResult>;
pub type Catch = Rc<dyn Fn(&mut Realm, Exception, &CallContext) -> Exception>;
pub type Finally = Rc<dyn Fn(&mut Realm, &CallContext)>;

pub fn before<F>(callback: F) -> Before
where
    F: Fn(&mut Realm, &mut CallContext) -> Result<(), Exception> + 'static,
{
    Rc::new(callback)
}

pub fn after<F>(callback: F) -> After
where
    F: Fn(&mut Realm, Value, &CallContext) -> NativeResult + 'static,
{
    Rc::new(callback)
}

pub fn catch<F>(callback: F) -> Catch
where
    F: Fn(&mut Realm, Exception, &CallContext) -> Exception + 'static,
{
    Rc::new(callback)
}

pub fn finally<F>(callback: F) -> Finally
where
    F: Fn(&mut Realm, &CallContext) + 'static,
{
    Rc::new(callback)
}

/// Hooks around a native call, composed in registration order.
#[derive(Clone, Default)]
pub struct Interceptors {
    pub before: Vec<Before>,
    pub after: Vec<After>,
    pub catch: Vec<Catch>,
    pub finally: Vec<Finally>,
}

impl Interceptors {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.after.is_empty()
            && self.catch.is_empty()
            && self.finally.is_empty()
    }

    pub fn len(&self) -> usize {
        self.before.len() + self.after.len() + self.catch.len() + self.finally.len()
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("catch", &self.catch.len())
            .field("finally", &self.finally.len())
            .finish()
    }
}

/// A host function callable from script.
pub struct NativeFunction {
    name: Rc<str>,
    length: u16,
    allow_new: bool,
    implementation: Rc<Implementation>,
    interceptors: Interceptors,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("allow_new", &self.allow_new)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

impl NativeFunction {
    pub fn builder<F>(name: &str, implementation: F) -> NativeFunctionBuilder
    where
        F: Fn(&mut Realm, &mut CallContext) -> NativeResult + 'static,
    {
        NativeFunctionBuilder {
            name: Rc::from(name),
            length: 0,
            allow_new: true,
            implementation: Rc::new(implementation),
            interceptors: Interceptors::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn allow_new(&self) -> bool {
        self.allow_new
    }

    pub fn interceptors(&self) -> &Interceptors {
        &self.interceptors
    }

    /// Run the interceptor pipeline around the implementation.
    pub(crate) fn invoke(&self, realm: &mut Realm, mut context: CallContext) -> NativeResult {
        if self.interceptors.is_empty() {
            return (self.implementation)(realm, &mut context);
        }
        let result = match self.attempt(realm, &mut context) {
            Ok(value) => Ok(value),
            Err(Exception::Fatal(err)) => Err(Exception::Fatal(err)),
            Err(exception) => Err(self
                .interceptors
                .catch
                .iter()
                .fold(exception, |exception, catch| catch(realm, exception, &context))),
        };
        for finally in &self.interceptors.finally {
            finally(realm, &context);
        }
        result
    }

    fn attempt(&self, realm: &mut Realm, context: &mut CallContext) -> NativeResult {
        for before in &self.interceptors.before {
            before(realm, context)?;
        }
        let mut value = (self.implementation)(realm, context)?;
        for after in &self.interceptors.after {
            value = after(realm, value, context)?;
        }
        Ok(value)
    }
}

pub struct NativeFunctionBuilder {
    name: Rc<str>,
    length: u16,
    allow_new: bool,
    implementation: Rc<Implementation>,
    interceptors: Interceptors,
}

impl NativeFunctionBuilder {
    pub fn length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    /// Whether the function may be used with `new`. Defaults to `true`.
    pub fn allow_new(mut self, allow_new: bool) -> Self {
        self.allow_new = allow_new;
        self
    }

    pub fn before(mut self, before: Before) -> Self {
        self.interceptors.before.push(before);
        self
    }

    pub fn after(mut self, after: After) -> Self {
        self.interceptors.after.push(after);
        self
    }

    pub fn catch(mut self, catch: Catch) -> Self {
        self.interceptors.catch.push(catch);
        self
    }

    pub fn finally(mut self, finally: Finally) -> Self {
        self.interceptors.finally.push(finally);
        self
    }

    pub fn interceptors(mut self, interceptors: Interceptors) -> Self {
        let Interceptors {
            before,
            after,
            catch,
            finally,
        } = interceptors;
        self.interceptors.before.extend(before);
        self.interceptors.after.extend(after);
        self.interceptors.catch.extend(catch);
        self.interceptors.finally.extend(finally);
        self
    }

    pub fn build(self) -> NativeFunction {
        NativeFunction {
            name: self.name,
            length: self.length,
            allow_new: self.allow_new,
            implementation: self.implementation,
            interceptors: self.interceptors,
        }
    }
}
