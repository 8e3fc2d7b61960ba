// Tree-walking evaluator. Scopes are reference counted so closures can keep
// their defining environment alive after the defining call returns.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::ast::*;
use super::builtins;
use super::value::*;
use super::{ConsoleSink, Limits};

pub(crate) type Env = Rc<RefCell<Scope>>;

/// Why evaluation stopped early.
pub(crate) enum Abrupt {
    /// A script-level exception, catchable by `try`.
    Throw(Value),
    /// The step budget ran out. Never catchable.
    Halt(String),
}

pub(crate) type Flow<T> = Result<T, Abrupt>;

enum Completion {
    Normal,
    Return(Value),
    Break(Option<String>),
    Continue(Option<String>),
}

#[derive(Clone)]
struct Binding {
    value: Value,
    mutable: bool,
    initialized: bool,
}

pub(crate) struct Scope {
    vars: HashMap<String, Binding>,
    parent: Option<Env>,
    is_function: bool,
}

fn new_scope(parent: Option<&Env>, is_function: bool) -> Env {
    Rc::new(RefCell::new(Scope {
        vars: HashMap::new(),
        parent: parent.cloned(),
        is_function,
    }))
}

fn declare(env: &Env, name: &str, value: Value, mutable: bool, initialized: bool) {
    env.borrow_mut().vars.insert(
        name.to_string(),
        Binding {
            value,
            mutable,
            initialized,
        },
    );
}

/// Sibling scope holding copies of `env`'s bindings, used for per-iteration `let`.
fn copy_scope(env: &Env) -> Env {
    let scope = env.borrow();
    Rc::new(RefCell::new(Scope {
        vars: scope.vars.clone(),
        parent: scope.parent.clone(),
        is_function: scope.is_function,
    }))
}

fn function_scope(env: &Env) -> Env {
    let mut current = env.clone();
    loop {
        let next = {
            let scope = current.borrow();
            if scope.is_function {
                None
            } else {
                scope.parent.clone()
            }
        };
        match next {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

#[derive(Clone, Copy)]
enum BindMode {
    Declare(DeclKind),
    Assign,
}

enum Reference {
    Binding(String),
    Property(Value, Rc<str>),
}

enum Invocation {
    Native(NativeFn),
    Bound(Value, Value, Vec<Value>),
    Closure(Rc<FunctionDef>, Env, Option<ObjRef>, Option<Rc<ClassInfo>>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hint {
    Number,
    String,
}

/// Prototype objects shared by every value of a kind.
pub(crate) struct Realm {
    pub(crate) object_proto: ObjRef,
    pub(crate) function_proto: ObjRef,
    pub(crate) array_proto: ObjRef,
    pub(crate) string_proto: ObjRef,
    pub(crate) number_proto: ObjRef,
    pub(crate) boolean_proto: ObjRef,
    pub(crate) map_proto: ObjRef,
    pub(crate) set_proto: ObjRef,
    pub(crate) error_protos: HashMap<&'static str, ObjRef>,
}

pub(crate) struct Interpreter<'s> {
    pub(crate) realm: Realm,
    pub(crate) global: Env,
    sink: &'s mut dyn ConsoleSink,
    limits: Limits,
    steps: u64,
    depth: usize,
    nesting: usize,
    written: usize,
    last_value: Value,
    rng_state: u64,
}

impl<'s> Interpreter<'s> {
    pub(crate) fn new(sink: &'s mut dyn ConsoleSink, limits: Limits) -> Interpreter<'s> {
        let object_proto = Object::new(ObjectKind::Plain, None);
        let with_base = |kind: ObjectKind| Object::new(kind, Some(object_proto.clone()));
        let realm = Realm {
            function_proto: with_base(ObjectKind::Plain),
            array_proto: with_base(ObjectKind::Array(Vec::new())),
            string_proto: with_base(ObjectKind::Plain),
            number_proto: with_base(ObjectKind::Plain),
            boolean_proto: with_base(ObjectKind::Plain),
            map_proto: with_base(ObjectKind::Plain),
            set_proto: with_base(ObjectKind::Plain),
            error_protos: HashMap::new(),
            object_proto,
        };
        // xorshift needs a non-zero seed
        let seed = (uuid::Uuid::new_v4().as_u128() as u64) | 1;
        let mut interp = Interpreter {
            realm,
            global: new_scope(None, true),
            sink,
            limits,
            steps: 0,
            depth: 0,
            nesting: 0,
            written: 0,
            last_value: Value::Undefined,
            rng_state: seed,
        };
        builtins::install(&mut interp);
        interp
    }

    /// Runs a whole program and returns its completion value.
    pub(crate) fn run(&mut self, program: &[Stmt]) -> Flow<Value> {
        let global = self.global.clone();
        self.hoist(program, &global, true)?;
        for stmt in program {
            if let Completion::Return(value) = self.exec(stmt, &global, None)? {
                return Ok(value);
            }
        }
        Ok(std::mem::replace(&mut self.last_value, Value::Undefined))
    }

    /// Console output shares the length limit across the whole run.
    pub(crate) fn write_line(&mut self, line: String) -> Flow<()> {
        let written = self.written + line.len() + 1;
        if written > self.limits.max_length {
            return self.throw("RangeError", "Console output limit exceeded");
        }
        self.written = written;
        self.sink.write_line(line);
        Ok(())
    }

    pub(crate) fn next_random(&mut self) -> f64 {
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }

    pub(crate) fn define_global(&mut self, name: &str, value: Value) {
        declare(&self.global, name, value, true, true);
    }

    fn tick(&mut self) -> Flow<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(Abrupt::Halt(format!(
                "Execution stopped after {} steps",
                self.limits.max_steps
            )));
        }
        Ok(())
    }

    /// Runs `f` one evaluation level deeper, refusing to recurse past the limit.
    pub(crate) fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Flow<T>) -> Flow<T> {
        if self.nesting >= self.limits.max_eval_depth {
            return self.throw("RangeError", "Maximum call stack size exceeded");
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    /// Refuses to build a string longer than the length limit.
    pub(crate) fn check_string_length(&self, len: usize) -> Flow<()> {
        if len > self.limits.max_length {
            return self.throw("RangeError", "Invalid string length");
        }
        Ok(())
    }

    pub(crate) fn check_array_length(&self, len: usize) -> Flow<()> {
        if len > self.limits.max_length {
            return self.throw("RangeError", "Invalid array length");
        }
        Ok(())
    }

    // ---- object helpers ----

    pub(crate) fn new_object(&self) -> ObjRef {
        Object::new(ObjectKind::Plain, Some(self.realm.object_proto.clone()))
    }

    pub(crate) fn new_array(&self, items: Vec<Value>) -> Value {
        Value::Object(Object::new(
            ObjectKind::Array(items),
            Some(self.realm.array_proto.clone()),
        ))
    }

    pub(crate) fn native_function<F>(&self, name: &str, arity: u32, func: F) -> Value
    where
        F: Fn(&mut Interpreter<'_>, &Value, &[Value]) -> Flow<Value> + 'static,
    {
        let object = Object::new(
            ObjectKind::Function(Callable::Native {
                name: Rc::from(name),
                func: Rc::new(func),
            }),
            Some(self.realm.function_proto.clone()),
        );
        {
            let mut obj = object.borrow_mut();
            obj.props.insert("name", Value::from(name), false);
            obj.props.insert("length", Value::Number(arity as f64), false);
        }
        Value::Object(object)
    }

    pub(crate) fn define_method<F>(&self, target: &ObjRef, name: &str, arity: u32, func: F)
    where
        F: Fn(&mut Interpreter<'_>, &Value, &[Value]) -> Flow<Value> + 'static,
    {
        let function = self.native_function(name, arity, func);
        target.borrow_mut().props.insert(name, function, false);
    }

    pub(crate) fn make_error(&self, kind: &str, message: &str) -> Value {
        let proto = self
            .realm
            .error_protos
            .get(kind)
            .or_else(|| self.realm.error_protos.get("Error"))
            .cloned()
            .unwrap_or_else(|| self.realm.object_proto.clone());
        let error = Object::new(ObjectKind::Plain, Some(proto));
        error.borrow_mut().props.insert("message", Value::from(message), false);
        Value::Object(error)
    }

    pub(crate) fn throw<T>(&self, kind: &str, message: &str) -> Flow<T> {
        Err(Abrupt::Throw(self.make_error(kind, message)))
    }

    pub(crate) fn is_error(&self, value: &Value) -> bool {
        match (value, self.realm.error_protos.get("Error")) {
            (Value::Object(obj), Some(error_proto)) => proto_chain_contains(obj, error_proto),
            _ => false,
        }
    }

    fn make_closure(
        &self,
        def: &Rc<FunctionDef>,
        env: &Env,
        home: Option<ObjRef>,
        class: Option<Rc<ClassInfo>>,
    ) -> ObjRef {
        let object = Object::new(
            ObjectKind::Function(Callable::Closure {
                def: def.clone(),
                env: env.clone(),
                home,
                class,
            }),
            Some(self.realm.function_proto.clone()),
        );
        {
            let mut obj = object.borrow_mut();
            let name = def.name.clone().unwrap_or_default();
            obj.props.insert("name", Value::from(name), false);
            obj.props.insert("length", Value::Number(def.params.len() as f64), false);
        }
        if !def.is_arrow {
            let prototype = self.new_object();
            prototype
                .borrow_mut()
                .props
                .insert("constructor", Value::Object(object.clone()), false);
            object
                .borrow_mut()
                .props
                .insert("prototype", Value::Object(prototype), false);
        }
        object
    }

    // ---- property access ----

    pub(crate) fn get_property(&mut self, target: &Value, key: &str) -> Flow<Value> {
        match target {
            Value::Undefined | Value::Null => self.throw(
                "TypeError",
                &format!(
                    "Cannot read properties of {} (reading '{}')",
                    target.primitive_to_string(),
                    key
                ),
            ),
            Value::Str(text) => {
                if key == "length" {
                    return Ok(Value::Number(text.chars().count() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(text
                        .chars()
                        .nth(index as usize)
                        .map(|c| Value::from(c.to_string()))
                        .unwrap_or(Value::Undefined));
                }
                Ok(object_get(&self.realm.string_proto, key))
            }
            Value::Number(_) => Ok(object_get(&self.realm.number_proto, key)),
            Value::Bool(_) => Ok(object_get(&self.realm.boolean_proto, key)),
            Value::Object(obj) => Ok(object_get(obj, key)),
        }
    }

    fn get_member(&mut self, target: &Value, key: &Value) -> Flow<Value> {
        if let (Value::Object(obj), Value::Number(n)) = (target, key) {
            if let ObjectKind::Array(items) = &obj.borrow().kind {
                if *n >= 0.0 && n.fract() == 0.0 {
                    return Ok(items.get(*n as usize).cloned().unwrap_or(Value::Undefined));
                }
            }
        }
        let key = self.to_property_key(key)?;
        self.get_property(target, &key)
    }

    pub(crate) fn set_property(&mut self, target: &Value, key: &str, value: Value) -> Flow<()> {
        let obj = match target {
            Value::Undefined | Value::Null => {
                return self.throw(
                    "TypeError",
                    &format!(
                        "Cannot set properties of {} (setting '{}')",
                        target.primitive_to_string(),
                        key
                    ),
                )
            }
            Value::Object(obj) => obj,
            _ => return Ok(()),
        };
        let max_length = self.limits.max_length;
        let mut object = obj.borrow_mut();
        if let ObjectKind::Array(items) = &mut object.kind {
            if let Some(index) = array_index(key) {
                let index = index as usize;
                if index >= items.len() {
                    if index >= max_length {
                        drop(object);
                        return self.throw("RangeError", "Invalid array length");
                    }
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                return Ok(());
            }
            if key == "length" {
                let len = value.primitive_to_number();
                if len < 0.0 || len.fract() != 0.0 || len > max_length as f64 {
                    drop(object);
                    return self.throw("RangeError", "Invalid array length");
                }
                items.resize(len as usize, Value::Undefined);
                return Ok(());
            }
        }
        object.props.insert(key, value, true);
        Ok(())
    }

    pub(crate) fn to_property_key(&mut self, key: &Value) -> Flow<Rc<str>> {
        match key {
            Value::Str(s) => Ok(s.clone()),
            Value::Object(_) => self.to_string(key),
            other => Ok(other.primitive_to_string()),
        }
    }

    /// Own enumerable keys, as `Object.keys` reports them.
    pub(crate) fn own_keys(&self, value: &Value) -> Vec<Rc<str>> {
        match value {
            Value::Str(text) => (0..text.chars().count())
                .map(|i| Rc::from(i.to_string().as_str()))
                .collect(),
            Value::Object(obj) => {
                let object = obj.borrow();
                let mut keys: Vec<Rc<str>> = match &object.kind {
                    ObjectKind::Array(items) => (0..items.len())
                        .map(|i| Rc::from(i.to_string().as_str()))
                        .collect(),
                    _ => Vec::new(),
                };
                keys.extend(object.props.keys(true));
                keys
            }
            _ => Vec::new(),
        }
    }

    fn has_property(&self, obj: &ObjRef, key: &str) -> bool {
        let mut current = Some(obj.clone());
        while let Some(object) = current {
            let o = object.borrow();
            let own = match &o.kind {
                ObjectKind::Array(items) => {
                    key == "length"
                        || array_index(key).map(|i| (i as usize) < items.len()).unwrap_or(false)
                }
                _ => false,
            };
            if own || o.props.contains(key) {
                return true;
            }
            current = o.proto.clone();
        }
        false
    }

    // ---- conversions ----

    pub(crate) fn to_primitive(&mut self, value: &Value, hint: Hint) -> Flow<Value> {
        if !matches!(value, Value::Object(_)) {
            return Ok(value.clone());
        }
        let order = match hint {
            Hint::String => ["toString", "valueOf"],
            Hint::Number => ["valueOf", "toString"],
        };
        for method in order {
            let func = self.get_property(value, method)?;
            if func.is_callable() {
                let result = self.call_function(&func, value.clone(), Vec::new())?;
                if !matches!(result, Value::Object(_)) {
                    return Ok(result);
                }
            }
        }
        self.throw("TypeError", "Cannot convert object to primitive value")
    }

    pub(crate) fn to_string(&mut self, value: &Value) -> Flow<Rc<str>> {
        match value {
            Value::Object(_) => {
                let primitive = self.to_primitive(value, Hint::String)?;
                Ok(primitive.primitive_to_string())
            }
            other => Ok(other.primitive_to_string()),
        }
    }

    pub(crate) fn to_number(&mut self, value: &Value) -> Flow<f64> {
        match value {
            Value::Object(_) => {
                let primitive = self.to_primitive(value, Hint::Number)?;
                Ok(primitive.primitive_to_number())
            }
            other => Ok(other.primitive_to_number()),
        }
    }

    /// Elements produced by iterating `value` with `for..of` or spread.
    pub(crate) fn iterate(&mut self, value: &Value) -> Flow<Vec<Value>> {
        match value {
            Value::Str(text) => Ok(text.chars().map(|c| Value::from(c.to_string())).collect()),
            Value::Object(obj) => {
                let items = match &obj.borrow().kind {
                    ObjectKind::Array(items) => Some(items.clone()),
                    ObjectKind::Set(items) => Some(items.clone()),
                    ObjectKind::Map(entries) => Some(
                        entries
                            .iter()
                            .map(|(k, v)| self.new_array(vec![k.clone(), v.clone()]))
                            .collect(),
                    ),
                    _ => None,
                };
                match items {
                    Some(items) => Ok(items),
                    None => self.throw("TypeError", "object is not iterable"),
                }
            }
            other => self.throw(
                "TypeError",
                &format!("{} is not iterable", other.primitive_to_string()),
            ),
        }
    }

    // ---- calls ----

    fn invocation(&self, callee: &Value) -> Option<Invocation> {
        let obj = callee.as_object()?;
        let object = obj.borrow();
        match &object.kind {
            ObjectKind::Function(Callable::Native { func, .. }) => Some(Invocation::Native(func.clone())),
            ObjectKind::Function(Callable::Bound { target, this, args }) => {
                Some(Invocation::Bound(target.clone(), this.clone(), args.clone()))
            }
            ObjectKind::Function(Callable::Closure {
                def,
                env,
                home,
                class,
            }) => Some(Invocation::Closure(
                def.clone(),
                env.clone(),
                home.clone(),
                class.clone(),
            )),
            _ => None,
        }
    }

    pub(crate) fn call_function(&mut self, callee: &Value, this: Value, args: Vec<Value>) -> Flow<Value> {
        self.tick()?;
        match self.invocation(callee) {
            Some(Invocation::Native(func)) => self.nested(|interp| func(interp, &this, &args)),
            Some(Invocation::Bound(target, bound_this, mut bound_args)) => {
                bound_args.extend(args);
                self.call_function(&target, bound_this, bound_args)
            }
            Some(Invocation::Closure(def, env, home, class)) => {
                if class.is_some() {
                    let name = def.name.clone().unwrap_or_default();
                    return self.throw(
                        "TypeError",
                        &format!("Class constructor {} cannot be invoked without 'new'", name),
                    );
                }
                self.invoke_closure(&def, &env, home, this, args, None)
            }
            None => self.throw("TypeError", "value is not a function"),
        }
    }

    fn invoke_closure(
        &mut self,
        def: &Rc<FunctionDef>,
        env: &Env,
        home: Option<ObjRef>,
        this: Value,
        args: Vec<Value>,
        class_fn: Option<Value>,
    ) -> Flow<Value> {
        if self.depth >= self.limits.max_call_depth {
            return self.throw("RangeError", "Maximum call stack size exceeded");
        }
        self.depth += 1;
        let result = self.invoke_closure_body(def, env, home, this, args, class_fn);
        self.depth -= 1;
        result
    }

    fn invoke_closure_body(
        &mut self,
        def: &Rc<FunctionDef>,
        env: &Env,
        home: Option<ObjRef>,
        this: Value,
        args: Vec<Value>,
        class_fn: Option<Value>,
    ) -> Flow<Value> {
        let scope = new_scope(Some(env), !def.is_arrow);
        if !def.is_arrow {
            declare(&scope, "this", this, false, true);
            if let Some(home) = home {
                declare(&scope, "%home", Value::Object(home), false, true);
            }
            if let Some(class_fn) = class_fn {
                declare(&scope, "%class", class_fn, false, true);
            }
            let arguments = self.new_array(args.clone());
            declare(&scope, "arguments", arguments, true, true);
        }

        let mut args = args.into_iter();
        for param in &def.params {
            let value = args.next().unwrap_or(Value::Undefined);
            self.bind_pattern(param, value, &scope, BindMode::Declare(DeclKind::Let))?;
        }
        if let Some(rest) = &def.rest {
            let remaining = self.new_array(args.collect());
            self.bind_pattern(rest, remaining, &scope, BindMode::Declare(DeclKind::Let))?;
        }

        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
            FunctionBody::Block(body) => {
                self.hoist(body, &scope, true)?;
                for stmt in body {
                    if let Completion::Return(value) = self.exec(stmt, &scope, None)? {
                        return Ok(value);
                    }
                }
                Ok(Value::Undefined)
            }
        }
    }

    pub(crate) fn construct(&mut self, callee: &Value, args: Vec<Value>) -> Flow<Value> {
        self.tick()?;
        match self.invocation(callee) {
            Some(Invocation::Native(func)) => func(self, &Value::Undefined, &args),
            Some(Invocation::Bound(target, _, mut bound_args)) => {
                bound_args.extend(args);
                self.construct(&target, bound_args)
            }
            Some(Invocation::Closure(def, env, home, class)) => {
                if def.is_arrow {
                    return self.throw("TypeError", "Arrow functions are not constructors");
                }
                let proto = match self.get_property(callee, "prototype")? {
                    Value::Object(proto) => proto,
                    _ => self.realm.object_proto.clone(),
                };
                let this = Value::Object(Object::new(ObjectKind::Plain, Some(proto)));
                if class.is_some() {
                    self.construct_class(callee, &this, args)?;
                    return Ok(this);
                }
                let result = self.invoke_closure(&def, &env, home, this.clone(), args, None)?;
                Ok(match result {
                    Value::Object(_) => result,
                    _ => this,
                })
            }
            None => self.throw("TypeError", "value is not a constructor"),
        }
    }

    fn construct_class(&mut self, class_fn: &Value, this: &Value, args: Vec<Value>) -> Flow<()> {
        let (def, env, home, class) = match self.invocation(class_fn) {
            Some(Invocation::Closure(def, env, home, Some(class))) => (def, env, home, class),
            _ => return self.throw("TypeError", "value is not a class"),
        };
        match &class.def.constructor {
            Some(_) => {
                if class.parent.is_none() {
                    self.init_fields(&class, this)?;
                }
                self.invoke_closure(&def, &env, home, this.clone(), args, Some(class_fn.clone()))?;
            }
            None => {
                if let Some(parent) = &class.parent {
                    self.super_construct(parent, this, args)?;
                }
                self.init_fields(&class, this)?;
            }
        }
        Ok(())
    }

    fn super_construct(&mut self, parent: &Value, this: &Value, args: Vec<Value>) -> Flow<()> {
        match self.invocation(parent) {
            Some(Invocation::Closure(_, _, _, Some(_))) => self.construct_class(parent, this, args),
            Some(Invocation::Closure(def, env, home, None)) => {
                self.invoke_closure(&def, &env, home, this.clone(), args, None)?;
                Ok(())
            }
            Some(_) => {
                self.call_function(parent, this.clone(), args)?;
                Ok(())
            }
            None => self.throw("TypeError", "Super constructor is not a constructor"),
        }
    }

    fn init_fields(&mut self, class: &ClassInfo, this: &Value) -> Flow<()> {
        for member in &class.def.members {
            if member.is_static {
                continue;
            }
            if let ClassMemberKind::Field(init) = &member.kind {
                let scope = new_scope(Some(&class.env), true);
                declare(&scope, "this", this.clone(), false, true);
                let key = self.prop_key(&member.key, &scope)?;
                let value = match init {
                    Some(expr) => self.eval(expr, &scope)?,
                    None => Value::Undefined,
                };
                self.set_property(this, &key, value)?;
            }
        }
        Ok(())
    }

    fn eval_class(&mut self, def: &Rc<ClassDef>, env: &Env) -> Flow<Value> {
        let parent = match &def.extends {
            Some(expr) => {
                let parent = self.eval(expr, env)?;
                if !parent.is_callable() {
                    return self.throw(
                        "TypeError",
                        "Class extends value is not a constructor or null",
                    );
                }
                Some(parent)
            }
            None => None,
        };
        let proto_parent = match &parent {
            Some(parent) => match self.get_property(parent, "prototype")? {
                Value::Object(proto) => proto,
                _ => self.realm.object_proto.clone(),
            },
            None => self.realm.object_proto.clone(),
        };
        let proto = Object::new(ObjectKind::Plain, Some(proto_parent));
        let class_env = new_scope(Some(env), false);
        let info = Rc::new(ClassInfo {
            def: def.clone(),
            env: class_env.clone(),
            parent: parent.clone(),
        });
        let ctor_def = def.constructor.clone().unwrap_or_else(|| {
            Rc::new(FunctionDef {
                name: def.name.clone(),
                params: Vec::new(),
                rest: None,
                body: FunctionBody::Block(Vec::new()),
                is_arrow: false,
            })
        });
        let ctor = self.make_closure(&ctor_def, &class_env, Some(proto.clone()), Some(info));
        {
            let mut c = ctor.borrow_mut();
            c.props.insert("name", Value::from(def.name.clone().unwrap_or_default()), false);
            c.props.insert("prototype", Value::Object(proto.clone()), false);
            if let Some(Value::Object(parent_ctor)) = &parent {
                c.proto = Some(parent_ctor.clone());
            }
        }
        proto
            .borrow_mut()
            .props
            .insert("constructor", Value::Object(ctor.clone()), false);
        let ctor_value = Value::Object(ctor.clone());

        for member in &def.members {
            let key = self.prop_key(&member.key, &class_env)?;
            let target = if member.is_static { ctor.clone() } else { proto.clone() };
            match &member.kind {
                ClassMemberKind::Method(method) => {
                    let function = self.make_closure(method, &class_env, Some(target.clone()), None);
                    function.borrow_mut().props.insert("name", Value::from(key.as_ref()), false);
                    target
                        .borrow_mut()
                        .props
                        .insert(&key, Value::Object(function), false);
                }
                ClassMemberKind::Field(init) if member.is_static => {
                    let scope = new_scope(Some(&class_env), true);
                    declare(&scope, "this", ctor_value.clone(), false, true);
                    let value = match init {
                        Some(expr) => self.eval(expr, &scope)?,
                        None => Value::Undefined,
                    };
                    self.set_property(&ctor_value, &key, value)?;
                }
                ClassMemberKind::Field(_) => {}
            }
        }
        if let Some(name) = &def.name {
            declare(&class_env, name, ctor_value.clone(), false, true);
        }
        Ok(ctor_value)
    }

    // ---- bindings ----

    fn lookup(&mut self, env: &Env, name: &str) -> Flow<Value> {
        let mut current = env.clone();
        loop {
            let next = {
                let scope = current.borrow();
                if let Some(binding) = scope.vars.get(name) {
                    if !binding.initialized {
                        return self.throw(
                            "ReferenceError",
                            &format!("Cannot access '{}' before initialization", name),
                        );
                    }
                    return Ok(binding.value.clone());
                }
                scope.parent.clone()
            };
            match next {
                Some(parent) => current = parent,
                None => return self.throw("ReferenceError", &format!("{} is not defined", name)),
            }
        }
    }

    fn assign_binding(&mut self, env: &Env, name: &str, value: Value) -> Flow<()> {
        let mut current = env.clone();
        loop {
            let next = {
                let mut scope = current.borrow_mut();
                if let Some(binding) = scope.vars.get_mut(name) {
                    if !binding.initialized {
                        drop(scope);
                        return self.throw(
                            "ReferenceError",
                            &format!("Cannot access '{}' before initialization", name),
                        );
                    }
                    if !binding.mutable {
                        drop(scope);
                        return self.throw("TypeError", "Assignment to constant variable.");
                    }
                    binding.value = value;
                    return Ok(());
                }
                scope.parent.clone()
            };
            match next {
                Some(parent) => current = parent,
                None => {
                    // sloppy-mode implicit global
                    declare(&current, name, value, true, true);
                    return Ok(());
                }
            }
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, env: &Env, mode: BindMode) -> Flow<()> {
        match pattern {
            Pattern::Ident(name) => match mode {
                BindMode::Declare(DeclKind::Var) | BindMode::Assign => {
                    self.assign_binding(env, name, value)
                }
                BindMode::Declare(kind) => {
                    declare(env, name, value, kind != DeclKind::Const, true);
                    Ok(())
                }
            },
            Pattern::Expr(target) => {
                let reference = self.reference(target, env)?;
                self.put_reference(&reference, value, env)
            }
            Pattern::Default(inner, default) => {
                let value = match value {
                    Value::Undefined => self.eval(default, env)?,
                    other => other,
                };
                self.bind_pattern(inner, value, env, mode)
            }
            Pattern::Array(items, rest) => {
                if value.is_nullish() {
                    return self.throw(
                        "TypeError",
                        &format!("{} is not iterable", value.primitive_to_string()),
                    );
                }
                let values = self.iterate(&value)?;
                let mut values = values.into_iter();
                for item in items {
                    let next = values.next().unwrap_or(Value::Undefined);
                    if let Some(item) = item {
                        self.bind_pattern(item, next, env, mode)?;
                    }
                }
                if let Some(rest) = rest {
                    let remaining = self.new_array(values.collect());
                    self.bind_pattern(rest, remaining, env, mode)?;
                }
                Ok(())
            }
            Pattern::Object(props, rest) => {
                if value.is_nullish() {
                    return self.throw(
                        "TypeError",
                        &format!("Cannot destructure '{}' as it is {}.", value.primitive_to_string(), value.primitive_to_string()),
                    );
                }
                let mut used = Vec::new();
                for (key, target) in props {
                    let key = self.prop_key(key, env)?;
                    let item = self.get_property(&value, &key)?;
                    used.push(key);
                    self.bind_pattern(target, item, env, mode)?;
                }
                if let Some(rest) = rest {
                    let copy = self.new_object();
                    for key in self.own_keys(&value) {
                        if used.contains(&key) {
                            continue;
                        }
                        let item = self.get_property(&value, &key)?;
                        copy.borrow_mut().props.insert(&key, item, true);
                    }
                    self.bind_pattern(rest, Value::Object(copy), env, mode)?;
                }
                Ok(())
            }
        }
    }

    fn prop_key(&mut self, key: &PropKey, env: &Env) -> Flow<Rc<str>> {
        match key {
            PropKey::Named(name) => Ok(Rc::from(name.as_str())),
            PropKey::Computed(expr) => {
                let value = self.eval(expr, env)?;
                self.to_property_key(&value)
            }
        }
    }

    fn reference(&mut self, expr: &Expr, env: &Env) -> Flow<Reference> {
        match expr {
            Expr::Ident(name) => Ok(Reference::Binding(name.clone())),
            Expr::Member { object, property, .. } => {
                let object = self.eval(object, env)?;
                let key = self.prop_key(property, env)?;
                Ok(Reference::Property(object, key))
            }
            _ => self.throw("SyntaxError", "Invalid left-hand side in assignment"),
        }
    }

    fn get_reference(&mut self, reference: &Reference, env: &Env) -> Flow<Value> {
        match reference {
            Reference::Binding(name) => self.lookup(env, name),
            Reference::Property(object, key) => self.get_property(object, key),
        }
    }

    fn put_reference(&mut self, reference: &Reference, value: Value, env: &Env) -> Flow<()> {
        match reference {
            Reference::Binding(name) => self.assign_binding(env, name, value),
            Reference::Property(object, key) => self.set_property(object, key, value),
        }
    }

    fn pattern_reference(&mut self, pattern: &Pattern, env: &Env) -> Flow<Reference> {
        match pattern {
            Pattern::Ident(name) => Ok(Reference::Binding(name.clone())),
            Pattern::Expr(expr) => self.reference(expr, env),
            _ => self.throw("SyntaxError", "Invalid left-hand side in assignment"),
        }
    }

    // ---- hoisting ----

    fn hoist(&mut self, body: &[Stmt], env: &Env, function_level: bool) -> Flow<()> {
        if function_level {
            let mut names = Vec::new();
            for stmt in body {
                collect_var_names(stmt, &mut names);
            }
            let target = function_scope(env);
            for name in names {
                let exists = target.borrow().vars.contains_key(&name);
                if !exists {
                    declare(&target, &name, Value::Undefined, true, true);
                }
            }
        }
        for stmt in body {
            match stmt {
                Stmt::Function(def) => {
                    let function = self.make_closure(def, env, None, None);
                    if let Some(name) = &def.name {
                        declare(env, name, Value::Object(function), true, true);
                    }
                }
                Stmt::Decl(kind, decls) if *kind != DeclKind::Var => {
                    for (pattern, _) in decls {
                        let mut names = Vec::new();
                        pattern_names(pattern, &mut names);
                        for name in names {
                            declare(env, &name, Value::Undefined, *kind != DeclKind::Const, false);
                        }
                    }
                }
                Stmt::Class(def) => {
                    if let Some(name) = &def.name {
                        declare(env, name, Value::Undefined, true, false);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ---- statements ----

    fn exec_block(&mut self, body: &[Stmt], env: &Env) -> Flow<Completion> {
        let scope = new_scope(Some(env), false);
        self.hoist(body, &scope, false)?;
        self.exec_list(body, &scope)
    }

    fn exec_list(&mut self, body: &[Stmt], env: &Env) -> Flow<Completion> {
        for stmt in body {
            match self.exec(stmt, env, None)? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env, label: Option<&str>) -> Flow<Completion> {
        self.nested(|interp| interp.exec_stmt(stmt, env, label))
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Env, label: Option<&str>) -> Flow<Completion> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                let value = self.eval(expr, env)?;
                if self.depth == 0 {
                    self.last_value = value;
                }
                Ok(Completion::Normal)
            }
            Stmt::Decl(kind, decls) => {
                self.exec_declarations(*kind, decls, env)?;
                Ok(Completion::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Completion::Normal),
            Stmt::Class(def) => {
                let class = self.eval_class(def, env)?;
                if let Some(name) = &def.name {
                    declare(env, name, class, true, true);
                }
                Ok(Completion::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            Stmt::If(test, consequent, alternate) => {
                if self.eval(test, env)?.truthy() {
                    self.exec(consequent, env, None)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, env, None)
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::Block(body) => self.exec_block(body, env),
            Stmt::While(test, body) => {
                loop {
                    self.tick()?;
                    if !self.eval(test, env)?.truthy() {
                        break;
                    }
                    match self.exec(body, env, None)? {
                        Completion::Normal => {}
                        other => match loop_control(other, label) {
                            LoopStep::Next => {}
                            LoopStep::Exit => break,
                            LoopStep::Propagate(c) => return Ok(c),
                        },
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::DoWhile(body, test) => {
                loop {
                    self.tick()?;
                    match self.exec(body, env, None)? {
                        Completion::Normal => {}
                        other => match loop_control(other, label) {
                            LoopStep::Next => {}
                            LoopStep::Exit => break,
                            LoopStep::Propagate(c) => return Ok(c),
                        },
                    }
                    if !self.eval(test, env)?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_ref(), test.as_ref(), update.as_ref(), body, env, label),
            Stmt::ForOf(kind, pattern, iterable, body) => {
                let iterable = self.eval(iterable, env)?;
                let items = self.iterate(&iterable)?;
                self.exec_for_each(*kind, pattern, items, body, env, label)
            }
            Stmt::ForIn(kind, pattern, object, body) => {
                let object = self.eval(object, env)?;
                let keys = self.for_in_keys(&object);
                let keys = keys.into_iter().map(Value::Str).collect();
                self.exec_for_each(*kind, pattern, keys, body, env, label)
            }
            Stmt::Break(target) => Ok(Completion::Break(target.clone())),
            Stmt::Continue(target) => Ok(Completion::Continue(target.clone())),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, env)?;
                Err(Abrupt::Throw(value))
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let mut result = self.exec_block(block, env);
                if let Some(handler) = handler {
                    if let Err(Abrupt::Throw(error)) = result {
                        let scope = new_scope(Some(env), false);
                        result = match param {
                            Some(param) => self
                                .bind_pattern(param, error, &scope, BindMode::Declare(DeclKind::Let))
                                .and_then(|_| self.exec_block(handler, &scope)),
                            None => self.exec_block(handler, &scope),
                        };
                    }
                }
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer, env)? {
                        Completion::Normal => {}
                        abrupt => return Ok(abrupt),
                    }
                }
                result
            }
            Stmt::Switch(discriminant, cases) => {
                let value = self.eval(discriminant, env)?;
                let scope = new_scope(Some(env), false);
                let all: Vec<Stmt> = cases.iter().flat_map(|(_, body)| body.iter().cloned()).collect();
                self.hoist(&all, &scope, false)?;

                let mut start = None;
                for (index, (test, _)) in cases.iter().enumerate() {
                    if let Some(test) = test {
                        let candidate = self.eval(test, &scope)?;
                        if strict_equals(&value, &candidate) {
                            start = Some(index);
                            break;
                        }
                    }
                }
                let start = start.or_else(|| cases.iter().position(|(test, _)| test.is_none()));
                if let Some(start) = start {
                    for (_, body) in &cases[start..] {
                        match self.exec_list(body, &scope)? {
                            Completion::Normal => {}
                            Completion::Break(None) => return Ok(Completion::Normal),
                            other => return Ok(other),
                        }
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::Labeled(name, body) => match self.exec(body, env, Some(name))? {
                Completion::Break(Some(target)) if &target == name => Ok(Completion::Normal),
                other => Ok(other),
            },
        }
    }

    fn exec_declarations(
        &mut self,
        kind: DeclKind,
        decls: &[(Pattern, Option<Expr>)],
        env: &Env,
    ) -> Flow<()> {
        for (pattern, init) in decls {
            let value = match init {
                Some(expr) => {
                    let value = self.eval(expr, env)?;
                    if let (Pattern::Ident(name), Expr::Function(def)) = (pattern, expr) {
                        if def.name.is_none() {
                            name_function(&value, name);
                        }
                    }
                    value
                }
                None if kind == DeclKind::Var => continue,
                None => Value::Undefined,
            };
            self.bind_pattern(pattern, value, env, BindMode::Declare(kind))?;
        }
        Ok(())
    }

    fn exec_for(
        &mut self,
        init: Option<&ForInit>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        env: &Env,
        label: Option<&str>,
    ) -> Flow<Completion> {
        let loop_env = new_scope(Some(env), false);
        let per_iteration = match init {
            Some(ForInit::Decl(kind, decls)) => {
                let hoisted = Stmt::Decl(*kind, decls.clone());
                self.hoist(std::slice::from_ref(&hoisted), &loop_env, false)?;
                self.exec_declarations(*kind, decls, &loop_env)?;
                *kind != DeclKind::Var
            }
            Some(ForInit::Expr(expr)) => {
                self.eval(expr, &loop_env)?;
                false
            }
            None => false,
        };

        let mut iter_env = if per_iteration { copy_scope(&loop_env) } else { loop_env };
        loop {
            self.tick()?;
            if let Some(test) = test {
                if !self.eval(test, &iter_env)?.truthy() {
                    break;
                }
            }
            match self.exec(body, &iter_env, None)? {
                Completion::Normal => {}
                other => match loop_control(other, label) {
                    LoopStep::Next => {}
                    LoopStep::Exit => break,
                    LoopStep::Propagate(c) => return Ok(c),
                },
            }
            if per_iteration {
                iter_env = copy_scope(&iter_env);
            }
            if let Some(update) = update {
                self.eval(update, &iter_env)?;
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_for_each(
        &mut self,
        kind: Option<DeclKind>,
        pattern: &Pattern,
        items: Vec<Value>,
        body: &Stmt,
        env: &Env,
        label: Option<&str>,
    ) -> Flow<Completion> {
        for item in items {
            self.tick()?;
            let iter_env = new_scope(Some(env), false);
            let mode = match kind {
                Some(kind) => BindMode::Declare(kind),
                None => BindMode::Assign,
            };
            self.bind_pattern(pattern, item, &iter_env, mode)?;
            match self.exec(body, &iter_env, None)? {
                Completion::Normal => {}
                other => match loop_control(other, label) {
                    LoopStep::Next => {}
                    LoopStep::Exit => break,
                    LoopStep::Propagate(c) => return Ok(c),
                },
            }
        }
        Ok(Completion::Normal)
    }

    fn for_in_keys(&self, value: &Value) -> Vec<Rc<str>> {
        let mut keys = self.own_keys(value);
        if let Value::Object(obj) = value {
            let mut current = obj.borrow().proto.clone();
            while let Some(proto) = current {
                let p = proto.borrow();
                for key in p.props.keys(true) {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                current = p.proto.clone();
            }
        }
        keys
    }

    // ---- expressions ----

    pub(crate) fn eval(&mut self, expr: &Expr, env: &Env) -> Flow<Value> {
        self.nested(|interp| interp.eval_expr(expr, env))
    }

    fn eval_expr(&mut self, expr: &Expr, env: &Env) -> Flow<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => {
                            let value = self.eval(expr, env)?;
                            let text = self.to_string(&value)?;
                            self.check_string_length(out.len() + text.len())?;
                            out.push_str(&text);
                        }
                    }
                }
                Ok(Value::from(out))
            }
            Expr::Ident(name) => self.lookup(env, name),
            Expr::This => self.lookup(env, "this"),
            Expr::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        None => items.push(Value::Undefined),
                        Some(Expr::Spread(inner)) => {
                            let value = self.eval(inner, env)?;
                            items.extend(self.iterate(&value)?);
                            self.check_array_length(items.len())?;
                        }
                        Some(expr) => items.push(self.eval(expr, env)?),
                    }
                }
                Ok(self.new_array(items))
            }
            Expr::Object(props) => self.eval_object(props, env),
            Expr::Function(def) => Ok(Value::Object(self.make_closure(def, env, None, None))),
            Expr::Class(def) => self.eval_class(def, env),
            Expr::Unary(op, operand) => self.eval_unary(op, operand, env),
            Expr::Update { op, prefix, target } => {
                let reference = self.reference(target, env)?;
                let old = self.get_reference(&reference, env)?;
                let old = self.to_number(&old)?;
                let new = if *op == "++" { old + 1.0 } else { old - 1.0 };
                self.put_reference(&reference, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(op, &left, &right)
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left, env)?;
                let short_circuit = match *op {
                    "&&" => !left.truthy(),
                    "||" => left.truthy(),
                    _ => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Assign(op, target, value) => self.eval_assign(op, target, value, env),
            Expr::Conditional(test, consequent, alternate) => {
                if self.eval(test, env)?.truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Member { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr, env)?.unwrap_or(Value::Undefined))
            }
            Expr::New(callee, args) => {
                let constructor = self.eval(callee, env)?;
                let args = self.eval_args(args, env)?;
                if !constructor.is_callable() {
                    return self.throw(
                        "TypeError",
                        &format!("{} is not a constructor", describe(callee)),
                    );
                }
                self.construct(&constructor, args)
            }
            Expr::Spread(_) => self.throw("SyntaxError", "Unexpected spread"),
            Expr::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item, env)?;
                }
                Ok(last)
            }
            Expr::SuperCall(args) => {
                let class_fn = self.lookup(env, "%class").map_err(|_| ()).ok();
                let class = class_fn.as_ref().and_then(|f| match self.invocation(f) {
                    Some(Invocation::Closure(_, _, _, Some(class))) => Some(class),
                    _ => None,
                });
                let class = match class {
                    Some(class) => class,
                    None => return self.throw("SyntaxError", "'super' keyword unexpected here"),
                };
                let parent = match &class.parent {
                    Some(parent) => parent.clone(),
                    None => return self.throw("SyntaxError", "'super' keyword unexpected here"),
                };
                let this = self.lookup(env, "this")?;
                let args = self.eval_args(args, env)?;
                self.super_construct(&parent, &this, args)?;
                self.init_fields(&class, &this)?;
                Ok(Value::Undefined)
            }
            Expr::SuperMember(key) => {
                let key = self.prop_key(key, env)?;
                self.super_property(&key, env)
            }
        }
    }

    fn super_property(&mut self, key: &str, env: &Env) -> Flow<Value> {
        let home = match self.lookup(env, "%home") {
            Ok(Value::Object(home)) => home,
            _ => return self.throw("SyntaxError", "'super' keyword unexpected here"),
        };
        let proto = home.borrow().proto.clone();
        Ok(match proto {
            Some(proto) => object_get(&proto, key),
            None => Value::Undefined,
        })
    }

    fn eval_object(&mut self, props: &[Prop], env: &Env) -> Flow<Value> {
        let object = self.new_object();
        for prop in props {
            match prop {
                Prop::KeyValue(key, value) => {
                    let key = self.prop_key(key, env)?;
                    let value = self.eval(value, env)?;
                    if let Prop::KeyValue(_, Expr::Function(def)) = prop {
                        if def.name.is_none() {
                            name_function(&value, &key);
                        }
                    }
                    object.borrow_mut().props.insert(&key, value, true);
                }
                Prop::Spread(source) => {
                    let source = self.eval(source, env)?;
                    for key in self.own_keys(&source) {
                        let value = self.get_property(&source, &key)?;
                        object.borrow_mut().props.insert(&key, value, true);
                    }
                }
            }
        }
        Ok(Value::Object(object))
    }

    fn eval_unary(&mut self, op: &str, operand: &Expr, env: &Env) -> Flow<Value> {
        match op {
            "typeof" => {
                if let Expr::Ident(name) = operand {
                    return match self.lookup(env, name) {
                        Ok(value) => Ok(Value::from(value.type_of())),
                        Err(Abrupt::Throw(_)) if !is_declared(env, name) => Ok(Value::from("undefined")),
                        Err(err) => Err(err),
                    };
                }
                let value = self.eval(operand, env)?;
                Ok(Value::from(value.type_of()))
            }
            "delete" => match operand {
                Expr::Member { object, property, .. } => {
                    let object = self.eval(object, env)?;
                    let key = self.prop_key(property, env)?;
                    if let Value::Object(obj) = &object {
                        let mut o = obj.borrow_mut();
                        if let ObjectKind::Array(items) = &mut o.kind {
                            if let Some(index) = array_index(&key) {
                                if let Some(slot) = items.get_mut(index as usize) {
                                    *slot = Value::Undefined;
                                }
                                return Ok(Value::Bool(true));
                            }
                        }
                        o.props.remove(&key);
                    }
                    Ok(Value::Bool(true))
                }
                _ => Ok(Value::Bool(true)),
            },
            _ => {
                let value = self.eval(operand, env)?;
                match op {
                    "!" => Ok(Value::Bool(!value.truthy())),
                    "-" => Ok(Value::Number(-self.to_number(&value)?)),
                    "+" => Ok(Value::Number(self.to_number(&value)?)),
                    "~" => Ok(Value::Number(!to_int32(self.to_number(&value)?) as f64)),
                    _ => Ok(Value::Undefined),
                }
            }
        }
    }

    fn eval_assign(&mut self, op: &str, target: &Pattern, value: &Expr, env: &Env) -> Flow<Value> {
        if op == "=" {
            let result = self.eval(value, env)?;
            if let (Pattern::Ident(name), Expr::Function(def)) = (target, value) {
                if def.name.is_none() {
                    name_function(&result, name);
                }
            }
            self.bind_pattern(target, result.clone(), env, BindMode::Assign)?;
            return Ok(result);
        }

        let reference = self.pattern_reference(target, env)?;
        let current = self.get_reference(&reference, env)?;
        let result = match op {
            "&&=" | "||=" | "??=" => {
                let keep = match op {
                    "&&=" => !current.truthy(),
                    "||=" => current.truthy(),
                    _ => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                self.eval(value, env)?
            }
            _ => {
                let right = self.eval(value, env)?;
                self.binary(&op[..op.len() - 1], &current, &right)?
            }
        };
        self.put_reference(&reference, result.clone(), env)?;
        Ok(result)
    }

    fn eval_args(&mut self, args: &[Expr], env: &Env) -> Flow<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Expr::Spread(inner) => {
                    let value = self.eval(inner, env)?;
                    values.extend(self.iterate(&value)?);
                    self.check_array_length(values.len())?;
                }
                other => values.push(self.eval(other, env)?),
            }
        }
        Ok(values)
    }

    /// Member and call chains. `None` means an optional link short-circuited.
    fn eval_chain(&mut self, expr: &Expr, env: &Env) -> Flow<Option<Value>> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let base = match self.eval_chain(object, env)? {
                    Some(base) => base,
                    None => return Ok(None),
                };
                if *optional && base.is_nullish() {
                    return Ok(None);
                }
                let value = match property.as_ref() {
                    PropKey::Named(name) => self.get_property(&base, name)?,
                    PropKey::Computed(key) => {
                        let key = self.eval(key, env)?;
                        self.get_member(&base, &key)?
                    }
                };
                Ok(Some(value))
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => {
                let (function, this) = match callee.as_ref() {
                    Expr::Member {
                        object,
                        property,
                        optional: member_optional,
                    } => {
                        let base = match self.eval_chain(object, env)? {
                            Some(base) => base,
                            None => return Ok(None),
                        };
                        if *member_optional && base.is_nullish() {
                            return Ok(None);
                        }
                        let function = match property.as_ref() {
                            PropKey::Named(name) => self.get_property(&base, name)?,
                            PropKey::Computed(key) => {
                                let key = self.eval(key, env)?;
                                self.get_member(&base, &key)?
                            }
                        };
                        (function, base)
                    }
                    Expr::SuperMember(key) => {
                        let key = self.prop_key(key, env)?;
                        let function = self.super_property(&key, env)?;
                        (function, self.lookup(env, "this")?)
                    }
                    other => match self.eval_chain(other, env)? {
                        Some(function) => (function, Value::Undefined),
                        None => return Ok(None),
                    },
                };
                if *optional && function.is_nullish() {
                    return Ok(None);
                }
                let args = self.eval_args(args, env)?;
                if !function.is_callable() {
                    return self.throw(
                        "TypeError",
                        &format!("{} is not a function", describe(callee)),
                    );
                }
                self.call_function(&function, this, args).map(Some)
            }
            other => self.eval(other, env).map(Some),
        }
    }

    pub(crate) fn binary(&mut self, op: &str, left: &Value, right: &Value) -> Flow<Value> {
        let value = match op {
            "+" => {
                let left = self.to_primitive(left, Hint::Number)?;
                let right = self.to_primitive(right, Hint::Number)?;
                if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                    let (left, right) = (left.primitive_to_string(), right.primitive_to_string());
                    self.check_string_length(left.len() + right.len())?;
                    let mut text = left.to_string();
                    text.push_str(&right);
                    Value::from(text)
                } else {
                    Value::Number(left.primitive_to_number() + right.primitive_to_number())
                }
            }
            "-" | "*" | "/" | "%" | "**" => {
                let a = self.to_number(left)?;
                let b = self.to_number(right)?;
                Value::Number(match op {
                    "-" => a - b,
                    "*" => a * b,
                    "/" => a / b,
                    "%" => a % b,
                    _ => {
                        if b.is_nan() || (a.abs() == 1.0 && b.is_infinite()) {
                            f64::NAN
                        } else {
                            a.powf(b)
                        }
                    }
                })
            }
            "&" | "|" | "^" | "<<" | ">>" | ">>>" => {
                let a = self.to_number(left)?;
                let b = self.to_number(right)?;
                let (x, shift) = (to_int32(a), to_uint32(b) & 31);
                Value::Number(match op {
                    "&" => (x & to_int32(b)) as f64,
                    "|" => (x | to_int32(b)) as f64,
                    "^" => (x ^ to_int32(b)) as f64,
                    "<<" => x.wrapping_shl(shift) as f64,
                    ">>" => (x >> shift) as f64,
                    _ => (to_uint32(a) >> shift) as f64,
                })
            }
            "<" | ">" | "<=" | ">=" => {
                let a = self.to_primitive(left, Hint::Number)?;
                let b = self.to_primitive(right, Hint::Number)?;
                let ordering = match (&a, &b) {
                    (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
                    _ => a.primitive_to_number().partial_cmp(&b.primitive_to_number()),
                };
                Value::Bool(match ordering {
                    None => false,
                    Some(ordering) => match op {
                        "<" => ordering.is_lt(),
                        ">" => ordering.is_gt(),
                        "<=" => ordering.is_le(),
                        _ => ordering.is_ge(),
                    },
                })
            }
            "===" => Value::Bool(strict_equals(left, right)),
            "!==" => Value::Bool(!strict_equals(left, right)),
            "==" => Value::Bool(self.loose_equals(left, right)?),
            "!=" => Value::Bool(!self.loose_equals(left, right)?),
            "instanceof" => Value::Bool(self.instance_of(left, right)?),
            "in" => {
                let key = self.to_property_key(left)?;
                match right {
                    Value::Object(obj) => Value::Bool(self.has_property(obj, &key)),
                    other => {
                        return self.throw(
                            "TypeError",
                            &format!(
                                "Cannot use 'in' operator to search for '{}' in {}",
                                key,
                                other.primitive_to_string()
                            ),
                        )
                    }
                }
            }
            _ => return self.throw("SyntaxError", &format!("Unknown operator {}", op)),
        };
        Ok(value)
    }

    fn loose_equals(&mut self, left: &Value, right: &Value) -> Flow<bool> {
        Ok(match (left, right) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Object(_), _) => {
                let left = self.to_primitive(left, Hint::Number)?;
                return self.loose_equals(&left, right);
            }
            (_, Value::Object(_)) => {
                let right = self.to_primitive(right, Hint::Number)?;
                return self.loose_equals(left, &right);
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (a, b) => a.primitive_to_number() == b.primitive_to_number(),
        })
    }

    pub(crate) fn instance_of(&mut self, value: &Value, constructor: &Value) -> Flow<bool> {
        if !constructor.is_callable() {
            return self.throw("TypeError", "Right-hand side of 'instanceof' is not callable");
        }
        if let Some(Invocation::Bound(target, _, _)) = self.invocation(constructor) {
            return self.instance_of(value, &target);
        }
        let proto = match self.get_property(constructor, "prototype")? {
            Value::Object(proto) => proto,
            _ => return Ok(false),
        };
        Ok(match value {
            Value::Object(obj) => {
                let start = obj.borrow().proto.clone();
                start.map(|s| proto_chain_contains(&s, &proto)).unwrap_or(false)
            }
            _ => false,
        })
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        // closures stored in globals point back at the global scope
        self.global.borrow_mut().vars.clear();
        for proto in [
            &self.realm.object_proto,
            &self.realm.function_proto,
            &self.realm.array_proto,
            &self.realm.string_proto,
            &self.realm.number_proto,
            &self.realm.boolean_proto,
            &self.realm.map_proto,
            &self.realm.set_proto,
        ] {
            proto.borrow_mut().props.clear();
        }
        for proto in self.realm.error_protos.values() {
            proto.borrow_mut().props.clear();
        }
    }
}

enum LoopStep {
    Next,
    Exit,
    Propagate(Completion),
}

fn loop_control(completion: Completion, label: Option<&str>) -> LoopStep {
    match completion {
        Completion::Break(None) => LoopStep::Exit,
        Completion::Continue(None) => LoopStep::Next,
        Completion::Break(Some(target)) if Some(target.as_str()) == label => LoopStep::Exit,
        Completion::Continue(Some(target)) if Some(target.as_str()) == label => LoopStep::Next,
        other => LoopStep::Propagate(other),
    }
}

/// Own property, then the prototype chain.
pub(crate) fn object_get(obj: &ObjRef, key: &str) -> Value {
    let mut current = obj.clone();
    loop {
        let next = {
            let object = current.borrow();
            match &object.kind {
                ObjectKind::Array(items) => {
                    if key == "length" {
                        return Value::Number(items.len() as f64);
                    }
                    if let Some(index) = array_index(key) {
                        return items.get(index as usize).cloned().unwrap_or(Value::Undefined);
                    }
                }
                ObjectKind::Map(entries) if key == "size" => {
                    return Value::Number(entries.len() as f64)
                }
                ObjectKind::Set(items) if key == "size" => return Value::Number(items.len() as f64),
                _ => {}
            }
            if let Some(prop) = object.props.get(key) {
                return prop.value.clone();
            }
            object.proto.clone()
        };
        match next {
            Some(proto) => current = proto,
            None => return Value::Undefined,
        }
    }
}

pub(crate) fn proto_chain_contains(start: &ObjRef, target: &ObjRef) -> bool {
    let mut current = Some(start.clone());
    while let Some(obj) = current {
        if Rc::ptr_eq(&obj, target) {
            return true;
        }
        current = obj.borrow().proto.clone();
    }
    false
}

fn is_declared(env: &Env, name: &str) -> bool {
    let mut current = Some(env.clone());
    while let Some(scope) = current {
        if scope.borrow().vars.contains_key(name) {
            return true;
        }
        current = scope.borrow().parent.clone();
    }
    false
}

fn name_function(value: &Value, name: &str) {
    if let Value::Object(obj) = value {
        let mut object = obj.borrow_mut();
        if object.is_callable() {
            object.props.insert("name", Value::from(name), false);
        }
    }
}

/// Short source-like rendering of a callee for error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::This => "this".to_string(),
        Expr::Member {
            object, property, ..
        } => match property.as_ref() {
            PropKey::Named(name) => format!("{}.{}", describe(object), name),
            PropKey::Computed(_) => format!("{}[...]", describe(object)),
        },
        Expr::SuperMember(key) => match key.as_ref() {
            PropKey::Named(name) => format!("super.{}", name),
            PropKey::Computed(_) => "super[...]".to_string(),
        },
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

fn pattern_names(pattern: &Pattern, out: &mut Vec<String>) {
    match pattern {
        Pattern::Ident(name) => out.push(name.clone()),
        Pattern::Default(inner, _) => pattern_names(inner, out),
        Pattern::Array(items, rest) => {
            for item in items.iter().flatten() {
                pattern_names(item, out);
            }
            if let Some(rest) = rest {
                pattern_names(rest, out);
            }
        }
        Pattern::Object(props, rest) => {
            for (_, item) in props {
                pattern_names(item, out);
            }
            if let Some(rest) = rest {
                pattern_names(rest, out);
            }
        }
        Pattern::Expr(_) => {}
    }
}

fn collect_var_names(stmt: &Stmt, out: &mut Vec<String>) {
    match stmt {
        Stmt::Decl(DeclKind::Var, decls) => {
            for (pattern, _) in decls {
                pattern_names(pattern, out);
            }
        }
        Stmt::If(_, consequent, alternate) => {
            collect_var_names(consequent, out);
            if let Some(alternate) = alternate {
                collect_var_names(alternate, out);
            }
        }
        Stmt::Block(body) => body.iter().for_each(|s| collect_var_names(s, out)),
        Stmt::While(_, body) | Stmt::DoWhile(body, _) | Stmt::Labeled(_, body) => {
            collect_var_names(body, out)
        }
        Stmt::For { init, body, .. } => {
            if let Some(ForInit::Decl(DeclKind::Var, decls)) = init {
                for (pattern, _) in decls {
                    pattern_names(pattern, out);
                }
            }
            collect_var_names(body, out);
        }
        Stmt::ForOf(kind, pattern, _, body) | Stmt::ForIn(kind, pattern, _, body) => {
            if *kind == Some(DeclKind::Var) {
                pattern_names(pattern, out);
            }
            collect_var_names(body, out);
        }
        Stmt::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            block.iter().for_each(|s| collect_var_names(s, out));
            handler.iter().flatten().for_each(|s| collect_var_names(s, out));
            finalizer.iter().flatten().for_each(|s| collect_var_names(s, out));
        }
        Stmt::Switch(_, cases) => {
            for (_, body) in cases {
                body.iter().for_each(|s| collect_var_names(s, out));
            }
        }
        _ => {}
    }
}
