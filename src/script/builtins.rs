// Global objects available to scripts. The console writes only to the sink the
// interpreter was created with; nothing here reaches the host.

use serde::Serialize;
use std::cmp::Ordering;
use std::rc::Rc;

use super::interp::{object_get, proto_chain_contains, Flow, Interpreter};
use super::value::*;

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

pub(crate) fn install(interp: &mut Interpreter<'_>) {
    install_errors(interp);
    install_object(interp);
    install_function(interp);
    install_array(interp);
    install_string(interp);
    install_number(interp);
    install_boolean(interp);
    install_collections(interp);
    install_math(interp);
    install_json(interp);
    install_console(interp);
    install_globals(interp);
}

fn install_constructor(ctor: &Value, proto: &ObjRef) {
    if let Value::Object(obj) = ctor {
        obj.borrow_mut()
            .props
            .insert("prototype", Value::Object(proto.clone()), false);
    }
    proto.borrow_mut().props.insert("constructor", ctor.clone(), false);
}

fn set_static(ctor: &Value, name: &str, value: Value) {
    if let Value::Object(obj) = ctor {
        obj.borrow_mut().props.insert(name, value, false);
    }
}

fn define_static<F>(interp: &Interpreter<'_>, ctor: &Value, name: &str, arity: u32, func: F)
where
    F: Fn(&mut Interpreter<'_>, &Value, &[Value]) -> Flow<Value> + 'static,
{
    if let Value::Object(obj) = ctor {
        interp.define_method(obj, name, arity, func);
    }
}

// ---- errors ----

const ERROR_KINDS: &[&str] = &[
    "Error",
    "TypeError",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "EvalError",
];

fn install_errors(interp: &mut Interpreter<'_>) {
    let base = Object::new(ObjectKind::Plain, Some(interp.realm.object_proto.clone()));
    base.borrow_mut().props.insert("message", Value::from(""), false);
    interp.define_method(&base, "toString", 0, |interp, this, _| {
        let name = match interp.get_property(this, "name")? {
            Value::Undefined => Rc::from("Error"),
            other => interp.to_string(&other)?,
        };
        let message = match interp.get_property(this, "message")? {
            Value::Undefined => Rc::from(""),
            other => interp.to_string(&other)?,
        };
        Ok(Value::from(match (name.is_empty(), message.is_empty()) {
            (_, true) => name.to_string(),
            (true, false) => message.to_string(),
            (false, false) => format!("{}: {}", name, message),
        }))
    });

    for kind in ERROR_KINDS {
        let proto = if *kind == "Error" {
            base.clone()
        } else {
            Object::new(ObjectKind::Plain, Some(base.clone()))
        };
        proto.borrow_mut().props.insert("name", Value::from(*kind), false);
        interp.realm.error_protos.insert(*kind, proto.clone());

        let ctor_proto = proto.clone();
        let ctor = interp.native_function(kind, 1, move |interp, this, args| {
            // `super(message)` from a subclass initializes the existing instance
            let target = match this {
                Value::Object(obj) if proto_chain_contains(obj, &ctor_proto) => this.clone(),
                _ => Value::Object(Object::new(ObjectKind::Plain, Some(ctor_proto.clone()))),
            };
            let message = arg(args, 0);
            if !matches!(message, Value::Undefined) {
                let message = interp.to_string(&message)?;
                if let Value::Object(obj) = &target {
                    obj.borrow_mut().props.insert("message", Value::Str(message), false);
                }
            }
            if let Value::Object(options) = arg(args, 1) {
                let cause = object_get(&options, "cause");
                if let (Value::Object(obj), false) = (&target, matches!(cause, Value::Undefined)) {
                    obj.borrow_mut().props.insert("cause", cause, false);
                }
            }
            Ok(target)
        });
        install_constructor(&ctor, &proto);
        interp.define_global(kind, ctor);
    }
}

// ---- Object ----

fn install_object(interp: &mut Interpreter<'_>) {
    let proto = interp.realm.object_proto.clone();
    interp.define_method(&proto, "toString", 0, |_, this, _| {
        Ok(Value::from(match this {
            Value::Undefined => "[object Undefined]",
            Value::Null => "[object Null]",
            _ if this.is_array() => "[object Array]",
            _ => "[object Object]",
        }))
    });
    interp.define_method(&proto, "valueOf", 0, |_, this, _| Ok(this.clone()));
    interp.define_method(&proto, "hasOwnProperty", 1, |interp, this, args| {
        let key = interp.to_property_key(&arg(args, 0))?;
        let keys = interp.own_keys(this);
        let own = match this {
            Value::Object(obj) => obj.borrow().props.contains(&key),
            _ => false,
        };
        Ok(Value::Bool(own || keys.contains(&key)))
    });

    let ctor = interp.native_function("Object", 1, |interp, _, args| {
        Ok(match arg(args, 0) {
            value @ Value::Object(_) => value,
            _ => Value::Object(interp.new_object()),
        })
    });
    install_constructor(&ctor, &proto);

    define_static(interp, &ctor, "keys", 1, |interp, _, args| {
        let target = arg(args, 0);
        if target.is_nullish() {
            return interp.throw("TypeError", "Cannot convert undefined or null to object");
        }
        let keys = interp.own_keys(&target).into_iter().map(Value::Str).collect();
        Ok(interp.new_array(keys))
    });
    define_static(interp, &ctor, "values", 1, |interp, _, args| {
        let target = arg(args, 0);
        if target.is_nullish() {
            return interp.throw("TypeError", "Cannot convert undefined or null to object");
        }
        let mut values = Vec::new();
        for key in interp.own_keys(&target) {
            values.push(interp.get_property(&target, &key)?);
        }
        Ok(interp.new_array(values))
    });
    define_static(interp, &ctor, "entries", 1, |interp, _, args| {
        let target = arg(args, 0);
        if target.is_nullish() {
            return interp.throw("TypeError", "Cannot convert undefined or null to object");
        }
        let mut entries = Vec::new();
        for key in interp.own_keys(&target) {
            let value = interp.get_property(&target, &key)?;
            entries.push(interp.new_array(vec![Value::Str(key), value]));
        }
        Ok(interp.new_array(entries))
    });
    define_static(interp, &ctor, "assign", 2, |interp, _, args| {
        let target = arg(args, 0);
        if target.is_nullish() {
            return interp.throw("TypeError", "Cannot convert undefined or null to object");
        }
        for source in args.iter().skip(1) {
            for key in interp.own_keys(source) {
                let value = interp.get_property(source, &key)?;
                interp.set_property(&target, &key, value)?;
            }
        }
        Ok(target)
    });
    define_static(interp, &ctor, "fromEntries", 1, |interp, _, args| {
        let object = interp.new_object();
        for entry in interp.iterate(&arg(args, 0))? {
            let key = interp.get_property(&entry, "0")?;
            let key = interp.to_property_key(&key)?;
            let value = interp.get_property(&entry, "1")?;
            object.borrow_mut().props.insert(&key, value, true);
        }
        Ok(Value::Object(object))
    });
    define_static(interp, &ctor, "create", 2, |interp, _, args| {
        let proto = match arg(args, 0) {
            Value::Object(proto) => Some(proto),
            Value::Null => None,
            _ => return interp.throw("TypeError", "Object prototype may only be an Object or null"),
        };
        Ok(Value::Object(Object::new(ObjectKind::Plain, proto)))
    });
    define_static(interp, &ctor, "getPrototypeOf", 1, |interp, _, args| {
        Ok(match arg(args, 0) {
            Value::Object(obj) => {
                let proto = obj.borrow().proto.clone();
                proto.map(Value::Object).unwrap_or(Value::Null)
            }
            Value::Str(_) => Value::Object(interp.realm.string_proto.clone()),
            Value::Number(_) => Value::Object(interp.realm.number_proto.clone()),
            Value::Bool(_) => Value::Object(interp.realm.boolean_proto.clone()),
            _ => return interp.throw("TypeError", "Cannot convert undefined or null to object"),
        })
    });
    // objects are never actually frozen; only the call shape is supported
    define_static(interp, &ctor, "freeze", 1, |_, _, args| Ok(arg(args, 0)));
    define_static(interp, &ctor, "isFrozen", 1, |_, _, _| Ok(Value::Bool(false)));
    interp.define_global("Object", ctor);
}

// ---- Function ----

fn install_function(interp: &mut Interpreter<'_>) {
    let proto = interp.realm.function_proto.clone();
    interp.define_method(&proto, "call", 1, |interp, this, args| {
        let rest = args.iter().skip(1).cloned().collect();
        interp.call_function(this, arg(args, 0), rest)
    });
    interp.define_method(&proto, "apply", 2, |interp, this, args| {
        let rest = match arg(args, 1) {
            Value::Undefined | Value::Null => Vec::new(),
            list => interp.iterate(&list)?,
        };
        interp.call_function(this, arg(args, 0), rest)
    });
    interp.define_method(&proto, "bind", 1, |interp, this, args| {
        if !this.is_callable() {
            return interp.throw("TypeError", "Bind must be called on a function");
        }
        let name = interp.get_property(this, "name")?;
        let name = interp.to_string(&name)?;
        let bound = Object::new(
            ObjectKind::Function(Callable::Bound {
                target: this.clone(),
                this: arg(args, 0),
                args: args.iter().skip(1).cloned().collect(),
            }),
            Some(interp.realm.function_proto.clone()),
        );
        bound
            .borrow_mut()
            .props
            .insert("name", Value::from(format!("bound {}", name)), false);
        Ok(Value::Object(bound))
    });
    interp.define_method(&proto, "toString", 0, |interp, this, _| {
        let name = interp.get_property(this, "name")?;
        let name = interp.to_string(&name)?;
        Ok(Value::from(format!("function {}() {{ [native code] }}", name)))
    });
}

// ---- Array ----

fn with_array<R>(
    interp: &Interpreter<'_>,
    this: &Value,
    f: impl FnOnce(&mut Vec<Value>) -> R,
) -> Flow<R> {
    if let Value::Object(obj) = this {
        let mut object = obj.borrow_mut();
        if let ObjectKind::Array(items) = &mut object.kind {
            return Ok(f(items));
        }
    }
    interp.throw("TypeError", "Array method called on a non-array value")
}

fn array_len(interp: &Interpreter<'_>, this: &Value) -> Flow<usize> {
    with_array(interp, this, |items| items.len())
}

fn array_snapshot(interp: &Interpreter<'_>, this: &Value) -> Flow<Vec<Value>> {
    with_array(interp, this, |items| items.clone())
}

/// Resolves a possibly negative index argument against `len`.
fn relative_index(interp: &mut Interpreter<'_>, value: &Value, len: usize, default: usize) -> Flow<usize> {
    if matches!(value, Value::Undefined) {
        return Ok(default);
    }
    let n = to_integer(interp.to_number(value)?);
    let len = len as f64;
    Ok(if n < 0.0 {
        (len + n).max(0.0) as usize
    } else {
        n.min(len) as usize
    })
}

fn callback(interp: &Interpreter<'_>, args: &[Value], method: &str) -> Flow<Value> {
    let func = arg(args, 0);
    if !func.is_callable() {
        let shown = func.primitive_to_string();
        return interp.throw(
            "TypeError",
            &format!("{} is not a function (in Array.prototype.{})", shown, method),
        );
    }
    Ok(func)
}

fn call_each(
    interp: &mut Interpreter<'_>,
    func: &Value,
    this_arg: &Value,
    item: &Value,
    index: usize,
    array: &Value,
) -> Flow<Value> {
    interp.call_function(
        func,
        this_arg.clone(),
        vec![item.clone(), Value::Number(index as f64), array.clone()],
    )
}

fn compare_values(interp: &mut Interpreter<'_>, comparator: &Value, a: &Value, b: &Value) -> Flow<Ordering> {
    if comparator.is_callable() {
        let result = interp.call_function(comparator, Value::Undefined, vec![a.clone(), b.clone()])?;
        let n = interp.to_number(&result)?;
        return Ok(if n < 0.0 {
            Ordering::Less
        } else if n > 0.0 {
            Ordering::Greater
        } else {
            Ordering::Equal
        });
    }
    let a = interp.to_string(a)?;
    let b = interp.to_string(b)?;
    Ok(a.cmp(&b))
}

/// Stable merge sort whose comparator may fail.
fn merge_sort(interp: &mut Interpreter<'_>, items: Vec<Value>, comparator: &Value) -> Flow<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(interp, left, comparator)?;
    let right = merge_sort(interp, right, comparator)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        if compare_values(interp, comparator, b, a)? == Ordering::Less {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

fn flatten_into(interp: &mut Interpreter<'_>, items: Vec<Value>, depth: f64, out: &mut Vec<Value>) -> Flow<()> {
    for item in items {
        if depth >= 1.0 && item.is_array() {
            let inner = array_snapshot(interp, &item)?;
            flatten_into(interp, inner, depth - 1.0, out)?;
        } else {
            interp.check_array_length(out.len() + 1)?;
            out.push(item);
        }
    }
    Ok(())
}

fn join_values(interp: &mut Interpreter<'_>, items: &[Value], separator: &str) -> Flow<String> {
    let mut out = String::new();
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push_str(separator);
        }
        if !item.is_nullish() {
            let text = interp.to_string(item)?;
            interp.check_string_length(out.len() + text.len())?;
            out.push_str(&text);
        } else {
            interp.check_string_length(out.len())?;
        }
    }
    Ok(out)
}

fn install_array(interp: &mut Interpreter<'_>) {
    let proto = interp.realm.array_proto.clone();
    let ctor = interp.native_function("Array", 1, |interp, _, args| {
        if let [Value::Number(n)] = args {
            if *n < 0.0 || n.fract() != 0.0 || *n > u32::MAX as f64 {
                return interp.throw("RangeError", "Invalid array length");
            }
            interp.check_array_length(*n as usize)?;
            return Ok(interp.new_array(vec![Value::Undefined; *n as usize]));
        }
        Ok(interp.new_array(args.to_vec()))
    });
    install_constructor(&ctor, &proto);
    define_static(interp, &ctor, "isArray", 1, |_, _, args| Ok(Value::Bool(arg(args, 0).is_array())));
    define_static(interp, &ctor, "of", 0, |interp, _, args| Ok(interp.new_array(args.to_vec())));
    define_static(interp, &ctor, "from", 1, |interp, _, args| {
        let source = arg(args, 0);
        let items = match &source {
            Value::Object(obj) if !source.is_array() && !matches!(obj.borrow().kind, ObjectKind::Map(_) | ObjectKind::Set(_)) => {
                // array-like: { length: n }
                let len = interp.get_property(&source, "length")?;
                let len = to_integer(interp.to_number(&len)?).max(0.0) as usize;
                interp.check_array_length(len)?;
                let mut items = Vec::with_capacity(len);
                for index in 0..len {
                    items.push(interp.get_property(&source, &index.to_string())?);
                }
                items
            }
            _ => interp.iterate(&source)?,
        };
        let mapper = arg(args, 1);
        if mapper.is_callable() {
            let mut mapped = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                mapped.push(interp.call_function(
                    &mapper,
                    Value::Undefined,
                    vec![item, Value::Number(index as f64)],
                )?);
            }
            return Ok(interp.new_array(mapped));
        }
        Ok(interp.new_array(items))
    });
    interp.define_global("Array", ctor);

    interp.define_method(&proto, "push", 1, |interp, this, args| {
        interp.check_array_length(array_len(interp, this)? + args.len())?;
        let len = with_array(interp, this, |items| {
            items.extend(args.iter().cloned());
            items.len()
        })?;
        Ok(Value::Number(len as f64))
    });
    interp.define_method(&proto, "pop", 0, |interp, this, _| {
        Ok(with_array(interp, this, |items| items.pop())?.unwrap_or(Value::Undefined))
    });
    interp.define_method(&proto, "shift", 0, |interp, this, _| {
        let first = with_array(interp, this, |items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })?;
        Ok(first.unwrap_or(Value::Undefined))
    });
    interp.define_method(&proto, "unshift", 1, |interp, this, args| {
        interp.check_array_length(array_len(interp, this)? + args.len())?;
        let len = with_array(interp, this, |items| {
            items.splice(0..0, args.iter().cloned());
            items.len()
        })?;
        Ok(Value::Number(len as f64))
    });
    interp.define_method(&proto, "slice", 2, |interp, this, args| {
        let items = array_snapshot(interp, this)?;
        let start = relative_index(interp, &arg(args, 0), items.len(), 0)?;
        let end = relative_index(interp, &arg(args, 1), items.len(), items.len())?;
        let slice = if start < end { items[start..end].to_vec() } else { Vec::new() };
        Ok(interp.new_array(slice))
    });
    interp.define_method(&proto, "splice", 2, |interp, this, args| {
        let len = array_snapshot(interp, this)?.len();
        let start = relative_index(interp, &arg(args, 0), len, 0)?;
        let delete_count = match args.len() {
            0 => 0,
            1 => len - start,
            _ => {
                let n = to_integer(interp.to_number(&args[1])?);
                (n.max(0.0) as usize).min(len - start)
            }
        };
        let inserted: Vec<Value> = args.iter().skip(2).cloned().collect();
        interp.check_array_length(len - delete_count + inserted.len())?;
        let removed = with_array(interp, this, |items| {
            items.splice(start..start + delete_count, inserted).collect::<Vec<_>>()
        })?;
        Ok(interp.new_array(removed))
    });
    interp.define_method(&proto, "concat", 1, |interp, this, args| {
        let mut items = array_snapshot(interp, this)?;
        for value in args {
            if value.is_array() {
                items.extend(array_snapshot(interp, value)?);
            } else {
                items.push(value.clone());
            }
            interp.check_array_length(items.len())?;
        }
        Ok(interp.new_array(items))
    });
    interp.define_method(&proto, "join", 1, |interp, this, args| {
        let items = array_snapshot(interp, this)?;
        let separator = match arg(args, 0) {
            Value::Undefined => Rc::from(","),
            other => interp.to_string(&other)?,
        };
        Ok(Value::from(join_values(interp, &items, &separator)?))
    });
    interp.define_method(&proto, "toString", 0, |interp, this, _| {
        let items = array_snapshot(interp, this)?;
        Ok(Value::from(join_values(interp, &items, ",")?))
    });
    interp.define_method(&proto, "reverse", 0, |interp, this, _| {
        with_array(interp, this, |items| items.reverse())?;
        Ok(this.clone())
    });
    interp.define_method(&proto, "indexOf", 1, |interp, this, args| {
        let items = array_snapshot(interp, this)?;
        let from = relative_index(interp, &arg(args, 1), items.len(), 0)?;
        let needle = arg(args, 0);
        let found = items
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, item)| strict_equals(item, &needle));
        Ok(Value::Number(found.map(|(i, _)| i as f64).unwrap_or(-1.0)))
    });
    interp.define_method(&proto, "lastIndexOf", 1, |interp, this, args| {
        let items = array_snapshot(interp, this)?;
        let needle = arg(args, 0);
        let found = items.iter().rposition(|item| strict_equals(item, &needle));
        Ok(Value::Number(found.map(|i| i as f64).unwrap_or(-1.0)))
    });
    interp.define_method(&proto, "includes", 1, |interp, this, args| {
        let items = array_snapshot(interp, this)?;
        let needle = arg(args, 0);
        Ok(Value::Bool(items.iter().any(|item| same_value_zero(item, &needle))))
    });
    interp.define_method(&proto, "at", 1, |interp, this, args| {
        let items = array_snapshot(interp, this)?;
        let n = to_integer(interp.to_number(&arg(args, 0))?);
        let index = if n < 0.0 { items.len() as f64 + n } else { n };
        Ok(if index < 0.0 {
            Value::Undefined
        } else {
            items.get(index as usize).cloned().unwrap_or(Value::Undefined)
        })
    });
    interp.define_method(&proto, "fill", 1, |interp, this, args| {
        let len = array_snapshot(interp, this)?.len();
        let start = relative_index(interp, &arg(args, 1), len, 0)?;
        let end = relative_index(interp, &arg(args, 2), len, len)?;
        let value = arg(args, 0);
        with_array(interp, this, |items| {
            for slot in items.iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
        })?;
        Ok(this.clone())
    });
    interp.define_method(&proto, "forEach", 1, |interp, this, args| {
        let func = callback(interp, args, "forEach")?;
        for (index, item) in array_snapshot(interp, this)?.iter().enumerate() {
            call_each(interp, &func, &arg(args, 1), item, index, this)?;
        }
        Ok(Value::Undefined)
    });
    interp.define_method(&proto, "map", 1, |interp, this, args| {
        let func = callback(interp, args, "map")?;
        let items = array_snapshot(interp, this)?;
        let mut mapped = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            mapped.push(call_each(interp, &func, &arg(args, 1), item, index, this)?);
        }
        Ok(interp.new_array(mapped))
    });
    interp.define_method(&proto, "filter", 1, |interp, this, args| {
        let func = callback(interp, args, "filter")?;
        let mut kept = Vec::new();
        for (index, item) in array_snapshot(interp, this)?.into_iter().enumerate() {
            if call_each(interp, &func, &arg(args, 1), &item, index, this)?.truthy() {
                kept.push(item);
            }
        }
        Ok(interp.new_array(kept))
    });
    interp.define_method(&proto, "find", 1, |interp, this, args| {
        let func = callback(interp, args, "find")?;
        for (index, item) in array_snapshot(interp, this)?.into_iter().enumerate() {
            if call_each(interp, &func, &arg(args, 1), &item, index, this)?.truthy() {
                return Ok(item);
            }
        }
        Ok(Value::Undefined)
    });
    interp.define_method(&proto, "findIndex", 1, |interp, this, args| {
        let func = callback(interp, args, "findIndex")?;
        for (index, item) in array_snapshot(interp, this)?.iter().enumerate() {
            if call_each(interp, &func, &arg(args, 1), item, index, this)?.truthy() {
                return Ok(Value::Number(index as f64));
            }
        }
        Ok(Value::Number(-1.0))
    });
    interp.define_method(&proto, "findLast", 1, |interp, this, args| {
        let func = callback(interp, args, "findLast")?;
        for (index, item) in array_snapshot(interp, this)?.into_iter().enumerate().rev() {
            if call_each(interp, &func, &arg(args, 1), &item, index, this)?.truthy() {
                return Ok(item);
            }
        }
        Ok(Value::Undefined)
    });
    interp.define_method(&proto, "some", 1, |interp, this, args| {
        let func = callback(interp, args, "some")?;
        for (index, item) in array_snapshot(interp, this)?.iter().enumerate() {
            if call_each(interp, &func, &arg(args, 1), item, index, this)?.truthy() {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    });
    interp.define_method(&proto, "every", 1, |interp, this, args| {
        let func = callback(interp, args, "every")?;
        for (index, item) in array_snapshot(interp, this)?.iter().enumerate() {
            if !call_each(interp, &func, &arg(args, 1), item, index, this)?.truthy() {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    });
    interp.define_method(&proto, "reduce", 2, |interp, this, args| {
        let func = callback(interp, args, "reduce")?;
        let items = array_snapshot(interp, this)?;
        let mut indexed = items.into_iter().enumerate();
        let mut acc = match args.get(1) {
            Some(initial) => initial.clone(),
            None => match indexed.next() {
                Some((_, first)) => first,
                None => return interp.throw("TypeError", "Reduce of empty array with no initial value"),
            },
        };
        for (index, item) in indexed {
            acc = interp.call_function(
                &func,
                Value::Undefined,
                vec![acc, item, Value::Number(index as f64), this.clone()],
            )?;
        }
        Ok(acc)
    });
    interp.define_method(&proto, "reduceRight", 2, |interp, this, args| {
        let func = callback(interp, args, "reduceRight")?;
        let items = array_snapshot(interp, this)?;
        let mut indexed = items.into_iter().enumerate().rev();
        let mut acc = match args.get(1) {
            Some(initial) => initial.clone(),
            None => match indexed.next() {
                Some((_, last)) => last,
                None => return interp.throw("TypeError", "Reduce of empty array with no initial value"),
            },
        };
        for (index, item) in indexed {
            acc = interp.call_function(
                &func,
                Value::Undefined,
                vec![acc, item, Value::Number(index as f64), this.clone()],
            )?;
        }
        Ok(acc)
    });
    interp.define_method(&proto, "sort", 1, |interp, this, args| {
        let comparator = arg(args, 0);
        if !comparator.is_nullish() && !comparator.is_callable() {
            return interp.throw(
                "TypeError",
                "The comparison function must be either a function or undefined",
            );
        }
        let items = array_snapshot(interp, this)?;
        let (defined, undefined): (Vec<Value>, Vec<Value>) =
            items.into_iter().partition(|item| !matches!(item, Value::Undefined));
        let mut sorted = merge_sort(interp, defined, &comparator)?;
        sorted.extend(undefined);
        with_array(interp, this, |items| *items = sorted)?;
        Ok(this.clone())
    });
    interp.define_method(&proto, "flat", 0, |interp, this, args| {
        let depth = match arg(args, 0) {
            Value::Undefined => 1.0,
            other => to_integer(interp.to_number(&other)?),
        };
        let items = array_snapshot(interp, this)?;
        let mut out = Vec::new();
        flatten_into(interp, items, depth, &mut out)?;
        Ok(interp.new_array(out))
    });
    interp.define_method(&proto, "flatMap", 1, |interp, this, args| {
        let func = callback(interp, args, "flatMap")?;
        let mut mapped = Vec::new();
        for (index, item) in array_snapshot(interp, this)?.iter().enumerate() {
            mapped.push(call_each(interp, &func, &arg(args, 1), item, index, this)?);
        }
        let mut out = Vec::new();
        flatten_into(interp, mapped, 1.0, &mut out)?;
        Ok(interp.new_array(out))
    });
    interp.define_method(&proto, "keys", 0, |interp, this, _| {
        let len = array_snapshot(interp, this)?.len();
        Ok(interp.new_array((0..len).map(|i| Value::Number(i as f64)).collect()))
    });
    interp.define_method(&proto, "values", 0, |interp, this, _| {
        let items = array_snapshot(interp, this)?;
        Ok(interp.new_array(items))
    });
    interp.define_method(&proto, "entries", 0, |interp, this, _| {
        let items = array_snapshot(interp, this)?;
        let entries = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| interp.new_array(vec![Value::Number(i as f64), item]))
            .collect();
        Ok(interp.new_array(entries))
    });
}

// ---- String ----

fn this_chars(interp: &mut Interpreter<'_>, this: &Value) -> Flow<Vec<char>> {
    if this.is_nullish() {
        return interp.throw("TypeError", "String.prototype method called on null or undefined");
    }
    Ok(interp.to_string(this)?.chars().collect())
}

fn arg_string(interp: &mut Interpreter<'_>, args: &[Value], index: usize) -> Flow<String> {
    Ok(interp.to_string(&arg(args, index))?.to_string())
}

fn find_chars(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn rfind_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn pad(interp: &mut Interpreter<'_>, this: &Value, args: &[Value], at_start: bool) -> Flow<Value> {
    let chars = this_chars(interp, this)?;
    let target = to_integer(interp.to_number(&arg(args, 0))?).max(0.0) as usize;
    let filler: Vec<char> = match arg(args, 1) {
        Value::Undefined => vec![' '],
        other => interp.to_string(&other)?.chars().collect(),
    };
    if target <= chars.len() || filler.is_empty() {
        return Ok(Value::from(chars.iter().collect::<String>()));
    }
    interp.check_string_length(target)?;
    let padding: String = filler.iter().cycle().take(target - chars.len()).collect();
    let text: String = chars.iter().collect();
    Ok(Value::from(if at_start {
        padding + &text
    } else {
        text + &padding
    }))
}

fn replace_impl(interp: &mut Interpreter<'_>, this: &Value, args: &[Value], all: bool) -> Flow<Value> {
    let chars = this_chars(interp, this)?;
    let pattern: Vec<char> = arg_string(interp, args, 0)?.chars().collect();
    let replacement = arg(args, 1);
    let text: String = chars.iter().collect();

    let mut matches = Vec::new();
    let mut from = 0;
    while let Some(found) = find_chars(&chars, &pattern, from) {
        matches.push(found);
        if !all {
            break;
        }
        from = found + pattern.len().max(1);
        if from > chars.len() {
            break;
        }
    }

    let mut out = String::new();
    let mut last = 0;
    let matched: String = pattern.iter().collect();
    for position in matches {
        out.extend(&chars[last..position]);
        let piece = if replacement.is_callable() {
            let result = interp.call_function(
                &replacement,
                Value::Undefined,
                vec![
                    Value::from(matched.as_str()),
                    Value::Number(position as f64),
                    Value::from(text.as_str()),
                ],
            )?;
            interp.to_string(&result)?.to_string()
        } else {
            interp
                .to_string(&replacement)?
                .replace("$&", &matched)
        };
        interp.check_string_length(out.len() + piece.len())?;
        out.push_str(&piece);
        last = position + pattern.len();
    }
    out.extend(&chars[last.min(chars.len())..]);
    Ok(Value::from(out))
}

fn install_string(interp: &mut Interpreter<'_>) {
    let proto = interp.realm.string_proto.clone();
    let ctor = interp.native_function("String", 1, |interp, _, args| {
        if args.is_empty() {
            return Ok(Value::from(""));
        }
        Ok(Value::Str(interp.to_string(&args[0])?))
    });
    install_constructor(&ctor, &proto);
    define_static(interp, &ctor, "fromCharCode", 1, |interp, _, args| {
        let mut out = String::new();
        for code in args {
            let code = to_uint32(interp.to_number(code)?) & 0xFFFF;
            out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
        }
        Ok(Value::from(out))
    });
    interp.define_global("String", ctor);

    interp.define_method(&proto, "toString", 0, |interp, this, _| Ok(Value::Str(interp.to_string(this)?)));
    interp.define_method(&proto, "valueOf", 0, |interp, this, _| Ok(Value::Str(interp.to_string(this)?)));
    interp.define_method(&proto, "charAt", 1, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let index = to_integer(interp.to_number(&arg(args, 0))?);
        Ok(Value::from(if index >= 0.0 {
            chars.get(index as usize).map(|c| c.to_string()).unwrap_or_default()
        } else {
            String::new()
        }))
    });
    interp.define_method(&proto, "charCodeAt", 1, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let index = to_integer(interp.to_number(&arg(args, 0))?);
        Ok(Value::Number(if index >= 0.0 {
            chars.get(index as usize).map(|c| *c as u32 as f64).unwrap_or(f64::NAN)
        } else {
            f64::NAN
        }))
    });
    interp.define_method(&proto, "at", 1, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let n = to_integer(interp.to_number(&arg(args, 0))?);
        let index = if n < 0.0 { chars.len() as f64 + n } else { n };
        Ok(if index < 0.0 {
            Value::Undefined
        } else {
            chars
                .get(index as usize)
                .map(|c| Value::from(c.to_string()))
                .unwrap_or(Value::Undefined)
        })
    });
    interp.define_method(&proto, "indexOf", 1, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let needle: Vec<char> = arg_string(interp, args, 0)?.chars().collect();
        let from = relative_index(interp, &arg(args, 1), chars.len(), 0)?;
        Ok(Value::Number(
            find_chars(&chars, &needle, from).map(|i| i as f64).unwrap_or(-1.0),
        ))
    });
    interp.define_method(&proto, "lastIndexOf", 1, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let needle: Vec<char> = arg_string(interp, args, 0)?.chars().collect();
        Ok(Value::Number(rfind_chars(&chars, &needle).map(|i| i as f64).unwrap_or(-1.0)))
    });
    interp.define_method(&proto, "includes", 1, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let needle: Vec<char> = arg_string(interp, args, 0)?.chars().collect();
        Ok(Value::Bool(find_chars(&chars, &needle, 0).is_some()))
    });
    interp.define_method(&proto, "startsWith", 1, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let needle: Vec<char> = arg_string(interp, args, 0)?.chars().collect();
        let from = relative_index(interp, &arg(args, 1), chars.len(), 0)?;
        Ok(Value::Bool(chars[from..].starts_with(&needle)))
    });
    interp.define_method(&proto, "endsWith", 1, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let needle: Vec<char> = arg_string(interp, args, 0)?.chars().collect();
        let end = relative_index(interp, &arg(args, 1), chars.len(), chars.len())?;
        Ok(Value::Bool(chars[..end].ends_with(&needle)))
    });
    interp.define_method(&proto, "slice", 2, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let start = relative_index(interp, &arg(args, 0), chars.len(), 0)?;
        let end = relative_index(interp, &arg(args, 1), chars.len(), chars.len())?;
        Ok(Value::from(if start < end {
            chars[start..end].iter().collect::<String>()
        } else {
            String::new()
        }))
    });
    interp.define_method(&proto, "substring", 2, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let len = chars.len() as f64;
        let clamp = |n: f64| to_integer(n).max(0.0).min(len) as usize;
        let start = clamp(interp.to_number(&arg(args, 0))?);
        let end = match arg(args, 1) {
            Value::Undefined => chars.len(),
            other => clamp(interp.to_number(&other)?),
        };
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        Ok(Value::from(chars[start..end].iter().collect::<String>()))
    });
    interp.define_method(&proto, "substr", 2, |interp, this, args| {
        let chars = this_chars(interp, this)?;
        let start = relative_index(interp, &arg(args, 0), chars.len(), 0)?;
        let count = match arg(args, 1) {
            Value::Undefined => chars.len() - start,
            other => (to_integer(interp.to_number(&other)?).max(0.0) as usize).min(chars.len() - start),
        };
        Ok(Value::from(chars[start..start + count].iter().collect::<String>()))
    });
    interp.define_method(&proto, "toUpperCase", 0, |interp, this, _| {
        Ok(Value::from(interp.to_string(this)?.to_uppercase()))
    });
    interp.define_method(&proto, "toLowerCase", 0, |interp, this, _| {
        Ok(Value::from(interp.to_string(this)?.to_lowercase()))
    });
    interp.define_method(&proto, "trim", 0, |interp, this, _| {
        Ok(Value::from(interp.to_string(this)?.trim()))
    });
    interp.define_method(&proto, "trimStart", 0, |interp, this, _| {
        Ok(Value::from(interp.to_string(this)?.trim_start()))
    });
    interp.define_method(&proto, "trimEnd", 0, |interp, this, _| {
        Ok(Value::from(interp.to_string(this)?.trim_end()))
    });
    interp.define_method(&proto, "split", 2, |interp, this, args| {
        let text = interp.to_string(this)?;
        let limit = match arg(args, 1) {
            Value::Undefined => usize::MAX,
            other => to_uint32(interp.to_number(&other)?) as usize,
        };
        let parts: Vec<Value> = match arg(args, 0) {
            Value::Undefined => vec![Value::Str(text)],
            separator => {
                let separator = interp.to_string(&separator)?;
                if separator.is_empty() {
                    text.chars().map(|c| Value::from(c.to_string())).collect()
                } else {
                    text.split(separator.as_ref()).map(Value::from).collect()
                }
            }
        };
        Ok(interp.new_array(parts.into_iter().take(limit).collect()))
    });
    interp.define_method(&proto, "replace", 2, |interp, this, args| replace_impl(interp, this, args, false));
    interp.define_method(&proto, "replaceAll", 2, |interp, this, args| replace_impl(interp, this, args, true));
    interp.define_method(&proto, "repeat", 1, |interp, this, args| {
        let text = interp.to_string(this)?;
        let count = interp.to_number(&arg(args, 0))?;
        if count < 0.0 || count.is_infinite() {
            return interp.throw(
                "RangeError",
                &format!("Invalid count value: {}", number_to_string(count)),
            );
        }
        let count = to_integer(count) as usize;
        interp.check_string_length(text.len().saturating_mul(count))?;
        Ok(Value::from(text.repeat(count)))
    });
    interp.define_method(&proto, "padStart", 2, |interp, this, args| pad(interp, this, args, true));
    interp.define_method(&proto, "padEnd", 2, |interp, this, args| pad(interp, this, args, false));
    interp.define_method(&proto, "concat", 1, |interp, this, args| {
        let mut text = interp.to_string(this)?.to_string();
        for value in args {
            let piece = interp.to_string(value)?;
            interp.check_string_length(text.len() + piece.len())?;
            text.push_str(&piece);
        }
        Ok(Value::from(text))
    });
    interp.define_method(&proto, "localeCompare", 1, |interp, this, args| {
        let text = interp.to_string(this)?;
        let other = interp.to_string(&arg(args, 0))?;
        Ok(Value::Number(match text.cmp(&other) {
            Ordering::Less => -1.0,
            Ordering::Equal => 0.0,
            Ordering::Greater => 1.0,
        }))
    });
}

// ---- Number and Boolean ----

fn this_number(interp: &mut Interpreter<'_>, this: &Value) -> Flow<f64> {
    match this {
        Value::Number(n) => Ok(*n),
        _ => interp.throw("TypeError", "Number.prototype method called on a non-number"),
    }
}

fn format_radix(n: f64, radix: u32) -> String {
    if !n.is_finite() || radix == 10 {
        return number_to_string(n);
    }
    let negative = n < 0.0;
    let mut integer = n.abs().trunc();
    let mut fraction = n.abs() - integer;
    let mut digits = Vec::new();
    if integer == 0.0 {
        digits.push('0');
    }
    while integer >= 1.0 {
        let digit = (integer % radix as f64) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        integer = (integer / radix as f64).trunc();
    }
    digits.reverse();
    let mut out: String = digits.into_iter().collect();
    if fraction > 0.0 {
        out.push('.');
        for _ in 0..20 {
            fraction *= radix as f64;
            let digit = fraction.trunc() as u32;
            out.push(std::char::from_digit(digit, radix).unwrap_or('0'));
            fraction -= fraction.trunc();
            if fraction == 0.0 {
                break;
            }
        }
    }
    if negative {
        format!("-{}", out)
    } else {
        out
    }
}

fn to_precision(n: f64, precision: usize) -> String {
    if !n.is_finite() {
        return number_to_string(n);
    }
    if n == 0.0 {
        return if precision > 1 {
            format!("0.{}", "0".repeat(precision - 1))
        } else {
            "0".to_string()
        };
    }
    let exp_form = format!("{:.*e}", precision - 1, n);
    let (mantissa, exponent) = match exp_form.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => return exp_form,
    };
    if exponent < -6 || exponent >= precision as i32 {
        let sign = if exponent >= 0 { "+" } else { "-" };
        format!("{}e{}{}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        format!("{:.*}", decimals, n)
    }
}

fn group_thousands(n: f64) -> String {
    if !n.is_finite() {
        return number_to_string(n);
    }
    let rounded = format!("{:.3}", n.abs());
    let (integer, fraction) = rounded.split_once('.').unwrap_or((&rounded, ""));
    let fraction = fraction.trim_end_matches('0');
    let mut grouped = String::new();
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if !fraction.is_empty() {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    if n < 0.0 && grouped.chars().any(|c| c != '0' && c != '.' && c != ',') {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn install_number(interp: &mut Interpreter<'_>) {
    let proto = interp.realm.number_proto.clone();
    let ctor = interp.native_function("Number", 1, |interp, _, args| {
        if args.is_empty() {
            return Ok(Value::Number(0.0));
        }
        Ok(Value::Number(interp.to_number(&args[0])?))
    });
    install_constructor(&ctor, &proto);
    for (name, value) in [
        ("MAX_SAFE_INTEGER", 9007199254740991.0),
        ("MIN_SAFE_INTEGER", -9007199254740991.0),
        ("EPSILON", f64::EPSILON),
        ("MAX_VALUE", f64::MAX),
        ("MIN_VALUE", 5e-324),
        ("POSITIVE_INFINITY", f64::INFINITY),
        ("NEGATIVE_INFINITY", f64::NEG_INFINITY),
        ("NaN", f64::NAN),
    ] {
        set_static(&ctor, name, Value::Number(value));
    }
    define_static(interp, &ctor, "isInteger", 1, |_, _, args| {
        Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0)))
    });
    define_static(interp, &ctor, "isSafeInteger", 1, |_, _, args| {
        Ok(Value::Bool(
            matches!(arg(args, 0), Value::Number(n) if n.fract() == 0.0 && n.abs() <= 9007199254740991.0),
        ))
    });
    define_static(interp, &ctor, "isFinite", 1, |_, _, args| {
        Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_finite())))
    });
    define_static(interp, &ctor, "isNaN", 1, |_, _, args| {
        Ok(Value::Bool(matches!(arg(args, 0), Value::Number(n) if n.is_nan())))
    });
    define_static(interp, &ctor, "parseFloat", 1, global_parse_float);
    define_static(interp, &ctor, "parseInt", 2, global_parse_int);
    interp.define_global("Number", ctor);

    interp.define_method(&proto, "toString", 1, |interp, this, args| {
        let n = this_number(interp, this)?;
        let radix = match arg(args, 0) {
            Value::Undefined => 10.0,
            other => to_integer(interp.to_number(&other)?),
        };
        if !(2.0..=36.0).contains(&radix) {
            return interp.throw("RangeError", "toString() radix must be between 2 and 36");
        }
        Ok(Value::from(format_radix(n, radix as u32)))
    });
    interp.define_method(&proto, "valueOf", 0, |interp, this, _| Ok(Value::Number(this_number(interp, this)?)));
    interp.define_method(&proto, "toFixed", 1, |interp, this, args| {
        let n = this_number(interp, this)?;
        let digits = to_integer(interp.to_number(&arg(args, 0))?);
        if !(0.0..=100.0).contains(&digits) {
            return interp.throw("RangeError", "toFixed() digits argument must be between 0 and 100");
        }
        if !n.is_finite() || n.abs() >= 1e21 {
            return Ok(Value::from(number_to_string(n)));
        }
        Ok(Value::from(format!("{:.*}", digits as usize, n)))
    });
    interp.define_method(&proto, "toPrecision", 1, |interp, this, args| {
        let n = this_number(interp, this)?;
        let precision = match arg(args, 0) {
            Value::Undefined => return Ok(Value::from(number_to_string(n))),
            other => to_integer(interp.to_number(&other)?),
        };
        if !(1.0..=100.0).contains(&precision) {
            return interp.throw("RangeError", "toPrecision() argument must be between 1 and 100");
        }
        Ok(Value::from(to_precision(n, precision as usize)))
    });
    interp.define_method(&proto, "toLocaleString", 0, |interp, this, _| {
        Ok(Value::from(group_thousands(this_number(interp, this)?)))
    });
}

fn install_boolean(interp: &mut Interpreter<'_>) {
    let proto = interp.realm.boolean_proto.clone();
    let ctor = interp.native_function("Boolean", 1, |_, _, args| Ok(Value::Bool(arg(args, 0).truthy())));
    install_constructor(&ctor, &proto);
    interp.define_global("Boolean", ctor);
    interp.define_method(&proto, "toString", 0, |_, this, _| Ok(Value::Str(this.primitive_to_string())));
    interp.define_method(&proto, "valueOf", 0, |_, this, _| Ok(this.clone()));
}

// ---- Map and Set ----

fn with_map<R>(
    interp: &Interpreter<'_>,
    this: &Value,
    f: impl FnOnce(&mut Vec<(Value, Value)>) -> R,
) -> Flow<R> {
    if let Value::Object(obj) = this {
        let mut object = obj.borrow_mut();
        if let ObjectKind::Map(entries) = &mut object.kind {
            return Ok(f(entries));
        }
    }
    interp.throw("TypeError", "Map method called on incompatible receiver")
}

fn with_set<R>(interp: &Interpreter<'_>, this: &Value, f: impl FnOnce(&mut Vec<Value>) -> R) -> Flow<R> {
    if let Value::Object(obj) = this {
        let mut object = obj.borrow_mut();
        if let ObjectKind::Set(items) = &mut object.kind {
            return Ok(f(items));
        }
    }
    interp.throw("TypeError", "Set method called on incompatible receiver")
}

fn install_collections(interp: &mut Interpreter<'_>) {
    let map_proto = interp.realm.map_proto.clone();
    let ctor_proto = map_proto.clone();
    let ctor = interp.native_function("Map", 0, move |interp, _, args| {
        let mut entries: Vec<(Value, Value)> = Vec::new();
        let source = arg(args, 0);
        if !source.is_nullish() {
            for entry in interp.iterate(&source)? {
                let key = interp.get_property(&entry, "0")?;
                let value = interp.get_property(&entry, "1")?;
                match entries.iter_mut().find(|(k, _)| same_value_zero(k, &key)) {
                    Some(slot) => slot.1 = value,
                    None => entries.push((key, value)),
                }
            }
        }
        Ok(Value::Object(Object::new(ObjectKind::Map(entries), Some(ctor_proto.clone()))))
    });
    install_constructor(&ctor, &map_proto);
    interp.define_global("Map", ctor);

    interp.define_method(&map_proto, "get", 1, |interp, this, args| {
        let key = arg(args, 0);
        let found = with_map(interp, this, |entries| {
            entries.iter().find(|(k, _)| same_value_zero(k, &key)).map(|(_, v)| v.clone())
        })?;
        Ok(found.unwrap_or(Value::Undefined))
    });
    interp.define_method(&map_proto, "set", 2, |interp, this, args| {
        let (key, value) = (arg(args, 0), arg(args, 1));
        with_map(interp, this, |entries| {
            match entries.iter_mut().find(|(k, _)| same_value_zero(k, &key)) {
                Some(slot) => slot.1 = value,
                None => entries.push((key, value)),
            }
        })?;
        Ok(this.clone())
    });
    interp.define_method(&map_proto, "has", 1, |interp, this, args| {
        let key = arg(args, 0);
        let found = with_map(interp, this, |entries| entries.iter().any(|(k, _)| same_value_zero(k, &key)))?;
        Ok(Value::Bool(found))
    });
    interp.define_method(&map_proto, "delete", 1, |interp, this, args| {
        let key = arg(args, 0);
        let removed = with_map(interp, this, |entries| {
            let before = entries.len();
            entries.retain(|(k, _)| !same_value_zero(k, &key));
            before != entries.len()
        })?;
        Ok(Value::Bool(removed))
    });
    interp.define_method(&map_proto, "clear", 0, |interp, this, _| {
        with_map(interp, this, |entries| entries.clear())?;
        Ok(Value::Undefined)
    });
    interp.define_method(&map_proto, "forEach", 1, |interp, this, args| {
        let func = callback(interp, args, "forEach")?;
        let entries = with_map(interp, this, |entries| entries.clone())?;
        for (key, value) in entries {
            interp.call_function(&func, arg(args, 1), vec![value, key, this.clone()])?;
        }
        Ok(Value::Undefined)
    });
    interp.define_method(&map_proto, "keys", 0, |interp, this, _| {
        let keys = with_map(interp, this, |entries| entries.iter().map(|(k, _)| k.clone()).collect())?;
        Ok(interp.new_array(keys))
    });
    interp.define_method(&map_proto, "values", 0, |interp, this, _| {
        let values = with_map(interp, this, |entries| entries.iter().map(|(_, v)| v.clone()).collect())?;
        Ok(interp.new_array(values))
    });
    interp.define_method(&map_proto, "entries", 0, |interp, this, _| {
        let entries = interp.iterate(this)?;
        Ok(interp.new_array(entries))
    });

    let set_proto = interp.realm.set_proto.clone();
    let ctor_proto = set_proto.clone();
    let ctor = interp.native_function("Set", 0, move |interp, _, args| {
        let mut items: Vec<Value> = Vec::new();
        let source = arg(args, 0);
        if !source.is_nullish() {
            for item in interp.iterate(&source)? {
                if !items.iter().any(|existing| same_value_zero(existing, &item)) {
                    items.push(item);
                }
            }
        }
        Ok(Value::Object(Object::new(ObjectKind::Set(items), Some(ctor_proto.clone()))))
    });
    install_constructor(&ctor, &set_proto);
    interp.define_global("Set", ctor);

    interp.define_method(&set_proto, "add", 1, |interp, this, args| {
        let value = arg(args, 0);
        with_set(interp, this, |items| {
            if !items.iter().any(|existing| same_value_zero(existing, &value)) {
                items.push(value);
            }
        })?;
        Ok(this.clone())
    });
    interp.define_method(&set_proto, "has", 1, |interp, this, args| {
        let value = arg(args, 0);
        let found = with_set(interp, this, |items| items.iter().any(|v| same_value_zero(v, &value)))?;
        Ok(Value::Bool(found))
    });
    interp.define_method(&set_proto, "delete", 1, |interp, this, args| {
        let value = arg(args, 0);
        let removed = with_set(interp, this, |items| {
            let before = items.len();
            items.retain(|v| !same_value_zero(v, &value));
            before != items.len()
        })?;
        Ok(Value::Bool(removed))
    });
    interp.define_method(&set_proto, "clear", 0, |interp, this, _| {
        with_set(interp, this, |items| items.clear())?;
        Ok(Value::Undefined)
    });
    interp.define_method(&set_proto, "forEach", 1, |interp, this, args| {
        let func = callback(interp, args, "forEach")?;
        for item in with_set(interp, this, |items| items.clone())? {
            interp.call_function(&func, arg(args, 1), vec![item.clone(), item, this.clone()])?;
        }
        Ok(Value::Undefined)
    });
    interp.define_method(&set_proto, "values", 0, |interp, this, _| {
        let items = with_set(interp, this, |items| items.clone())?;
        Ok(interp.new_array(items))
    });
}

// ---- Math ----

fn install_math(interp: &mut Interpreter<'_>) {
    let math = interp.new_object();
    for (name, value) in [
        ("PI", std::f64::consts::PI),
        ("E", std::f64::consts::E),
        ("LN2", std::f64::consts::LN_2),
        ("LN10", std::f64::consts::LN_10),
        ("LOG2E", std::f64::consts::LOG2_E),
        ("LOG10E", std::f64::consts::LOG10_E),
        ("SQRT2", std::f64::consts::SQRT_2),
        ("SQRT1_2", std::f64::consts::FRAC_1_SQRT_2),
    ] {
        math.borrow_mut().props.insert(name, Value::Number(value), false);
    }

    let unary: [(&str, fn(f64) -> f64); 19] = [
        ("abs", f64::abs),
        ("floor", f64::floor),
        ("ceil", f64::ceil),
        ("trunc", f64::trunc),
        ("sqrt", f64::sqrt),
        ("cbrt", f64::cbrt),
        ("exp", f64::exp),
        ("log", f64::ln),
        ("log2", f64::log2),
        ("log10", f64::log10),
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("tan", f64::tan),
        ("asin", f64::asin),
        ("acos", f64::acos),
        ("atan", f64::atan),
        ("sign", |n: f64| if n.is_nan() || n == 0.0 { n } else { n.signum() }),
        ("round", |n: f64| {
            let floor = n.floor();
            if n - floor >= 0.5 {
                floor + 1.0
            } else {
                floor
            }
        }),
        ("fround", |n: f64| n as f32 as f64),
    ];
    for (name, op) in unary {
        interp.define_method(&math, name, 1, move |interp, _, args| {
            Ok(Value::Number(op(interp.to_number(&arg(args, 0))?)))
        });
    }

    interp.define_method(&math, "pow", 2, |interp, _, args| {
        let base = interp.to_number(&arg(args, 0))?;
        let exponent = interp.to_number(&arg(args, 1))?;
        interp.binary("**", &Value::Number(base), &Value::Number(exponent))
    });
    interp.define_method(&math, "atan2", 2, |interp, _, args| {
        let y = interp.to_number(&arg(args, 0))?;
        let x = interp.to_number(&arg(args, 1))?;
        Ok(Value::Number(y.atan2(x)))
    });
    interp.define_method(&math, "hypot", 2, |interp, _, args| {
        let mut sum = 0.0;
        for value in args {
            let n = interp.to_number(value)?;
            sum += n * n;
        }
        Ok(Value::Number(sum.sqrt()))
    });
    interp.define_method(&math, "max", 2, |interp, _, args| {
        let mut best = f64::NEG_INFINITY;
        for value in args {
            let n = interp.to_number(value)?;
            if n.is_nan() {
                return Ok(Value::Number(f64::NAN));
            }
            best = best.max(n);
        }
        Ok(Value::Number(best))
    });
    interp.define_method(&math, "min", 2, |interp, _, args| {
        let mut best = f64::INFINITY;
        for value in args {
            let n = interp.to_number(value)?;
            if n.is_nan() {
                return Ok(Value::Number(f64::NAN));
            }
            best = best.min(n);
        }
        Ok(Value::Number(best))
    });
    interp.define_method(&math, "random", 0, |interp, _, _| Ok(Value::Number(interp.next_random())));
    interp.define_global("Math", Value::Object(math));
}

// ---- JSON ----

fn number_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9007199254740992.0 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

#[derive(Default)]
struct JsonWalk {
    /// Objects currently being converted, for cycle detection.
    stack: Vec<ObjRef>,
    /// Rough size of the text produced so far.
    size: usize,
}

impl JsonWalk {
    fn grow(&mut self, interp: &Interpreter<'_>, by: usize) -> Flow<()> {
        self.size += by;
        interp.check_string_length(self.size)
    }
}

fn to_json(interp: &mut Interpreter<'_>, value: &Value, walk: &mut JsonWalk) -> Flow<Option<serde_json::Value>> {
    walk.grow(interp, 1)?;
    let obj = match value {
        Value::Undefined => return Ok(None),
        Value::Null => return Ok(Some(serde_json::Value::Null)),
        Value::Bool(b) => return Ok(Some(serde_json::Value::Bool(*b))),
        Value::Number(n) => return Ok(Some(number_json(*n))),
        Value::Str(s) => {
            walk.grow(interp, s.len())?;
            return Ok(Some(serde_json::Value::String(s.to_string())));
        }
        Value::Object(obj) => obj,
    };
    if obj.borrow().is_callable() {
        return Ok(None);
    }
    let to_json_method = object_get(obj, "toJSON");
    if to_json_method.is_callable() {
        let replaced = interp.call_function(&to_json_method, value.clone(), Vec::new())?;
        if !matches!(&replaced, Value::Object(other) if Rc::ptr_eq(other, obj)) {
            return interp.nested(|interp| to_json(interp, &replaced, walk));
        }
    }
    if walk.stack.iter().any(|seen| Rc::ptr_eq(seen, obj)) {
        return interp.throw("TypeError", "Converting circular structure to JSON");
    }
    walk.stack.push(obj.clone());

    let result = if value.is_array() {
        let items = match &obj.borrow().kind {
            ObjectKind::Array(items) => items.clone(),
            _ => Vec::new(),
        };
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            let item = interp.nested(|interp| to_json(interp, item, walk))?;
            out.push(item.unwrap_or(serde_json::Value::Null));
        }
        serde_json::Value::Array(out)
    } else {
        let mut out = serde_json::Map::new();
        for key in interp.own_keys(value) {
            let item = interp.get_property(value, &key)?;
            if let Some(item) = interp.nested(|interp| to_json(interp, &item, walk))? {
                walk.grow(interp, key.len())?;
                out.insert(key.to_string(), item);
            }
        }
        serde_json::Value::Object(out)
    };
    walk.stack.pop();
    Ok(Some(result))
}

/// `JSON.stringify(value, null, indent)`; `None` when the value has no JSON form.
pub(crate) fn json_stringify(interp: &mut Interpreter<'_>, value: &Value, indent: &str) -> Flow<Option<String>> {
    let json = match to_json(interp, value, &mut JsonWalk::default())? {
        Some(json) => json,
        None => return Ok(None),
    };
    let text = if indent.is_empty() {
        serde_json::to_string(&json).map_err(|e| e.to_string())
    } else {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        json.serialize(&mut serializer)
            .map_err(|e| e.to_string())
            .and_then(|_| String::from_utf8(buffer).map_err(|e| e.to_string()))
    };
    match text {
        Ok(text) => Ok(Some(text)),
        Err(message) => interp.throw("TypeError", &message),
    }
}

fn from_json(interp: &Interpreter<'_>, json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            let items = items.into_iter().map(|item| from_json(interp, item)).collect();
            interp.new_array(items)
        }
        serde_json::Value::Object(map) => {
            let object = interp.new_object();
            for (key, item) in map {
                let item = from_json(interp, item);
                object.borrow_mut().props.insert(&key, item, true);
            }
            Value::Object(object)
        }
    }
}

fn install_json(interp: &mut Interpreter<'_>) {
    let json = interp.new_object();
    interp.define_method(&json, "stringify", 3, |interp, _, args| {
        let indent = match arg(args, 2) {
            Value::Number(n) => " ".repeat(to_integer(n).clamp(0.0, 10.0) as usize),
            Value::Str(s) => s.chars().take(10).collect(),
            _ => String::new(),
        };
        Ok(match json_stringify(interp, &arg(args, 0), &indent)? {
            Some(text) => Value::from(text),
            None => Value::Undefined,
        })
    });
    interp.define_method(&json, "parse", 1, |interp, _, args| {
        let text = interp.to_string(&arg(args, 0))?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(parsed) => Ok(from_json(interp, parsed)),
            Err(err) => interp.throw("SyntaxError", &format!("Invalid JSON: {}", err)),
        }
    });
    interp.define_global("JSON", Value::Object(json));
}

// ---- console ----

/// Renders one `console.log` argument.
pub(crate) fn format_log_value(interp: &mut Interpreter<'_>, value: &Value) -> Flow<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        Value::Object(obj) => {
            let is_class = matches!(
                &obj.borrow().kind,
                ObjectKind::Function(Callable::Closure { class: Some(_), .. })
            );
            if obj.borrow().is_callable() {
                let name = object_get(obj, "name").primitive_to_string();
                return Ok(match (is_class, name.is_empty()) {
                    (true, _) => format!("[class {}]", name),
                    (false, true) => "[Function (anonymous)]".to_string(),
                    (false, false) => format!("[Function: {}]", name),
                });
            }
            if interp.is_error(value) {
                return Ok(interp.to_string(value)?.to_string());
            }
            Ok(json_stringify(interp, value, "")?.unwrap_or_else(|| "undefined".to_string()))
        }
        other => Ok(other.primitive_to_string().to_string()),
    }
}

fn install_console(interp: &mut Interpreter<'_>) {
    let console = interp.new_object();
    for name in ["log", "info", "warn", "error", "debug"] {
        interp.define_method(&console, name, 0, |interp, _, args| {
            let mut parts = Vec::with_capacity(args.len());
            let mut size = 0;
            for value in args {
                let part = format_log_value(interp, value)?;
                size += part.len() + 1;
                interp.check_string_length(size)?;
                parts.push(part);
            }
            interp.write_line(parts.join(" "))?;
            Ok(Value::Undefined)
        });
    }
    interp.define_global("console", Value::Object(console));
}

// ---- global functions ----

fn global_parse_int(interp: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> Flow<Value> {
    let text = interp.to_string(&arg(args, 0))?;
    let mut rest = text.trim_start();
    let sign = if let Some(stripped) = rest.strip_prefix('-') {
        rest = stripped;
        -1.0
    } else {
        rest = rest.strip_prefix('+').unwrap_or(rest);
        1.0
    };
    let mut radix = match arg(args, 1) {
        Value::Undefined => 0,
        other => to_int32(interp.to_number(&other)?),
    };
    if radix == 0 || radix == 16 {
        if let Some(stripped) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
            rest = stripped;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let mut value = 0.0;
    let mut any = false;
    for c in rest.chars() {
        match c.to_digit(radix as u32) {
            Some(digit) => {
                value = value * radix as f64 + digit as f64;
                any = true;
            }
            None => break,
        }
    }
    Ok(Value::Number(if any { sign * value } else { f64::NAN }))
}

fn global_parse_float(interp: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> Flow<Value> {
    let text = interp.to_string(&arg(args, 0))?;
    let trimmed = text.trim_start();
    let chars: Vec<char> = trimmed.chars().collect();
    let mut end = 0;
    if matches!(chars.first(), Some('+') | Some('-')) {
        end = 1;
    }
    if trimmed[end..].starts_with("Infinity") {
        let sign = if trimmed.starts_with('-') { -1.0 } else { 1.0 };
        return Ok(Value::Number(sign * f64::INFINITY));
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut valid_end = 0;
    while end < chars.len() {
        let c = chars[end];
        if c.is_ascii_digit() {
            seen_digit = true;
            end += 1;
            valid_end = end;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            end += 1;
            if seen_digit {
                valid_end = end;
            }
        } else if (c == 'e' || c == 'E') && seen_digit {
            let mut j = end + 1;
            if matches!(chars.get(j), Some('+') | Some('-')) {
                j += 1;
            }
            if chars.get(j).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                valid_end = j;
            }
            break;
        } else {
            break;
        }
    }
    if !seen_digit {
        return Ok(Value::Number(f64::NAN));
    }
    let literal: String = chars[..valid_end].iter().collect();
    let literal = literal.trim_end_matches('.');
    Ok(Value::Number(literal.parse::<f64>().unwrap_or(f64::NAN)))
}

fn install_globals(interp: &mut Interpreter<'_>) {
    let parse_int = interp.native_function("parseInt", 2, global_parse_int);
    interp.define_global("parseInt", parse_int);
    let parse_float = interp.native_function("parseFloat", 1, global_parse_float);
    interp.define_global("parseFloat", parse_float);
    let is_nan = interp.native_function("isNaN", 1, |interp, _, args| {
        Ok(Value::Bool(interp.to_number(&arg(args, 0))?.is_nan()))
    });
    interp.define_global("isNaN", is_nan);
    let is_finite = interp.native_function("isFinite", 1, |interp, _, args| {
        Ok(Value::Bool(interp.to_number(&arg(args, 0))?.is_finite()))
    });
    interp.define_global("isFinite", is_finite);
    interp.define_global("NaN", Value::Number(f64::NAN));
    interp.define_global("Infinity", Value::Number(f64::INFINITY));
    interp.define_global("undefined", Value::Undefined);
}

/// Message carried by a thrown value, if it is an `Error` instance.
pub(crate) fn error_message(interp: &mut Interpreter<'_>, thrown: &Value) -> Option<String> {
    if !interp.is_error(thrown) {
        return None;
    }
    let message = interp.get_property(thrown, "message").ok()?;
    Some(
        interp
            .to_string(&message)
            .map(|text| text.to_string())
            .unwrap_or_default(),
    )
}
