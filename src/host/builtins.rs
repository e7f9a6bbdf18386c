//! Methods available on builtin values (strings, lists, dictionaries,
//! numbers) without any registration.

use anyhow::{anyhow, bail};

use super::value::{CallResult, Value};

fn len(n: usize) -> CallResult {
    CallResult::single(Value::Integer(n as i64))
}

fn one_arg<'a>(name: &str, args: &'a [Value]) -> anyhow::Result<&'a Value> {
    match args {
        [arg] => Ok(arg),
        _ => bail!("`{}` takes exactly one argument, got {}", name, args.len()),
    }
}

fn string_arg<'a>(name: &str, args: &'a [Value]) -> anyhow::Result<&'a str> {
    one_arg(name, args)?
        .as_str()
        .ok_or_else(|| anyhow!("`{}` expects a string argument", name))
}

/// `value.name` on a builtin value.
pub fn get_attribute(value: &Value, name: &str) -> anyhow::Result<CallResult> {
    if let Value::Dictionary(fields) = value {
        if let Some(field) = fields.get(name) {
            return Ok(CallResult::single(field.clone()));
        }
    }
    call_method(value, name, vec![])
}

/// `value.name(args)` on a builtin value.
pub fn call_method(value: &Value, name: &str, args: Vec<Value>) -> anyhow::Result<CallResult> {
    match (value, name) {
        (Value::String(s), "len" | "length") => Ok(len(s.chars().count())),
        (Value::String(s), "upper") => Ok(CallResult::single(s.to_uppercase())),
        (Value::String(s), "lower") => Ok(CallResult::single(s.to_lowercase())),
        (Value::String(s), "trim") => Ok(CallResult::single(s.trim())),
        (Value::String(s), "starts_with" | "startsWith") => Ok(CallResult::single(
            s.starts_with(string_arg(name, &args)?),
        )),
        (Value::String(s), "ends_with" | "endsWith") => {
            Ok(CallResult::single(s.ends_with(string_arg(name, &args)?)))
        }
        (Value::String(s), "contains") => {
            Ok(CallResult::single(s.contains(string_arg(name, &args)?)))
        }
        (Value::List(items), "len" | "length" | "size") => Ok(len(items.len())),
        (Value::List(items), "contains") => {
            let item = one_arg(name, &args)?;
            Ok(CallResult::single(items.contains(item)))
        }
        (Value::Dictionary(fields), "len" | "length" | "size") => Ok(len(fields.len())),
        (Value::Dictionary(fields), "keys") => {
            let mut keys: Vec<_> = fields.keys().cloned().collect();
            keys.sort();
            Ok(CallResult::single(keys))
        }
        (Value::Dictionary(fields), "values") => {
            let mut entries: Vec<_> = fields.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Ok(CallResult::single(Value::List(
                entries.into_iter().map(|(_, v)| v.clone()).collect(),
            )))
        }
        (Value::Integer(i), "abs") => i
            .checked_abs()
            .map(|v| CallResult::single(Value::Integer(v)))
            .ok_or_else(|| anyhow!("integer overflow in abs({})", i)),
        (Value::Float(x), "abs") => Ok(CallResult::single(x.abs())),
        _ => bail!("no method `{}` on {:?}", name, value),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn single(result: anyhow::Result<CallResult>) -> Value {
        let mut values = result.unwrap().into_values();
        let v = values.next().unwrap();
        assert!(values.next().is_none());
        v
    }

    #[test]
    fn test_string_methods() {
        let s = Value::from("oso");
        assert_eq!(single(get_attribute(&s, "length")), Value::Integer(3));
        assert_eq!(single(call_method(&s, "upper", vec![])), Value::from("OSO"));
        assert_eq!(
            single(call_method(&s, "starts_with", vec![Value::from("os")])),
            Value::Boolean(true)
        );
        assert!(call_method(&s, "starts_with", vec![]).is_err());
    }

    #[test]
    fn test_list_methods() {
        let l = Value::from(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        assert_eq!(single(call_method(&l, "size", vec![])), Value::Integer(3));
        assert_eq!(
            single(call_method(&l, "contains", vec![Value::Integer(2)])),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_dictionary_fields_shadow_methods() {
        let d = Value::Dictionary(HashMap::from([
            ("len".to_string(), Value::from("field")),
            ("b".to_string(), Value::Integer(2)),
        ]));
        assert_eq!(single(get_attribute(&d, "len")), Value::from("field"));
        assert_eq!(single(get_attribute(&d, "b")), Value::Integer(2));
        assert_eq!(
            single(call_method(&d, "keys", vec![])),
            Value::from(vec!["b", "len"])
        );
        assert!(get_attribute(&d, "missing").is_err());
    }
}
