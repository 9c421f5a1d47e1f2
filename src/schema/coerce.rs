//! Built-in coercion rules.
//!
//! A coercion normalizes a raw input value into the canonical form an
//! attribute stores. It runs before the type constraint is checked and may
//! reject input it cannot normalize. [`Value::Absent`] is never passed to a
//! coercion.

use std::collections::BTreeSet;
use std::rc::Rc;

use super::value::Value;

/// Coercion function: raw value to canonical value, or a reason for rejection.
pub type Coercer = Rc<dyn Fn(Value) -> Result<Value, String>>;

/// Wraps a closure as a [`Coercer`].
pub fn from_fn(f: impl Fn(Value) -> Result<Value, String> + 'static) -> Coercer {
    Rc::new(f)
}

/// Runs `first`, then `second` on its output.
#[must_use]
pub fn chain(first: Coercer, second: Coercer) -> Coercer {
    Rc::new(move |value| second(first(value)?))
}

/// Collects a string, list or set into a set of values.
///
/// A single scalar becomes a one-element set.
#[must_use]
pub fn to_set() -> Coercer {
    Rc::new(|value| match value {
        Value::Set(items) => Ok(Value::Set(items)),
        Value::List(items) => Ok(Value::Set(items.into_iter().collect::<BTreeSet<_>>())),
        Value::Map(_) => Err(String::from("a map cannot be used as a set")),
        scalar => Ok(Value::Set(BTreeSet::from([scalar]))),
    })
}

/// Lowercases strings; other values pass through.
#[must_use]
pub fn lowercase() -> Coercer {
    Rc::new(|value| match value {
        Value::Str(s) => Ok(Value::Str(s.to_lowercase())),
        other => Ok(other),
    })
}

/// Parses decimal strings into integers.
#[must_use]
pub fn integer() -> Coercer {
    Rc::new(|value| match value {
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| format!("'{s}' is not an integer: {e}")),
        other => Ok(other),
    })
}

/// Parses octal permission strings such as `"0644"` or `"755"`.
///
/// Integers pass through unchanged and are taken as already numeric.
#[must_use]
pub fn octal_mode() -> Coercer {
    Rc::new(|value| match value {
        Value::Str(s) => {
            let digits = s.trim().trim_start_matches("0o");
            let mode = i64::from_str_radix(digits, 8)
                .map_err(|_| format!("'{s}' is not an octal mode"))?;
            if !(0..=0o7777).contains(&mode) {
                return Err(format!("'{s}' is out of range for a mode"));
            }
            Ok(Value::Int(mode))
        }
        Value::Int(mode) if !(0..=0o7777).contains(&mode) => {
            Err(format!("{mode} is out of range for a mode"))
        }
        other => Ok(other),
    })
}

/// Normalizes path strings: collapses repeated separators, drops `.`
/// segments and a trailing separator.
#[must_use]
pub fn normalized_path() -> Coercer {
    Rc::new(|value| match value {
        Value::Str(s) => {
            if s.is_empty() {
                return Err(String::from("path cannot be empty"));
            }
            Ok(Value::Str(normalize_path(&s)))
        }
        other => Ok(other),
    })
}

/// Normalizes a path string without touching the filesystem.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => String::from("."),
        (false, false) => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_set_from_list_and_scalar() {
        let coerce = to_set();
        let set = coerce(Value::list_of(["b", "a", "b"])).unwrap();
        assert_eq!(set, Value::set_of(["a", "b"]));

        let single = coerce(Value::from("a")).unwrap();
        assert_eq!(single, Value::set_of(["a"]));
    }

    #[test]
    fn test_octal_mode() {
        let coerce = octal_mode();
        assert_eq!(coerce(Value::from("0644")).unwrap(), Value::Int(0o644));
        assert_eq!(coerce(Value::from("755")).unwrap(), Value::Int(0o755));
        assert_eq!(coerce(Value::Int(0o600)).unwrap(), Value::Int(0o600));
        assert!(coerce(Value::from("rw-r--r--")).is_err());
        assert!(coerce(Value::Int(0o17777)).is_err());
    }

    #[test]
    fn test_octal_mode_rejects_negative() {
        let coerce = octal_mode();
        assert!(coerce(Value::from("-1")).is_err());
        assert!(coerce(Value::from("-0644")).is_err());
        assert!(coerce(Value::Int(-1)).is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/etc//motd/"), "/etc/motd");
        assert_eq!(normalize_path("./conf/./app.yaml"), "conf/app.yaml");
        assert_eq!(normalize_path("/"), "/");
        assert!(normalized_path()(Value::from("")).is_err());
    }

    #[test]
    fn test_chain() {
        let coerce = chain(lowercase(), to_set());
        assert_eq!(coerce(Value::from("A@X.COM")).unwrap(), Value::set_of(["a@x.com"]));
    }

    #[test]
    fn test_integer() {
        assert_eq!(integer()(Value::from(" 42 ")).unwrap(), Value::Int(42));
        assert!(integer()(Value::from("forty")).is_err());
    }
}
