//! Accessor and private name encoding.
//!
//! Getters are stored as `get:name`, setters as `set:name`. Private names
//! carry the owning library's key, `_name@12345`. Scrubbing turns these back
//! into what a user wrote.
use std::borrow::Cow;

pub const PRIVATE_KEY_SEPARATOR: u8 = b'@';
pub const GETTER_PREFIX: &str = "get:";
pub const SETTER_PREFIX: &str = "set:";
pub const DYNAMIC_FORWARDER_PREFIX: &str = "dyn:";
pub const INIT_PREFIX: &str = "init:";
pub const TOP_LEVEL_NAME: &str = "::";

pub fn getter_name(field_name: &str) -> String {
    format!("{GETTER_PREFIX}{field_name}")
}

pub fn setter_name(field_name: &str) -> String {
    format!("{SETTER_PREFIX}{field_name}")
}

pub fn initializer_name(field_name: &str) -> String {
    format!("{INIT_PREFIX}{field_name}")
}

pub fn dynamic_forwarder_name(name: &str) -> String {
    format!("{DYNAMIC_FORWARDER_PREFIX}{name}")
}

pub fn is_getter_name(name: &str) -> bool {
    name.starts_with(GETTER_PREFIX)
}

pub fn is_setter_name(name: &str) -> bool {
    name.starts_with(SETTER_PREFIX)
}

pub fn is_dynamic_forwarder_name(name: &str) -> bool {
    name.starts_with(DYNAMIC_FORWARDER_PREFIX)
}

pub fn field_name_from_getter(name: &str) -> Option<&str> {
    name.strip_prefix(GETTER_PREFIX)
}

pub fn field_name_from_setter(name: &str) -> Option<&str> {
    name.strip_prefix(SETTER_PREFIX)
}

pub fn demangle_dynamic_forwarder_name(name: &str) -> Option<&str> {
    name.strip_prefix(DYNAMIC_FORWARDER_PREFIX)
}

/// Accessor names are private when the accessed name is.
pub fn is_private(name: &str) -> bool {
    let name = field_name_from_getter(name)
        .or_else(|| field_name_from_setter(name))
        .unwrap_or(name);
    name.starts_with('_')
}

/// Appends a library private key such as `@0123456`.
pub fn mangle_private_name(name: &str, private_key: &str) -> String {
    debug_assert!(is_private(name), "{name} is not private");
    debug_assert!(private_key.as_bytes().first() == Some(&PRIVATE_KEY_SEPARATOR));
    format!("{name}{private_key}")
}

// every '@' starts a key, the key ends at the first non digit
fn strip_private_keys(name: &str) -> Cow<'_, str> {
    let bytes = name.as_bytes();
    let mut result = String::new();
    let mut start = 0;
    let mut i = 0;
    let mut changed = false;
    while i < bytes.len() {
        if bytes[i] == PRIVATE_KEY_SEPARATOR {
            result.push_str(&name[start..i]);
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            start = i;
            changed = true;
        } else {
            i += 1;
        }
    }
    if !changed {
        return Cow::Borrowed(name);
    }
    result.push_str(&name[start..]);
    Cow::Owned(result)
}

/// User visible form of an internal name.
///
/// Removes every private key, strips a `get:`/`set:` prefix (setters gain a
/// trailing `=`) and drops the trailing `.` of an unnamed constructor. A
/// second `:` or `.` makes the name ambiguous, it is then returned with only
/// the private keys removed.
pub fn scrub_name(name: &str) -> Cow<'_, str> {
    if name == TOP_LEVEL_NAME {
        return Cow::Borrowed("");
    }
    let unmangled = strip_private_keys(name);
    let bytes = unmangled.as_bytes();

    let mut start = 0;
    let mut dot_pos = None;
    let mut is_setter = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b':' => {
                if start != 0 {
                    start = 0;
                    dot_pos = None;
                    break;
                }
                if bytes[0] == b's' {
                    is_setter = true;
                }
                start = i + 1;
            }
            b'.' => {
                if dot_pos.is_some() {
                    start = 0;
                    dot_pos = None;
                    break;
                }
                dot_pos = Some(i);
            }
            _ => (),
        }
    }

    if start == 0 && dot_pos.is_none() {
        return unmangled;
    }

    let len = bytes.len();
    let end = match dot_pos {
        Some(pos) if pos + 1 == len => pos,
        _ => len,
    };
    let mut result = unmangled[start..end].to_owned();
    if is_setter {
        result.push('=');
    }
    Cow::Owned(result)
}

/// Strips the accessor prefix but keeps private keys, setters get their `=`
/// placed before the key: `set:_x@12` becomes `_x=@12`.
pub fn scrub_name_retain_private(name: &str) -> Cow<'_, str> {
    let bytes = name.as_bytes();
    let mut start = 0;
    let mut at_pos = None;
    let mut is_setter = false;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b':' {
            if bytes[start] == b's' {
                is_setter = true;
            }
            start = i + 1;
        } else if b == PRIVATE_KEY_SEPARATOR {
            at_pos = Some(i);
        }
    }

    if start == 0 {
        return Cow::Borrowed(name);
    }
    if !is_setter {
        return Cow::Owned(name[start..].to_owned());
    }
    match at_pos.filter(|&at| at >= start) {
        Some(at) => Cow::Owned(format!("{}={}", &name[start..at], &name[at..])),
        None => Cow::Owned(format!("{}=", &name[start..])),
    }
}

/// Compares a possibly mangled name against a plain one, skipping every
/// `@digits` key in `mangled` without allocating.
pub fn equals_ignoring_private_key(mangled: &str, plain: &str) -> bool {
    if mangled == plain {
        return true;
    }
    let a = mangled.as_bytes();
    let b = plain.as_bytes();
    if a.len() <= b.len() {
        return false;
    }
    let mut pos = 0;
    let mut plain_pos = 0;
    while pos < a.len() {
        let ch = a[pos];
        pos += 1;
        if plain_pos < b.len() && ch == b[plain_pos] {
            plain_pos += 1;
            continue;
        }
        if ch == PRIVATE_KEY_SEPARATOR {
            while pos < a.len() && a[pos].is_ascii_digit() {
                pos += 1;
            }
            continue;
        }
        return false;
    }
    plain_pos == b.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── scrubbing scenarios ──

    #[test]
    fn scrub_accessors() {
        assert_eq!(scrub_name("get:foo@123456"), "foo");
        assert_eq!(scrub_name("set:foo@123456"), "foo=");
        assert_eq!(scrub_name("get:bar"), "bar");
        assert_eq!(scrub_name("set:bar"), "bar=");
    }

    #[test]
    fn scrub_constructors() {
        assert_eq!(scrub_name("_MyClass@123456."), "_MyClass");
        assert_eq!(scrub_name("_MyClass@123456.named"), "_MyClass.named");
        assert_eq!(scrub_name("Plain."), "Plain");
    }

    #[test]
    fn scrub_mixin_application_names() {
        assert_eq!(scrub_name("_A@111&_B@222&C"), "_A&_B&C");
    }

    #[test]
    fn scrub_leaves_ambiguous_names_alone() {
        assert_eq!(scrub_name("a.b.c"), "a.b.c");
        assert_eq!(scrub_name("get:a:b"), "get:a:b");
        assert_eq!(scrub_name("_X@1.y@2.z@3"), "_X.y.z");
    }

    #[test]
    fn scrub_top_level_and_clean_names() {
        assert_eq!(scrub_name(TOP_LEVEL_NAME), "");
        assert!(matches!(scrub_name("clean"), Cow::Borrowed("clean")));
        assert_eq!(scrub_name("a@b"), "ab", "an empty key is still a key");
        assert_eq!(scrub_name("_x@"), "_x");
    }

    #[test]
    fn scrub_removes_exactly_the_key_runs() {
        let segments = ["_Alpha", "beta", "_Gamma", "delta"];
        for k in 0..=segments.len() {
            let mangled: Vec<String> = segments[..k]
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{s}@{}", 1000 + i * 7))
                .collect();
            let expected = segments[..k].join("&");
            assert_eq!(scrub_name(&mangled.join("&")), expected, "k = {k}");
        }
    }

    #[test]
    fn retain_private_then_scrub() {
        for field in ["x", "_y@42", "value"] {
            let getter = getter_name(field);
            let setter = setter_name(field);
            let plain = scrub_name(field).into_owned();
            assert_eq!(scrub_name(&scrub_name_retain_private(&getter)), plain);
            assert_eq!(scrub_name(&scrub_name_retain_private(&setter)), format!("{plain}="));
        }
        assert_eq!(scrub_name_retain_private("set:_x@12"), "_x=@12");
        assert_eq!(scrub_name_retain_private("get:_x@12"), "_x@12");
        assert_eq!(scrub_name_retain_private("_x@12"), "_x@12");
    }

    // ── private key equality ──

    #[test]
    fn equals_ignoring_private_key_scenarios() {
        assert!(equals_ignoring_private_key("_Foo@111.bar@111", "_Foo.bar"));
        assert!(!equals_ignoring_private_key("_Foo@111.bar@111", "_Foo.baz"));
        assert!(equals_ignoring_private_key("_Foo", "_Foo"));
        assert!(!equals_ignoring_private_key("_Foo", "_Fo"));
        assert!(!equals_ignoring_private_key("_Foo@12", "_Foo.bar"));
        assert!(!equals_ignoring_private_key("_Fo", "_Foo"));
    }

    #[test]
    fn accessor_helpers() {
        assert_eq!(getter_name("x"), "get:x");
        assert_eq!(field_name_from_setter("set:x"), Some("x"));
        assert_eq!(field_name_from_getter("x"), None);
        assert!(is_private("get:_hidden"));
        assert!(!is_private("set:open"));
        assert_eq!(mangle_private_name("_x", "@0012345"), "_x@0012345");
        assert_eq!(demangle_dynamic_forwarder_name(&dynamic_forwarder_name("+")), Some("+"));
    }
}
