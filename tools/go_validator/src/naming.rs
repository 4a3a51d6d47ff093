//! Mapping from Python identifiers to the Go identifiers a translation is expected to use.

const GO_KEYWORDS: &[&str] = &[
    "break",
    "case",
    "chan",
    "const",
    "continue",
    "default",
    "defer",
    "else",
    "fallthrough",
    "for",
    "func",
    "go",
    "goto",
    "if",
    "import",
    "interface",
    "map",
    "package",
    "range",
    "return",
    "select",
    "struct",
    "switch",
    "type",
    "var",
];

/// Identifiers a Go file can use without declaring them: the predeclared names, `init` (which
/// cannot be called or take parameters), and the `errors` package that generated stubs import.
const PREDECLARED: &[&str] = &[
    "any", "append", "bool", "byte", "cap", "clear", "close", "comparable", "complex",
    "complex128", "complex64", "copy", "delete", "error", "errors", "false", "float32", "float64",
    "imag", "init", "int", "int16", "int32", "int64", "int8", "iota", "len", "make", "max", "min",
    "new", "nil", "panic", "print", "println", "real", "recover", "rune", "string", "true", "uint",
    "uint16", "uint32", "uint64", "uint8", "uintptr",
];

/// The Go name for a Python function, method or class: CamelCase, exported unless the Python name
/// is private (leading underscore).
pub fn go_name(python: &str) -> String {
    camel_case(python, !python.starts_with('_'))
}

/// The Go name for a Python parameter or local: lowerCamelCase.
pub fn go_local_name(python: &str) -> String {
    camel_case(python, false)
}

fn camel_case(python: &str, exported: bool) -> String {
    let mut name = String::new();
    for (i, part) in python.split('_').filter(|p| !p.is_empty()).enumerate() {
        let mut chars = part.chars();
        let Some(first) = chars.next() else {
            continue;
        };
        if i == 0 && !exported {
            name.extend(first.to_lowercase());
        } else {
            name.extend(first.to_uppercase());
        }
        name.push_str(chars.as_str());
    }
    if name.is_empty() {
        name.push('x');
    }
    if GO_KEYWORDS.contains(&name.as_str()) || PREDECLARED.contains(&name.as_str()) {
        name.push('_');
    }
    name
}

/// Case- and underscore-insensitive form used to match Python names against Go identifiers.
pub fn normalized(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(go_name("get_total"), "GetTotal");
        assert_eq!(go_name("SalesInvoice"), "SalesInvoice");
        assert_eq!(go_name("_merge_similar_entries"), "mergeSimilarEntries");
        assert_eq!(go_name("_type"), "type_");
        assert_eq!(go_name("__"), "x");
        assert_eq!(go_local_name("posting_date"), "postingDate");
        assert_eq!(go_local_name("range"), "range_");
        assert_eq!(go_name("_init"), "init_");
        assert_eq!(go_name("init"), "Init");
        assert_eq!(go_local_name("errors"), "errors_");
        assert_eq!(go_local_name("nil"), "nil_");
        assert_eq!(go_local_name("len"), "len_");
        assert_eq!(go_local_name("is_nil"), "isNil");
        assert_eq!(normalized("Get_Total"), normalized("getTotal"));
    }
}
