//! GraphQL document rendering.
//!
//! Selections are assembled as a small tree and printed with four-space
//! indentation. Argument and field order is exactly the insertion order, so
//! the caller controls determinism.

use serde_json::Value;

/// One field of a selection set, optionally with arguments and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Selection {
    name: String,
    args: Vec<(String, String)>,
    children: Vec<Selection>,
}

impl Selection {
    pub(crate) fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn with_children(name: impl Into<String>, children: Vec<Selection>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            children,
        }
    }

    /// Append an argument whose value is already a GraphQL literal.
    pub(crate) fn arg(mut self, name: impl Into<String>, literal: impl Into<String>) -> Self {
        self.args.push((name.into(), literal.into()));
        self
    }

    fn write(&self, out: &mut String, level: usize) {
        indent(out, level);
        out.push_str(&self.name);
        if !self.args.is_empty() {
            out.push('(');
            for (idx, (name, literal)) in self.args.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                out.push_str(name);
                out.push_str(": ");
                out.push_str(literal);
            }
            out.push(')');
        }
        if self.children.is_empty() {
            out.push('\n');
            return;
        }
        out.push_str(" {\n");
        for child in &self.children {
            child.write(out, level + 1);
        }
        indent(out, level);
        out.push_str("}\n");
    }
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("    ");
    }
}

/// Print a whole operation: `query { ... }` or `mutation { ... }`.
pub(crate) fn operation(keyword: &str, roots: &[Selection]) -> String {
    operation_with_variables(keyword, &[], roots)
}

/// Like [`operation`], declaring `(name, type)` variables in the header,
/// e.g. `mutation($config: GenericScalar) { ... }`.
pub(crate) fn operation_with_variables(
    keyword: &str,
    variables: &[(String, &str)],
    roots: &[Selection],
) -> String {
    let mut out = String::with_capacity(512);
    out.push_str(keyword);
    if !variables.is_empty() {
        out.push('(');
        for (idx, (name, kind)) in variables.iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            out.push('$');
            out.push_str(name);
            out.push_str(": ");
            out.push_str(kind);
        }
        out.push(')');
    }
    out.push_str(" {\n");
    for root in roots {
        root.write(&mut out, 1);
    }
    out.push_str("}\n");
    out
}

/// Argument value of a mutation input object.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Input {
    /// Printed inline with [`literal`].
    Literal(Value),
    /// Reference to an operation variable, printed as `$name`.
    Variable(String),
    /// Input object; keys are schema field names.
    Object(Vec<(String, Input)>),
}

impl Input {
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        match self {
            Self::Literal(value) => write_literal(value, out),
            Self::Variable(name) => {
                out.push('$');
                out.push_str(name);
            }
            Self::Object(fields) => {
                out.push('{');
                for (idx, (key, item)) in fields.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push_str(": ");
                    item.write(out);
                }
                out.push('}');
            }
        }
    }
}

/// GraphQL literal for a JSON value.
///
/// Strings use JSON escaping (valid GraphQL string syntax); object key order
/// is preserved. Object keys are printed bare, so objects must only carry
/// GraphQL names as keys: free-form JSON goes through variables instead.
pub(crate) fn literal(value: &Value) -> String {
    let mut out = String::new();
    write_literal(value, &mut out);
    out
}

fn write_literal(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(_) => out.push_str(&value.to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                write_literal(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (idx, (key, item)) in map.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                out.push_str(key);
                out.push_str(": ");
                write_literal(item, out);
            }
            out.push('}');
        }
    }
}
