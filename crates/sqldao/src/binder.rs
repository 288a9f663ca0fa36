//! Named placeholders.
//!
//! `:name` placeholders are rewritten to `?` left to right. Each occurrence
//! binds its own copy of the value, so a name used twice binds twice.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use sqldao_core::{Error, ErrorKind, Result, Value};

/// Public message of a value that cannot be bound.
pub const BIND_ERROR_MSG: &str = "error-to-bind-param";

/// Native bind type of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindType {
    Integer,
    Double,
    String,
}

impl BindType {
    /// The one-letter tag (`i`, `d`, `s`).
    pub const fn tag(self) -> char {
        match self {
            BindType::Integer => 'i',
            BindType::Double => 'd',
            BindType::String => 's',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'i' => Some(BindType::Integer),
            'd' => Some(BindType::Double),
            's' => Some(BindType::String),
            _ => None,
        }
    }

    /// Booleans bind as integers; NULL and everything non-numeric as strings.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_)
            | Value::TinyInt(_)
            | Value::SmallInt(_)
            | Value::Int(_)
            | Value::BigInt(_) => BindType::Integer,
            Value::Float(_) | Value::Double(_) => BindType::Double,
            _ => BindType::String,
        }
    }
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A parameter value, optionally with an explicit bind type.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(Value),
    Typed(Value, BindType),
}

impl Param {
    pub fn value(&self) -> &Value {
        match self {
            Param::Value(v) | Param::Typed(v, _) => v,
        }
    }

    pub fn bind_type(&self) -> BindType {
        match self {
            Param::Value(v) => BindType::infer(v),
            Param::Typed(_, ty) => *ty,
        }
    }
}

macro_rules! impl_param_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Param {
                fn from(v: $ty) -> Self {
                    Param::Value(Value::from(v))
                }
            }
        )*
    };
}

impl_param_from!(bool, i8, i16, i32, i64, u8, u16, u32, f32, f64, String, &str, &String, Vec<u8>);

impl From<u64> for Param {
    fn from(v: u64) -> Self {
        Param::Value(Value::from_u64_clamped(v))
    }
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        Param::Value(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        Param::Value(v.map_or(Value::Null, Into::into))
    }
}

impl<T: Into<Value>> From<(T, BindType)> for Param {
    fn from((v, ty): (T, BindType)) -> Self {
        Param::Typed(v.into(), ty)
    }
}

/// Build a named parameter list.
///
/// ```rust,ignore
/// conn.call("SELECT * FROM t WHERE id = :id", &params! { "id" => 7 }, "")?;
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<(&str, $crate::Param)>::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        ::std::vec![$(($name, $crate::Param::from($value))),+]
    };
}

pub(crate) fn bind_error(text: String) -> Error {
    Error::new(ErrorKind::BindFailure, BIND_ERROR_MSG).with_text(text)
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(f: f64) -> i64 {
    f as i64
}

/// Convert `value` to the wire form of `ty`.
pub fn coerce(value: &Value, ty: BindType) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || bind_error(format!("cannot bind {} as '{}'", value.type_name(), ty));
    match ty {
        BindType::Integer => {
            if let Some(v) = value.as_i64() {
                return Ok(Value::BigInt(v));
            }
            match value {
                Value::Float(_) | Value::Double(_) => {
                    Ok(Value::BigInt(value.as_f64().map_or(0, truncate)))
                }
                _ => value
                    .to_text()
                    .and_then(|s| s.trim().parse().ok())
                    .map(Value::BigInt)
                    .ok_or_else(mismatch),
            }
        }
        BindType::Double => value
            .as_f64()
            .or_else(|| value.to_text().and_then(|s| s.trim().parse().ok()))
            .map(Value::Double)
            .ok_or_else(mismatch),
        BindType::String => match value {
            Value::Bytes(_) | Value::Text(_) => Ok(value.clone()),
            _ => value.to_text().map(Value::Text).ok_or_else(mismatch),
        },
    }
}

/// SQL with positional placeholders and the values to bind, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<Value>,
    pub types: Vec<BindType>,
}

impl BoundStatement {
    /// Bind types as a tag string, e.g. `"isd"`.
    pub fn type_tags(&self) -> String {
        self.types.iter().map(|t| t.tag()).collect()
    }
}

// Quoted spans are matched first so a `:` inside a literal or a quoted
// identifier is never taken for a placeholder. Only the last alternative
// captures.
const PLACEHOLDER_PATTERN: &str = r#"(?s)'(?:[^'\\]|\\.|'')*'|"(?:[^"\\]|\\.|"")*"|`[^`]*`|:([A-Za-z_][A-Za-z0-9_]*)"#;

fn placeholder() -> Result<&'static Regex> {
    static PLACEHOLDER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(PLACEHOLDER_PATTERN))
        .as_ref()
        .map_err(|e| Error::unknown(format!("placeholder pattern: {}", e)))
}

/// Rewrite `:name` placeholders in `sql` and collect their values.
///
/// A name starts with a letter or `_`. Text inside `'...'`, `"..."` and
/// `` `...` `` is copied through untouched.
///
/// A later entry for the same name overrides an earlier one. A placeholder
/// with no value is a `BindFailure`.
pub fn bind(sql: &str, params: &[(&str, Param)]) -> Result<BoundStatement> {
    let re = placeholder()?;
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut types = Vec::new();
    let mut last = 0;

    for caps in re.captures_iter(sql) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let param = params
            .iter()
            .rev()
            .find(|(key, _)| key.trim_start_matches(':') == name.as_str())
            .map(|(_, param)| param)
            .ok_or_else(|| bind_error(format!("no value for placeholder :{}", name.as_str())))?;

        let ty = param.bind_type();
        values.push(coerce(param.value(), ty)?);
        types.push(ty);
        out.push_str(&sql[last..whole.start()]);
        out.push('?');
        last = whole.end();
    }
    out.push_str(&sql[last..]);

    Ok(BoundStatement {
        sql: out,
        values,
        types,
    })
}

/// Append a ` # <request id> <function>` comment for server-side tracing.
///
/// Empty parts are skipped; when both are empty the SQL is unchanged.
pub fn annotate(sql: &str, request_id: &str, function: &str) -> String {
    let tag = [request_id, function]
        .iter()
        .map(|part| part.replace(['\n', '\r'], " ").trim().to_string())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if tag.is_empty() {
        sql.to_string()
    } else {
        format!("{} # {}", sql, tag)
    }
}
