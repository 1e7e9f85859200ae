//! Translates document filters into SQL over the `documents` table.
//!
//! Body fields are addressed with `json_extract(body, '$."field"')`; the
//! `_id` field maps to the `doc_id` column.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::core::{Filter, IndexSpec};
use crate::types::fields;

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values, in placeholder order.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// String parameter.
    String(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
    /// Null parameter.
    Null,
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn string(s: impl Into<String>) -> Self {
        SqlParam::String(s.into())
    }

    /// Converts a JSON value into the SQL value `json_extract` would
    /// return for it.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlParam::Integer(i),
                None => SqlParam::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlParam::String(s.clone()),
            other => SqlParam::String(other.to_string()),
        }
    }

    /// Renders the parameter as an SQL literal.
    fn literal(&self) -> String {
        match self {
            SqlParam::String(s) => quote_literal(s),
            SqlParam::Integer(i) => i.to_string(),
            SqlParam::Float(f) => f.to_string(),
            SqlParam::Null => "NULL".to_string(),
        }
    }

    /// Converts into a rusqlite value for binding.
    pub fn to_sql_value(&self) -> SqlValue {
        match self {
            SqlParam::String(s) => SqlValue::Text(s.clone()),
            SqlParam::Integer(i) => SqlValue::Integer(*i),
            SqlParam::Float(f) => SqlValue::Real(*f),
            SqlParam::Null => SqlValue::Null,
        }
    }
}

impl SqlFragment {
    /// Creates a new SQL fragment.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Adds a parameter and returns its placeholder.
    pub fn add_param(&mut self, param: SqlParam) -> &'static str {
        self.params.push(param);
        "?"
    }

    /// Combines with another fragment using AND.
    pub fn and(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) AND ({})", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Returns the parameters as rusqlite values.
    pub fn sql_values(&self) -> Vec<SqlValue> {
        self.params.iter().map(SqlParam::to_sql_value).collect()
    }
}

/// Quotes a string as an SQL literal.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quotes an SQL identifier.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Returns the JSON path of a top-level field, e.g. `$."@state"`.
pub fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Builds SQL for filters against the `documents` table.
#[derive(Debug, Clone, Copy)]
pub struct FilterSql<'a> {
    /// Table alias to qualify columns with; empty for none.
    alias: &'a str,
    /// Render values as literals instead of parameters.
    inline: bool,
}

impl<'a> FilterSql<'a> {
    /// Builds bound SQL for queries against `documents <alias>`.
    pub fn bound(alias: &'a str) -> Self {
        Self {
            alias,
            inline: false,
        }
    }

    /// Builds literal SQL for index definitions, which cannot bind parameters.
    pub fn inline() -> Self {
        Self {
            alias: "",
            inline: true,
        }
    }

    fn column(&self, name: &str) -> String {
        if self.alias.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.alias, name)
        }
    }

    /// Returns the SQL expression of a document field.
    pub fn field(&self, field: &str) -> String {
        if field == fields::ID {
            self.column("doc_id")
        } else {
            format!(
                "json_extract({}, {})",
                self.column("body"),
                quote_literal(&json_path(field))
            )
        }
    }

    fn value(&self, fragment: &mut SqlFragment, value: &Value) -> String {
        let param = SqlParam::from_json(value);
        if self.inline {
            param.literal()
        } else {
            fragment.add_param(param).to_string()
        }
    }

    /// Translates a filter.
    pub fn filter(&self, filter: &Filter) -> SqlFragment {
        let mut fragment = SqlFragment::new("");
        fragment.sql = match filter {
            Filter::All => "1".to_string(),
            Filter::Eq(field, Value::Null) => format!("{} IS NULL", self.field(field)),
            Filter::Eq(field, value) => {
                let v = self.value(&mut fragment, value);
                format!("{} = {}", self.field(field), v)
            }
            Filter::Ne(field, value) => {
                let v = self.value(&mut fragment, value);
                format!("{} IS NOT {}", self.field(field), v)
            }
            Filter::Gt(field, value) => {
                let v = self.value(&mut fragment, value);
                format!("{} > {}", self.field(field), v)
            }
            Filter::In(_, values) if values.is_empty() => "0".to_string(),
            Filter::In(field, values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| self.value(&mut fragment, v))
                    .collect();
                format!("{} IN ({})", self.field(field), placeholders.join(", "))
            }
            Filter::And(parts) => {
                let mut combined = parts
                    .iter()
                    .map(|part| self.filter(part))
                    .fold(SqlFragment::new(""), SqlFragment::and);
                if combined.sql.is_empty() {
                    combined.sql = "1".to_string();
                }
                return combined;
            }
        };
        fragment
    }

    /// Renders a `CREATE INDEX` statement for `collection`.
    pub fn create_index(&self, collection: &str, index: &IndexSpec) -> String {
        let mut columns = vec!["collection".to_string()];
        for field in &index.fields {
            let direction = if field.descending { " DESC" } else { "" };
            columns.push(format!("{}{}", self.field(&field.field), direction));
        }

        let mut predicate = format!("collection = {}", quote_literal(collection));
        if let Some(partial) = &index.partial {
            predicate = format!("{} AND ({})", predicate, Self::inline().filter(partial).sql);
        }

        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON documents ({}) WHERE {}",
            if index.unique { "UNIQUE " } else { "" },
            quote_ident(&index_name(collection, &index.name)),
            columns.join(", "),
            predicate
        )
    }
}

/// Returns the prefix shared by every index of a collection.
pub fn index_prefix(collection: &str) -> String {
    format!("idx_{}_", collection)
}

/// Returns the database-wide name of a collection's index.
pub fn index_name(collection: &str, name: &str) -> String {
    format!("{}{}", index_prefix(collection), name)
}
