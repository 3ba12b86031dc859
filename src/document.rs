//! Generic parsed document tree handed to the builder by a [`DocumentSource`].

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::error::DocumentError;

/// A parsed value. `Text` carries untyped text (CSV cells and the like)
/// whose type still has to be recognised; `String` is text the source
/// already knows to be a string.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Node>),
    Map(Vec<(String, Node)>),
}

impl Node {
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Convenience constructor for ordered maps.
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Node)>,
        K: Into<String>,
    {
        Node::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }
}

impl From<JsonValue> for Node {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Node::Null,
            JsonValue::Bool(flag) => Node::Bool(flag),
            JsonValue::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Node::Integer(int)
                } else if let Some(unsigned) = number.as_u64() {
                    Node::Decimal(Decimal::from(unsigned))
                } else {
                    Node::Float(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(text) => Node::String(text),
            JsonValue::Array(items) => Node::List(items.into_iter().map(Node::from).collect()),
            JsonValue::Object(entries) => Node::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Node::from(value)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenericDocument {
    /// Where the document came from, for log and error messages.
    pub source: Option<String>,
    pub records: Vec<Node>,
}

impl GenericDocument {
    pub fn new(records: Vec<Node>) -> Self {
        Self {
            source: None,
            records,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Wraps JSON records; a top-level array becomes one record per element.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Array(items) => {
                Self::new(items.into_iter().map(Node::from).collect())
            }
            other => Self::new(vec![Node::from(other)]),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Supplies parsed documents. Format detection and parsing belong entirely
/// to the implementation.
pub trait DocumentSource: Send + Sync {
    fn fetch(&self, input: &str) -> Result<GenericDocument, DocumentError>;
}
