//! Plan-level expressions that can travel with a projection.

use serde::{Deserialize, Serialize};
use std::fmt;

use dqe_common::{DqeError, Result};

use crate::stream::{StreamInput, StreamOutput};

const SYMBOL_INPUT_COLUMN: u8 = 0;
const SYMBOL_COLUMN: u8 = 1;
const SYMBOL_LITERAL: u8 = 2;

const LITERAL_NULL: u8 = 0;
const LITERAL_BOOLEAN: u8 = 1;
const LITERAL_INT64: u8 = 2;
const LITERAL_FLOAT64: u8 = 3;
const LITERAL_UTF8: u8 = 4;

/// A sort key or output expression referenced by a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Symbol {
    /// Positional reference into the rows produced by the upstream operator.
    InputColumn(u32),
    /// Named table column.
    Column(String),
    Literal(LiteralValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
    Null,
}

impl Symbol {
    /// Writes a type tag followed by the symbol body.
    pub fn to_stream(&self, out: &mut StreamOutput) -> Result<()> {
        match self {
            Symbol::InputColumn(idx) => {
                out.write_u8(SYMBOL_INPUT_COLUMN);
                out.write_vint(*idx);
            }
            Symbol::Column(name) => {
                out.write_u8(SYMBOL_COLUMN);
                out.write_string(name)?;
            }
            Symbol::Literal(v) => {
                out.write_u8(SYMBOL_LITERAL);
                v.to_stream(out)?;
            }
        }
        Ok(())
    }

    pub fn from_stream(input: &mut StreamInput) -> Result<Self> {
        match input.read_u8()? {
            SYMBOL_INPUT_COLUMN => Ok(Symbol::InputColumn(input.read_vint()?)),
            SYMBOL_COLUMN => Ok(Symbol::Column(input.read_string()?)),
            SYMBOL_LITERAL => Ok(Symbol::Literal(LiteralValue::from_stream(input)?)),
            other => Err(DqeError::Codec(format!("unknown symbol tag {other}"))),
        }
    }
}

impl LiteralValue {
    fn to_stream(&self, out: &mut StreamOutput) -> Result<()> {
        match self {
            LiteralValue::Null => out.write_u8(LITERAL_NULL),
            LiteralValue::Boolean(b) => {
                out.write_u8(LITERAL_BOOLEAN);
                out.write_bool(*b);
            }
            LiteralValue::Int64(v) => {
                out.write_u8(LITERAL_INT64);
                out.write_i64(*v);
            }
            LiteralValue::Float64(v) => {
                out.write_u8(LITERAL_FLOAT64);
                out.write_f64(*v);
            }
            LiteralValue::Utf8(s) => {
                out.write_u8(LITERAL_UTF8);
                out.write_string(s)?;
            }
        }
        Ok(())
    }

    fn from_stream(input: &mut StreamInput) -> Result<Self> {
        match input.read_u8()? {
            LITERAL_NULL => Ok(LiteralValue::Null),
            LITERAL_BOOLEAN => Ok(LiteralValue::Boolean(input.read_bool()?)),
            LITERAL_INT64 => Ok(LiteralValue::Int64(input.read_i64()?)),
            LITERAL_FLOAT64 => Ok(LiteralValue::Float64(input.read_f64()?)),
            LITERAL_UTF8 => Ok(LiteralValue::Utf8(input.read_string()?)),
            other => Err(DqeError::Codec(format!("unknown literal tag {other}"))),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::InputColumn(idx) => write!(f, "INPUT({idx})"),
            Symbol::Column(name) => write!(f, "{name}"),
            Symbol::Literal(v) => write!(f, "{v}"),
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Int64(v) => write!(f, "{v}"),
            LiteralValue::Float64(v) => write!(f, "{v}"),
            LiteralValue::Utf8(s) => write!(f, "'{s}'"),
            LiteralValue::Boolean(b) => write!(f, "{b}"),
            LiteralValue::Null => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LiteralValue, Symbol};
    use crate::stream::{StreamInput, StreamOutput};
    use dqe_common::DqeError;

    #[test]
    fn symbols_survive_the_stream() {
        let symbols = vec![
            Symbol::InputColumn(3),
            Symbol::Column("name".to_string()),
            Symbol::Literal(LiteralValue::Null),
            Symbol::Literal(LiteralValue::Float64(-0.5)),
            Symbol::Literal(LiteralValue::Utf8("ä".to_string())),
        ];
        let mut out = StreamOutput::new();
        for s in &symbols {
            s.to_stream(&mut out).expect("write");
        }
        let mut input = StreamInput::new(out.freeze());
        let back = (0..symbols.len())
            .map(|_| Symbol::from_stream(&mut input))
            .collect::<Result<Vec<_>, _>>()
            .expect("read");
        assert_eq!(back, symbols);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut input = StreamInput::new(vec![9u8]);
        let err = Symbol::from_stream(&mut input).expect_err("tag");
        assert!(matches!(err, DqeError::Codec(msg) if msg.contains("unknown symbol tag 9")));
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(Symbol::InputColumn(1).to_string(), "INPUT(1)");
        assert_eq!(
            Symbol::Literal(LiteralValue::Utf8("x".to_string())).to_string(),
            "'x'"
        );
    }
}
