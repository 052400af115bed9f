//! Projections attached to execution nodes by the planner.
//!
//! A projection describes what a sub-execution computes on its row stream.
//! The job coordination layer never inspects them; they are shipped to the
//! executing node inside the plan fragment, either as JSON or through the
//! compact [`StreamOutput`] form written by [`Projection::write_to`].
//!
//! Stream layout of a top-N projection:
//!
//! ```text
//! offset: vint | limit: vint | n: vint | n x bool (reverse) | n x Symbol
//! ```
//!
//! `n == 0` means the projection is unordered and nothing follows.

use serde::{Deserialize, Serialize};
use std::fmt;

use dqe_common::{DqeError, Result};

use crate::stream::{StreamInput, StreamOutput};
use crate::symbol::Symbol;

/// Row limit of a top-N projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Limit {
    Bounded(u32),
    Unbounded,
}

impl Limit {
    /// Stream value reserved for [`Limit::Unbounded`].
    pub const UNBOUNDED_WIRE: u32 = u32::MAX;

    fn to_wire(self) -> u32 {
        match self {
            Limit::Bounded(n) => n,
            Limit::Unbounded => Self::UNBOUNDED_WIRE,
        }
    }

    fn from_wire(v: u32) -> Self {
        if v == Self::UNBOUNDED_WIRE {
            Limit::Unbounded
        } else {
            Limit::Bounded(v)
        }
    }

    fn validate(self) -> Result<Self> {
        if self == Limit::Bounded(Self::UNBOUNDED_WIRE) {
            return Err(DqeError::InvalidArgument(format!(
                "limit {} is reserved for unbounded",
                Self::UNBOUNDED_WIRE
            )));
        }
        Ok(self)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Bounded(n) => write!(f, "{n}"),
            Limit::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Sort keys paired with their descending flags; never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OrderByRepr")]
pub struct OrderBy {
    symbols: Vec<Symbol>,
    reverse_flags: Vec<bool>,
}

#[derive(Deserialize)]
struct OrderByRepr {
    symbols: Vec<Symbol>,
    reverse_flags: Vec<bool>,
}

impl TryFrom<OrderByRepr> for OrderBy {
    type Error = DqeError;

    fn try_from(raw: OrderByRepr) -> Result<Self> {
        check_order_by(&raw.symbols, &raw.reverse_flags)?;
        Ok(Self {
            symbols: raw.symbols,
            reverse_flags: raw.reverse_flags,
        })
    }
}

impl OrderBy {
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn reverse_flags(&self) -> &[bool] {
        &self.reverse_flags
    }
}

fn check_order_by(symbols: &[Symbol], reverse_flags: &[bool]) -> Result<()> {
    if symbols.len() != reverse_flags.len() {
        return Err(DqeError::InvalidArgument(format!(
            "reverse flags length does not match orderBy items count ({} flags, {} items)",
            reverse_flags.len(),
            symbols.len()
        )));
    }
    Ok(())
}

/// Sort + limit/offset over a row stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TopNProjectionRepr")]
pub struct TopNProjection {
    limit: Limit,
    offset: u32,
    order_by: Option<OrderBy>,
}

#[derive(Deserialize)]
struct TopNProjectionRepr {
    limit: Limit,
    offset: u32,
    order_by: Option<OrderByRepr>,
}

impl TryFrom<TopNProjectionRepr> for TopNProjection {
    type Error = DqeError;

    fn try_from(raw: TopNProjectionRepr) -> Result<Self> {
        match raw.order_by {
            Some(order_by) => Self::ordered(
                raw.limit,
                raw.offset,
                order_by.symbols,
                order_by.reverse_flags,
            ),
            None => Self::new(raw.limit, raw.offset),
        }
    }
}

impl TopNProjection {
    /// Unordered limit/offset.
    pub fn new(limit: Limit, offset: u32) -> Result<Self> {
        Ok(Self {
            limit: limit.validate()?,
            offset,
            order_by: None,
        })
    }

    /// Ordered top-N. An empty ordering is the same as [`TopNProjection::new`].
    pub fn ordered(
        limit: Limit,
        offset: u32,
        order_by: Vec<Symbol>,
        reverse_flags: Vec<bool>,
    ) -> Result<Self> {
        let mut projection = Self::new(limit, offset)?;
        check_order_by(&order_by, &reverse_flags)?;
        if !order_by.is_empty() {
            projection.order_by = Some(OrderBy {
                symbols: order_by,
                reverse_flags,
            });
        }
        Ok(projection)
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn order_by(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    pub fn is_ordered(&self) -> bool {
        self.order_by.is_some()
    }

    pub fn write_to(&self, out: &mut StreamOutput) -> Result<()> {
        out.write_vint(self.offset);
        out.write_vint(self.limit.to_wire());
        match &self.order_by {
            Some(order_by) => {
                let n = u32::try_from(order_by.symbols.len()).map_err(|_| {
                    DqeError::Codec("too many order by items to encode".to_string())
                })?;
                out.write_vint(n);
                for reverse in &order_by.reverse_flags {
                    out.write_bool(*reverse);
                }
                for symbol in &order_by.symbols {
                    symbol.to_stream(out)?;
                }
            }
            None => out.write_vint(0),
        }
        Ok(())
    }

    pub fn read_from(input: &mut StreamInput) -> Result<Self> {
        let offset = input.read_vint()?;
        let limit = Limit::from_wire(input.read_vint()?);
        let n = input.read_vint()? as usize;
        if n == 0 {
            return Self::new(limit, offset);
        }
        // each entry needs at least a flag byte and a tag byte
        if input.remaining() < n * 2 {
            return Err(DqeError::Codec(format!(
                "order by count {n} exceeds remaining {} bytes",
                input.remaining()
            )));
        }
        let reverse_flags = (0..n)
            .map(|_| input.read_bool())
            .collect::<Result<Vec<_>>>()?;
        let order_by = (0..n)
            .map(|_| Symbol::from_stream(input))
            .collect::<Result<Vec<_>>>()?;
        Self::ordered(limit, offset, order_by, reverse_flags)
    }
}

impl fmt::Display for TopNProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopN[limit={}, offset={}", self.limit, self.offset)?;
        if let Some(order_by) = &self.order_by {
            let keys = order_by
                .symbols
                .iter()
                .zip(&order_by.reverse_flags)
                .map(|(s, rev)| format!("{s} {}", if *rev { "DESC" } else { "ASC" }))
                .collect::<Vec<_>>();
            write!(f, ", order_by=[{}]", keys.join(", "))?;
        }
        write!(f, "]")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionType {
    TopN,
}

impl ProjectionType {
    fn tag(self) -> u32 {
        match self {
            ProjectionType::TopN => 0,
        }
    }

    fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(ProjectionType::TopN),
            other => Err(DqeError::Codec(format!("unknown projection type {other}"))),
        }
    }
}

/// Any projection the planner can attach to an execution node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    TopN(TopNProjection),
}

impl Projection {
    pub fn projection_type(&self) -> ProjectionType {
        match self {
            Projection::TopN(_) => ProjectionType::TopN,
        }
    }

    /// Writes the projection type tag followed by the projection body.
    pub fn write_to(&self, out: &mut StreamOutput) -> Result<()> {
        out.write_vint(self.projection_type().tag());
        match self {
            Projection::TopN(p) => p.write_to(out),
        }
    }

    pub fn read_from(input: &mut StreamInput) -> Result<Self> {
        match ProjectionType::from_tag(input.read_vint()?)? {
            ProjectionType::TopN => Ok(Projection::TopN(TopNProjection::read_from(input)?)),
        }
    }
}

pub fn write_projections(projections: &[Projection], out: &mut StreamOutput) -> Result<()> {
    let n = u32::try_from(projections.len())
        .map_err(|_| DqeError::Codec("too many projections to encode".to_string()))?;
    out.write_vint(n);
    for p in projections {
        p.write_to(out)?;
    }
    Ok(())
}

pub fn read_projections(input: &mut StreamInput) -> Result<Vec<Projection>> {
    let n = input.read_vint()? as usize;
    if input.remaining() < n {
        return Err(DqeError::Codec(format!(
            "projection count {n} exceeds remaining {} bytes",
            input.remaining()
        )));
    }
    (0..n).map(|_| Projection::read_from(input)).collect()
}
