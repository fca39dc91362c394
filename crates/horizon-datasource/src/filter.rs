//! Filter capability and filter expressions.
//!
//! A [`Filter`] decides which items a view admits. Its [`Display`] form is
//! part of the view cache key, so it must be stable: two filters that print
//! the same are treated as the same filter.
//!
//! Two kinds of filters are built from request strings by [`build_filter`]:
//!
//! - [`AttributeFilter`]: `attr op literal` terms joined by `&`, e.g.
//!   `status=open&price>=10`. Operators are `=`, `!=`, `<`, `<=`, `>`, `>=`
//!   and `~` (case-insensitive substring match on the value's text).
//! - [`RequestFilter`]: any expression beginning with the query marker
//!   (`#` by default). It admits everything; the view it keys is populated
//!   explicitly with the result of a server-side query.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::getter::SharedGetter;
use crate::value::AttrValue;

/// Decides which items a view admits.
pub trait Filter<T>: fmt::Display + Send + Sync {
    /// Returns `true` if `item` passes the filter.
    fn include(&self, item: &T) -> bool;

    /// Returns `true` for request-identity filters, whose views hold the
    /// result of a query rather than a subset of their source.
    fn is_request_filter(&self) -> bool {
        false
    }
}

/// Shared filter handle.
pub type SharedFilter<T> = Arc<dyn Filter<T>>;

/// Comparison operator of a filter term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `~`
    Contains,
}

impl FilterOp {
    /// Two-character operators come first so `<=` is not read as `<`.
    const ALL: [(&'static str, FilterOp); 7] = [
        ("!=", FilterOp::Ne),
        ("<=", FilterOp::Le),
        (">=", FilterOp::Ge),
        ("=", FilterOp::Eq),
        ("<", FilterOp::Lt),
        (">", FilterOp::Gt),
        ("~", FilterOp::Contains),
    ];

    /// Returns the operator's symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "~",
        }
    }
}

/// One `attr op literal` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTerm {
    /// Attribute name.
    pub attribute: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Right-hand side, as written.
    pub literal: String,
}

impl FilterTerm {
    /// Parses a single term.
    pub fn parse(term: &str) -> Result<Self> {
        let (position, symbol, op) = term
            .char_indices()
            .find_map(|(i, _)| {
                FilterOp::ALL
                    .iter()
                    .find(|(symbol, _)| term[i..].starts_with(symbol))
                    .map(|(symbol, op)| (i, *symbol, *op))
            })
            .ok_or_else(|| Error::invalid_filter(term, "missing operator"))?;

        let attribute = term[..position].trim();
        if attribute.is_empty() {
            return Err(Error::invalid_filter(term, "missing attribute name"));
        }
        Ok(Self {
            attribute: attribute.to_string(),
            op,
            literal: term[position + symbol.len()..].trim().to_string(),
        })
    }

    fn matches(&self, value: Option<AttrValue>) -> bool {
        let Some(value) = value else {
            return self.op == FilterOp::Ne;
        };
        if self.op == FilterOp::Contains {
            return value
                .to_string()
                .to_lowercase()
                .contains(&self.literal.to_lowercase());
        }
        let Some(literal) = value.parse_like(&self.literal) else {
            return self.op == FilterOp::Ne;
        };
        let ordering = value.cmp(&literal);
        match self.op {
            FilterOp::Eq => ordering.is_eq(),
            FilterOp::Ne => ordering.is_ne(),
            FilterOp::Lt => ordering.is_lt(),
            FilterOp::Le => ordering.is_le(),
            FilterOp::Gt => ordering.is_gt(),
            FilterOp::Ge => ordering.is_ge(),
            FilterOp::Contains => unreachable!("handled above"),
        }
    }
}

impl fmt::Display for FilterTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.attribute, self.op.symbol(), self.literal)
    }
}

/// A conjunction of attribute comparisons.
pub struct AttributeFilter<T> {
    terms: Vec<FilterTerm>,
    getter: SharedGetter<T>,
}

impl<T> AttributeFilter<T> {
    /// Parses `expression`, validating attribute names against `getter`.
    pub fn parse(expression: &str, getter: SharedGetter<T>) -> Result<Self> {
        let terms = expression
            .split('&')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(FilterTerm::parse)
            .collect::<Result<Vec<_>>>()?;
        if terms.is_empty() {
            return Err(Error::invalid_filter(expression, "no terms"));
        }
        if let Some(term) = terms.iter().find(|t| !getter.has_attribute(&t.attribute)) {
            return Err(Error::unknown_attribute(&term.attribute));
        }
        Ok(Self { terms, getter })
    }

    /// Returns the parsed terms.
    pub fn terms(&self) -> &[FilterTerm] {
        &self.terms
    }
}

impl<T> Filter<T> for AttributeFilter<T> {
    fn include(&self, item: &T) -> bool {
        self.terms
            .iter()
            .all(|term| term.matches(self.getter.value(item, &term.attribute)))
    }
}

impl<T> fmt::Display for AttributeFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}

/// Pass-through filter identifying a query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFilter {
    marker: String,
}

impl RequestFilter {
    /// Creates a request filter for `marker` (e.g. `#q-17`).
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl<T> Filter<T> for RequestFilter {
    fn include(&self, _item: &T) -> bool {
        true
    }

    fn is_request_filter(&self) -> bool {
        true
    }
}

impl fmt::Display for RequestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.marker)
    }
}

/// A filter backed by a closure, identified by a caller-chosen name.
pub struct FnFilter<T> {
    name: String,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> FnFilter<T> {
    /// Creates a named predicate filter.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl<T> Filter<T> for FnFilter<T> {
    fn include(&self, item: &T) -> bool {
        (self.predicate)(item)
    }
}

impl<T> fmt::Display for FnFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builds a filter from a request expression.
///
/// Returns `Ok(None)` for an empty expression, a [`RequestFilter`] when the
/// expression starts with `query_marker`, and an [`AttributeFilter`]
/// otherwise.
pub fn build_filter<T: 'static>(
    expression: &str,
    query_marker: char,
    getter: &SharedGetter<T>,
) -> Result<Option<SharedFilter<T>>> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Ok(None);
    }
    if expression.starts_with(query_marker) {
        return Ok(Some(Arc::new(RequestFilter::new(expression))));
    }
    let filter = AttributeFilter::parse(expression, getter.clone())?;
    Ok(Some(Arc::new(filter)))
}
