//! Sort capability.
//!
//! A [`SortSpec`] is an ordered list of `(attribute, direction)` criteria.
//! [`Sorter`] binds a spec to a getter and compares items: criteria are
//! tried in order and the first one that tells the items apart decides.
//! Items missing a value sort before items that have one.
//!
//! Specs are written as comma-separated criteria, each either a
//! `+attr`/`-attr` prefix form or an `attr:asc`/`attr:desc` suffix form; a
//! bare `attr` is ascending. The canonical [`Display`](fmt::Display) form is
//! the prefix form (`+name,-age`) and is part of the view cache key.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::getter::SharedGetter;

/// Direction of a sort criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl SortDirection {
    /// Applies this direction to an ascending ordering.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortCriterion {
    /// Attribute to sort by.
    pub attribute: String,
    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortCriterion {
    /// Ascending criterion on `attribute`.
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Descending criterion on `attribute`.
    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Descending,
        }
    }

    fn parse(text: &str, spec: &str) -> Result<Self> {
        let text = text.trim();
        let (attribute, direction) = if let Some(rest) = text.strip_prefix('+') {
            (rest, SortDirection::Ascending)
        } else if let Some(rest) = text.strip_prefix('-') {
            (rest, SortDirection::Descending)
        } else if let Some((attribute, suffix)) = text.split_once(':') {
            let direction = match suffix.trim().to_ascii_lowercase().as_str() {
                "asc" | "ascending" => SortDirection::Ascending,
                "desc" | "descending" => SortDirection::Descending,
                other => {
                    return Err(Error::invalid_sort(
                        spec,
                        format!("unknown direction '{other}'"),
                    ));
                }
            };
            (attribute, direction)
        } else {
            (text, SortDirection::Ascending)
        };
        let attribute = attribute.trim();
        if attribute.is_empty() {
            return Err(Error::invalid_sort(spec, "empty attribute name"));
        }
        Ok(Self {
            attribute: attribute.to_string(),
            direction,
        })
    }
}

impl fmt::Display for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.direction {
            SortDirection::Ascending => '+',
            SortDirection::Descending => '-',
        };
        write!(f, "{sign}{}", self.attribute)
    }
}

/// An ordered list of sort criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortSpec {
    criteria: Vec<SortCriterion>,
}

impl SortSpec {
    /// Creates a spec from criteria.
    pub fn new(criteria: Vec<SortCriterion>) -> Self {
        Self { criteria }
    }

    /// Parses a spec such as `+name,-age` or `name:asc, age:desc`.
    ///
    /// An empty string parses to an empty spec.
    pub fn parse(spec: &str) -> Result<Self> {
        let criteria = spec
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| SortCriterion::parse(part, spec))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { criteria })
    }

    /// Returns the criteria in priority order.
    pub fn criteria(&self) -> &[SortCriterion] {
        &self.criteria
    }

    /// Returns `true` if there are no criteria.
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, criterion) in self.criteria.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{criterion}")?;
        }
        Ok(())
    }
}

/// Compares items according to a [`SortSpec`].
pub struct Sorter<T> {
    spec: SortSpec,
    getter: SharedGetter<T>,
}

impl<T> Sorter<T> {
    /// Binds `spec` to `getter`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSort`] for an empty spec and
    /// [`Error::UnknownAttribute`] if the getter does not know a criterion's
    /// attribute.
    pub fn new(spec: SortSpec, getter: SharedGetter<T>) -> Result<Self> {
        if spec.is_empty() {
            return Err(Error::MissingSort);
        }
        if let Some(c) = spec
            .criteria()
            .iter()
            .find(|c| !getter.has_attribute(&c.attribute))
        {
            return Err(Error::unknown_attribute(&c.attribute));
        }
        Ok(Self { spec, getter })
    }

    /// Parses `spec` and binds it to `getter`.
    ///
    /// Returns `Ok(None)` for an empty spec string.
    pub fn parse(spec: &str, getter: &SharedGetter<T>) -> Result<Option<Self>> {
        let spec = SortSpec::parse(spec)?;
        if spec.is_empty() {
            return Ok(None);
        }
        Self::new(spec, getter.clone()).map(Some)
    }

    /// Returns the bound spec.
    pub fn spec(&self) -> &SortSpec {
        &self.spec
    }

    /// Compares two items by the sort criteria.
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        for criterion in self.spec.criteria() {
            let left = self.getter.value(a, &criterion.attribute);
            let right = self.getter.value(b, &criterion.attribute);
            let ordering = criterion.direction.apply(left.cmp(&right));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl<T> fmt::Display for Sorter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.spec, f)
    }
}

impl<T> fmt::Debug for Sorter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sorter").field(&self.spec.to_string()).finish()
    }
}
