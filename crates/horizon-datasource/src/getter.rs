//! The getter capability: how the framework reads items.
//!
//! Items are opaque to every view, filter and listener. Whatever they need
//! to know about an item (its identity key, a comparable value for an
//! attribute, display text, a row state) goes through a [`Getter`].
//!
//! [`AttributeRegistry`] is the stock implementation: an explicit table from
//! attribute name to accessor function, populated once at startup.
//!
//! # Example
//!
//! ```
//! use horizon_datasource::{AttributeRegistry, Getter};
//!
//! #[derive(Clone)]
//! struct Person {
//!     id: u32,
//!     name: String,
//!     age: i64,
//! }
//!
//! let getter = AttributeRegistry::new(|p: &Person| p.id.to_string())
//!     .attribute("name", |p: &Person| p.name.clone())
//!     .attribute("age", |p: &Person| p.age);
//!
//! let alice = Person { id: 1, name: "Alice".into(), age: 30 };
//! assert_eq!(getter.key(&alice), "1");
//! assert_eq!(getter.value(&alice, "age").unwrap().to_string(), "30");
//! assert!(getter.has_attribute("name"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::value::AttrValue;

/// Locale information passed to text rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleContext {
    /// BCP 47 language tag, e.g. `en-US`.
    pub locale: String,
}

impl LocaleContext {
    /// Creates a context for `locale`.
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
        }
    }
}

impl Default for LocaleContext {
    fn default() -> Self {
        Self::new("en-US")
    }
}

/// Reads keys, values and text from items of type `T`.
///
/// Implementations must be deterministic and side-effect free. The key must
/// be stable and unique within a list.
pub trait Getter<T>: Send + Sync {
    /// Returns the identity key of `item`.
    fn key(&self, item: &T) -> String;

    /// Returns the comparable value of `attribute`, or `None` if the item has
    /// no value for it.
    fn value(&self, item: &T, attribute: &str) -> Option<AttrValue>;

    /// Returns the display text of `attribute`.
    ///
    /// Defaults to the [`Display`](fmt::Display) form of the value.
    fn text(&self, item: &T, attribute: &str, locale: &LocaleContext) -> Option<String> {
        let _ = locale;
        self.value(item, attribute).map(|v| v.to_string())
    }

    /// Returns a free-form row state string (e.g. `"error"`, `"stale"`).
    fn row_state(&self, item: &T) -> Option<String> {
        let _ = item;
        None
    }

    /// Returns `true` if `attribute` can be read by this getter.
    ///
    /// Filters and sorts reject unknown attributes when they are built.
    fn has_attribute(&self, attribute: &str) -> bool {
        let _ = attribute;
        true
    }
}

/// Shared getter handle.
pub type SharedGetter<T> = Arc<dyn Getter<T>>;

type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
type ValueFn<T> = Arc<dyn Fn(&T) -> Option<AttrValue> + Send + Sync>;
type TextFn<T> = Arc<dyn Fn(&T, &LocaleContext) -> String + Send + Sync>;
type StateFn<T> = Arc<dyn Fn(&T) -> Option<String> + Send + Sync>;

/// A [`Getter`] backed by an explicit attribute table.
pub struct AttributeRegistry<T> {
    key: KeyFn<T>,
    values: HashMap<String, ValueFn<T>>,
    texts: HashMap<String, TextFn<T>>,
    state: Option<StateFn<T>>,
}

impl<T: 'static> AttributeRegistry<T> {
    /// Creates a registry with the given key function and no attributes.
    pub fn new<F>(key: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self {
            key: Arc::new(key),
            values: HashMap::new(),
            texts: HashMap::new(),
            state: None,
        }
    }

    /// Registers an attribute that always has a value.
    pub fn attribute<F, R>(self, name: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: Into<AttrValue>,
    {
        self.optional_attribute(name, move |item| Some(accessor(item)))
    }

    /// Registers an attribute whose value may be absent.
    pub fn optional_attribute<F, R>(mut self, name: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&T) -> Option<R> + Send + Sync + 'static,
        R: Into<AttrValue>,
    {
        self.values
            .insert(name.into(), Arc::new(move |item: &T| accessor(item).map(Into::into)));
        self
    }

    /// Overrides the display text of an attribute.
    pub fn text<F>(mut self, name: impl Into<String>, render: F) -> Self
    where
        F: Fn(&T, &LocaleContext) -> String + Send + Sync + 'static,
    {
        self.texts.insert(name.into(), Arc::new(render));
        self
    }

    /// Sets the row state function.
    pub fn row_state<F>(mut self, state: F) -> Self
    where
        F: Fn(&T) -> Option<String> + Send + Sync + 'static,
    {
        self.state = Some(Arc::new(state));
        self
    }

    /// Returns the registered attribute names, sorted.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<T> Getter<T> for AttributeRegistry<T> {
    fn key(&self, item: &T) -> String {
        (self.key)(item)
    }

    fn value(&self, item: &T, attribute: &str) -> Option<AttrValue> {
        self.values.get(attribute).and_then(|f| f(item))
    }

    fn text(&self, item: &T, attribute: &str, locale: &LocaleContext) -> Option<String> {
        if let Some(render) = self.texts.get(attribute) {
            return Some(render(item, locale));
        }
        self.value(item, attribute).map(|v| v.to_string())
    }

    fn row_state(&self, item: &T) -> Option<String> {
        self.state.as_ref().and_then(|f| f(item))
    }

    fn has_attribute(&self, attribute: &str) -> bool {
        self.values.contains_key(attribute) || self.texts.contains_key(attribute)
    }
}

impl<T: 'static> fmt::Debug for AttributeRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeRegistry")
            .field("attributes", &self.attribute_names())
            .finish()
    }
}
