//! Parameter binding plans.
//!
//! A handler declares its parameters as an ordered list of [`ParamSpec`]s.
//! When a route is registered the list is compiled, against the route's path
//! placeholders, into a [`BindingPlan`]: one [`Binding`] per parameter saying
//! where its value comes from. Defaults are converted at that point, so an
//! invalid default is a registration error rather than a request-time one.

use smallvec::SmallVec;

use super::args::{ArgValue, FromArg, ParamKind};
use super::core::{DispatchError, HandlerError};
use crate::router::{ParamVec, RouteError};
use crate::server::Session;

/// Source of a declared parameter before it is compiled against a route.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSource {
    /// A converted value taken from the path or the query string.
    Value {
        kind: ParamKind,
        optional: bool,
        default: Option<String>,
    },
    /// The `Session` itself.
    Session,
    /// The parsed `Request`.
    Request,
}

/// One declared handler parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub source: ParamSource,
}

impl ParamSpec {
    /// A value parameter of type `T`.
    #[must_use]
    pub fn of<T: FromArg>(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: ParamSource::Value {
                kind: T::KIND,
                optional: T::OPTIONAL,
                default: None,
            },
        }
    }

    /// Raw default used when a query parameter is absent.
    #[must_use]
    pub fn with_default(mut self, raw: impl Into<String>) -> Self {
        if let ParamSource::Value { default, .. } = &mut self.source {
            *default = Some(raw.into());
        }
        self
    }

    #[must_use]
    pub fn session(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: ParamSource::Session,
        }
    }

    #[must_use]
    pub fn request(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: ParamSource::Request,
        }
    }
}

/// Where one argument comes from at request time.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Path {
        name: String,
        kind: ParamKind,
    },
    Query {
        name: String,
        kind: ParamKind,
        optional: bool,
        default: Option<ArgValue>,
    },
    Session,
    Request,
}

/// Compiled, per-route list of bindings in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingPlan {
    bindings: Vec<Binding>,
}

impl BindingPlan {
    /// Compile `specs` for a route whose pattern exposes `path_params`.
    ///
    /// # Errors
    ///
    /// [`RouteError::InvalidDefault`] when a default does not convert to the
    /// parameter's type.
    pub fn compile(
        handler: &str,
        specs: &[ParamSpec],
        path_params: &[String],
    ) -> Result<Self, RouteError> {
        let mut bindings = Vec::with_capacity(specs.len());
        for spec in specs {
            let binding = match &spec.source {
                ParamSource::Session => Binding::Session,
                ParamSource::Request => Binding::Request,
                ParamSource::Value { kind, .. } if path_params.contains(&spec.name) => {
                    Binding::Path {
                        name: spec.name.clone(),
                        kind: *kind,
                    }
                }
                ParamSource::Value {
                    kind,
                    optional,
                    default,
                } => {
                    let default = match default {
                        Some(raw) => Some(kind.convert(raw).ok_or_else(|| {
                            RouteError::InvalidDefault {
                                handler: handler.to_string(),
                                param: spec.name.clone(),
                                value: raw.clone(),
                            }
                        })?),
                        None => None,
                    };
                    Binding::Query {
                        name: spec.name.clone(),
                        kind: *kind,
                        optional: *optional,
                        default,
                    }
                }
            };
            bindings.push(binding);
        }
        Ok(Self { bindings })
    }

    #[must_use]
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Resolve every binding against the matched path and the request query.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::MissingParameter`] when a required query parameter
    ///   is absent and has no default.
    /// * [`DispatchError::Conversion`] when a present value does not convert.
    pub fn bind(&self, path_params: &ParamVec, session: &Session) -> Result<BoundArgs, DispatchError> {
        let mut values = SmallVec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            let value = match binding {
                Binding::Session | Binding::Request => ArgValue::Missing,
                Binding::Path { name, kind } => {
                    let raw = path_params
                        .iter()
                        .rfind(|(k, _)| k.as_ref() == name)
                        .map(|(_, v)| v.as_str())
                        .ok_or_else(|| DispatchError::MissingParameter { name: name.clone() })?;
                    convert(name, *kind, raw)?
                }
                Binding::Query {
                    name,
                    kind,
                    optional,
                    default,
                } => match session.request().query(name) {
                    Some(raw) => convert(name, *kind, raw)?,
                    None => match default {
                        Some(v) => v.clone(),
                        None if *optional => ArgValue::Missing,
                        None => {
                            return Err(DispatchError::MissingParameter { name: name.clone() })
                        }
                    },
                },
            };
            values.push(value);
        }
        Ok(BoundArgs { values })
    }
}

fn convert(name: &str, kind: ParamKind, raw: &str) -> Result<ArgValue, DispatchError> {
    kind.convert(raw).ok_or_else(|| DispatchError::Conversion {
        name: name.to_string(),
        value: raw.to_string(),
        expected: kind.name(),
    })
}

/// Arguments converted for one invocation.
#[derive(Debug, Default)]
pub struct BoundArgs {
    values: SmallVec<[ArgValue; 8]>,
}

impl BoundArgs {
    #[must_use]
    pub fn new(values: Vec<ArgValue>) -> Self {
        Self {
            values: values.into(),
        }
    }

    /// Move the argument at `index` out as `T`.
    ///
    /// # Errors
    ///
    /// [`HandlerError::BadArgument`] if the slot holds a different kind,
    /// which means the thunk and its parameter list disagree.
    pub fn take<T: FromArg>(&mut self, index: usize) -> Result<T, HandlerError> {
        let slot = self
            .values
            .get_mut(index)
            .ok_or(HandlerError::BadArgument { index })?;
        T::from_value(std::mem::replace(slot, ArgValue::Missing))
            .ok_or(HandlerError::BadArgument { index })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
