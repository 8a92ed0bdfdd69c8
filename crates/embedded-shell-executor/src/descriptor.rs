//! Command descriptors and parameter specifications.
//!
//! Descriptors are plain values supplied by whatever discovers command
//! handlers at startup; the registry validates them once and never mutates
//! them afterwards.

use std::{fmt, sync::Arc};

use embedded_shell_core::Interruptible;

use crate::{CommandHandler, Invocation};

/// Element type of a scalar or collection parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Integer,
    Float,
    Boolean,
    String,
}

impl ScalarType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
        }
    }
}

/// Target type of a value parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Scalar(ScalarType),
    /// Comma-separated, duplicates collapsed, first-seen order kept.
    Set(ScalarType),
    /// Comma-separated, order and duplicates kept.
    List(ScalarType),
    /// Comma-separated `key=value` pairs.
    Map(ScalarType),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(t) => write!(f, "{}", t.name()),
            Self::Set(t) => write!(f, "set<{}>", t.name()),
            Self::List(t) => write!(f, "list<{}>", t.name()),
            Self::Map(t) => write!(f, "map<string,{}>", t.name()),
        }
    }
}

/// Which context view a handler asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Plain output and completion.
    Simple,
    /// Adds progress reporting.
    Progress,
}

/// What a declared parameter binds to.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    /// A single option.
    Value(ValueType),
    /// An aggregate populated field by field from several options.
    Bean(Vec<ParamSpec>),
    /// The execution context injected by the engine.
    Context(ContextKind),
}

/// One declared handler parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    /// Short option, without the leading `-`.
    pub short: Option<String>,
    /// Long option, without the leading `--`.
    pub long: Option<String>,
    pub kind: ParamKind,
    pub required: bool,
    /// Raw default, parsed like user input when an optional option is absent.
    pub default: Option<String>,
    pub help: String,
}

impl ParamSpec {
    /// A required option of the given type. The short option defaults to the name.
    pub fn value(name: impl Into<String>, ty: ValueType) -> Self {
        let name = name.into();
        Self {
            short: Some(name.clone()),
            name,
            long: None,
            kind: ParamKind::Value(ty),
            required: true,
            default: None,
            help: String::new(),
        }
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::value(name, ValueType::Scalar(ScalarType::Integer))
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::value(name, ValueType::Scalar(ScalarType::Float))
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::value(name, ValueType::Scalar(ScalarType::Boolean))
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::value(name, ValueType::Scalar(ScalarType::String))
    }

    pub fn set(name: impl Into<String>, element: ScalarType) -> Self {
        Self::value(name, ValueType::Set(element))
    }

    pub fn list(name: impl Into<String>, element: ScalarType) -> Self {
        Self::value(name, ValueType::List(element))
    }

    pub fn map(name: impl Into<String>, element: ScalarType) -> Self {
        Self::value(name, ValueType::Map(element))
    }

    /// A composite argument built from `fields`.
    pub fn bean(name: impl Into<String>, fields: Vec<Self>) -> Self {
        Self {
            name: name.into(),
            short: None,
            long: None,
            kind: ParamKind::Bean(fields),
            required: false,
            default: None,
            help: String::new(),
        }
    }

    /// The injected execution context.
    #[must_use]
    pub fn context(kind: ContextKind) -> Self {
        Self {
            name: "context".to_string(),
            short: None,
            long: None,
            kind: ParamKind::Context(kind),
            required: false,
            default: None,
            help: String::new(),
        }
    }

    #[must_use]
    pub fn short(mut self, opt: impl Into<String>) -> Self {
        self.short = Some(opt.into());
        self
    }

    #[must_use]
    pub fn long(mut self, opt: impl Into<String>) -> Self {
        self.long = Some(opt.into());
        self
    }

    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    #[must_use]
    pub const fn is_context(&self) -> bool {
        matches!(self.kind, ParamKind::Context(_))
    }

    /// Option names this parameter answers to, fields of a bean included.
    #[must_use]
    pub fn option_names(&self) -> Vec<&str> {
        match &self.kind {
            ParamKind::Bean(fields) => fields.iter().flat_map(Self::option_names).collect(),
            _ => self.short.iter().chain(self.long.iter()).map(String::as_str).collect(),
        }
    }
}

/// A registered command.
#[derive(Clone)]
pub struct CommandDescriptor {
    /// Unique, case-sensitive command key.
    pub key: String,
    /// Label used to group commands in help output.
    pub group: String,
    pub help: String,
    pub interruptible: Interruptible,
    pub params: Vec<ParamSpec>,
    pub handler: Arc<dyn CommandHandler>,
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("key", &self.key)
            .field("group", &self.group)
            .field("interruptible", &self.interruptible)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl CommandDescriptor {
    /// Create a descriptor from a handler closure.
    pub fn new<F>(key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_handler(key, Arc::new(handler))
    }

    /// Create a descriptor from any shared handler.
    pub fn with_handler(key: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            key: key.into(),
            group: "Default".to_string(),
            help: String::new(),
            interruptible: Interruptible::None,
            params: Vec::new(),
            handler,
        }
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    #[must_use]
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    #[must_use]
    pub const fn interruptible(mut self, interruptible: Interruptible) -> Self {
        self.interruptible = interruptible;
        self
    }

    #[must_use]
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    #[must_use]
    pub fn params(mut self, specs: impl IntoIterator<Item = ParamSpec>) -> Self {
        self.params.extend(specs);
        self
    }

    /// Context view requested by the handler, if any.
    #[must_use]
    pub fn context_kind(&self) -> Option<ContextKind> {
        self.params.iter().find_map(|p| match p.kind {
            ParamKind::Context(kind) => Some(kind),
            _ => None,
        })
    }
}
