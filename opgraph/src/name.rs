// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Data names and the modifiers that decorate them (§4.1 of the design).
//!
//! Name-equality compares the *base* name only; the modifier only ever changes planning/execution
//! rules, never identity. A `sideffect` need and a plain need that happen to share a base name are
//! the same data node in the network, for instance.

use std::sync::Arc;

/// A data name shared by anything that wraps a base string with planning-relevant attributes.
pub trait ModifiedName {
    /// The unwrapped data name. Two names with the same base refer to the same data node.
    fn base_name(&self) -> &Arc<str>;

    /// True if this is a sideffect token: it never carries a value, only orders execution.
    fn is_sideffect(&self) -> bool {
        false
    }

    /// A short, stable string for diagnostics (error messages, and eventually a plotting
    /// collaborator's node labels). Distinct from any `Display` impl used for end-user errors.
    fn render(&self) -> String;
}

/// One entry in an operation's `needs` list.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Need {
    /// A plain, required dependency.
    Value(Arc<str>),
    /// The operation runs whether or not this value is present; if absent, the body simply does
    /// not see a key for it.
    Optional(Arc<str>),
    /// Known to exist in the solution (and ordered after its producer) but never passed into the
    /// body's input mapping.
    Implicit(Arc<str>),
    /// A pseudo-name: orders this operation after the sideffect's producer, but never carries a
    /// value and is never passed into the body.
    Sideffect(Arc<str>),
    /// Passed into the body under `keyword` instead of `name`.
    Keyword { name: Arc<str>, keyword: Arc<str> },
}

impl Need {
    pub fn value(name: impl Into<Arc<str>>) -> Self {
        Need::Value(name.into())
    }

    pub fn optional(name: impl Into<Arc<str>>) -> Self {
        Need::Optional(name.into())
    }

    pub fn implicit(name: impl Into<Arc<str>>) -> Self {
        Need::Implicit(name.into())
    }

    pub fn sideffect(token: impl Into<Arc<str>>) -> Self {
        Need::Sideffect(token.into())
    }

    pub fn keyword(name: impl Into<Arc<str>>, keyword: impl Into<Arc<str>>) -> Self {
        Need::Keyword {
            name: name.into(),
            keyword: keyword.into(),
        }
    }

    /// True for needs whose absence from `known_inputs`/upstream provides does not prune the
    /// owning operation during planning.
    pub fn is_optional(&self) -> bool {
        matches!(self, Need::Optional(_))
    }

    /// True for needs that participate in ordering only, never in the body's input mapping.
    pub fn is_implicit(&self) -> bool {
        matches!(self, Need::Implicit(_))
    }

    /// The keyword the body should see this need under, if it differs from the base name.
    pub fn keyword_override(&self) -> Option<&Arc<str>> {
        match self {
            Need::Keyword { keyword, .. } => Some(keyword),
            _ => None,
        }
    }
}

impl ModifiedName for Need {
    fn base_name(&self) -> &Arc<str> {
        match self {
            Need::Value(n) | Need::Optional(n) | Need::Implicit(n) | Need::Sideffect(n) => n,
            Need::Keyword { name, .. } => name,
        }
    }

    fn is_sideffect(&self) -> bool {
        matches!(self, Need::Sideffect(_))
    }

    fn render(&self) -> String {
        match self {
            Need::Value(n) => n.to_string(),
            Need::Optional(n) => format!("optional({n})"),
            Need::Implicit(n) => format!("implicit({n})"),
            Need::Sideffect(n) => format!("sideffect({n})"),
            Need::Keyword { name, keyword } => format!("{name}->{keyword}"),
        }
    }
}

/// One entry in an operation's `provides` list.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Provide {
    /// A plain output value.
    Value(Arc<str>),
    /// A pseudo-name: never carries a value, but downstream `needs` on this token are ordered
    /// after this operation.
    Sideffect(Arc<str>),
    /// After execution, the value produced at `src` is also exposed under `dst`.
    Aliased { src: Arc<str>, dst: Arc<str> },
}

impl Provide {
    pub fn value(name: impl Into<Arc<str>>) -> Self {
        Provide::Value(name.into())
    }

    pub fn sideffect(token: impl Into<Arc<str>>) -> Self {
        Provide::Sideffect(token.into())
    }

    pub fn aliased(src: impl Into<Arc<str>>, dst: impl Into<Arc<str>>) -> Self {
        Provide::Aliased {
            src: src.into(),
            dst: dst.into(),
        }
    }

    /// The alias target, if this provide copies its value under a second name after execution.
    pub fn alias_target(&self) -> Option<&Arc<str>> {
        match self {
            Provide::Aliased { dst, .. } => Some(dst),
            _ => None,
        }
    }
}

impl ModifiedName for Provide {
    fn base_name(&self) -> &Arc<str> {
        match self {
            Provide::Value(n) | Provide::Sideffect(n) => n,
            Provide::Aliased { src, .. } => src,
        }
    }

    fn is_sideffect(&self) -> bool {
        matches!(self, Provide::Sideffect(_))
    }

    fn render(&self) -> String {
        match self {
            Provide::Value(n) => n.to_string(),
            Provide::Sideffect(n) => format!("sideffect({n})"),
            Provide::Aliased { src, dst } => format!("{src}=>{dst}"),
        }
    }
}
