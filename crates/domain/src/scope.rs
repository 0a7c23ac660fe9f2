use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Delimiter between scope segments.
pub const SCOPE_DELIMITER: char = ':';

/// Wildcard segment matching any attribute or identifier.
pub const WILDCARD: &str = "*";

/// Joins scope segments with the scope delimiter.
///
/// `attribute` and `identifier` may be `*` to target any resource of the kind.
#[must_use]
pub fn compose_scope(kind: &str, attribute: &str, identifier: &str) -> String {
    format!("{kind}{SCOPE_DELIMITER}{attribute}{SCOPE_DELIMITER}{identifier}")
}

/// Splits a scope string into its kind, attribute and identifier segments.
///
/// Wildcard shorthands are expanded: `*` yields three wildcards and
/// `dashboards:*` yields a wildcard attribute and identifier. Identifiers may
/// themselves contain the delimiter.
#[must_use]
pub fn split_scope(scope: &str) -> (String, String, String) {
    if scope.is_empty() {
        return (String::new(), String::new(), String::new());
    }

    let fragments: Vec<&str> = scope.split(SCOPE_DELIMITER).collect();
    match fragments.as_slice() {
        [kind] => ((*kind).to_owned(), (*kind).to_owned(), (*kind).to_owned()),
        [kind, attribute] => (
            (*kind).to_owned(),
            (*attribute).to_owned(),
            (*attribute).to_owned(),
        ),
        [kind, attribute, rest @ ..] => (
            (*kind).to_owned(),
            (*attribute).to_owned(),
            rest.join(":"),
        ),
        [] => (String::new(), String::new(), String::new()),
    }
}

/// Returns whether a stored `candidate` scope grants access to `actual`.
///
/// A candidate matches on exact equality, on the global wildcard, or when its
/// attribute or identifier segment is `*` and the preceding segments agree.
#[must_use]
pub fn scope_matches(candidate: &str, actual: &str) -> bool {
    if candidate == actual || candidate == WILDCARD {
        return true;
    }

    let Some(prefix) = candidate.strip_suffix(WILDCARD) else {
        return false;
    };

    prefix.ends_with(SCOPE_DELIMITER) && actual.starts_with(prefix)
}

/// Resource scope targeted by a permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    kind: String,
    attribute: String,
    identifier: String,
}

impl Scope {
    /// Creates a scope from its segments.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        attribute: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            attribute: attribute.into(),
            identifier: identifier.into(),
        }
    }

    /// Parses a stored scope string.
    #[must_use]
    pub fn parse(scope: &str) -> Self {
        let (kind, attribute, identifier) = split_scope(scope);
        Self {
            kind,
            attribute,
            identifier,
        }
    }

    /// Returns the resource kind, e.g. `dashboards`.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.kind.as_str()
    }

    /// Returns the resource attribute, e.g. `uid`.
    #[must_use]
    pub fn attribute(&self) -> &str {
        self.attribute.as_str()
    }

    /// Returns the resource identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.identifier.as_str()
    }

    /// Returns the `kind:*` wildcard covering every resource of this kind.
    #[must_use]
    pub fn kind_wildcard(&self) -> String {
        format!("{}{SCOPE_DELIMITER}{WILDCARD}", self.kind)
    }

    /// Returns the `kind:attribute:*` wildcard.
    #[must_use]
    pub fn attribute_wildcard(&self) -> String {
        compose_scope(&self.kind, &self.attribute, WILDCARD)
    }

    /// Returns every stored scope that can grant access to this scope.
    ///
    /// Candidates are the global wildcard, the kind wildcard, the attribute
    /// wildcard, the exact scope and any ancestor scopes supplied by the caller.
    #[must_use]
    pub fn query_candidates(&self, inherited_scopes: &[String]) -> Vec<String> {
        let mut candidates = vec![
            WILDCARD.to_owned(),
            self.kind_wildcard(),
            self.attribute_wildcard(),
            self.to_string(),
        ];

        for scope in inherited_scopes {
            if !candidates.contains(scope) {
                candidates.push(scope.clone());
            }
        }

        candidates
    }
}

impl Display for Scope {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            compose_scope(&self.kind, &self.attribute, &self.identifier)
        )
    }
}
