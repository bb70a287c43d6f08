//! Route permissions granted per profile.
//!
//! Each application owns one [`RoutePermissions`] record mapping a profile
//! name to the ant-style route patterns that profile may browse.
//!
//! # Pattern Syntax
//!
//! - `?` matches exactly one character
//! - `*` matches zero or more characters within a path segment
//! - `**` matches zero or more path segments
//! - `{name}` matches one segment and captures it
//!
//! # Examples
//!
//! ```rust
//! use engarde_core::security::permission::{RouteMatcher, RoutePermissions};
//!
//! let matcher = RouteMatcher::new("/reports/*/view");
//! assert!(matcher.matches("/reports/2024/view"));
//! assert!(!matcher.matches("/reports/2024/03/view"));
//!
//! let permissions = RoutePermissions::new()
//!     .grant("admin", "/**")
//!     .grant("reader", "/reports/**");
//! assert!(permissions.is_allowed("reader", "/reports/daily"));
//! assert!(!permissions.is_allowed("reader", "/admin/users"));
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::security::store::{
    load_json, login_record_name, save_json, Namespace, RecordKey, RecordStore,
};

// =============================================================================
// Route Matcher
// =============================================================================

/// Ant-style matcher for one route pattern.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    pattern: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    /// `*`
    AnySegment,
    /// `**`
    AnyPath,
    /// Segment containing `*` or `?`
    Glob(Vec<char>),
    /// `{name}`
    Variable(String),
}

impl Segment {
    fn parse(part: &str) -> Self {
        match part {
            "**" => Segment::AnyPath,
            "*" => Segment::AnySegment,
            _ if part.len() > 2 && part.starts_with('{') && part.ends_with('}') => {
                Segment::Variable(part[1..part.len() - 1].to_string())
            }
            _ if part.contains(|c: char| c == '*' || c == '?') => Segment::Glob(part.chars().collect()),
            _ => Segment::Literal(part.to_string()),
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

impl RouteMatcher {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            segments: split_path(pattern).into_iter().map(Segment::parse).collect(),
        }
    }

    /// The pattern this matcher was built from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `route` matches the pattern.
    ///
    /// Leading and trailing slashes are ignored on both sides.
    pub fn matches(&self, route: &str) -> bool {
        match_segments(&self.segments, &split_path(route), &mut None)
    }

    /// Match `route` and return the captured `{name}` segments.
    pub fn captures(&self, route: &str) -> Option<HashMap<String, String>> {
        let mut captured = HashMap::new();
        let matched =
            match_segments(&self.segments, &split_path(route), &mut Some(&mut captured));
        matched.then_some(captured)
    }
}

fn match_segments(
    pattern: &[Segment],
    route: &[&str],
    captured: &mut Option<&mut HashMap<String, String>>,
) -> bool {
    let Some((segment, rest)) = pattern.split_first() else {
        return route.is_empty();
    };

    let part = match (segment, route.first()) {
        (Segment::AnyPath, _) => {
            return (0..=route.len()).any(|skip| match_segments(rest, &route[skip..], captured));
        }
        (_, None) => return false,
        (_, Some(part)) => *part,
    };
    let accepted = match segment {
        Segment::Literal(literal) => literal == part,
        Segment::Glob(glob) => match_glob(glob, &part.chars().collect::<Vec<_>>()),
        Segment::Variable(name) => {
            if let Some(captured) = captured.as_deref_mut() {
                captured.insert(name.clone(), part.to_string());
            }
            true
        }
        Segment::AnySegment | Segment::AnyPath => true,
    };
    accepted && match_segments(rest, &route[1..], captured)
}

fn match_glob(glob: &[char], text: &[char]) -> bool {
    match glob.split_first() {
        None => text.is_empty(),
        Some((&'*', rest)) => (0..=text.len()).any(|skip| match_glob(rest, &text[skip..])),
        Some((&'?', rest)) => !text.is_empty() && match_glob(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && match_glob(rest, &text[1..]),
    }
}

// =============================================================================
// Route Permissions
// =============================================================================

/// Route patterns granted to each profile of one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoutePermissions {
    /// Profile name to allowed patterns
    #[serde(default)]
    pub profiles: BTreeMap<String, Vec<String>>,
}

impl RoutePermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `profile` to browse routes matching `pattern`.
    pub fn grant(mut self, profile: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.profiles
            .entry(profile.into())
            .or_default()
            .push(pattern.into());
        self
    }

    /// Key of the permission record of `application`.
    pub fn key_for(application: &str) -> RecordKey {
        RecordKey::new(Namespace::Permissions, login_record_name(application))
    }

    /// Load the permissions of `application`. `Ok(None)` when none are stored.
    pub fn load(store: &dyn RecordStore, application: &str) -> Result<Option<Self>, StoreError> {
        load_json(store, &Self::key_for(application))
    }

    /// Persist these permissions for `application`.
    pub fn save(&self, store: &dyn RecordStore, application: &str) -> Result<(), StoreError> {
        save_json(store, &Self::key_for(application), self)
    }

    /// Matchers of the patterns granted to `profile`.
    pub fn matchers_for(&self, profile: &str) -> Vec<RouteMatcher> {
        self.profiles
            .get(profile)
            .map(|patterns| patterns.iter().map(|p| RouteMatcher::new(p)).collect())
            .unwrap_or_default()
    }

    /// Whether `profile` may browse `route`. Unknown profiles get nothing.
    pub fn is_allowed(&self, profile: &str, route: &str) -> bool {
        self.matchers_for(profile)
            .iter()
            .any(|matcher| matcher.matches(route))
    }
}
