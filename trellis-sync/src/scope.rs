//! Scope resolution.
//!
//! The builder edits either the site home layout or the layout of one
//! content column. Which one is decided purely from the page location, and
//! every endpoint the engine talks to hangs off the scope's prefix.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use trellis_core::BlockId;
use url::Url;

pub const HOME_PREFIX: &str = "/admin/home";

/// Addressing namespace of a builder session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The site home layout.
    Global,
    /// The builder of one content column.
    Column(u64),
}

/// Fixed endpoint suffixes below a scope prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Data,
    Sections,
    SectionsReorder,
    Blocks,
    Block(BlockId),
    BlocksReorder,
    Publish,
    Preview,
}

impl Endpoint {
    pub fn suffix(&self) -> String {
        match self {
            Self::Data => "/data".to_owned(),
            Self::Sections => "/sections".to_owned(),
            Self::SectionsReorder => "/sections/reorder".to_owned(),
            Self::Blocks => "/blocks".to_owned(),
            Self::Block(id) => format!("/blocks/{id}"),
            Self::BlocksReorder => "/blocks/reorder".to_owned(),
            Self::Publish => "/publish".to_owned(),
            Self::Preview => "/preview".to_owned(),
        }
    }
}

/// Strip scheme/host, query and fragment, leaving the path.
fn location_path(location: &str) -> String {
    if let Ok(url) = Url::parse(location) {
        return url.path().to_owned();
    }
    let end = location
        .find(|c: char| c == '?' || c == '#')
        .unwrap_or(location.len());
    location[..end].to_owned()
}

/// `/admin/columns/{digits}/builder`, with the column id captured.
fn column_builder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/admin/columns/(\d+)/builder").expect("column builder pattern is valid")
    })
}

/// First column builder match in `path`: the column id and the byte range
/// of the whole match.
fn column_match(path: &str) -> Option<(u64, std::ops::Range<usize>)> {
    let captures = column_builder().captures(path)?;
    let whole = captures.get(0)?;
    let id = captures.get(1)?.as_str().parse().ok()?;
    Some((id, whole.range()))
}

impl Scope {
    /// Resolve the scope from the current location (a path or a full URL).
    /// Anything unrecognized is the global scope.
    pub fn resolve(location: &str) -> Self {
        let path = location_path(location);
        if path.starts_with(HOME_PREFIX) {
            return Self::Global;
        }
        column_match(&path).map_or(Self::Global, |(id, _)| Self::Column(id))
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    pub fn column_id(&self) -> Option<u64> {
        match self {
            Self::Global => None,
            Self::Column(id) => Some(*id),
        }
    }

    pub fn endpoint_prefix(&self) -> String {
        match self {
            Self::Global => HOME_PREFIX.to_owned(),
            Self::Column(id) => format!("/admin/columns/{id}/builder"),
        }
    }

    pub fn path(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.endpoint_prefix(), endpoint.suffix())
    }

    /// Split a request path into its scope and the endpoint remainder.
    /// Used by the reference server for routing.
    pub fn split_path(path: &str) -> Option<(Self, &str)> {
        if let Some(rest) = path.strip_prefix(HOME_PREFIX) {
            return Some((Self::Global, rest));
        }
        match column_match(path)? {
            (id, range) if range.start == 0 => Some((Self::Column(id), &path[range.end..])),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("home"),
            Self::Column(id) => write!(f, "column {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_home() {
        let scope = Scope::resolve("/admin/home");
        assert!(scope.is_global());
        assert_eq!(scope.endpoint_prefix(), "/admin/home");

        assert_eq!(Scope::resolve("/admin/home/preview"), Scope::Global);
    }

    #[test]
    fn test_resolve_column_builder() {
        let scope = Scope::resolve("/admin/columns/42/builder");
        assert_eq!(scope, Scope::Column(42));
        assert!(!scope.is_global());
        assert_eq!(scope.endpoint_prefix(), "/admin/columns/42/builder");
        assert_eq!(scope.column_id(), Some(42));
    }

    #[test]
    fn test_resolve_full_url_and_query() {
        assert_eq!(
            Scope::resolve("https://cms.example.com/admin/columns/7/builder?tab=blocks#top"),
            Scope::Column(7)
        );
        assert_eq!(
            Scope::resolve("/admin/columns/8/builder?x=1"),
            Scope::Column(8)
        );
        assert_eq!(
            Scope::resolve("/cms/admin/columns/x/builder/admin/columns/9/builder/"),
            Scope::Column(9)
        );
    }

    #[test]
    fn test_unrecognized_locations_default_to_global() {
        for location in [
            "",
            "/",
            "/admin/pages",
            "/admin/columns/42",
            "/admin/columns/abc/builder",
            "/admin/columns//builder",
            "/admin/columns/99999999999999999999999/builder",
        ] {
            assert_eq!(Scope::resolve(location), Scope::Global, "{location:?}");
        }
    }

    #[test]
    fn test_endpoint_paths() {
        let home = Scope::Global;
        assert_eq!(home.path(Endpoint::Data), "/admin/home/data");
        assert_eq!(home.path(Endpoint::Block(5)), "/admin/home/blocks/5");

        let column = Scope::Column(3);
        assert_eq!(
            column.path(Endpoint::SectionsReorder),
            "/admin/columns/3/builder/sections/reorder"
        );
        assert_eq!(
            column.path(Endpoint::BlocksReorder),
            "/admin/columns/3/builder/blocks/reorder"
        );
        assert_eq!(column.path(Endpoint::Publish), "/admin/columns/3/builder/publish");
        assert_eq!(column.path(Endpoint::Preview), "/admin/columns/3/builder/preview");
    }

    #[test]
    fn test_split_path() {
        assert_eq!(
            Scope::split_path("/admin/home/blocks/9"),
            Some((Scope::Global, "/blocks/9"))
        );
        assert_eq!(
            Scope::split_path("/admin/columns/12/builder/data"),
            Some((Scope::Column(12), "/data"))
        );
        assert_eq!(Scope::split_path("/admin/products"), None);
        assert_eq!(Scope::split_path("/x/admin/columns/12/builder/data"), None);
        assert_eq!(Scope::split_path("/admin/columns/abc/builder/data"), None);
    }
}
