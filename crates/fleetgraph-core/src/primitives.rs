//! # Primitives
//!
//! Fixed runtime constants for the fleetgraph core.
//!
//! These values are compiled into the binary and are immutable at runtime.

/// Maximum traversal depth for every graph walk.
///
/// - Descendant scans, ancestor walks and hash-chain recomputation all honor it.
/// - A walk that goes deeper fails with `RecursionLimit` instead of looping.
pub const MAX_TRAVERSAL_DEPTH: usize = 100;

/// Schema version written into the metadata record of a fresh store.
///
/// Increment this when making breaking changes to the record encoding.
pub const SCHEMA_VERSION: u32 = 1;

/// Parent id carried by the root node's own edge.
pub const NO_PARENT: &str = "none";

/// Node id alias that resolves to the current root.
pub const ROOT_ALIAS: &str = "root";

/// Describe payload asking for a hash computed on the fly instead of an edge lookup.
pub const SKIP_EDGE: &str = "skip";

/// Maximum number of points accepted in one mutation message.
pub const MAX_POINTS_PER_MESSAGE: usize = 10_000;

/// Maximum length of a point's `type`, `key` or `text` field.
pub const MAX_TEXT_LENGTH: usize = 65_536;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_distinct() {
        assert_ne!(NO_PARENT, ROOT_ALIAS);
        assert_ne!(NO_PARENT, SKIP_EDGE);
        assert_ne!(ROOT_ALIAS, SKIP_EDGE);
    }

    #[test]
    fn depth_bound_is_one_hundred() {
        assert_eq!(MAX_TRAVERSAL_DEPTH, 100);
    }
}
