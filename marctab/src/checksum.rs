//! The change key used by the incremental engine.
//!
//! The checksum of a source record is an MD5 digest of the coalesced text
//! of its header attributes and MARC payload, computed inside the database.
//! The full build and every incremental diff must use the identical
//! expression: checksums written on one run are compared against checksums
//! computed on the next.
//!
//! The concatenation carries no separators, so two distinct column splits
//! could in principle collide across the boundary; collisions over this
//! input space are treated as negligible.

/// SQL expression computing the checksum for one joined source row.
///
/// Expects the records table aliased as `r` and the MARC table as `m`;
/// `marc_attr` is the column holding the MARC JSON payload.
pub fn md5_expr(marc_attr: &str) -> String {
    format!(
        "md5(coalesce(r.external_hrid::text, '') || \
         coalesce(r.matched_id::text, '') || \
         coalesce(r.state::text, '') || \
         coalesce(m.{marc_attr}::text, ''))"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_is_stable() {
        assert_eq!(
            md5_expr("data"),
            "md5(coalesce(r.external_hrid::text, '') || \
             coalesce(r.matched_id::text, '') || \
             coalesce(r.state::text, '') || \
             coalesce(m.data::text, ''))"
        );
    }

    #[test]
    fn expression_uses_the_configured_attribute() {
        assert!(md5_expr("content").contains("m.content::text"));
    }
}
