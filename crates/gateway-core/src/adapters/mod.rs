pub mod paleo;
pub mod quaternary;

pub use paleo::PaleoAdapter;
pub use quaternary::QuaternaryAdapter;

/// The paleobiology taxon id a quaternary subquery would need resolved to a
/// name before it can build its own URL, if any (§4.4).
pub fn quaternary_taxon_lookup_id(req: &crate::request::RequestContext) -> Option<u64> {
    quaternary::taxon_lookup_id(req)
}
