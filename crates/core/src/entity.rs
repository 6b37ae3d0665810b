//! Keyed records: jobs by their `JobId`, credentials by their name.

/// A record whose key stays fixed while its state changes.
///
/// The key is what snapshots, admin routes and clients use to address the
/// record, so it must survive a restart unchanged.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
