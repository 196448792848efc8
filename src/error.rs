/// Errors returned by fallible [`BucketTable`][crate::BucketTable]
/// operations.
///
/// A failed operation never leaves a partial change behind.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The global allocator could not provide memory for a new node.
    #[error("failed to allocate {size} bytes for a table node")]
    AllocFailed {
        /// The size of the requested allocation.
        size: usize,
    },
}
