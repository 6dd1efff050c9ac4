use thiserror::Error;

/// Errors produced by the state store.
///
/// Mutators are deliberately infallible against late or duplicate event
/// delivery (unknown-key removals are no-ops), so this enum only covers
/// boundary validation and programmer-error misuse.
#[derive(Error, Debug)]
pub enum StoreError {
    /// `set_history_loaded` was called a second time for the same account.
    #[error("History already loaded for this account")]
    HistoryLoaded,

    /// A raw key from the daemon or UI layer failed uri validation.
    #[error("Invalid uri: {0}")]
    Uri(#[from] parley_shared::UriError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
