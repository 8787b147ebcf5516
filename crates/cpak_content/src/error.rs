//! Error types that can be emitted from this library

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// bad magic, version or structure in a pack file
    #[error("invalid pack format: {0}")]
    #[diagnostic(code(cpak::format))]
    Format(String),

    /// a bin container disagrees with the manifest that lists it
    #[error(transparent)]
    #[diagnostic(
        code(cpak::stale_archive),
        help("the containers were built separately from the manifest, rebuild the pack")
    )]
    StaleArchive(#[from] StaleArchiveError),

    /// no item with this name exists in the pack
    #[error("unable to find item {0}")]
    #[diagnostic(code(cpak::item_not_found))]
    ItemNotFound(String),

    /// a loader could not be found or constructed
    #[error(transparent)]
    #[diagnostic(code(cpak::loader_resolution))]
    LoaderResolution(#[from] LoaderResolutionError),

    /// a loader with the same identifier or display name is already registered
    #[error("loader {name} ({identifier}) collides with a registered loader")]
    #[diagnostic(code(cpak::duplicate_loader))]
    DuplicateLoader { identifier: u32, name: String },

    /// two items share a name inside one pack
    #[error("item {0} appears more than once in the pack")]
    #[diagnostic(code(cpak::duplicate_item))]
    DuplicateItem(String),

    /// the loader produces a different type than the caller asked for
    #[error("requested {requested} but the loader produces {produced}")]
    #[diagnostic(code(cpak::type_mismatch))]
    TypeMismatch {
        requested: &'static str,
        produced: &'static str,
    },

    /// a read would cross the end of the item
    #[error("read of {requested} bytes at position {position} crosses the item end at {size}")]
    #[diagnostic(code(cpak::truncated_read))]
    TruncatedRead {
        position: u64,
        requested: u64,
        size: u64,
    },

    /// a seek target lies outside the item
    #[error("seek to {target} is outside the item range 0..={size}")]
    #[diagnostic(code(cpak::range))]
    Range { target: i128, size: u64 },

    /// the loader finished without producing a value
    #[error("loader produced no value")]
    #[diagnostic(code(cpak::empty_result))]
    EmptyResult,

    /// an item level failure, tagged with the item it happened on
    #[error("failed to load item {name}")]
    #[diagnostic(code(cpak::item))]
    Item {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

impl Error {
    /// Attach an item name to an error unless it already carries one
    pub fn for_item(self, name: impl Into<String>) -> Self {
        match self {
            Error::Item { .. } | Error::ItemNotFound(_) => self,
            other => Error::Item {
                name: name.into(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any item wrapper peeled off
    pub fn root(&self) -> &Error {
        match self {
            Error::Item { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if this is (or wraps) a missing item
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::ItemNotFound(_))
    }
}

/// Error type to provide further information when a loader cannot be used
#[derive(Error, Diagnostic, Debug)]
pub enum LoaderResolutionError {
    /// by identifier {0}
    #[error("no loader registered with identifier {0}")]
    Identifier(u32),

    /// by name {0}
    #[error("no loader registered with name {0}")]
    Name(String),

    /// {name} failed to construct
    #[error("loader {name} could not be constructed: {reason}")]
    Construction { name: String, reason: String },
}

/// Details of a mismatch between a manifest and one of its bin containers
#[derive(Error, Diagnostic, Debug)]
#[error(
    "container {} is stale: expected {expected_items} items at timestamp {expected_timestamp}, found {found_items} items at timestamp {found_timestamp}",
    .path.display()
)]
pub struct StaleArchiveError {
    pub path: PathBuf,
    pub expected_items: u32,
    pub found_items: u32,
    pub expected_timestamp: u32,
    pub found_timestamp: u32,
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
