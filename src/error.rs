use thiserror::Error;

use crate::aslr::NominalAddress;
use crate::hooks::HookMode;
use crate::stack::ValueTag;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error produced by code layered on top of the core (subscribers, lazy
/// initialisers, entry point bodies).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("nominal address {nominal} is not present in the symbol table")]
    AddressResolution { nominal: NominalAddress },

    #[error("symbol `{name}` is not present in the symbol table")]
    UnknownSymbol { name: String },

    #[error("failed to read the symbol table from an object image")]
    SymbolTable(#[from] object::read::Error),

    #[error("cannot register a {requested:?} hook on {target}, it already holds a {existing:?} hook")]
    HookConflict {
        target: NominalAddress,
        existing: HookMode,
        requested: HookMode,
    },

    #[error("{target} was defined with a different signature than the one requested")]
    SignatureMismatch { target: NominalAddress },

    #[error("no code is defined at {target}")]
    UnknownTarget { target: NominalAddress },

    #[error("hook handle for {target} is no longer registered")]
    StaleHandle { target: NominalAddress },

    #[error("argument {index} was pushed as {found} but popped as {expected}")]
    TypeMismatch {
        index: usize,
        expected: ValueTag,
        found: ValueTag,
    },

    #[error("argument {index} ({expected}) was popped from an exhausted frame")]
    StackUnderflow { index: usize, expected: ValueTag },

    #[error("argument frame torn down with {remaining} unread value(s)")]
    LeftoverValues { remaining: usize },

    #[error("an argument frame is already in flight")]
    FrameBusy,

    #[error("no argument frame is in flight")]
    NoActiveFrame,

    #[error("handler failed in {context}")]
    Handler {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("lazy initialisation for `{event}` failed")]
    EventInit {
        event: String,
        #[source]
        source: BoxError,
    },

    #[error("cannot subscribe to `{event}` while the initialisation of `{pattern}` is running")]
    InitInProgress { event: String, pattern: String },

    #[error("no entry point named `{name}` (version {version}) is registered")]
    UnknownEntryPoint { name: String, version: u32 },

    #[error("configuration value `{key}` is invalid: {message}")]
    Config { key: String, message: String },

    #[error("required configuration value `{key}` is not set")]
    MissingConfig { key: String },
}

impl Error {
    /// Wraps a failure from layered code, tagging it with where it happened.
    pub fn handler(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Handler {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Whether the error leaves the process unable to continue hooking.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AddressResolution { .. } | Self::UnknownSymbol { .. })
    }
}
