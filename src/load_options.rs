use crate::resolver::Mode;
use std::num::NonZeroUsize;

const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Options for opening PDF documents
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Password tried as the user password, then as the owner password
    pub password: String,

    /// How the object index is built
    pub mode: Mode,

    /// Switch to a sequential scan when the cross-reference data is unusable
    pub fallback: bool,

    /// Number of resolved objects kept in memory
    pub cache_capacity: NonZeroUsize,

    /// Nested resolutions allowed on one thread before giving up
    pub max_depth: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            password: String::new(),
            mode: Mode::Indexed,
            fallback: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_depth: 64,
        }
    }
}

impl LoadOptions {
    /// Create a builder for LoadOptions
    pub fn builder() -> LoadOptionsBuilder {
        LoadOptionsBuilder::default()
    }

    /// Default options with a password.
    pub fn with_password<S: Into<String>>(password: S) -> Self {
        LoadOptions {
            password: password.into(),
            ..Default::default()
        }
    }
}

/// Builder for LoadOptions
#[derive(Default)]
pub struct LoadOptionsBuilder {
    options: LoadOptions,
}

impl LoadOptionsBuilder {
    /// Set the password for encrypted documents
    pub fn password<S: Into<String>>(mut self, value: S) -> Self {
        self.options.password = value.into();
        self
    }

    /// Choose between the cross-reference index and a full scan
    pub fn mode(mut self, value: Mode) -> Self {
        self.options.mode = value;
        self
    }

    /// Enable or disable the automatic sequential scan
    pub fn fallback(mut self, value: bool) -> Self {
        self.options.fallback = value;
        self
    }

    /// Set the object cache capacity
    pub fn cache_capacity(mut self, value: NonZeroUsize) -> Self {
        self.options.cache_capacity = value;
        self
    }

    /// Set the nesting limit for resolutions
    pub fn max_depth(mut self, value: usize) -> Self {
        self.options.max_depth = value;
        self
    }

    /// Build the LoadOptions
    pub fn build(self) -> LoadOptions {
        self.options
    }
}
