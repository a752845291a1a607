use thiserror::Error;

/// Failures while decoding a single cover term.
#[derive(Error, Debug)]
pub enum TermError {
    #[error("unexpected end of data")]
    ShortRead,

    #[error("empty record")]
    EmptyRecord,

    #[error("unknown term tag {0}")]
    UnknownTag(u8),

    #[error("decompression gave {actual} bytes, not {expected}")]
    InflateSize { expected: usize, actual: usize },

    #[error("inflate failed: {0}")]
    Inflate(#[source] std::io::Error),

    #[error("malformed '$size' escape")]
    MalformedSizeEscape,

    #[error("integer does not fit in 64 bits")]
    IntegerOverflow,

    #[error("atom is not valid UTF-8")]
    InvalidUtf8,

    #[error("improper list")]
    ImproperList,

    #[error("term nesting too deep")]
    TooDeep,

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for TermError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TermError::ShortRead
        } else {
            TermError::Io(e)
        }
    }
}

#[derive(Error, Debug)]
pub enum CoverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{file} is not a valid cover data file: {source}")]
    Decode {
        file: String,
        #[source]
        source: TermError,
    },

    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("{file}: bump record before any module was declared")]
    MissingModuleContext { file: String },

    #[error("A {child} cannot be a child of a {parent}")]
    InvalidHierarchy { parent: String, child: String },

    #[error("Unknown metric: '{0}'. Supported: modules, function, line")]
    UnknownMetric(String),

    #[error("Build not found: {0}")]
    BuildNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl CoverError {
    pub fn decode(file: impl Into<String>, source: TermError) -> Self {
        CoverError::Decode {
            file: file.into(),
            source,
        }
    }

    /// True for failures caused by the content of a cover file rather than
    /// by the caller or the environment.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            CoverError::Decode { .. } | CoverError::MissingModuleContext { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoverError>;
