use std::error::Error;
use std::fmt::{Display, Formatter};

pub type FastFitResult<T> = Result<T, FastFitError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FastFitErrorKind {
    MissingInput,
    UnsupportedShape,
    Configuration,
    Dimension,
    ReferenceResolution,
    Computation,
    IoSystem,
}

impl FastFitErrorKind {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::MissingInput | Self::UnsupportedShape | Self::Configuration => 2,
            Self::IoSystem => 3,
            Self::Dimension | Self::ReferenceResolution | Self::Computation => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingInput => "MissingInputError",
            Self::UnsupportedShape => "UnsupportedShapeError",
            Self::Configuration => "ConfigurationError",
            Self::Dimension => "DimensionError",
            Self::ReferenceResolution => "ReferenceResolutionError",
            Self::Computation => "ComputationError",
            Self::IoSystem => "IoSystemError",
        }
    }
}

impl Display for FastFitErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastFitError {
    kind: FastFitErrorKind,
    placeholder: &'static str,
    message: String,
}

impl FastFitError {
    pub fn new(
        kind: FastFitErrorKind,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            placeholder,
            message: message.into(),
        }
    }

    pub fn missing_input(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(FastFitErrorKind::MissingInput, placeholder, message)
    }

    pub fn unsupported_shape(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(FastFitErrorKind::UnsupportedShape, placeholder, message)
    }

    pub fn configuration(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(FastFitErrorKind::Configuration, placeholder, message)
    }

    pub fn dimension(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(FastFitErrorKind::Dimension, placeholder, message)
    }

    pub fn reference_resolution(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(FastFitErrorKind::ReferenceResolution, placeholder, message)
    }

    pub fn computation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(FastFitErrorKind::Computation, placeholder, message)
    }

    pub fn io_system(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(FastFitErrorKind::IoSystem, placeholder, message)
    }

    pub const fn kind(&self) -> FastFitErrorKind {
        self.kind
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.placeholder, self.message)
    }

    pub fn fatal_exit_line(&self) -> String {
        format!("FATAL EXIT CODE: {}", self.exit_code())
    }
}

impl Display for FastFitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.kind, self.placeholder, self.message)
    }
}

impl Error for FastFitError {}
