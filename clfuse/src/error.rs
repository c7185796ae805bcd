use std::fmt::Display;

use crate::{expression::OpKind, template::InvalidTemplate, DType};

/// Enumeration representing the various errors that can occur while generating kernels.
#[derive(Debug)]
pub enum FuseError {
    /// Template parameters are invalid for the device, carries the failed check
    OperationNotSupported(InvalidTemplate),
    /// Expression tree is malformed or uses something outside of the operator vocabulary
    InvalidExpression(Box<str>),
    /// Dtype can not be passed to a kernel
    UnknownDType(DType),
    /// Reduction operator without known neutral element
    UnsupportedReduction(OpKind),
    /// Template can not represent this expression
    TemplateNotApplicable(Box<str>),
    /// Error parsing config
    ParseError(Box<str>),
    /// Error from file operations
    IOError(std::io::Error),
    /// Error returned by backends
    BackendError(BackendError),
}

impl FuseError {
    /// Invalid expression error
    #[track_caller]
    pub fn invalid_expression(e: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        use std::fmt::Write;
        let mut e: String = e.into();
        let _ = write!(e, ", {}:{}:{}", location.file(), location.line(), location.column());
        Self::InvalidExpression(e.into())
    }

    /// Template not applicable error
    pub fn not_applicable(e: impl Into<String>) -> Self {
        Self::TemplateNotApplicable(e.into().into())
    }

    /// Parse error
    #[track_caller]
    pub fn parse_error(e: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        use std::fmt::Write;
        let mut e: String = e.into();
        let _ = write!(e, ", {}:{}:{}", location.file(), location.line(), location.column());
        Self::ParseError(e.into())
    }
}

impl std::fmt::Display for FuseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FuseError::OperationNotSupported(e) => f.write_fmt(format_args!(
                "The supplied parameters for this template are invalid: err {} ({e:?})",
                e.code()
            )),
            FuseError::InvalidExpression(e) => f.write_fmt(format_args!("Invalid expression {e}")),
            FuseError::UnknownDType(dtype) => {
                f.write_fmt(format_args!("Unknown dtype {dtype} for kernel argument"))
            }
            FuseError::UnsupportedReduction(op) => f.write_fmt(format_args!(
                "Unsupported reduction operator {op:?}: no neutral element known"
            )),
            FuseError::TemplateNotApplicable(e) => f.write_fmt(format_args!(
                "Internal error: the generator cannot apply the given template to the given expression: {e}\n\
                 If you are using a builtin template, please report this.\n\
                 If you are using your own template, please try using other parameters"
            )),
            FuseError::ParseError(e) => f.write_fmt(format_args!("Parse {e}")),
            FuseError::IOError(e) => f.write_fmt(format_args!("IO {e}")),
            FuseError::BackendError(e) => f.write_fmt(format_args!("Backend {e}")),
        }
    }
}

impl std::error::Error for FuseError {}

impl From<std::io::Error> for FuseError {
    #[track_caller]
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<InvalidTemplate> for FuseError {
    fn from(value: InvalidTemplate) -> Self {
        Self::OperationNotSupported(value)
    }
}

#[derive(Debug)]
pub struct BackendError {
    pub status: ErrorStatus,
    pub context: Box<str>,
}

impl From<BackendError> for FuseError {
    fn from(value: BackendError) -> Self {
        FuseError::BackendError(value)
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}: {}", self.status, self.context))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// Dynamic library was not found on the disk
    DyLibNotFound,
    /// Backend initialization failure
    Initialization,
    /// Backend deinitialization failure
    Deinitialization,
    /// Failed to enumerate devices
    DeviceEnumeration,
    /// Failed to query device for information
    DeviceQuery,
    /// Kernel argument was not correct
    IncorrectKernelArg,
    /// Failed to compile kernel
    KernelCompilation,
}
