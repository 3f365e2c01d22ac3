use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    TaskCreate,
    TaskExecution,
    TaskCancel,
    TaskNotFound,
    ApiCall,
    OperationFailed,
    Timeout,
    NoProvider,
    UnsupportedFormat,
    UnsupportedOperation,
    InvalidInput,
    Cancelled,
    Internal,
}

impl CoreErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::TaskCreate => "TASK_CREATE_ERROR",
            Self::TaskExecution => "TASK_EXECUTION_ERROR",
            Self::TaskCancel => "TASK_CANCEL_ERROR",
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::ApiCall => "API_CALL_ERROR",
            Self::OperationFailed => "OPERATION_FAILED",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::NoProvider => "NO_PROVIDER",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Configuration errors and cancellation are surfaced to the caller as-is;
    /// everything else may be attempted again.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::TaskNotFound
                | Self::NoProvider
                | Self::UnsupportedFormat
                | Self::UnsupportedOperation
                | Self::InvalidInput
                | Self::Cancelled
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreError {
    pub kind: CoreErrorKind,
    pub service: Option<&'static str>,
    pub operation: Option<&'static str>,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            service: None,
            operation: None,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn in_service(mut self, service: &'static str, operation: &'static str) -> Self {
        self.service = Some(service);
        self.operation = Some(operation);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn attribute(mut self, service: &'static str, operation: &'static str) -> Self {
        self.service = self.service.or(Some(service));
        self.operation = self.operation.or(Some(operation));
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == CoreErrorKind::Timeout
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::new(CoreErrorKind::Internal, format!("{what} mutex poisoned"))
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl Error for CoreError {}
