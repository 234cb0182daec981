// Error codes follow the gRPC status codes so that errors raised by the
// maintenance subsystem can be mapped onto the control plane's wire responses
// without a translation table per error type.
use std::error::Error;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ErrorCodes {
    // "Success" rather than "Ok" since Ok is a prelude name.
    Success = 0,
    // The operation was cancelled, usually by process shutdown.
    Cancelled = 1,
    Unknown = 2,
    // The caller supplied an invalid argument or configuration value.
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    // A requested entity (service, instance, user) was not found.
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    // The system is not in a state required for the operation, e.g. the
    // read cache has not finished its first load.
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    // The storage layer or a peer is temporarily unavailable.
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl ErrorCodes {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCodes::InvalidArgument => "InvalidArgumentError",
            ErrorCodes::NotFound => "NotFoundError",
            ErrorCodes::FailedPrecondition => "FailedPreconditionError",
            ErrorCodes::Internal => "InternalError",
            ErrorCodes::Unavailable => "UnavailableError",
            _ => "PolarisError",
        }
    }

    /// Whether retrying the same call on the next tick may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCodes::Unavailable
                | ErrorCodes::DeadlineExceeded
                | ErrorCodes::Aborted
                | ErrorCodes::ResourceExhausted
                | ErrorCodes::Internal
        )
    }
}

pub trait PolarisError: Error + Send {
    fn code(&self) -> ErrorCodes;
    fn boxed(self) -> Box<dyn PolarisError>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl Error for Box<dyn PolarisError> {}

impl PolarisError for Box<dyn PolarisError> {
    fn code(&self) -> ErrorCodes {
        self.as_ref().code()
    }
}
