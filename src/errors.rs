use std::error::Error;
use std::fmt::{Debug, Display};

/// Classification of every failure the client can surface.
///
/// The kind is decided once, where an HTTP status or a query-level error is
/// decoded, and is never recomputed from message text afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No token is available, or refreshing it failed. The user must log in again.
    Unauthenticated,
    /// The server answered 401.
    AuthFailed,
    /// The server answered 404.
    NotFound,
    /// Any other 4xx answer.
    BadRequest,
    /// A 5xx answer that is not a gateway hiccup.
    ServerUnavailable,
    /// Edge/gateway failure (HTTP 520).
    ProxyError,
    /// The warehouse is still being provisioned for this query.
    ProvisioningInProgress,
    /// The query itself failed on the server.
    QueryFailed,
    /// A retried call used up its attempt budget.
    RetriesExhausted,
    /// A bounded wait ran out of attempts.
    Timeout,
    /// The caller abandoned the operation.
    Cancelled,
    /// Local failures: serialisation, malformed responses, IO.
    Internal,
}

impl ErrorKind {
    /// Whether the query execution loop may retry a call that failed this way.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ProxyError
                | ErrorKind::ProvisioningInProgress
                | ErrorKind::ServerUnavailable
        )
    }

    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Cancelled => 2,
            ErrorKind::Unauthenticated | ErrorKind::AuthFailed => 4,
            _ => 1,
        }
    }
}

#[derive(Clone)]
pub struct CloudError {
    kind: ErrorKind,
    trace: String,
    message: String,
    underlying_error: Option<String>,
    hint: Option<String>,
}

impl CloudError {
    pub(crate) fn new(
        kind: ErrorKind,
        trace: String,
        message: String,
        underlying: Option<String>,
    ) -> Self {
        Self {
            kind,
            trace,
            message,
            underlying_error: underlying,
            hint: None,
        }
    }

    /// For front ends that validate their own input.
    pub fn from_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, String::from("caller"), message.into(), None)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    pub(crate) fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Prefixes the message with where the failure happened.
    pub(crate) fn context(mut self, context: impl Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    pub(crate) fn without_hint(mut self) -> Self {
        self.hint = None;
        self
    }
}

impl Error for CloudError {}

impl Display for CloudError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let error_name = self.underlying_error.as_deref().unwrap_or("CloudError");
        write!(f, "[{}] ({}): {}", error_name, self.trace, self.message)?;
        if let Some(hint) = self.hint.as_deref() {
            write!(f, ". {}", hint)?;
        }
        Ok(())
    }
}

impl Debug for CloudError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let error_name = self.underlying_error.as_deref().unwrap_or("CloudError");
        write!(
            f,
            "[{}:{:?}] ({}): {}",
            error_name, self.kind, self.trace, self.message
        )
    }
}

macro_rules! this_errors {
    ($msg:literal, $val:expr) => {
        $val.map_err(|e| $crate::error!($msg, e))?
    };
}

macro_rules! error {
    (kind = $kind:expr, $($arg:tt)+) => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let fun_name = &name[..name.len() - 3];
        $crate::errors::CloudError::new($kind, fun_name.into(), format!($($arg)+), None)
    }};
    ($val:literal) => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let fun_name = &name[..name.len() - 3];
        $crate::errors::CloudError::new(
            $crate::errors::ErrorKind::Internal,
            fun_name.into(),
            $val.into(),
            None,
        )
    }};
    ($err:expr) => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let err = $err;
        let name = type_name_of(f);
        let error_type_name = type_name_of(&err);
        let fun_name = &name[..name.len() - 3];
        let error_name = error_type_name.split("::").last().map(|x| x.to_string());
        let error_msg = format!("{:?}", err);

        $crate::errors::CloudError::new(
            $crate::errors::ErrorKind::Internal,
            fun_name.into(),
            error_msg,
            error_name,
        )
    }};
    ($val:literal, $err:expr) => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let err = $err;
        let name = type_name_of(f);
        let error_type_name = type_name_of(&err);
        let fun_name = &name[..name.len() - 3];
        let error_name = error_type_name.split("::").last().map(|x| x.to_string());
        let final_msg = format!("{:?} - {:?}", $val, err);
        $crate::errors::CloudError::new(
            $crate::errors::ErrorKind::Internal,
            fun_name.into(),
            final_msg,
            error_name,
        )
    }};
}

pub(crate) use error;
pub(crate) use this_errors;
