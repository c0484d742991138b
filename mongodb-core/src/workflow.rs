//! Reconciliation outcomes.
//!
//! Every step of a pass reports a typed `Status` instead of failing outright. Only errors which
//! prevent the pass from continuing at all are propagated as `anyhow::Error`, and even those are
//! mapped back onto a status by `Status::from_error` before they reach the caller.

use std::time::Duration;

use crate::config::RequeueIntervals;
use crate::crd::Phase;
use crate::error::AppError;

/// The status of a reconciliation step or pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// An external dependency is not ready yet.
    Pending(String),
    /// A transient failure talking to the store or a collaborator.
    Failed(String),
    /// The desired state is structurally disallowed and will not be retried as-is.
    Invalid(String),
    /// The management plane does not support the requested feature.
    Unsupported(String),
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Map an error chain onto a status, using any `AppError` found in the chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let msg = format!("{:#}", err);
        match err.downcast_ref::<AppError>() {
            Some(AppError::InvalidTopology(_)) | Some(AppError::Invalid(_)) => Self::Invalid(msg),
            Some(AppError::Unsupported(_)) => Self::Unsupported(msg),
            Some(AppError::NotFound(_)) | Some(AppError::Pending(_)) | Some(AppError::AgentsNotReady(_)) => Self::Pending(msg),
            Some(AppError::Conflict) | None => Self::Failed(msg),
        }
    }

    /// The phase reported in resource status.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Ok => Phase::Running,
            Self::Pending(_) => Phase::Pending,
            Self::Failed(_) | Self::Invalid(_) => Phase::Failed,
            Self::Unsupported(_) => Phase::Unsupported,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Ok => None,
            Self::Pending(msg) | Self::Failed(msg) | Self::Invalid(msg) | Self::Unsupported(msg) => Some(msg.as_str()),
        }
    }

    /// The interval after which the resource must be reconciled again.
    ///
    /// `more_work` is true while scaling is still in progress or an authentication change was
    /// deferred to a later pass.
    pub fn requeue_after(&self, intervals: &RequeueIntervals, more_work: bool) -> Duration {
        match self {
            Self::Ok if more_work => intervals.short,
            Self::Ok => intervals.long,
            Self::Pending(_) | Self::Failed(_) => intervals.short,
            Self::Invalid(_) | Self::Unsupported(_) => intervals.long,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn errors_map_onto_statuses() {
        let err = anyhow::Error::new(AppError::Invalid("bad".into())).context("validating resource");
        assert!(matches!(Status::from_error(&err), Status::Invalid(_)));

        let err = anyhow::Error::new(AppError::AgentsNotReady("rs-0".into()));
        assert_eq!(Status::from_error(&err).phase(), Phase::Pending);

        let err: anyhow::Error = Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
            .context("error reading automation config")
            .unwrap_err();
        assert!(matches!(Status::from_error(&err), Status::Failed(_)));
    }

    #[test]
    fn requeue_is_never_zero() {
        let intervals = RequeueIntervals::default();
        let statuses = vec![
            Status::Ok,
            Status::Pending("p".into()),
            Status::Failed("f".into()),
            Status::Invalid("i".into()),
            Status::Unsupported("u".into()),
        ];
        for status in statuses {
            for more_work in [true, false] {
                let after = status.requeue_after(&intervals, more_work);
                assert!(after > Duration::ZERO, "zero requeue for {:?}", status);
            }
        }
        assert_eq!(Status::Ok.requeue_after(&intervals, true), intervals.short);
        assert_eq!(Status::Ok.requeue_after(&intervals, false), intervals.long);
    }
}
