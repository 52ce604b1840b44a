//! Failures that decide the process exit status.
//!
//! Everything inside the crate propagates [`eyre::Report`]s so that context accumulates along the
//! way. Failures that map to a dedicated exit code are raised as an [`UploadError`] and recovered
//! at the process boundary with [`UploadError::from_report`].

/// A run-ending failure, classified by the exit code it produces.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// A required option (or the list of videos) was not given.
    #[error("some required options are missing: {}", .0.join(", "))]
    OptionsMissing(Vec<&'static str>),

    /// The category name is not in the table of YouTube categories.
    #[error("{0} is not a valid category")]
    InvalidCategory(String),

    /// The `--location` string could not be parsed.
    #[error("invalid location {input:?}: {reason}")]
    InvalidLocation { input: String, reason: String },

    /// No authenticated client could be produced.
    #[error("cannot get YouTube resource: {0}")]
    Authentication(String),

    /// The authorization code could not be exchanged for a token.
    #[error("OAuth flow exchange failed: {0}")]
    FlowExchange(String),

    /// A supplied access token was rejected and cannot be refreshed.
    #[error("access token rejected: {0}")]
    AccessTokenCredentials(String),

    /// The API reported that the requested operation is not implemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl UploadError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            UploadError::OptionsMissing(_) => 2,
            UploadError::InvalidCategory(_) => 3,
            UploadError::Authentication(_) | UploadError::FlowExchange(_) => 4,
            UploadError::AccessTokenCredentials(_) => 5,
            UploadError::NotImplemented(_) => 6,
            UploadError::InvalidLocation { .. } | UploadError::Other(_) => 1,
        }
    }

    /// Short name printed in front of the final error line.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::OptionsMissing(_) => "OptionsMissing",
            UploadError::InvalidCategory(_) => "InvalidCategory",
            UploadError::InvalidLocation { .. } => "InvalidLocation",
            UploadError::Authentication(_) => "AuthenticationError",
            UploadError::FlowExchange(_) => "FlowExchangeError",
            UploadError::AccessTokenCredentials(_) => "AccessTokenCredentialsError",
            UploadError::NotImplemented(_) => "NotImplementedError",
            UploadError::Other(_) => "Error",
        }
    }

    /// Recovers the classified failure from a report, looking through any added context.
    pub fn from_report(report: eyre::Report) -> Self {
        match report.downcast::<UploadError>() {
            Ok(e) => e,
            Err(report) => {
                // context wrappers hide the concrete type from `downcast`, so walk the chain
                let classified = report
                    .chain()
                    .find_map(|cause| cause.downcast_ref::<UploadError>())
                    .map(UploadError::shallow_clone);
                match classified {
                    Some(e) => e,
                    None => UploadError::Other(report),
                }
            }
        }
    }

    fn shallow_clone(&self) -> Self {
        match self {
            UploadError::OptionsMissing(v) => UploadError::OptionsMissing(v.clone()),
            UploadError::InvalidCategory(c) => UploadError::InvalidCategory(c.clone()),
            UploadError::InvalidLocation { input, reason } => UploadError::InvalidLocation {
                input: input.clone(),
                reason: reason.clone(),
            },
            UploadError::Authentication(m) => UploadError::Authentication(m.clone()),
            UploadError::FlowExchange(m) => UploadError::FlowExchange(m.clone()),
            UploadError::AccessTokenCredentials(m) => {
                UploadError::AccessTokenCredentials(m.clone())
            }
            UploadError::NotImplemented(m) => UploadError::NotImplemented(m.clone()),
            UploadError::Other(r) => UploadError::Other(eyre::eyre!("{r:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn exit_codes_follow_the_table() {
        assert_eq!(UploadError::OptionsMissing(vec!["title"]).exit_code(), 2);
        assert_eq!(UploadError::InvalidCategory("Nope".into()).exit_code(), 3);
        assert_eq!(UploadError::Authentication("x".into()).exit_code(), 4);
        assert_eq!(UploadError::FlowExchange("x".into()).exit_code(), 4);
        assert_eq!(UploadError::AccessTokenCredentials("x".into()).exit_code(), 5);
        assert_eq!(UploadError::NotImplemented("x".into()).exit_code(), 6);
        assert_eq!(UploadError::Other(eyre::eyre!("boom")).exit_code(), 1);
    }

    #[test]
    fn classification_survives_context() {
        let report: eyre::Report = Err::<(), _>(UploadError::InvalidCategory("Nope".into()))
            .wrap_err("build metadata for a.mp4")
            .unwrap_err();
        let e = UploadError::from_report(report);
        assert!(matches!(e, UploadError::InvalidCategory(ref c) if c == "Nope"));
        assert_eq!(e.exit_code(), 3);
    }

    #[test]
    fn plain_reports_are_unclassified() {
        let e = UploadError::from_report(eyre::eyre!("connection reset"));
        assert_eq!(e.kind(), "Error");
        assert_eq!(e.exit_code(), 1);
    }

    #[test]
    fn missing_options_are_listed() {
        let e = UploadError::OptionsMissing(vec!["title", "videos"]);
        assert_eq!(
            e.to_string(),
            "some required options are missing: title, videos"
        );
    }
}
