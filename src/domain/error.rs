//! Domain error types.
//!
//! Undefined metrics are not errors; see [`crate::domain::metrics::Metric`].

/// Top-level error type for probtrader.
#[derive(Debug, thiserror::Error)]
pub enum ProbtraderError {
    /// Malformed or out-of-range price/probability input.
    #[error("data error: {reason}")]
    Data { reason: String },

    /// Invalid threshold, unknown fusion method, or no usable model weights.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("insufficient data for {asset}: have {observations} observations, need {minimum}")]
    InsufficientData {
        asset: String,
        observations: usize,
        minimum: usize,
    },

    /// A failure local to one asset, tagged with its identifier.
    #[error("{asset}: {source}")]
    Asset {
        asset: String,
        #[source]
        source: Box<ProbtraderError>,
    },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProbtraderError {
    pub fn data(reason: impl Into<String>) -> Self {
        ProbtraderError::Data {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        ProbtraderError::Configuration {
            reason: reason.into(),
        }
    }

    /// Attach an asset identifier, unless one is already attached.
    pub fn for_asset(self, asset: &str) -> Self {
        match self {
            ProbtraderError::Asset { .. } => self,
            other => ProbtraderError::Asset {
                asset: asset.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through any asset tag.
    pub fn root(&self) -> &ProbtraderError {
        match self {
            ProbtraderError::Asset { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<&ProbtraderError> for std::process::ExitCode {
    fn from(err: &ProbtraderError) -> Self {
        let code: u8 = match err.root() {
            ProbtraderError::Io(_) | ProbtraderError::Csv(_) => 1,
            ProbtraderError::Configuration { .. }
            | ProbtraderError::ConfigParse { .. }
            | ProbtraderError::ConfigMissing { .. }
            | ProbtraderError::ConfigInvalid { .. } => 2,
            ProbtraderError::Data { .. } => 3,
            ProbtraderError::InsufficientData { .. } => 5,
            ProbtraderError::Asset { .. } => 1,
        };
        std::process::ExitCode::from(code)
    }
}
