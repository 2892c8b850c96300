use thiserror::Error;

#[derive(Debug, Error)]
pub enum TesseraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid parameters: {0}")]
    Parameter(String),
    #[error("codec error in sub-block {index}: {message}")]
    Codec { index: u32, message: String },
    #[error(
        "sub-block {index} needs {required} bytes but only {capacity} were provisioned"
    )]
    Provisioning {
        index: u32,
        required: usize,
        capacity: usize,
    },
    #[error("allocation failed: {0}")]
    Allocation(String),
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),
    #[error("worker job panicked: {0}")]
    JobPanicked(String),
    #[error("worker pool is shut down; job was never run")]
    PoolShutdown,
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<TesseraError>,
    },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TesseraError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Sub-block the error is attributed to, looking through context layers.
    pub fn sub_block_index(&self) -> Option<u32> {
        match self {
            Self::Codec { index, .. } | Self::Provisioning { index, .. } => Some(*index),
            Self::Context { source, .. } => source.sub_block_index(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_the_sub_block_index() {
        let error = TesseraError::Codec {
            index: 4,
            message: "bad frame magic".into(),
        }
        .with_context("decode pass");
        assert_eq!(error.sub_block_index(), Some(4));
        assert_eq!(
            error.to_string(),
            "decode pass: codec error in sub-block 4: bad frame magic"
        );
    }

    #[test]
    fn anyhow_errors_convert() {
        let error: TesseraError = anyhow::anyhow!("external").into();
        assert!(matches!(error, TesseraError::Other(_)));
        assert_eq!(error.sub_block_index(), None);
    }
}
