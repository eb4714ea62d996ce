use atlas_core::errors::ProviderError;

/// Failures that end a turn. Tool errors are absent on purpose: they are
/// folded into Observations and the loop keeps going. Store errors are
/// absent too: writes happen after the answer streamed, so a failure is
/// logged and swallowed rather than ending the turn.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A fatal provider error during a decision or answer call.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The caller cancelled the turn mid-flight.
    #[error("turn aborted")]
    Aborted,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Message surfaced to the consumer in the terminal `error` event.
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(e) => format!("模型调用失败: {e}"),
            Self::Aborted => "请求已取消".to_string(),
            Self::Internal(m) => m.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_convert() {
        let err: EngineError = ProviderError::Auth("bad key".into()).into();
        assert!(matches!(err, EngineError::Provider(_)));
        assert!(err.user_message().contains("模型调用失败"));
    }

    #[test]
    fn aborted_message() {
        assert_eq!(EngineError::Aborted.user_message(), "请求已取消");
    }
}
