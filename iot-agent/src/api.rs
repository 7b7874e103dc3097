use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::decoders::DecodeError;
use crate::sender::SenderError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unsupported device type: {0}")]
    UnsupportedDeviceType(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("malformed senml pack: {0}")]
    MalformedSenML(String),

    #[error("processing cancelled")]
    Cancelled,
    #[error(transparent)]
    Send(#[from] SenderError),
}

impl AgentError {
    /// Short label for metrics.
    pub fn cause(&self) -> &'static str {
        match self {
            AgentError::MalformedEnvelope(_) => "malformed_envelope",
            AgentError::UnsupportedDeviceType(_) => "unsupported_device_type",
            AgentError::Decode(DecodeError::PayloadTooShort { .. }) => "payload_too_short",
            AgentError::Decode(DecodeError::SensorFaultReading(_)) => "sensor_fault_reading",
            AgentError::Decode(_) => "decode_failure",
            AgentError::MalformedSenML(_) => "malformed_senml",
            AgentError::Cancelled => "cancelled",
            AgentError::Send(_) => "send_failure",
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        match self {
            AgentError::MalformedEnvelope(_)
            | AgentError::Decode(_)
            | AgentError::MalformedSenML(_) => (StatusCode::BAD_REQUEST, self.to_string()),

            AgentError::UnsupportedDeviceType(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }

            AgentError::Send(SenderError::Serialization(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }

            AgentError::Cancelled | AgentError::Send(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_errors_are_client_errors() {
        let err = AgentError::from(DecodeError::SensorFaultReading(1360));
        assert_eq!(err.cause(), "sensor_fault_reading");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = AgentError::UnsupportedDeviceType("acme".to_string());
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn sender_errors_are_retryable() {
        let err = AgentError::from(SenderError::NotStarted);
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = AgentError::from(SenderError::SenderClosed);
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
