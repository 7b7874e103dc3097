use axum::extract::State;
use axum::http::StatusCode;
use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::api::AgentError;
use crate::messages::{CommandMessage, MessageReceived};
use crate::prometheus::report_message_sent;
use crate::router;
use crate::senml;

/// Receives one uplink envelope from the configured network server.
#[instrument(skip_all, fields(body_size = body.len()))]
pub async fn message(
    state: State<router::State>,
    body: Bytes,
) -> Result<StatusCode, AgentError> {
    state.app.message_received(body).await?;
    Ok(StatusCode::CREATED)
}

/// Receives a SenML pack from an LwM2M device, passed on without decoding.
#[instrument(skip_all, fields(body_size = body.len(), device_id))]
pub async fn lwm2m(state: State<router::State>, body: Bytes) -> Result<StatusCode, AgentError> {
    let pack = senml::parse_pack(&body).map_err(|err| {
        warn!("rejected malformed senml pack: {}", err);
        AgentError::MalformedSenML(err.to_string())
    })?;

    let message = MessageReceived::from_lwm2m(pack, state.timesource.now())?;
    tracing::Span::current().record("device_id", message.device_id.as_str());
    debug!("received {} senml records", message.pack.len());

    state
        .sender
        .send(CommandMessage::from_message(&message)?)
        .await?;
    report_message_sent("message_received");

    Ok(StatusCode::CREATED)
}
