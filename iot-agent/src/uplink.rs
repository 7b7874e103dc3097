use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::api::AgentError;
use crate::decoders::{DecoderRegistry, Payload};
use crate::facades::{Facade, UplinkEvent};
use crate::time::TimeSource;

/// Receives the payloads decoded from uplinks.
#[async_trait]
pub trait PayloadPublisher: Send + Sync {
    async fn publish(&self, event: &UplinkEvent, payload: Payload) -> Result<(), AgentError>;
}

/// Turns raw uplink envelopes into decoded payloads: translate the envelope,
/// select a decoder from the device profile, decode, then publish. The first
/// failing step ends the processing, nothing is published for that uplink.
pub struct UplinkProcessor {
    facade: Arc<dyn Facade>,
    registry: Arc<DecoderRegistry>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl UplinkProcessor {
    pub fn new(
        facade: Arc<dyn Facade>,
        registry: Arc<DecoderRegistry>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
    ) -> Self {
        Self {
            facade,
            registry,
            timesource,
        }
    }

    #[instrument(skip_all, fields(facade = self.facade.name(), dev_eui))]
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        envelope: &[u8],
        publisher: &dyn PayloadPublisher,
    ) -> Result<(), AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let event = self.facade.translate(envelope, self.timesource.now())?;
        tracing::Span::current().record("dev_eui", event.dev_eui.as_str());

        let profile = event
            .device_profile
            .as_deref()
            .ok_or_else(|| AgentError::UnsupportedDeviceType("<none>".to_string()))?;
        let decode = self.registry.select(profile)?;

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let payload = decode(&event)?;
        debug!(
            "decoded {} measurements from {} uplink",
            payload.measurements.len(),
            profile
        );

        publisher.publish(&event, payload).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use base64::Engine;
    use time::macros::datetime;

    use super::*;
    use crate::decoders::DecodeError;
    use crate::facades::chirpstack::Chirpstack;
    use crate::time::FixedTime;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Payload>>,
    }

    #[async_trait]
    impl PayloadPublisher for RecordingPublisher {
        async fn publish(&self, _event: &UplinkEvent, payload: Payload) -> Result<(), AgentError> {
            self.published.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn processor() -> UplinkProcessor {
        UplinkProcessor::new(
            Arc::new(Chirpstack),
            Arc::new(DecoderRegistry::default()),
            Arc::new(FixedTime {
                time: datetime!(2024-01-01 00:00:00 UTC),
            }),
        )
    }

    fn envelope(profile: &str, data: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "devEUI": "A81758FFFE051D02",
            "deviceProfileName": profile,
            "data": base64::engine::general_purpose::STANDARD.encode(data),
            "rxInfo": [{"time": "2022-03-28T12:40:40Z", "rssi": -105, "loRaSNR": 8.5}],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn publishes_decoded_payloads() {
        let publisher = RecordingPublisher::default();
        processor()
            .process(
                &CancellationToken::new(),
                &envelope("SenlabT", &[1, 254, 0x01, 0x2c]),
                &publisher,
            )
            .await
            .expect("failed to process uplink");

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].dev_eui, "a81758fffe051d02");
        assert_eq!(published[0].timestamp, datetime!(2022-03-28 12:40:40 UTC));
        assert_eq!(published[0].temperatures().collect::<Vec<_>>(), vec![18.75]);
        assert_eq!(published[0].battery_level, Some(100));
    }

    #[tokio::test]
    async fn failures_are_not_published() {
        let publisher = RecordingPublisher::default();
        let cancel = CancellationToken::new();
        let processor = processor();

        let err = processor
            .process(&cancel, b"{}", &publisher)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedEnvelope(_)));

        let err = processor
            .process(&cancel, &envelope("acme", &[1, 2, 3, 4]), &publisher)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedDeviceType(_)));

        let err = processor
            .process(&cancel, &envelope("senlabt", &[1, 254]), &publisher)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Decode(DecodeError::PayloadTooShort { .. })
        ));

        let err = processor
            .process(&cancel, &envelope("senlabt", &[1, 254, 0x05, 0x50]), &publisher)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Decode(DecodeError::SensorFaultReading(_))
        ));

        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_profiles_are_unsupported() {
        let publisher = RecordingPublisher::default();
        let envelope = br#"{"devEUI":"a81758fffe051d02","data":"AQ=="}"#;

        let err = processor()
            .process(&CancellationToken::new(), envelope, &publisher)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedDeviceType(_)));
    }

    #[tokio::test]
    async fn cancelled_uplinks_are_dropped() {
        let publisher = RecordingPublisher::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = processor()
            .process(&cancel, &envelope("senlabt", &[1, 254, 0x01, 0x2c]), &publisher)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(publisher.published.lock().unwrap().is_empty());
    }
}
