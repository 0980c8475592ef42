//! Bearer send retries with exponential backoff.

use tracing::{debug, trace, warn};

use super::MeshManager;
use crate::access::{AccessError, MessageId};
use crate::bearer::{BearerError, PduType};

/// A PDU the bearer refused with a transient error.
#[derive(Clone, Debug)]
pub(super) struct BearerRetry {
    pub(super) data: Vec<u8>,
    pub(super) pdu_type: PduType,
    /// Message the PDU carries, resolved when the retry succeeds.
    pub(super) message: Option<MessageId>,
    /// Number of retries already made.
    pub(super) attempt: u32,
    pub(super) retry_after_ms: u64,
}

impl MeshManager {
    /// Hand a PDU to the bearer.
    ///
    /// Returns `Ok(false)` when the bearer asked to wait and the PDU was
    /// queued for a retry.
    pub(super) fn transmit(
        &mut self,
        data: Vec<u8>,
        pdu_type: PduType,
        message: Option<MessageId>,
        now_ms: u64,
    ) -> Result<bool, BearerError> {
        let bearer = self.bearer.as_ref().ok_or(BearerError::Closed)?;
        match bearer.send(&data, pdu_type) {
            Ok(()) => {
                self.schedule_network_repeats(&data, pdu_type, now_ms);
                Ok(true)
            }
            Err(e) if e.is_transient() && self.config.bearer.max_send_retries > 0 => {
                let delay = self.config.bearer.retry_delay_ms(0);
                debug!(error = %e, delay_ms = delay, "Bearer busy, send queued");
                self.bearer_retries.push(BearerRetry {
                    data,
                    pdu_type,
                    message,
                    attempt: 0,
                    retry_after_ms: now_ms + delay,
                });
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Retry every queued send whose backoff expired.
    pub(super) fn process_bearer_retries(&mut self, now_ms: u64) {
        if self.bearer_retries.is_empty() {
            return;
        }
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.bearer_retries)
            .into_iter()
            .partition(|r| r.retry_after_ms <= now_ms);
        self.bearer_retries = waiting;

        for mut retry in due {
            let result = match &self.bearer {
                Some(bearer) => bearer.send(&retry.data, retry.pdu_type),
                None => Err(BearerError::Closed),
            };
            match result {
                Ok(()) => {
                    trace!(attempt = retry.attempt + 1, "Bearer retry succeeded");
                    self.schedule_network_repeats(&retry.data, retry.pdu_type, now_ms);
                    if let Some(id) = retry.message {
                        self.delivered(id);
                    }
                }
                Err(e)
                    if e.is_transient()
                        && retry.attempt + 1 < self.config.bearer.max_send_retries =>
                {
                    retry.attempt += 1;
                    let delay = self.config.bearer.retry_delay_ms(retry.attempt);
                    debug!(attempt = retry.attempt, delay_ms = delay, "Bearer still busy");
                    retry.retry_after_ms = now_ms + delay;
                    self.bearer_retries.push(retry);
                }
                Err(e) => {
                    warn!(error = %e, attempts = retry.attempt + 1, "Giving up on bearer send");
                    self.give_up(retry.message);
                }
            }
        }
    }

    /// Drop every queued send after the bearer closed.
    pub(super) fn abandon_bearer_retries(&mut self) {
        for retry in std::mem::take(&mut self.bearer_retries) {
            self.give_up(retry.message);
        }
    }

    /// Acknowledged messages keep their own retransmission timer.
    fn give_up(&mut self, message: Option<MessageId>) {
        if let Some(id) = message
            && !self.access.is_pending(id)
        {
            self.fail(id, AccessError::SendFailed);
        }
    }

    fn schedule_network_repeats(&mut self, data: &[u8], pdu_type: PduType, now_ms: u64) {
        if pdu_type != PduType::NetworkPdu || self.bearer.as_ref().is_some_and(|b| b.is_gatt()) {
            return;
        }
        let transmit = &self.config.network.network_transmit;
        self.network_layer.schedule_repeats(
            data.to_vec(),
            transmit.transmissions(),
            transmit.interval_ms,
            now_ms,
        );
    }
}
