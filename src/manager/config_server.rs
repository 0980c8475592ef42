//! Configuration Server: Heartbeat Publication and Subscription states.

use tracing::{debug, info, warn};

use super::{MeshEvent, MeshManager};
use crate::access::messages::{
    ConfigHeartbeatPublicationStatus, ConfigHeartbeatSubscriptionSet,
    ConfigHeartbeatSubscriptionStatus, ConfigRequest, ConfigStatus, HeartbeatPublicationState,
};
use crate::access::{ConfigIncoming, MeshMessage};
use crate::upper::{HeartbeatPublication, HeartbeatSubscription};

impl MeshManager {
    /// Apply a configuration request and queue the status reply.
    pub(super) fn handle_config_request(&mut self, incoming: ConfigIncoming, now_ms: u64) {
        let ConfigIncoming {
            request,
            source,
            destination,
            key_set,
        } = incoming;
        debug!(src = %source, opcode = request.opcode(), "Configuration request");

        let response: Box<dyn MeshMessage> = match request {
            ConfigRequest::HeartbeatPublicationGet(_) => {
                Box::new(ConfigHeartbeatPublicationStatus {
                    status: ConfigStatus::Success,
                    state: self.heartbeat_publication_state(),
                })
            }
            ConfigRequest::HeartbeatPublicationSet(set) => {
                match self.set_heartbeat_publication(set.0, now_ms) {
                    Some(status) => Box::new(ConfigHeartbeatPublicationStatus {
                        status,
                        state: set.0,
                    }),
                    None => return,
                }
            }
            ConfigRequest::HeartbeatSubscriptionGet(_) => {
                Box::new(self.heartbeat_subscription_status(ConfigStatus::Success, now_ms))
            }
            ConfigRequest::HeartbeatSubscriptionSet(set) => {
                match self.set_heartbeat_subscription(&set, now_ms) {
                    Some(status) => Box::new(status),
                    None => return,
                }
            }
        };

        if let Err(error) = self
            .access
            .reply(response.as_ref(), destination, source, key_set, false, now_ms)
        {
            warn!(%error, "Configuration response dropped");
        }
    }

    fn heartbeat_publication_state(&self) -> HeartbeatPublicationState {
        match self.upper.heartbeat_publication() {
            Some(publication) => HeartbeatPublicationState {
                destination: publication.destination,
                count_log: publication.count_log(),
                period_log: publication.period_log,
                ttl: publication.ttl,
                features: publication.features,
                network_key: publication.network_key,
            },
            None => HeartbeatPublicationState::disabled(),
        }
    }

    /// Returns `None` when the request carries prohibited values and is
    /// ignored.
    fn set_heartbeat_publication(
        &mut self,
        state: HeartbeatPublicationState,
        now_ms: u64,
    ) -> Option<ConfigStatus> {
        if state.destination.is_virtual() {
            return Some(ConfigStatus::InvalidAddress);
        }
        if self.network.network_key(state.network_key).is_none() {
            return Some(ConfigStatus::InvalidNetKeyIndex);
        }
        let publication = HeartbeatPublication::new(
            state.destination,
            state.count_log,
            state.period_log,
            state.ttl,
            state.network_key,
            state.features,
            now_ms,
        );
        let Some(publication) = publication else {
            debug!(?state, "Prohibited heartbeat publication ignored");
            return None;
        };
        if publication.is_enabled() {
            info!(
                dst = %publication.destination,
                period_log = publication.period_log,
                count_log = publication.count_log(),
                "Heartbeat publication set"
            );
            self.upper.set_heartbeat_publication(Some(publication));
        } else {
            info!("Heartbeat publication disabled");
            self.upper.set_heartbeat_publication(None);
        }
        self.emit(MeshEvent::NetworkChanged);
        Some(ConfigStatus::Success)
    }

    fn heartbeat_subscription_status(
        &self,
        status: ConfigStatus,
        now_ms: u64,
    ) -> ConfigHeartbeatSubscriptionStatus {
        match self.upper.heartbeat_subscription() {
            Some(subscription) => ConfigHeartbeatSubscriptionStatus {
                status,
                source: subscription.source,
                destination: subscription.destination,
                period_log: subscription.period_log(now_ms),
                count_log: subscription.count_log(),
                min_hops: subscription.min_hops(),
                max_hops: subscription.max_hops(),
            },
            None => ConfigHeartbeatSubscriptionStatus::disabled(status),
        }
    }

    fn set_heartbeat_subscription(
        &mut self,
        set: &ConfigHeartbeatSubscriptionSet,
        now_ms: u64,
    ) -> Option<ConfigHeartbeatSubscriptionStatus> {
        let valid_source = set.source.is_unassigned() || set.source.is_unicast();
        let valid_destination = set.destination.is_unassigned()
            || set.destination.is_group()
            || self.network.is_local_unicast(set.destination);
        if !valid_source || !valid_destination {
            let mut status = self.heartbeat_subscription_status(ConfigStatus::InvalidAddress, now_ms);
            status.source = set.source;
            status.destination = set.destination;
            status.period_log = set.period_log;
            return Some(status);
        }

        if set.source.is_unassigned() || set.destination.is_unassigned() || set.period_log == 0 {
            info!("Heartbeat subscription disabled");
            self.upper.set_heartbeat_subscription(None);
        } else {
            let Some(subscription) =
                HeartbeatSubscription::new(set.source, set.destination, set.period_log, now_ms)
            else {
                debug!(period_log = set.period_log, "Prohibited heartbeat subscription ignored");
                return None;
            };
            info!(
                src = %set.source,
                dst = %set.destination,
                period_log = set.period_log,
                "Heartbeat subscription set"
            );
            self.upper.set_heartbeat_subscription(Some(subscription));
        }
        self.emit(MeshEvent::NetworkChanged);
        Some(self.heartbeat_subscription_status(ConfigStatus::Success, now_ms))
    }
}
