//! Message filters
//!
//! A [`MessageFilter`] is a stateless predicate: network equality AND type equality,
//! where either clause may be a wildcard. A network-type clause selects every network
//! of a bus family. Wildcard type clauses skip internal control traffic unless
//! [`MessageFilter::include_internal`] is set.

use crate::message::{Message, MessageType};
use crate::network::{NetId, Network, NetworkType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageFilter {
    pub network: Option<Network>,
    pub message_type: Option<MessageType>,
    pub network_type: Option<NetworkType>,
    pub include_internal: bool,
}

impl MessageFilter {
    /// Matches every non-internal message.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn network(network: impl Into<Network>) -> Self {
        Self { network: Some(network.into()), ..Self::default() }
    }

    pub fn message_type(message_type: MessageType) -> Self {
        Self { message_type: Some(message_type), ..Self::default() }
    }

    pub fn network_type(network_type: NetworkType) -> Self {
        Self { network_type: Some(network_type), ..Self::default() }
    }

    /// Network AND type.
    pub fn both(network: impl Into<Network>, message_type: MessageType) -> Self {
        Self { network: Some(network.into()), message_type: Some(message_type), ..Self::default() }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn include_internal(mut self, include: bool) -> Self {
        self.include_internal = include;
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        let message_type = message.message_type();
        match self.message_type {
            Some(wanted) if wanted != message_type => return false,
            None if message_type.is_internal() && !self.include_internal => return false,
            _ => {}
        }
        if self.network.is_some_and(|network| network != message.network) {
            return false;
        }
        if self.network_type.is_some_and(|family| family != message.network.network_type()) {
            return false;
        }
        true
    }

    /// Filters on exactly one network, used as an index key by the router.
    pub(crate) fn network_only(&self) -> Option<NetId> {
        match (self.network, self.message_type, self.network_type) {
            (Some(network), None, None) => Some(network.kind()),
            _ => None,
        }
    }

    /// Filters on exactly one message type, used as an index key by the router.
    pub(crate) fn type_only(&self) -> Option<MessageType> {
        match (self.network, self.message_type, self.network_type) {
            (None, Some(message_type), None) => Some(message_type),
            _ => None,
        }
    }

    pub(crate) fn is_wildcard(&self) -> bool {
        self.network.is_none() && self.message_type.is_none() && self.network_type.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        DeviceCommand, DeviceControlMessage, EthernetMessage, FlexRayChannel, FlexRayMessage,
        SpiMessage,
    };
    use proptest::prelude::*;

    fn set_online() -> Message {
        Message::new(NetId::DeviceControl, DeviceControlMessage::new(1, DeviceCommand::SetOnline))
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::can(NetId::DwCan01, 0x123, vec![1]),
            Message::can(NetId::DwCan02, 0x456, vec![2]),
            Message::new(NetId::Ethernet01, EthernetMessage::new(vec![0; 14])),
            Message::new(NetId::FlexRay01, FlexRayMessage::new(3, FlexRayChannel::A, vec![0; 2])),
            Message::new(NetId::Spi01, SpiMessage::write(1, 0x10, vec![0xAA])),
            set_online(),
        ]
    }

    #[test]
    fn wildcard_skips_internal_unless_requested() {
        let control = set_online();
        assert!(!MessageFilter::any().matches(&control));
        assert!(MessageFilter::any().include_internal(true).matches(&control));
        assert!(MessageFilter::message_type(MessageType::DeviceControl).matches(&control));
    }

    #[test]
    fn composite_filter_requires_both() {
        let filter = MessageFilter::both(NetId::DwCan01, MessageType::Can);
        let hits: Vec<_> = sample_messages().into_iter().filter(|m| filter.matches(m)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].network.kind(), NetId::DwCan01);
    }

    #[test]
    fn network_type_filter() {
        let filter = MessageFilter::network_type(NetworkType::Can);
        let hits = sample_messages().into_iter().filter(|m| filter.matches(m)).count();
        assert_eq!(hits, 2);
    }

    #[test]
    fn index_keys() {
        assert_eq!(MessageFilter::network(NetId::Spi01).network_only(), Some(NetId::Spi01));
        let by_type = MessageFilter::message_type(MessageType::Spi);
        assert_eq!(by_type.type_only(), Some(MessageType::Spi));
        assert_eq!(MessageFilter::both(NetId::Spi01, MessageType::Spi).network_only(), None);
        assert!(MessageFilter::any().is_wildcard());
    }

    fn arb_can_network() -> impl Strategy<Value = NetId> {
        prop::sample::select(vec![NetId::DwCan01, NetId::DwCan02, NetId::DwCan03, NetId::DwCan04])
    }

    proptest! {
        #[test]
        fn network_only_filter_matches_exactly_its_network(
            wanted in arb_can_network(),
            actual in arb_can_network(),
            arbid in 0u32..0x7FF,
        ) {
            let msg = Message::can(actual, arbid, vec![]);
            prop_assert_eq!(MessageFilter::network(wanted).matches(&msg), wanted == actual);
        }

        #[test]
        fn type_only_filter_ignores_network(network in arb_can_network(), arbid in 0u32..0x7FF) {
            let msg = Message::can(network, arbid, vec![]);
            prop_assert!(MessageFilter::message_type(MessageType::Can).matches(&msg));
            prop_assert!(!MessageFilter::message_type(MessageType::Ethernet).matches(&msg));
        }
    }
}
