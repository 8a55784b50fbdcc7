//! Turns update requests into UPDATE messages queued on a peer's session
mod request;

use std::net::IpAddr;
use std::sync::Arc;

use log::info;
use thiserror::Error;

pub use request::{Asn, OneOrMany, UpdateRequest, ValidatedUpdate};

use crate::config::PeerConfig;
use crate::message::{
    AsPath, Family, MpReach, MpUnreach, PathAttribute, Update,
};
use crate::session::{EnqueueError, MessageId, Negotiated, SessionHandle};

const DEFAULT_LOCAL_PREF: u32 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InjectError {
    #[error("Session is not established")]
    SessionNotEstablished,
    #[error("Invalid {field}: {reason}")]
    InvalidRequest { field: String, reason: String },
    #[error("Address family {0} was not negotiated with this peer")]
    UnsupportedAddressFamily(Family),
    #[error("Capability {0} was not negotiated with this peer")]
    UnsupportedCapability(String),
}

impl From<EnqueueError> for InjectError {
    fn from(error: EnqueueError) -> Self {
        match error {
            EnqueueError::SessionNotEstablished => InjectError::SessionNotEstablished,
            EnqueueError::UnsupportedAddressFamily(family) => {
                InjectError::UnsupportedAddressFamily(family)
            }
            EnqueueError::UnsupportedCapability(capability) => {
                InjectError::UnsupportedCapability(capability)
            }
            EnqueueError::Unencodable(reason) => InjectError::InvalidRequest {
                field: "update".to_string(),
                reason,
            },
        }
    }
}

/// Validate `request` and queue it on the peer's session
///
/// Returns once the UPDATE is queued, not once it is on the wire.
pub async fn inject(handle: &SessionHandle, request: UpdateRequest) -> Result<MessageId, InjectError> {
    let update = request.validate()?;
    let family = update.family;
    let (announced, withdrawn) = (update.announce.len(), update.withdraw.len());
    let config = Arc::clone(handle.config());
    let id = handle
        .enqueue(family, move |negotiated| update.build(&config, negotiated))
        .await?;
    info!(
        "[{}] Queued UPDATE {} for {} [{} announced, {} withdrawn]",
        handle.addr(),
        id,
        family,
        announced,
        withdrawn
    );
    Ok(id)
}

/// Ask the peer to re-advertise `family`
pub async fn route_refresh(handle: &SessionHandle, family: Family) -> Result<(), InjectError> {
    if !family.is_known() {
        return Err(InjectError::UnsupportedAddressFamily(family));
    }
    handle.route_refresh(family).await?;
    info!("[{}] Requested ROUTE-REFRESH for {}", handle.addr(), family);
    Ok(())
}

impl ValidatedUpdate {
    /// Build the UPDATE for a peer, given what its session negotiated
    pub fn build(self, config: &PeerConfig, negotiated: &Negotiated) -> Update {
        let mut update = Update::default();
        let ipv4_unicast = self.family == Family::IPV4_UNICAST;

        if !self.withdraw.is_empty() {
            if ipv4_unicast {
                update.withdrawn_routes = self.withdraw;
            } else {
                update.attributes.push(PathAttribute::MpUnreach(MpUnreach {
                    family: self.family,
                    withdrawn_routes: self.withdraw,
                }));
            }
        }
        if self.announce.is_empty() {
            return update;
        }

        let mut attributes = vec![PathAttribute::Origin(self.origin)];
        let mut as_path = AsPath::sequence(self.as_path);
        if config.is_ebgp() && as_path.first() != Some(config.local_as) {
            as_path.prepend(config.local_as);
        }
        // 2-octet sessions get AS_TRANS in AS_PATH, and the real path in AS4_PATH
        if !negotiated.four_octet_asn && as_path.has_four_octet() {
            attributes.push(PathAttribute::As4Path(as_path.clone()));
        }
        attributes.push(PathAttribute::AsPath(as_path));

        match (ipv4_unicast, self.next_hop) {
            (true, Some(IpAddr::V4(next_hop))) => {
                attributes.push(PathAttribute::NextHop(next_hop));
                update.announced_routes = self.announce;
            }
            (_, next_hop) => attributes.push(PathAttribute::MpReach(MpReach {
                family: self.family,
                next_hops: next_hop.into_iter().collect(),
                announced_routes: self.announce,
            })),
        }

        if let Some(med) = self.med {
            attributes.push(PathAttribute::MultiExitDisc(med));
        }
        // LOCAL_PREF is only for iBGP (RFC 4271 5.1.5)
        if !config.is_ebgp() {
            attributes.push(PathAttribute::LocalPref(
                self.local_pref.unwrap_or(DEFAULT_LOCAL_PREF),
            ));
        }
        if self.atomic_aggregate {
            attributes.push(PathAttribute::AtomicAggregate);
        }
        let standard = self.communities.standard();
        if !standard.is_empty() {
            attributes.push(PathAttribute::Communities(standard));
        }
        let extended = self.communities.extended();
        if !extended.is_empty() {
            attributes.push(PathAttribute::ExtendedCommunities(extended));
        }
        let large = self.communities.large();
        if !large.is_empty() {
            attributes.push(PathAttribute::LargeCommunities(large));
        }

        update.attributes.extend(attributes);
        update.attributes.sort_by_key(|attribute| attribute.type_code());
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        encode, Families, Message, WireOptions, AS_TRANS,
    };
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn peer(remote_as: u32, local_as: u32) -> PeerConfig {
        PeerConfig::new(
            "10.0.0.1".parse().unwrap(),
            remote_as,
            local_as,
            Ipv4Addr::new(1, 1, 1, 1),
        )
    }

    fn negotiated(four_octet_asn: bool) -> Negotiated {
        Negotiated {
            hold_time: 90,
            keepalive: 30,
            families: Families::new(vec![Family::IPV4_UNICAST, Family::IPV6_UNICAST]),
            four_octet_asn,
            ..Negotiated::default()
        }
    }

    fn validated(body: serde_json::Value) -> ValidatedUpdate {
        serde_json::from_value::<UpdateRequest>(body)
            .unwrap()
            .validate()
            .unwrap()
    }

    #[test]
    fn test_ebgp_ipv4_update() {
        let update = validated(json!({
            "nlri": "10.1.0.0/24",
            "next_hop": "10.0.0.2",
            "as_path": [65001],
            "local_pref": 300,
            "med": 5
        }))
        .build(&peer(65001, 65000), &negotiated(true));

        assert_eq!(update.announced_routes, vec!["10.1.0.0/24".parse().unwrap()]);
        assert_eq!(update.as_path(), Some(&AsPath::sequence(vec![65000, 65001])));
        assert_eq!(
            update.attributes,
            vec![
                PathAttribute::Origin(crate::message::Origin::Incomplete),
                PathAttribute::AsPath(AsPath::sequence(vec![65000, 65001])),
                PathAttribute::NextHop(Ipv4Addr::new(10, 0, 0, 2)),
                PathAttribute::MultiExitDisc(5),
            ]
        );
        // A well-formed UPDATE comes back out of the codec unchanged
        let message = Message::Update(update);
        let mut bytes = bytes::BytesMut::from(&encode(&message, &WireOptions::new(true)).unwrap()[..]);
        let decoded = crate::message::decode(&mut bytes, &WireOptions::new(true)).unwrap();
        assert_eq!(decoded, Some(message));
    }

    #[test]
    fn test_ebgp_does_not_prepend_twice() {
        let update = validated(json!({
            "nlri": "10.1.0.0/24", "next_hop": "10.0.0.2", "as_path": [65000, 65010]
        }))
        .build(&peer(65001, 65000), &negotiated(true));
        assert_eq!(update.as_path(), Some(&AsPath::sequence(vec![65000, 65010])));
    }

    #[test]
    fn test_ibgp_local_pref() {
        let update = validated(json!({
            "nlri": "10.1.0.0/24", "next_hop": "10.0.0.2", "as_path": []
        }))
        .build(&peer(65000, 65000), &negotiated(true));
        assert!(update.attributes.contains(&PathAttribute::LocalPref(100)));
        assert_eq!(update.as_path(), Some(&AsPath::default()));
    }

    #[test]
    fn test_ipv6_uses_mp_attributes() {
        let update = validated(json!({
            "nlri": "2001:db8:1::/48",
            "withdraw": ["2001:db8:2::/48"],
            "next_hop": "2001:db8::2",
            "as_path": [65001]
        }))
        .build(&peer(65001, 65000), &negotiated(true));
        assert!(update.announced_routes.is_empty());
        assert!(update.withdrawn_routes.is_empty());
        let reach = update.mp_reach().unwrap();
        assert_eq!(reach.family, Family::IPV6_UNICAST);
        assert_eq!(reach.next_hops, vec!["2001:db8::2".parse::<IpAddr>().unwrap()]);
        assert_eq!(update.mp_unreach().unwrap().withdrawn_routes.len(), 1);
        assert!(update.get(3).is_none());
    }

    #[test]
    fn test_withdraw_only_ipv4() {
        let update = validated(json!({"withdraw": ["10.1.0.0/24", "10.2.0.0/24"]}))
            .build(&peer(65001, 65000), &negotiated(true));
        assert_eq!(update.withdrawn_routes.len(), 2);
        assert!(update.attributes.is_empty());
    }

    #[test]
    fn test_two_octet_session_gets_as4_path() {
        let update = validated(json!({
            "nlri": "10.1.0.0/24", "next_hop": "10.0.0.2", "as_path": [4200000001u32]
        }))
        .build(&peer(65001, 4200000000), &negotiated(false));
        let full_path = AsPath::sequence(vec![4200000000, 4200000001]);
        assert!(update.attributes.contains(&PathAttribute::As4Path(full_path.clone())));
        assert_eq!(update.as_path(), Some(&full_path));

        // On the wire the AS_PATH carries AS_TRANS
        let options = WireOptions::new(false);
        let message = Message::Update(update);
        let mut bytes = bytes::BytesMut::from(&encode(&message, &options).unwrap()[..]);
        match crate::message::decode(&mut bytes, &options).unwrap() {
            Some(Message::Update(decoded)) => assert_eq!(
                decoded.as_path(),
                Some(&AsPath::sequence(vec![u32::from(AS_TRANS), u32::from(AS_TRANS)]))
            ),
            other => panic!("Expected UPDATE, got {:?}", other),
        }
    }

    #[test]
    fn test_enqueue_error_mapping() {
        assert_eq!(
            InjectError::from(EnqueueError::SessionNotEstablished),
            InjectError::SessionNotEstablished
        );
        assert_eq!(
            InjectError::from(EnqueueError::UnsupportedAddressFamily(Family::IPV6_UNICAST)),
            InjectError::UnsupportedAddressFamily(Family::IPV6_UNICAST)
        );
    }
}
