use std::cmp;
use std::collections::VecDeque;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::SinkExt;
use log::{debug, info, trace, warn};
use tokio_util::codec::Framed;

use super::handle::UpdateBuilder;
use super::{
    Connection, EnqueueError, Fsm, FsmEvent, HoldTimer, MessageCodec, MessageCounts, MessageId,
    MessageProtocol, MessageRecorder, Negotiated, SessionError, SessionState,
};
use crate::config::PeerConfig;
use crate::message::{self, Capability, Family, Message, Notification, Open, RouteRefresh};
use crate::utils::format_time_as_elapsed;

/// Messages waiting for transmission, in enqueue order
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Always a `Message::Update`, checked to encode at enqueue time
    Update(MessageId, Message),
    RouteRefresh(RouteRefresh),
}

/// A `Session` is one TCP connection to a peer: the framed message stream,
/// its hold timer, and what was negotiated over it.
pub struct Session {
    pub(crate) addr: IpAddr,
    pub(crate) config: Arc<PeerConfig>,
    pub(crate) protocol: MessageProtocol,
    pub(crate) connect_time: DateTime<Utc>,
    pub(crate) established_time: Option<DateTime<Utc>>,
    pub(crate) hold_timer: HoldTimer,
    pub(crate) counts: MessageCounts,
    pub(crate) negotiated: Option<Negotiated>,
    pub(crate) remote_id: Option<Ipv4Addr>,
    pub(crate) outbound: VecDeque<Outbound>,
    pub(crate) last_sent_id: Option<MessageId>,
    pub(crate) recorder: Option<MessageRecorder>,
}

impl Session {
    /// Build a newly connected session from the peer config & transport
    pub fn new(config: Arc<PeerConfig>, connection: Connection) -> Session {
        Session {
            addr: config.remote_ip,
            recorder: MessageRecorder::new(&config.message, config.remote_ip),
            config,
            protocol: Framed::new(connection.stream, MessageCodec::new()),
            connect_time: Utc::now(),
            established_time: None,
            hold_timer: HoldTimer::open_sent(),
            counts: MessageCounts::new(),
            negotiated: None,
            remote_id: None,
            outbound: VecDeque::new(),
            last_sent_id: None,
        }
    }

    pub fn create_open(&self) -> Open {
        Open::new(
            self.config.local_as,
            self.config.hold_timer,
            self.config.local_router_id,
            self.config.capabilities(),
        )
    }

    /// Process one message received from the peer, driving the FSM
    pub async fn process_message(
        &mut self,
        fsm: &mut Fsm,
        message: Message,
    ) -> Result<(), SessionError> {
        trace!("[{}] Incoming: {}", self.addr, message.message_type());
        self.counts.increment_received(message.message_type());
        self.hold_timer.received();
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_or_warn(&message);
        }

        match message {
            Message::Open(open) => {
                fsm.handle_event(FsmEvent::OpenReceived)?;
                match self.open_received(&open) {
                    Ok(negotiated) => {
                        self.protocol
                            .codec_mut()
                            .set_four_octet_asn(negotiated.four_octet_asn);
                        self.hold_timer = HoldTimer::new(negotiated.hold_time);
                        self.negotiated = Some(negotiated);
                        self.remote_id = Some(open.router_id);
                    }
                    Err(err) => {
                        fsm.handle_event(FsmEvent::MessageError)?;
                        return Err(err);
                    }
                }
                self.send_message(Message::KeepAlive).await?;
            }
            Message::KeepAlive => {
                let previous = fsm.state();
                if fsm.handle_event(FsmEvent::KeepaliveReceived)? == SessionState::Established
                    && previous != SessionState::Established
                {
                    info!("[{}] Session established", self.addr);
                    self.established_time = Some(Utc::now());
                }
            }
            Message::Update(update) => {
                fsm.handle_event(FsmEvent::UpdateReceived)?;
                if update.is_end_of_rib() {
                    debug!("[{}] Received End-of-RIB", self.addr);
                } else {
                    debug!(
                        "[{}] Received UPDATE [{} announced, {} withdrawn]",
                        self.addr,
                        update.announced_count(),
                        update.withdrawn_count(),
                    );
                }
            }
            Message::Notification(notification) => {
                fsm.handle_event(FsmEvent::NotificationReceived)?;
                warn!("[{}] NOTIFICATION: {}", self.addr, notification);
                return Err(SessionError::NotificationReceived(notification));
            }
            Message::RouteRefresh(refresh) => {
                fsm.handle_event(FsmEvent::RouteRefreshReceived)?;
                // Nothing is advertised from a RIB, so there is nothing to resend
                info!(
                    "[{}] Received ROUTE-REFRESH for {}",
                    self.addr, refresh.family
                );
            }
        }
        Ok(())
    }

    /// Validate the peer's OPEN and work out what the session runs with
    pub fn open_received(&self, open: &Open) -> Result<Negotiated, SessionError> {
        let remote_asn = if self.config.four_octet_asn {
            open.asn()
        } else {
            u32::from(open.asn)
        };
        if remote_asn != self.config.remote_as {
            return Err(SessionError::OpenAsnMismatch(
                remote_asn,
                self.config.remote_as,
            ));
        }
        if open.hold_time == 1 || open.hold_time == 2 {
            return Err(SessionError::UnacceptableHoldTime(open.hold_time));
        }
        if open.router_id.is_unspecified()
            || (!self.config.is_ebgp() && open.router_id == self.config.local_router_id)
        {
            return Err(SessionError::BadBgpIdentifier(open.router_id));
        }
        debug!(
            "[{}] Received OPEN [asn={}, hold_time={}, {} capabilities]",
            self.addr,
            remote_asn,
            open.hold_time,
            open.capabilities.len()
        );

        let hold_time = cmp::min(open.hold_time, self.config.hold_timer);
        let families = self.config.families.common(&open.families());
        if families.is_empty() {
            warn!("[{}] No address families in common", self.addr);
        }
        Ok(Negotiated {
            hold_time,
            keepalive: hold_time / 3,
            families,
            four_octet_asn: self.config.four_octet_asn && open.four_octet_asn().is_some(),
            route_refresh: self.config.route_refresh
                && open.has_capability(&Capability::RouteRefresh),
            enhanced_route_refresh: self.config.enhanced_route_refresh
                && open.has_capability(&Capability::EnhancedRouteRefresh),
            graceful_restart: self.config.graceful_restart
                && open
                    .capabilities
                    .iter()
                    .any(|c| matches!(c, Capability::GracefulRestart { .. })),
        })
    }

    fn negotiated_family(
        &self,
        state: SessionState,
        family: Family,
    ) -> Result<&Negotiated, EnqueueError> {
        let negotiated = match (state, &self.negotiated) {
            (SessionState::Established, Some(negotiated)) => negotiated,
            _ => return Err(EnqueueError::SessionNotEstablished),
        };
        if !negotiated.families.contains(family) {
            return Err(EnqueueError::UnsupportedAddressFamily(family));
        }
        Ok(negotiated)
    }

    /// Append an UPDATE to the outbound queue
    pub(crate) fn enqueue(
        &mut self,
        state: SessionState,
        family: Family,
        build: UpdateBuilder,
    ) -> Result<MessageId, EnqueueError> {
        let update = Message::Update(build(self.negotiated_family(state, family)?));
        // Anything that would fail to encode must not reach the wire and end the session
        if let Err(err) = message::encode(&update, self.protocol.codec().options()) {
            return Err(EnqueueError::Unencodable(err.to_string()));
        }
        let id = MessageId::new();
        trace!("[{}] Queued UPDATE {} for {}", self.addr, id, family);
        self.outbound.push_back(Outbound::Update(id, update));
        Ok(id)
    }

    /// Queue a ROUTE-REFRESH request for `family`
    pub(crate) fn request_refresh(
        &mut self,
        state: SessionState,
        family: Family,
    ) -> Result<(), EnqueueError> {
        if !self.negotiated_family(state, family)?.route_refresh {
            return Err(EnqueueError::UnsupportedCapability(
                "route-refresh".to_string(),
            ));
        }
        self.outbound
            .push_back(Outbound::RouteRefresh(RouteRefresh::new(family)));
        Ok(())
    }

    /// Transmit everything queued, in order
    pub async fn flush_outbound(&mut self) -> Result<(), SessionError> {
        while let Some(outbound) = self.outbound.pop_front() {
            match outbound {
                Outbound::Update(id, update) => {
                    self.send_message(update).await?;
                    debug!("[{}] Sent UPDATE {}", self.addr, id);
                    self.last_sent_id = Some(id);
                }
                Outbound::RouteRefresh(refresh) => {
                    self.send_message(Message::RouteRefresh(refresh)).await?;
                }
            }
        }
        Ok(())
    }

    // Send a message, and flush the send buffer afterwards
    pub async fn send_message(&mut self, message: Message) -> Result<(), SessionError> {
        let message_type = message.message_type();
        trace!("[{}] Outgoing: {}", self.addr, message_type);
        self.protocol.send(message).await?;
        self.counts.increment_sent(message_type);
        self.hold_timer.sent();
        Ok(())
    }

    pub async fn notify(&mut self, notification: Notification) -> Result<(), SessionError> {
        self.send_message(Message::Notification(notification)).await
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Session {} uptime={} hold_time={}>",
            self.addr,
            format_time_as_elapsed(self.connect_time),
            self.hold_timer,
        )
    }
}
