//! Per message type state machine.
//!
//! Each handler runs with exclusive access to the lease state and either
//! computes a full reply or returns `None`. Options are read before any
//! binding is touched, so a malformed message never mutates the table.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use dhcp_proto::option::code;
use dhcp_proto::{ClientId, DhcpPacket, MessageType};
use tracing::{debug, error, info, warn};

use super::reply::{parameter_request_list, Reply};
use crate::error::{Error, Result};
use crate::lease::{BindingStatus, LeaseState};

/// Outcome of one handler: `None` means no reply is sent
pub type HandlerResult = Result<Option<Reply>>;

fn non_zero(address: Ipv4Addr) -> Option<Ipv4Addr> {
    (!address.is_unspecified()).then_some(address)
}

/// Offer the static address, a live dynamic one or a newly allocated one
pub fn handle_discover(
    state: &mut LeaseState,
    request: &DhcpPacket,
    now: DateTime<Utc>,
) -> HandlerResult {
    let client_id = request.client_id();
    let requested = request.options.get_ipv4(code::REQUESTED_IP_ADDRESS)?;
    let lease_time = state.pool.default_lease_time;
    let pending_time = state.pool.pending_time;

    let static_binding = state
        .bindings
        .find_static(&client_id, now)
        .map(|binding| (binding.address, binding.status));

    let address = match static_binding {
        Some((address, status)) => {
            if !status.is_live() {
                state
                    .bindings
                    .transition(address, BindingStatus::Pending, pending_time, now)?;
            }
            address
        }
        None => match state.allocate(&client_id, requested, now)?.address() {
            Some(address) => address,
            None => {
                warn!("No address left for {}, pool exhausted", client_id);
                return Ok(None);
            }
        },
    };

    info!("Offering {} to {}", address, client_id);
    Ok(Some(Reply::offer(
        address,
        lease_time,
        parameter_request_list(request),
    )))
}

/// Confirm an offer, renew a lease or refuse
pub fn handle_request(
    state: &mut LeaseState,
    request: &DhcpPacket,
    now: DateTime<Utc>,
) -> HandlerResult {
    let client_id = request.client_id();
    let server_id = request.options.get_ipv4(code::SERVER_IDENTIFIER)?;
    let requested = request.options.get_ipv4(code::REQUESTED_IP_ADDRESS)?;

    match server_id {
        Some(server_id) if server_id == state.pool.server_id => {
            let address = requested
                .or_else(|| non_zero(request.ciaddr))
                .ok_or(Error::MissingAddress(MessageType::Request))?;
            confirm_offer(state, request, &client_id, address, now)
        }
        Some(server_id) => {
            if let Some(address) = pending_address(state, &client_id, now) {
                state.bindings.release(address, now)?;
                info!(
                    "{} chose server {}, released offer of {}",
                    client_id, server_id, address
                );
            }
            Ok(None)
        }
        None => match non_zero(request.ciaddr) {
            Some(address) => renew(state, request, &client_id, address, now),
            None => {
                let address = requested.ok_or(Error::MissingAddress(MessageType::Request))?;
                init_reboot(state, request, &client_id, address, now)
            }
        },
    }
}

/// Address of the client's binding if it is still an open offer
fn pending_address(
    state: &mut LeaseState,
    client_id: &ClientId,
    now: DateTime<Utc>,
) -> Option<Ipv4Addr> {
    state
        .bindings
        .find_client(client_id, now)
        .filter(|binding| binding.status == BindingStatus::Pending)
        .map(|binding| binding.address)
}

fn confirm_offer(
    state: &mut LeaseState,
    request: &DhcpPacket,
    client_id: &ClientId,
    address: Ipv4Addr,
    now: DateTime<Utc>,
) -> HandlerResult {
    let lease_time = state.pool.default_lease_time;
    let current = state
        .bindings
        .find_client(client_id, now)
        .map(|binding| (binding.address, binding.status));

    match current {
        // an Associated match is a retransmitted REQUEST
        Some((bound, BindingStatus::Pending | BindingStatus::Associated)) if bound == address => {
            state
                .bindings
                .transition(address, BindingStatus::Associated, lease_time, now)?;
            info!("Acknowledged {} for {}", address, client_id);
            Ok(Some(Reply::ack(
                address,
                lease_time,
                parameter_request_list(request),
            )))
        }
        Some((stray, BindingStatus::Pending)) => {
            state.bindings.release(stray, now)?;
            warn!(
                "{} requested {} but was offered {}, sending NAK",
                client_id, address, stray
            );
            Ok(Some(Reply::nak()))
        }
        _ => {
            warn!("{} requested {} without an offer, sending NAK", client_id, address);
            Ok(Some(Reply::nak()))
        }
    }
}

/// RENEWING or REBINDING: `ciaddr` holds the lease being extended
fn renew(
    state: &mut LeaseState,
    request: &DhcpPacket,
    client_id: &ClientId,
    address: Ipv4Addr,
    now: DateTime<Utc>,
) -> HandlerResult {
    match extend_lease(state, request, client_id, address, now)? {
        Some(ack) => Ok(Some(ack)),
        None => {
            warn!("{} renewing unknown lease on {}, sending NAK", client_id, address);
            Ok(Some(Reply::nak()))
        }
    }
}

/// INIT-REBOOT: the client verifies a remembered address from option 50
///
/// A client the table has never seen may hold a lease from another server,
/// so it gets no answer at all.
fn init_reboot(
    state: &mut LeaseState,
    request: &DhcpPacket,
    client_id: &ClientId,
    address: Ipv4Addr,
    now: DateTime<Utc>,
) -> HandlerResult {
    match extend_lease(state, request, client_id, address, now)? {
        Some(ack) => Ok(Some(ack)),
        None => {
            debug!("{} asked for {}, not ours to answer", client_id, address);
            Ok(None)
        }
    }
}

/// ACK for an Associated binding on `address`, NAK for any other binding
/// of the client, `None` when the client has no binding
fn extend_lease(
    state: &mut LeaseState,
    request: &DhcpPacket,
    client_id: &ClientId,
    address: Ipv4Addr,
    now: DateTime<Utc>,
) -> HandlerResult {
    let lease_time = state.pool.default_lease_time;
    let current = state
        .bindings
        .find_client(client_id, now)
        .map(|binding| (binding.address, binding.status));

    match current {
        None => Ok(None),
        Some((bound, BindingStatus::Associated)) if bound == address => {
            state
                .bindings
                .transition(address, BindingStatus::Associated, lease_time, now)?;
            info!("Renewed {} for {}", address, client_id);
            Ok(Some(Reply::ack(
                address,
                lease_time,
                parameter_request_list(request),
            )))
        }
        Some((bound, status)) => {
            warn!(
                "{} asked to keep {} but holds {} ({:?}), sending NAK",
                client_id, address, bound, status
            );
            Ok(Some(Reply::nak()))
        }
    }
}

/// Quarantine an address the client found in use
pub fn handle_decline(
    state: &mut LeaseState,
    request: &DhcpPacket,
    now: DateTime<Utc>,
) -> HandlerResult {
    let client_id = request.client_id();
    let server_id = request.options.get_ipv4(code::SERVER_IDENTIFIER)?;
    let address = request
        .options
        .get_ipv4(code::REQUESTED_IP_ADDRESS)?
        .ok_or(Error::MissingAddress(MessageType::Decline))?;

    if server_id.is_some_and(|id| id != state.pool.server_id) {
        debug!("DECLINE from {} addressed to another server", client_id);
        return Ok(None);
    }

    let held = state
        .bindings
        .find_client(&client_id, now)
        .filter(|binding| binding.address == address && binding.status.is_live())
        .map(|binding| binding.is_static);
    match held {
        None => {
            warn!("{} declined {} which it does not hold", client_id, address);
            return Ok(None);
        }
        // static addresses are never quarantined
        Some(true) => {
            error!(
                "{} declined its static address {}: address in use on the network",
                client_id, address
            );
            return Ok(None);
        }
        Some(false) => {}
    }

    let quarantine = state.pool.decline_quarantine_time;
    state.bindings.decline(address, quarantine, now)?;
    error!(
        "{} declined {}: address in use on the network, quarantined for {}s",
        client_id, address, quarantine
    );
    Ok(None)
}

/// Give an associated address back to the pool
pub fn handle_release(
    state: &mut LeaseState,
    request: &DhcpPacket,
    now: DateTime<Utc>,
) -> HandlerResult {
    let client_id = request.client_id();

    let bound = state
        .bindings
        .find_client(&client_id, now)
        .filter(|binding| binding.status == BindingStatus::Associated)
        .map(|binding| binding.address);

    match bound {
        Some(address) if request.ciaddr.is_unspecified() || request.ciaddr == address => {
            state.bindings.release(address, now)?;
            info!("{} released {}", client_id, address);
        }
        Some(address) => warn!(
            "{} released {} but holds {}, ignoring",
            client_id, request.ciaddr, address
        ),
        None => debug!("RELEASE from {} without an associated lease", client_id),
    }
    Ok(None)
}

/// Configuration only ACK; no address, no binding change
pub fn handle_inform(state: &LeaseState, request: &DhcpPacket) -> HandlerResult {
    let requested = parameter_request_list(request);
    debug!(
        "Answering INFORM from {} with {} of {} requested option(s)",
        request.client_id(),
        requested
            .iter()
            .filter(|&&option_code| state.pool.options.contains(option_code))
            .count(),
        requested.len()
    );
    Ok(Some(Reply::inform_ack(requested)))
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use dhcp_proto::DhcpOption;

    use super::*;
    use crate::config::StaticBinding;
    use crate::dhcp::test_helpers::*;
    use crate::lease::{AddressPool, BindingFlags};

    fn secs(n: i64) -> TimeDelta {
        TimeDelta::seconds(n)
    }

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn status_of(state: &mut LeaseState, address: Ipv4Addr, now: DateTime<Utc>) -> BindingStatus {
        state.bindings.find_by_address(address, now).unwrap().status
    }

    /// DISCOVER then REQUEST for the offered address
    fn bind(state: &mut LeaseState, mac: &str, now: DateTime<Utc>) -> Ipv4Addr {
        let offer = handle_discover(state, &discover_packet(mac), now).unwrap().unwrap();
        let address = offer.address.unwrap();
        let ack = handle_request(state, &request_packet(mac, Some(address), Some(SERVER_ID)), now)
            .unwrap()
            .unwrap();
        assert_eq!(ack.message_type, MessageType::Ack);
        address
    }

    #[test]
    fn test_discover_request_ack() {
        let mut state = create_test_state();

        let offer = handle_discover(&mut state, &discover_packet(MAC), t0())
            .unwrap()
            .unwrap();
        assert_eq!(offer.message_type, MessageType::Offer);
        assert_eq!(offer.address, Some(addr(10)));
        assert_eq!(status_of(&mut state, addr(10), t0()), BindingStatus::Pending);

        let request = request_packet(MAC, Some(addr(10)), Some(SERVER_ID));
        let ack = handle_request(&mut state, &request, t0() + secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(ack.message_type, MessageType::Ack);
        assert_eq!(ack.address, Some(addr(10)));
        assert_eq!(ack.lease_time, Some(3600));

        let binding = state.bindings.find_by_address(addr(10), t0() + secs(1)).unwrap();
        assert_eq!(binding.status, BindingStatus::Associated);
        assert_eq!(binding.lease_time, 3600);
    }

    #[test]
    fn test_repeated_discover_keeps_offer() {
        let mut state = create_test_state();
        let first = handle_discover(&mut state, &discover_packet(MAC), t0()).unwrap().unwrap();
        let second = handle_discover(&mut state, &discover_packet(MAC), t0() + secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(first.address, second.address);
        assert_eq!(state.bindings.len(), 1);
    }

    #[test]
    fn test_offer_carries_requested_options() {
        let mut state = create_test_state();
        let mut discover = discover_packet(MAC);
        discover
            .options
            .set(&DhcpOption::ParameterRequestList(vec![1, 3, 6, 42]))
            .unwrap();

        let offer = handle_discover(&mut state, &discover, t0()).unwrap().unwrap();
        assert_eq!(offer.requested, vec![1, 3, 6, 42]);

        let bytes = offer
            .encode(&discover, SERVER_ID, &state.pool.options, 548)
            .unwrap();
        let parsed = DhcpPacket::parse(&bytes).unwrap();
        let codes: Vec<u8> = parsed.options.iter().map(|(c, _)| c).skip(5).collect();
        assert_eq!(codes, vec![1, 3, 6]);
    }

    #[test]
    fn test_request_for_unoffered_address_naks_and_releases_stray() {
        let mut state = create_test_state();
        handle_discover(&mut state, &discover_packet(MAC), t0()).unwrap();

        let request = request_packet(MAC, Some(addr(15)), Some(SERVER_ID));
        let reply = handle_request(&mut state, &request, t0()).unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Nak);
        assert_eq!(status_of(&mut state, addr(10), t0()), BindingStatus::Released);
    }

    #[test]
    fn test_request_without_offer_naks() {
        let mut state = create_test_state();
        let request = request_packet(MAC, Some(addr(10)), Some(SERVER_ID));
        let reply = handle_request(&mut state, &request, t0()).unwrap().unwrap();
        assert_eq!(reply, Reply::nak());
        assert!(state.bindings.is_empty());
    }

    #[test]
    fn test_request_for_other_server_releases_offer() {
        let mut state = create_test_state();
        handle_discover(&mut state, &discover_packet(MAC), t0()).unwrap();

        let request = request_packet(MAC, Some(addr(10)), Some(Ipv4Addr::new(10, 0, 0, 254)));
        assert_eq!(handle_request(&mut state, &request, t0()).unwrap(), None);
        assert_eq!(status_of(&mut state, addr(10), t0()), BindingStatus::Released);
    }

    #[test]
    fn test_request_after_offer_expired_naks() {
        let mut state = create_test_state();
        handle_discover(&mut state, &discover_packet(MAC), t0()).unwrap();

        let request = request_packet(MAC, Some(addr(10)), Some(SERVER_ID));
        let reply = handle_request(&mut state, &request, t0() + secs(60)).unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Nak);
        assert_eq!(status_of(&mut state, addr(10), t0() + secs(60)), BindingStatus::Expired);
    }

    #[test]
    fn test_renewal() {
        let mut state = create_test_state();
        let address = bind(&mut state, MAC, t0());

        let mut renew = request_packet(MAC, None, None);
        renew.ciaddr = address;
        let later = t0() + secs(1800);
        let reply = handle_request(&mut state, &renew, later).unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Ack);

        let binding = state.bindings.find_by_address(address, later).unwrap();
        assert_eq!(binding.assoc_time, later);
        assert_eq!(binding.status, BindingStatus::Associated);
    }

    #[test]
    fn test_renewal_of_wrong_address_naks() {
        let mut state = create_test_state();
        bind(&mut state, MAC, t0());

        let mut renew = request_packet(MAC, None, None);
        renew.ciaddr = addr(19);
        let reply = handle_request(&mut state, &renew, t0()).unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Nak);
    }

    #[test]
    fn test_renewal_after_expiry_naks() {
        let mut state = create_test_state();
        let address = bind(&mut state, MAC, t0());

        let mut renew = request_packet(MAC, None, None);
        renew.ciaddr = address;
        let reply = handle_request(&mut state, &renew, t0() + secs(3600)).unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Nak);
    }

    #[test]
    fn test_init_reboot_unknown_client_is_silent() {
        let mut state = create_test_state();
        let request = request_packet(MAC, Some(addr(12)), None);
        assert_eq!(handle_request(&mut state, &request, t0()).unwrap(), None);
        assert!(state.bindings.is_empty());
    }

    #[test]
    fn test_renewing_unknown_client_naks() {
        let mut state = create_test_state();
        let mut renew = request_packet(MAC, None, None);
        renew.ciaddr = addr(12);
        let reply = handle_request(&mut state, &renew, t0()).unwrap();
        assert_eq!(reply, Some(Reply::nak()));
        assert!(state.bindings.is_empty());
    }

    #[test]
    fn test_init_reboot_known_client() {
        let mut state = create_test_state();
        let address = bind(&mut state, MAC, t0());

        let reboot = request_packet(MAC, Some(address), None);
        let reply = handle_request(&mut state, &reboot, t0() + secs(10)).unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Ack);

        let moved = request_packet(MAC, Some(addr(19)), None);
        let reply = handle_request(&mut state, &moved, t0() + secs(20)).unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Nak);
    }

    #[test]
    fn test_request_without_any_address_is_dropped() {
        let mut state = create_test_state();
        let request = request_packet(MAC, None, Some(SERVER_ID));
        assert!(matches!(
            handle_request(&mut state, &request, t0()),
            Err(Error::MissingAddress(MessageType::Request))
        ));
    }

    #[test]
    fn test_malformed_server_id_does_not_mutate() {
        let mut state = create_test_state();
        handle_discover(&mut state, &discover_packet(MAC), t0()).unwrap();

        let mut request = request_packet(MAC, Some(addr(10)), None);
        request
            .options
            .insert(code::SERVER_IDENTIFIER, vec![10, 0, 0])
            .unwrap();
        assert!(matches!(
            handle_request(&mut state, &request, t0()),
            Err(Error::Option(_))
        ));
        assert_eq!(status_of(&mut state, addr(10), t0()), BindingStatus::Pending);
    }

    #[test]
    fn test_pool_exhausted_no_reply() {
        let mut config = create_test_config();
        config.dhcp.pool.last = addr(10);
        let mut state = LeaseState::from_config(&config, t0()).unwrap();

        bind(&mut state, MAC, t0());
        let reply = handle_discover(&mut state, &discover_packet(OTHER_MAC), t0()).unwrap();
        assert_eq!(reply, None);
        assert_eq!(state.bindings.len(), 1);
    }

    #[test]
    fn test_decline_quarantines_address() {
        let mut state = create_test_state();
        let address = bind(&mut state, MAC, t0());

        let reply = handle_decline(&mut state, &decline_packet(MAC, address), t0()).unwrap();
        assert_eq!(reply, None);

        let binding = state.bindings.find_by_address(address, t0()).unwrap();
        assert_eq!(binding.status, BindingStatus::Released);
        assert_eq!(binding.lease_time, 600);
        assert!(binding.flags.contains(BindingFlags::DECLINED));

        let other = client_id(OTHER_MAC);
        let during = t0() + secs(599);
        let allocation = state.allocate(&other, Some(address), during).unwrap();
        assert_ne!(allocation.address(), Some(address));

        let after = t0() + secs(600);
        let third = ClientId::new(vec![0x02, 0, 0, 0, 0, 3]);
        let allocation = state.allocate(&third, Some(address), after).unwrap();
        assert_eq!(allocation.address(), Some(address));
    }

    #[test]
    fn test_decline_of_unowned_address_ignored() {
        let mut state = create_test_state();
        bind(&mut state, MAC, t0());

        handle_decline(&mut state, &decline_packet(OTHER_MAC, addr(10)), t0()).unwrap();
        assert_eq!(status_of(&mut state, addr(10), t0()), BindingStatus::Associated);
    }

    #[test]
    fn test_release() {
        let mut state = create_test_state();
        let address = bind(&mut state, MAC, t0());

        let reply = handle_release(&mut state, &release_packet(MAC, address), t0()).unwrap();
        assert_eq!(reply, None);
        assert_eq!(status_of(&mut state, address, t0()), BindingStatus::Released);

        let other = handle_discover(&mut state, &discover_packet(OTHER_MAC), t0())
            .unwrap()
            .unwrap();
        assert_eq!(other.address, Some(addr(11)));
    }

    #[test]
    fn test_release_with_wrong_ciaddr_ignored() {
        let mut state = create_test_state();
        let address = bind(&mut state, MAC, t0());

        handle_release(&mut state, &release_packet(MAC, addr(19)), t0()).unwrap();
        assert_eq!(status_of(&mut state, address, t0()), BindingStatus::Associated);
    }

    #[test]
    fn test_inform_does_not_touch_bindings() {
        let mut state = create_test_state();
        let mut inform = inform_packet(MAC);
        inform
            .options
            .set(&DhcpOption::ParameterRequestList(vec![6, 1]))
            .unwrap();

        let reply = handle_inform(&state, &inform).unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::Ack);
        assert_eq!(reply.address, None);
        assert_eq!(reply.lease_time, None);
        assert_eq!(reply.requested, vec![6, 1]);

        let bytes = reply
            .encode(&inform, SERVER_ID, &state.pool.options, 548)
            .unwrap();
        let parsed = DhcpPacket::parse(&bytes).unwrap();
        let codes: Vec<u8> = parsed.options.iter().map(|(c, _)| c).collect();
        assert_eq!(codes, vec![53, 54, 6, 1]);
        assert!(state.bindings.is_empty());
    }

    fn state_with_static() -> LeaseState {
        let mut config = create_test_config();
        config.dhcp.static_bindings.push(StaticBinding {
            client_id: MAC.to_string(),
            address: addr(5),
        });
        LeaseState::from_config(&config, t0()).unwrap()
    }

    #[test]
    fn test_static_binding_offered() {
        let mut state = state_with_static();
        let offer = handle_discover(&mut state, &discover_packet(MAC), t0())
            .unwrap()
            .unwrap();
        assert_eq!(offer.address, Some(addr(5)));

        let binding = state.bindings.find_by_address(addr(5), t0()).unwrap();
        assert_eq!(binding.status, BindingStatus::Pending);
        assert_eq!(binding.lease_time, 60);
        assert!(binding.is_static);
    }

    #[test]
    fn test_static_binding_after_lapse() {
        let mut state = state_with_static();
        let address = bind(&mut state, MAC, t0());
        assert_eq!(address, addr(5));

        let later = t0() + secs(7200);
        assert_eq!(status_of(&mut state, addr(5), later), BindingStatus::Free);

        let offer = handle_discover(&mut state, &discover_packet(MAC), later)
            .unwrap()
            .unwrap();
        assert_eq!(offer.address, Some(addr(5)));
        let binding = state.bindings.find_by_address(addr(5), later).unwrap();
        assert_eq!(binding.status, BindingStatus::Pending);
        assert_eq!(binding.lease_time, 60);
    }

    #[test]
    fn test_static_binding_decline_not_quarantined() {
        let mut state = state_with_static();
        let address = bind(&mut state, MAC, t0());

        handle_decline(&mut state, &decline_packet(MAC, address), t0()).unwrap();
        let binding = state.bindings.find_by_address(address, t0()).unwrap();
        assert_eq!(binding.status, BindingStatus::Associated);
        assert!(!binding.flags.contains(BindingFlags::DECLINED));

        let offer = handle_discover(&mut state, &discover_packet(MAC), t0() + secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(offer.address, Some(addr(5)));
    }

    #[test]
    fn test_static_address_never_given_away() {
        let mut state = LeaseState::new(AddressPool::new(addr(5), addr(5), SERVER_ID));
        state.add_static(client_id(MAC), addr(5), t0()).unwrap();
        let reply = handle_discover(&mut state, &discover_packet(OTHER_MAC), t0()).unwrap();
        assert_eq!(reply, None);
    }

    #[test]
    fn test_client_identifier_option_keys_binding() {
        let mut state = create_test_state();
        let mut discover = discover_packet(MAC);
        discover
            .options
            .set(&DhcpOption::ClientIdentifier(b"host-a".to_vec()))
            .unwrap();
        handle_discover(&mut state, &discover, t0()).unwrap();

        let id = ClientId::new(b"host-a".to_vec());
        assert!(state.bindings.find_dynamic(&id, t0()).is_some());
        assert!(state.bindings.find_dynamic(&client_id(MAC), t0()).is_none());
    }
}
