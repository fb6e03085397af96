//! Watches the system announcement port and keeps trying to subscribe to the
//! configured source as clients and ports come and go.

use crate::error::{Error, Result};
use crate::midi::{Address, Body, Kind, SeqEvent};
use crate::seq_boot::{ClientEntry, Sequencer};
use std::fmt;

pub const DEFAULT_PORTSPEC: &str = "rtpmidi:0";

/// A `client:port` reference, kept as text and parsed on every attempt since
/// a named client may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec(String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClientRef {
    Id(i32),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    client: ClientRef,
    port: i32,
}

impl PortSpec {
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parse(&self) -> Result<Target> {
        let invalid = || Error::InvalidSpec(self.0.clone());
        let spec = self.0.as_str();

        let (client, port) = match spec.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let body = &spec[1..];
                match body.find(q) {
                    Some(end) => {
                        let rest = &body[end + 1..];
                        let port = match rest.chars().next() {
                            None => None,
                            Some(':' | '.') => Some(&rest[1..]),
                            Some(_) => return Err(invalid()),
                        };
                        (&body[..end], port)
                    }
                    None => (body, None),
                }
            }
            _ => match spec.find([':', '.']) {
                Some(sep) => (&spec[..sep], Some(&spec[sep + 1..])),
                None => (spec, None),
            },
        };

        if client.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            None => 0,
            Some(p) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
                p.parse().map_err(|_| invalid())?
            }
            Some(_) => return Err(invalid()),
        };
        let client = match client.parse::<i32>() {
            Ok(id) => ClientRef::Id(id),
            Err(_) => ClientRef::Name(client.to_owned()),
        };
        Ok(Target { client, port })
    }

    /// Resolves against the live client list: a numeric client is taken as
    /// is, a name matches exactly or else as a prefix of the first client.
    fn resolve(&self, clients: &[ClientEntry]) -> Result<Address> {
        let target = self.parse()?;
        let client = match &target.client {
            ClientRef::Id(id) => *id,
            ClientRef::Name(name) => clients
                .iter()
                .find(|c| c.name == *name)
                .or_else(|| clients.iter().find(|c| c.name.starts_with(name.as_str())))
                .map(|c| c.id)
                .ok_or_else(|| Error::ClientNotFound(name.clone()))?,
        };
        Ok(Address::new(client, target.port))
    }
}

impl Default for PortSpec {
    fn default() -> Self {
        Self::new(DEFAULT_PORTSPEC)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────── resolver ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribed(Address),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Connected(Address),
    /// The source is not resolvable right now; try again on the next change.
    NotFound,
    /// The client list could not be read.
    TransportError,
}

pub struct Resolver {
    spec: PortSpec,
    state: SubscriptionState,
}

impl Resolver {
    pub fn new(spec: PortSpec) -> Self {
        Self {
            spec,
            state: SubscriptionState::Unsubscribed,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// One resolve-and-subscribe attempt. Never fatal.
    pub fn try_connect<S: Sequencer>(&mut self, seq: &mut S) -> Outcome {
        let spec = &self.spec;
        let clients = match seq.clients() {
            Ok(c) => c,
            Err(e) => {
                log::debug!("listing sequencer clients for '{spec}' failed: {e}");
                return Outcome::TransportError;
            }
        };

        let addr = match spec.resolve(&clients) {
            Ok(a) => a,
            Err(e) => {
                log::info!("parsing portspec '{spec}' failed, ignoring");
                log::debug!("{e}");
                return Outcome::NotFound;
            }
        };

        if let Err(e) = seq.subscribe_from(addr) {
            if self.state == SubscriptionState::Subscribed(addr) {
                log::debug!("already subscribed to '{spec}' ({addr}): {e}");
            } else {
                log::info!("connecting from '{spec}' failed, ignoring");
                log::debug!("{e}");
            }
            return Outcome::NotFound;
        }

        log::info!("🎹 Connection from '{spec}' ({addr}) succeeded");
        self.state = SubscriptionState::Subscribed(addr);
        Outcome::Connected(addr)
    }

    /// Notices when the subscribed source goes away.
    pub fn observe(&mut self, ev: &SeqEvent, local: Address) {
        let SubscriptionState::Subscribed(addr) = self.state else {
            return;
        };
        let gone = match ev.body {
            Body::ClientExit(client) => client == addr.client,
            Body::PortExit(port) => port == addr,
            Body::PortUnsubscribed { sender, dest } => sender == addr && dest == local,
            _ => false,
        };
        if gone {
            log::info!("🎹 Source '{}' ({addr}) went away", self.spec);
            self.state = SubscriptionState::Unsubscribed;
        }
    }
}

// ─────────────────── topology watcher ────────────────────────────────────────

/// Proof that our port receives the kernel's client and port announcements.
pub struct TopologyWatcher {
    _private: (),
}

impl TopologyWatcher {
    pub fn watch<S: Sequencer>(seq: &mut S) -> Result<Self> {
        seq.subscribe_from(Address::SYSTEM_ANNOUNCE)?;
        log::debug!("subscribed to system announcements");
        Ok(Self { _private: () })
    }

    /// Whether an event might have made the configured source resolvable.
    pub fn wants_retry(&self, kind: Kind) -> bool {
        matches!(kind, Kind::ClientAppeared | Kind::EndpointAppeared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq_boot::fake::FakeSequencer;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn clients(list: &[(i32, &str)]) -> Vec<ClientEntry> {
        list.iter()
            .map(|&(id, name)| ClientEntry {
                id,
                name: name.into(),
            })
            .collect()
    }

    fn target(spec: &str) -> Option<Target> {
        PortSpec::new(spec).parse().ok()
    }

    #[test]
    fn specifier_grammar() {
        let named = |n: &str, port| Target {
            client: ClientRef::Name(n.into()),
            port,
        };
        assert_eq!(target("rtpmidi:0"), Some(named("rtpmidi", 0)));
        assert_eq!(target("rtpmidi.2"), Some(named("rtpmidi", 2)));
        assert_eq!(target("rtpmidi"), Some(named("rtpmidi", 0)));
        assert_eq!(target("\"Midi Through\":1"), Some(named("Midi Through", 1)));
        assert_eq!(target("'a:b'"), Some(named("a:b", 0)));
        assert_eq!(
            target("20:1"),
            Some(Target {
                client: ClientRef::Id(20),
                port: 1
            })
        );

        for bad in ["", ":0", "rtpmidi:", "rtpmidi:-1", "rtpmidi:x", "\"a\"b", "''"] {
            assert_eq!(target(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn exact_name_beats_prefix() {
        let list = clients(&[(0, "System"), (129, "rtpmidi-extra"), (130, "rtpmidi")]);
        let spec = PortSpec::default();
        assert_eq!(spec.resolve(&list).unwrap(), Address::new(130, 0));

        let list = clients(&[(129, "rtpmidi-extra"), (131, "rtpmidi-other")]);
        assert_eq!(spec.resolve(&list).unwrap(), Address::new(129, 0));

        assert!(matches!(
            spec.resolve(&clients(&[(0, "System")])),
            Err(Error::ClientNotFound(_))
        ));
    }

    #[test]
    fn numeric_client_skips_the_catalog() {
        assert_eq!(
            PortSpec::new("24:3").resolve(&[]).unwrap(),
            Address::new(24, 3)
        );
    }

    #[test]
    fn connects_once_the_client_exists() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut seq = FakeSequencer::new(&stop, vec![]);
        let mut resolver = Resolver::new(PortSpec::default());

        assert_eq!(resolver.try_connect(&mut seq), Outcome::NotFound);
        assert_eq!(resolver.state(), SubscriptionState::Unsubscribed);

        seq = seq.with_client(130, "rtpmidi");
        let addr = Address::new(130, 0);
        assert_eq!(resolver.try_connect(&mut seq), Outcome::Connected(addr));
        assert_eq!(resolver.state(), SubscriptionState::Subscribed(addr));

        // a second attempt is refused by the sequencer and changes nothing
        assert_eq!(resolver.try_connect(&mut seq), Outcome::NotFound);
        assert_eq!(resolver.state(), SubscriptionState::Subscribed(addr));
        assert_eq!(seq.subscriptions, vec![addr]);
    }

    #[test]
    fn tracks_the_source_going_away() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut seq = FakeSequencer::new(&stop, vec![]).with_client(130, "rtpmidi");
        let local = seq.local;
        let mut resolver = Resolver::new(PortSpec::default());
        resolver.try_connect(&mut seq);

        let sys = Address::SYSTEM_ANNOUNCE;
        resolver.observe(&SeqEvent::new(sys, Body::ClientExit(131)), local);
        assert!(matches!(resolver.state(), SubscriptionState::Subscribed(_)));

        resolver.observe(
            &SeqEvent::new(sys, Body::PortExit(Address::new(130, 0))),
            local,
        );
        assert_eq!(resolver.state(), SubscriptionState::Unsubscribed);
    }

    #[test]
    fn watcher_subscribes_to_announcements() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut seq = FakeSequencer::new(&stop, vec![]);
        let watcher = TopologyWatcher::watch(&mut seq).unwrap();
        assert_eq!(seq.subscriptions, vec![Address::SYSTEM_ANNOUNCE]);

        assert!(watcher.wants_retry(Kind::ClientAppeared));
        assert!(watcher.wants_retry(Kind::EndpointAppeared));
        assert!(!watcher.wants_retry(Kind::NoteOn(60)));
        assert!(!watcher.wants_retry(Kind::Other));
    }

    #[test]
    fn client_exit_and_unsubscribe_drop_the_subscription() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut seq = FakeSequencer::new(&stop, vec![]).with_client(130, "rtpmidi");
        let local = seq.local;
        let addr = Address::new(130, 0);
        let sys = Address::SYSTEM_ANNOUNCE;
        let mut resolver = Resolver::new(PortSpec::default());

        resolver.try_connect(&mut seq);
        resolver.observe(&SeqEvent::new(sys, Body::ClientExit(130)), local);
        assert_eq!(resolver.state(), SubscriptionState::Unsubscribed);

        seq.subscriptions.clear();
        resolver.try_connect(&mut seq);
        let elsewhere = Address::new(129, 0);
        resolver.observe(
            &SeqEvent::new(
                sys,
                Body::PortUnsubscribed {
                    sender: addr,
                    dest: elsewhere,
                },
            ),
            local,
        );
        assert_eq!(resolver.state(), SubscriptionState::Subscribed(addr));

        resolver.observe(
            &SeqEvent::new(
                sys,
                Body::PortUnsubscribed {
                    sender: addr,
                    dest: local,
                },
            ),
            local,
        );
        assert_eq!(resolver.state(), SubscriptionState::Unsubscribed);
    }

    #[test]
    fn unreadable_client_list_is_a_transport_error() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut seq = FakeSequencer::new(&stop, vec![]).with_client(130, "rtpmidi");
        seq.clients_fail_for = 1;
        let mut resolver = Resolver::new(PortSpec::default());

        assert_eq!(resolver.try_connect(&mut seq), Outcome::TransportError);
        assert!(seq.subscriptions.is_empty());
        assert_eq!(
            resolver.try_connect(&mut seq),
            Outcome::Connected(Address::new(130, 0))
        );
    }
}
