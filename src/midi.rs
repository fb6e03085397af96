//! Translates raw sequencer events into `SeqEvent`s and sorts them into the
//! few kinds the bridge acts on.

use alsa::seq::{Addr, Connect, EvNote, Event, EventType};
use std::fmt;

/// A `client:port` pair in the sequencer fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub client: i32,
    pub port: i32,
}

impl Address {
    /// The kernel's announcement port (client 0, port 1).
    pub const SYSTEM_ANNOUNCE: Address = Address { client: 0, port: 1 };

    pub const fn new(client: i32, port: i32) -> Self {
        Self { client, port }
    }
}

impl From<Addr> for Address {
    fn from(a: Addr) -> Self {
        Self::new(a.client, a.port)
    }
}

impl From<Address> for Addr {
    fn from(a: Address) -> Self {
        Addr {
            client: a.client,
            port: a.port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ClientStart(i32),
    ClientExit(i32),
    ClientChange(i32),
    PortStart(Address),
    PortExit(Address),
    PortChange(Address),
    PortSubscribed { sender: Address, dest: Address },
    PortUnsubscribed { sender: Address, dest: Address },
    Other,
}

/// One event read off the sequencer, owned so it outlives the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqEvent {
    pub source: Address,
    pub body: Body,
}

/// What the dispatcher does with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    NoteOn(u8),
    NoteOff(u8),
    ClientAppeared,
    EndpointAppeared,
    Other,
}

impl SeqEvent {
    pub fn new(source: Address, body: Body) -> Self {
        Self { source, body }
    }

    /// Whether the event has a verbose log line; unrecognised types stay quiet.
    pub fn is_reported(&self) -> bool {
        self.body != Body::Other
    }

    /// A note-on with velocity 0 is a release and classifies as `NoteOff`.
    pub fn kind(&self) -> Kind {
        match self.body {
            Body::NoteOn { note, velocity, .. } if velocity > 0 => Kind::NoteOn(note),
            Body::NoteOn { note, .. } | Body::NoteOff { note, .. } => Kind::NoteOff(note),
            Body::ClientStart(_) => Kind::ClientAppeared,
            Body::PortStart(_) => Kind::EndpointAppeared,
            _ => Kind::Other,
        }
    }
}

impl fmt::Display for SeqEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:3}:{:<3} ", self.source.client, self.source.port)?;
        match self.body {
            Body::NoteOn {
                channel,
                note,
                velocity,
            } if velocity > 0 => write!(
                f,
                "Note on                {channel:2}, note {note}, velocity {velocity}"
            ),
            Body::NoteOn { channel, note, .. } => {
                write!(f, "Note off               {channel:2}, note {note}")
            }
            Body::NoteOff {
                channel,
                note,
                velocity,
            } => write!(
                f,
                "Note off               {channel:2}, note {note}, velocity {velocity}"
            ),
            Body::ClientStart(c) => write!(f, "Client start               client {c}"),
            Body::ClientExit(c) => write!(f, "Client exit                client {c}"),
            Body::ClientChange(c) => write!(f, "Client changed             client {c}"),
            Body::PortStart(a) => write!(f, "Port start                 {a}"),
            Body::PortExit(a) => write!(f, "Port exit                  {a}"),
            Body::PortChange(a) => write!(f, "Port changed               {a}"),
            Body::PortSubscribed { sender, dest } => {
                write!(f, "Port subscribed            {sender} -> {dest}")
            }
            Body::PortUnsubscribed { sender, dest } => {
                write!(f, "Port unsubscribed          {sender} -> {dest}")
            }
            Body::Other => write!(f, "Other"),
        }
    }
}

// ─────────────────── decoding ────────────────────────────────────────────────

pub fn decode(ev: &Event<'_>) -> SeqEvent {
    let source = Address::from(ev.get_source());
    let note = |on: bool| {
        ev.get_data::<EvNote>().map(|n| {
            let (channel, note, velocity) = (n.channel, n.note, n.velocity);
            if on {
                Body::NoteOn {
                    channel,
                    note,
                    velocity,
                }
            } else {
                Body::NoteOff {
                    channel,
                    note,
                    velocity,
                }
            }
        })
    };
    let addr = || ev.get_data::<Addr>().map(Address::from);
    let connect = || {
        ev.get_data::<Connect>()
            .map(|c| (Address::from(c.sender), Address::from(c.dest)))
    };

    let body = match ev.get_type() {
        EventType::Noteon => note(true),
        EventType::Noteoff => note(false),
        EventType::ClientStart => addr().map(|a| Body::ClientStart(a.client)),
        EventType::ClientExit => addr().map(|a| Body::ClientExit(a.client)),
        EventType::ClientChange => addr().map(|a| Body::ClientChange(a.client)),
        EventType::PortStart => addr().map(Body::PortStart),
        EventType::PortExit => addr().map(Body::PortExit),
        EventType::PortChange => addr().map(Body::PortChange),
        EventType::PortSubscribed => {
            connect().map(|(sender, dest)| Body::PortSubscribed { sender, dest })
        }
        EventType::PortUnsubscribed => {
            connect().map(|(sender, dest)| Body::PortUnsubscribed { sender, dest })
        }
        _ => None,
    };

    SeqEvent::new(source, body.unwrap_or(Body::Other))
}
