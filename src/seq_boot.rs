//! Brings up our ALSA sequencer client and exposes the handful of
//! operations the bridge needs from it.

use crate::error::{Error, Result};
use crate::midi::{self, Address, SeqEvent};
use alsa::seq::{ClientIter, PortCap, PortSubscribe, PortType, Seq};
use alsa::{Direction, PollDescriptors};
use std::ffi::CStr;
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

/// Name of our client and of its single port, as listed by `aconnect -l`.
pub const CLIENT_NAME: &CStr = c"midi2gpio";

/// Why a blocking wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Ready,
    /// A signal arrived before any event did.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntry {
    pub id: i32,
    pub name: String,
}

/// The event transport as seen by the resolver and the dispatcher.
pub trait Sequencer {
    /// Our own client and port. Fixed for the life of the connection.
    fn local(&self) -> Address;

    /// Snapshot of the clients currently registered with the sequencer.
    fn clients(&mut self) -> Result<Vec<ClientEntry>>;

    /// Routes events emitted by `sender` into our port.
    fn subscribe_from(&mut self, sender: Address) -> Result<()>;

    /// Blocks, without timeout, until input may be read.
    fn wait(&mut self) -> Result<Wake>;

    /// Appends every event currently queued to `out`.
    fn drain(&mut self, out: &mut Vec<SeqEvent>) -> Result<()>;
}

// ─────────────────── signal wakeup ───────────────────────────────────────────

/// Self-pipe written by the signal handler. Polled next to the sequencer so a
/// signal that lands after the stop flag was checked, but before `poll` is
/// entered, still ends the wait.
pub struct Wakeup {
    read: UnixStream,
    write: UnixStream,
}

impl Wakeup {
    pub fn new() -> io::Result<Self> {
        let (read, write) = UnixStream::pair()?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;
        Ok(Self { read, write })
    }

    /// Makes `signal` write a byte into the pipe. Register the stop flag for
    /// the same signal first so it is already set when the pipe wakes us.
    pub fn register(&self, signal: libc::c_int) -> io::Result<()> {
        signal_hook::low_level::pipe::register(signal, self.write.try_clone()?)?;
        Ok(())
    }

    fn pollfd(&self) -> libc::pollfd {
        libc::pollfd {
            fd: self.read.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }
    }

    /// Empties the pipe; true if anything was pending.
    fn drain(&self) -> bool {
        let mut buf = [0u8; 32];
        let mut pending = false;
        loop {
            match (&self.read).read(&mut buf) {
                Ok(0) | Err(_) => return pending,
                Ok(_) => pending = true,
            }
        }
    }
}

/// Blocks on `fds` with no timeout. When `wakeup` is given its descriptor is
/// the last entry of `fds`.
fn poll_forever(fds: &mut [libc::pollfd], wakeup: Option<&Wakeup>) -> Result<Wake> {
    for fd in fds.iter_mut() {
        fd.revents = 0;
    }
    // `alsa::poll::poll` hands errno back negated, which hides EINTR, so
    // `poll(2)` is called directly.
    // SAFETY: `fds` is an initialised, exclusively borrowed pollfd array of
    // the length passed alongside it.
    let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        return if err.kind() == io::ErrorKind::Interrupted {
            Ok(Wake::Interrupted)
        } else {
            Err(err.into())
        };
    }

    if let (Some(wakeup), Some((wake_fd, seq_fds))) = (wakeup, fds.split_last()) {
        if wake_fd.revents != 0 {
            wakeup.drain();
            if seq_fds.iter().all(|fd| fd.revents == 0) {
                return Ok(Wake::Interrupted);
            }
        }
    }
    Ok(Wake::Ready)
}

/// Pulls events from `read` until the queue is empty. An overrun is logged
/// and reading carries on.
fn drain_input<F>(mut read: F, out: &mut Vec<SeqEvent>) -> Result<()>
where
    F: FnMut() -> alsa::Result<SeqEvent>,
{
    loop {
        match read() {
            Ok(ev) => out.push(ev),
            Err(e) if e.errno() == libc::EAGAIN => return Ok(()),
            Err(e) if e.errno() == libc::ENOSPC => {
                log::warn!("sequencer input queue overran, events were lost");
            }
            Err(source) => {
                return Err(Error::Alsa {
                    op: "snd_seq_event_input",
                    source,
                });
            }
        }
    }
}

// ─────────────────── ALSA backend ────────────────────────────────────────────

pub struct AlsaSequencer {
    seq: Seq,
    local: Address,
    fds: Vec<libc::pollfd>,
    wakeup: Option<Wakeup>,
}

impl AlsaSequencer {
    /// Opens a non-blocking duplex client and creates our port on it.
    pub fn open() -> Result<Self> {
        let seq = Seq::open(None, None, true).map_err(Error::alsa("snd_seq_open"))?;
        seq.set_client_name(CLIENT_NAME)
            .map_err(Error::alsa("snd_seq_set_client_name"))?;
        let client = seq
            .client_id()
            .map_err(Error::alsa("snd_seq_client_id"))?;

        let caps = PortCap::READ | PortCap::WRITE | PortCap::SUBS_READ | PortCap::SUBS_WRITE;
        let port = seq
            .create_simple_port(CLIENT_NAME, caps, PortType::MIDI_GENERIC | PortType::APPLICATION)
            .map_err(Error::alsa("snd_seq_create_simple_port"))?;

        let fds = (&seq, Some(Direction::Capture))
            .get()
            .map_err(Error::alsa("snd_seq_poll_descriptors"))?;

        let local = Address::new(client, port);
        log::debug!("sequencer client {local} polling {} descriptor(s)", fds.len());
        Ok(Self {
            seq,
            local,
            fds,
            wakeup: None,
        })
    }

    /// Lets each of `signals` end a blocked `wait`. Call once.
    pub fn wake_on(&mut self, signals: &[libc::c_int]) -> Result<()> {
        let wakeup = Wakeup::new()?;
        for &signal in signals {
            wakeup.register(signal)?;
        }
        self.fds.push(wakeup.pollfd());
        self.wakeup = Some(wakeup);
        Ok(())
    }
}

impl Sequencer for AlsaSequencer {
    fn local(&self) -> Address {
        self.local
    }

    fn clients(&mut self) -> Result<Vec<ClientEntry>> {
        Ok(ClientIter::new(&self.seq)
            .map(|c| ClientEntry {
                id: c.get_client(),
                name: c.get_name().unwrap_or_default().to_owned(),
            })
            .collect())
    }

    fn subscribe_from(&mut self, sender: Address) -> Result<()> {
        let subs =
            PortSubscribe::empty().map_err(Error::alsa("snd_seq_port_subscribe_malloc"))?;
        subs.set_sender(sender.into());
        subs.set_dest(self.local.into());
        self.seq
            .subscribe_port(&subs)
            .map_err(Error::alsa("snd_seq_connect_from"))
    }

    fn wait(&mut self) -> Result<Wake> {
        poll_forever(&mut self.fds, self.wakeup.as_ref())
    }

    fn drain(&mut self, out: &mut Vec<SeqEvent>) -> Result<()> {
        let mut input = self.seq.input();
        drain_input(|| input.event_input().map(|ev| midi::decode(&ev)), out)
    }
}

// ─────────────────── scripted sequencer for tests ────────────────────────────
