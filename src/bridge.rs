//! The dispatch loop: waits on the sequencer, routes notes to GPIO lines and
//! topology changes back to the resolver, and releases the lines on the way
//! out no matter why the loop ended.

use crate::error::{Error, Result};
use crate::gpio::{LineController, OutputSet};
use crate::midi::{Kind, SeqEvent};
use crate::monitor::{Outcome, Resolver, TopologyWatcher};
use crate::notes::NoteTable;
use crate::seq_boot::{Sequencer, Wake};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Why `run` returned.
#[derive(Debug)]
pub enum Exit {
    /// A termination signal was honoured.
    Shutdown,
    /// The event transport itself failed.
    TransportFailed(Error),
}

pub struct Bridge<S: Sequencer, C: LineController> {
    seq: S,
    outputs: OutputSet<C>,
    notes: NoteTable,
    resolver: Resolver,
    watcher: Option<TopologyWatcher>,
    stop: Arc<AtomicBool>,
    state: State,
    batch: Vec<SeqEvent>,
}

impl<S: Sequencer, C: LineController> Bridge<S, C> {
    pub fn new(
        seq: S,
        outputs: OutputSet<C>,
        notes: NoteTable,
        resolver: Resolver,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            seq,
            outputs,
            notes,
            resolver,
            watcher: None,
            stop,
            state: State::Starting,
            batch: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn outputs(&self) -> &OutputSet<C> {
        &self.outputs
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Subscribes to announcements and makes the first connection attempt.
    /// On failure the lines are released before the error is returned.
    pub fn start(&mut self) -> Result<()> {
        match TopologyWatcher::watch(&mut self.seq) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => {
                self.shutdown();
                return Err(e);
            }
        }
        self.reconnect();
        self.state = State::Running;
        Ok(())
    }

    /// Runs until a termination signal or a transport failure, then releases
    /// every line. Starts the bridge first if that has not happened yet.
    pub fn run(&mut self) -> Exit {
        if self.state == State::Starting {
            if let Err(e) = self.start() {
                return Exit::TransportFailed(e);
            }
        }

        let exit = loop {
            if self.stop.load(Ordering::SeqCst) {
                log::info!("termination requested");
                break Exit::Shutdown;
            }
            match self.seq.wait() {
                Ok(Wake::Ready) => {}
                Ok(Wake::Interrupted) => continue,
                Err(e) => break Exit::TransportFailed(e),
            }
            if let Err(e) = self.pump() {
                break Exit::TransportFailed(e);
            }
        };

        self.shutdown();
        exit
    }

    /// Drains what is queued and dispatches it, including events read before
    /// a drain failure.
    fn pump(&mut self) -> Result<()> {
        let mut batch = std::mem::take(&mut self.batch);
        let drained = self.seq.drain(&mut batch);
        for ev in batch.drain(..) {
            self.dispatch(&ev);
        }
        self.batch = batch;
        drained
    }

    fn reconnect(&mut self) {
        if self.resolver.try_connect(&mut self.seq) == Outcome::TransportError {
            log::warn!("sequencer client list unavailable, retrying on the next topology change");
        }
    }

    fn dispatch(&mut self, ev: &SeqEvent) {
        if ev.is_reported() {
            log::debug!("{ev}");
        }
        self.resolver.observe(ev, self.seq.local());

        match ev.kind() {
            Kind::NoteOn(note) => self.drive(note, true),
            Kind::NoteOff(note) => self.drive(note, false),
            kind => {
                let retry = self.watcher.as_ref().is_some_and(|w| w.wants_retry(kind));
                if retry {
                    self.reconnect();
                }
            }
        }
    }

    fn drive(&mut self, note: u8, on: bool) {
        if let Some(line) = self.notes.line_for(note) {
            log::debug!("note {note} -> line {line} {}", if on { "on" } else { "off" });
            self.outputs.set_level(line, on);
        }
    }

    fn shutdown(&mut self) {
        self.state = State::Stopping;
        self.outputs.release_all();
        self.state = State::Stopped;
    }
}
