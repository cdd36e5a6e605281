//! Everything between a band vector and the radio: queueing, chunking,
//! periodic sending and the notify path.

pub mod inbound;
pub mod queue;
pub mod sender;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

pub use inbound::Inbound;
pub use queue::{chunk_spectrum, TxQueue};
pub use sender::{Feed, PeriodicSender, SawPattern};
pub use transport::{payload_ceiling, Completion, HexDumpTransport, Transport, WriteMode};

use crate::error::{ProtocolError, Result, TransportError};
use crate::protocol::frame::{read_holding_registers, write_multiple_registers, write_single_register};
use crate::protocol::registers::{LampConfig, CONFIG_REGISTER_COUNT, REG_MODE};

/// Things the operator layer needs to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Configuration read back from the lamp.
    Config(LampConfig),
    /// Register values that are not a configuration block.
    Registers(Vec<u16>),
    /// Exception response from the lamp.
    DeviceError(ProtocolError),
    /// Notify frame dropped for a CRC or framing problem.
    Discarded(ProtocolError),
    TransportFailed(TransportError),
}

#[derive(Debug, Clone, Copy)]
pub struct LinkSettings {
    pub address: u8,
    pub response_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            address: crate::protocol::frame::DEFAULT_ADDRESS,
            response_timeout: queue::DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// One connection to a lamp.
pub struct Link {
    settings: LinkSettings,
    queue: TxQueue,
    inbound: Mutex<Inbound>,
    events_tx: Sender<LinkEvent>,
    events: Receiver<LinkEvent>,
}

impl Link {
    pub fn new(transport: Arc<dyn Transport>, settings: LinkSettings) -> Self {
        let (events_tx, events) = unbounded();
        let queue = TxQueue::new(transport, settings.response_timeout, events_tx.clone());
        let inbound = Inbound::new(settings.address, queue.clone(), events_tx.clone());
        Self {
            settings,
            queue,
            inbound: Mutex::new(inbound),
            events_tx,
            events,
        }
    }

    pub fn address(&self) -> u8 {
        self.settings.address
    }

    pub fn queue(&self) -> &TxQueue {
        &self.queue
    }

    pub fn events(&self) -> &Receiver<LinkEvent> {
        &self.events
    }

    /// Hand a notify chunk from the radio to the frame reassembler.
    pub fn on_notify(&self, chunk: &[u8]) {
        self.inbound.lock().on_notify(chunk);
    }

    /// Write the lamp configuration in one request, or one request per register.
    pub fn write_config(&self, config: &LampConfig, per_register: bool) -> Result<()> {
        config.validate()?;
        let values = config.to_registers();
        if per_register {
            for (reg, value) in (REG_MODE..).zip(values) {
                self.queue
                    .submit(write_single_register(self.settings.address, reg, value))?;
            }
        } else {
            let frame = write_multiple_registers(self.settings.address, REG_MODE, &values)?;
            self.queue.submit(frame)?;
        }
        log::info!("Queued lamp configuration {:?}", config);
        Ok(())
    }

    /// Ask the lamp for its configuration; the answer arrives as [`LinkEvent::Config`].
    pub fn request_config(&self) -> Result<()> {
        let frame = read_holding_registers(self.settings.address, REG_MODE, CONFIG_REGISTER_COUNT);
        self.queue.submit(frame)?;
        Ok(())
    }

    /// Send bands from `feed` every `1 / rate_hz` seconds until the sender is stopped.
    pub fn start_sender(&self, feed: Feed, rate_hz: f64) -> std::io::Result<PeriodicSender> {
        PeriodicSender::start(self.queue.clone(), self.settings.address, feed, rate_hz)
    }

    /// Drop every pending write and partial notify frame.
    pub fn reset(&self) {
        self.queue.clear();
        self.inbound.lock().reset();
        log::info!("Link reset");
    }

    /// Surface a failure detected outside the queue, e.g. the radio dropping.
    pub fn report(&self, err: TransportError) {
        let _ = self.events_tx.send(LinkEvent::TransportFailed(err));
    }
}
