//! Notify path: reassembles and decodes frames pushed by the lamp.

use crossbeam_channel::Sender;

use super::queue::TxQueue;
use super::LinkEvent;
use crate::error::ProtocolError;
use crate::protocol::registers::{LampConfig, CONFIG_REGISTER_COUNT};
use crate::protocol::{frame, FrameAssembler, Response};

pub struct Inbound {
    address: u8,
    assembler: FrameAssembler,
    queue: TxQueue,
    events: Sender<LinkEvent>,
}

impl Inbound {
    pub fn new(address: u8, queue: TxQueue, events: Sender<LinkEvent>) -> Self {
        Self {
            address,
            assembler: FrameAssembler::new(address),
            queue,
            events,
        }
    }

    /// Feed one notify chunk; returns how many complete frames it finished.
    ///
    /// Partial frames stay buffered for the next chunk.
    pub fn on_notify(&mut self, chunk: &[u8]) -> usize {
        self.assembler.push(chunk);
        let mut frames = 0;
        while let Some(next) = self.assembler.next_frame() {
            frames += 1;
            let (function, parsed) = match next {
                Ok(f) => (f[1], frame::parse_response(&f, self.address)),
                Err(r) => (r.function, Err(r.error)),
            };
            if let Some(event) = self.dispatch(function, parsed) {
                let _ = self.events.send(event);
            }
        }
        frames
    }

    /// Forget buffered partial data.
    pub fn reset(&mut self) {
        self.assembler.clear();
    }

    fn dispatch(&self, function: u8, parsed: Result<Response, ProtocolError>) -> Option<LinkEvent> {
        // Only a reply to a read ends the wait for one; write echoes arrive
        // continuously and must not release it.
        let answers_read = function & !frame::EXCEPTION_FLAG == frame::FUNC_READ_HOLDING;
        match parsed {
            Ok(Response::Registers(values)) => {
                self.queue.response_received();
                if values.len() == CONFIG_REGISTER_COUNT as usize {
                    match LampConfig::from_registers(&values) {
                        Ok(config) => return Some(LinkEvent::Config(config)),
                        Err(e) => log::warn!("Lamp reported invalid configuration: {}", e),
                    }
                }
                Some(LinkEvent::Registers(values))
            }
            Ok(ack) => {
                log::trace!("Write acknowledged: {:?}", ack);
                None
            }
            Err(e @ ProtocolError::Exception { .. }) => {
                log::warn!("Lamp rejected request: {}", e);
                if answers_read {
                    self.queue.response_received();
                }
                Some(LinkEvent::DeviceError(e))
            }
            Err(e) => {
                log::warn!("Discarding notify frame: {}", e);
                if answers_read {
                    self.queue.response_received();
                }
                Some(LinkEvent::Discarded(e))
            }
        }
    }
}
