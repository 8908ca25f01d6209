use super::queue::Shared;
use super::worker::Slot;
use crate::common::lock;
use crossbeam::channel::{Receiver, Sender};
use slog::{error, info};
use std::sync::{Arc, Mutex};

/// Sent to the supervisor by worker threads and the pool.
pub enum Message {
    /// the loop of the worker in this slot ended abnormally
    Dead(usize),
    Terminate,
}

/// It supervises workers
pub struct Supervisor {
    shared: Arc<Shared>,
    slots: Arc<Mutex<Vec<Slot>>>,
    receiver: Receiver<Message>,
    sender: Sender<Message>,
}

impl Supervisor {
    pub fn new(
        shared: Arc<Shared>,
        slots: Arc<Mutex<Vec<Slot>>>,
        receiver: Receiver<Message>,
        sender: Sender<Message>,
    ) -> Self {
        Supervisor {
            shared,
            slots,
            receiver,
            sender,
        }
    }

    // listen to channel
    pub fn watch(&mut self) {
        while let Ok(message) = self.receiver.recv() {
            match message {
                Message::Dead(id) => self.revive(id),
                Message::Terminate => break,
            }
        }
    }

    // restart the worker loop of a slot whose loop died
    fn revive(&self, id: usize) {
        if !self.shared.keep_running() {
            return;
        }
        let slots = lock(&self.slots);
        let slot = match slots.iter().find(|slot| slot.id() == id) {
            Some(slot) if !slot.is_retired() => slot,
            _ => return,
        };
        // wait for the dead loop's os thread to leave before starting again
        slot.thread().join();
        match slot.start(&self.shared, &self.sender) {
            Ok(()) => {
                info!(self.shared.logger(), "worker restarted"; "thread" => slot.thread().name());
                self.shared.log_event("worker restarted", Some(&slot.thread().context()));
            }
            Err(err) => {
                error!(self.shared.logger(), "unable to restart worker";
                    "thread" => slot.thread().name(), "error" => %err);
            }
        }
    }
}
