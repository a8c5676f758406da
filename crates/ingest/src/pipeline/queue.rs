//! Zero-capacity hand-off queues between stages, with a shared stop signal.
//!
//! A queue closes when every sender has been dropped; receivers then drain
//! and observe [`Halt::Closed`]. Stopping is separate: once the signal is
//! tripped, every blocked or future send and receive returns
//! [`Halt::Stopped`].

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

/// Why a queue operation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Halt {
    Closed,
    Stopped,
}

/// A sender blocks until a receiver takes the value.
pub(crate) fn rendezvous<T>() -> (Sender<T>, Receiver<T>) {
    bounded(0)
}

/// One-shot broadcast stop. Tripping drops the only sender, which leaves
/// every listener permanently ready.
pub(crate) struct StopSignal {
    trigger: Mutex<Option<Sender<()>>>,
    listener: Receiver<()>,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            trigger: Mutex::new(Some(tx)),
            listener: rx,
        }
    }

    pub(crate) fn trip(&self) {
        self.trigger.lock().take();
    }

    pub(crate) fn listener(&self) -> Receiver<()> {
        self.listener.clone()
    }
}

fn is_stopped(stop: &Receiver<()>) -> bool {
    matches!(stop.try_recv(), Err(TryRecvError::Disconnected))
}

pub(crate) fn send<T>(tx: &Sender<T>, value: T, stop: &Receiver<()>) -> Result<(), Halt> {
    if is_stopped(stop) {
        return Err(Halt::Stopped);
    }
    select! {
        send(tx, value) -> res => res.map_err(|_| Halt::Closed),
        recv(stop) -> _ => Err(Halt::Stopped),
    }
}

pub(crate) fn recv<T>(rx: &Receiver<T>, stop: &Receiver<()>) -> Result<T, Halt> {
    if is_stopped(stop) {
        return Err(Halt::Stopped);
    }
    select! {
        recv(rx) -> msg => msg.map_err(|_| Halt::Closed),
        recv(stop) -> _ => Err(Halt::Stopped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_rendezvous_hands_off() {
        let stop = StopSignal::new();
        let (tx, rx) = rendezvous::<u32>();
        let listener = stop.listener();

        let handle = thread::spawn(move || send(&tx, 7, &listener));
        assert_eq!(recv(&rx, &stop.listener()), Ok(7));
        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_recv_closed_after_senders_drop() {
        let stop = StopSignal::new();
        let (tx, rx) = rendezvous::<u32>();
        drop(tx);
        assert_eq!(recv(&rx, &stop.listener()), Err(Halt::Closed));
    }

    #[test]
    fn test_send_closed_after_receivers_drop() {
        let stop = StopSignal::new();
        let (tx, rx) = rendezvous::<u32>();
        drop(rx);
        assert_eq!(send(&tx, 1, &stop.listener()), Err(Halt::Closed));
    }

    #[test]
    fn test_trip_unblocks_waiting_sender() {
        let stop = StopSignal::new();
        let (tx, _rx) = rendezvous::<u32>();
        let listener = stop.listener();

        let handle = thread::spawn(move || send(&tx, 1, &listener));
        thread::sleep(Duration::from_millis(20));
        stop.trip();
        assert_eq!(handle.join().unwrap(), Err(Halt::Stopped));
    }

    #[test]
    fn test_stopped_wins_over_ready_queue() {
        let stop = StopSignal::new();
        let (tx, rx) = bounded::<u32>(1);
        tx.send(1).unwrap();
        stop.trip();
        assert_eq!(recv(&rx, &stop.listener()), Err(Halt::Stopped));
    }
}
