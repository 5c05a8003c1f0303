//! Caller-side supersession for interactive re-rendering.
//!
//! Every request takes a [`Ticket`]. When a newer ticket has been issued by
//! the time a result is ready, the result comes back as
//! [`Outcome::Superseded`] and the caller drops it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Current(T),
    Superseded,
}

impl<T> Outcome<T> {
    pub fn current(self) -> Option<T> {
        match self {
            Outcome::Current(v) => Some(v),
            Outcome::Superseded => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Generations {
    latest: AtomicU64,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }

    pub fn settle<T>(&self, ticket: Ticket, value: T) -> Outcome<T> {
        if self.is_current(ticket) {
            Outcome::Current(value)
        } else {
            Outcome::Superseded
        }
    }

    /// Wait `delay`, skip `work` if a newer ticket showed up meanwhile, and
    /// settle whatever `work` returns.
    pub fn debounced<T>(
        &self,
        ticket: Ticket,
        delay: Duration,
        work: impl FnOnce() -> T,
    ) -> Outcome<T> {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if !self.is_current(ticket) {
            log::trace!("request {:?} superseded before rendering", ticket);
            return Outcome::Superseded;
        }
        self.settle(ticket, work())
    }
}

/// Block for the next request, then skip ahead to the newest one already
/// queued. `None` once every sender is gone and the queue is empty.
pub fn recv_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut latest = rx.recv().ok()?;
    let mut skipped = 0usize;
    while let Ok(newer) = rx.try_recv() {
        latest = newer;
        skipped += 1;
    }
    if skipped > 0 {
        log::debug!("skipped {skipped} queued request(s)");
    }
    Some(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Arc};

    #[test]
    fn test_latest_ticket_wins() {
        let gens = Generations::new();
        let first = gens.issue();
        let second = gens.issue();
        assert!(second > first);
        assert_eq!(gens.settle(first, "old"), Outcome::Superseded);
        assert_eq!(gens.settle(second, "new"), Outcome::Current("new"));
    }

    #[test]
    fn test_superseded_work_is_skipped() {
        let gens = Arc::new(Generations::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let ticket = gens.issue();
                let gens = Arc::clone(&gens);
                let runs = Arc::clone(&runs);
                thread::spawn(move || {
                    gens.debounced(ticket, Duration::from_millis(50), || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        i
                    })
                })
            })
            .collect();

        let outcomes: Vec<Outcome<i32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes[4], Outcome::Current(4));
        assert!(outcomes[..4].iter().all(|o| *o == Outcome::Superseded));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_result_finished_after_newer_request_is_dropped() {
        let gens = Generations::new();
        let ticket = gens.issue();
        let outcome = gens.debounced(ticket, Duration::ZERO, || {
            gens.issue();
            42
        });
        assert_eq!(outcome, Outcome::Superseded);
        assert_eq!(outcome.current(), None);
    }

    #[test]
    fn test_recv_latest_skips_queued() {
        let (tx, rx) = mpsc::channel();
        for i in 1..=3 {
            tx.send(i).unwrap();
        }
        assert_eq!(recv_latest(&rx), Some(3));
        tx.send(4).unwrap();
        drop(tx);
        assert_eq!(recv_latest(&rx), Some(4));
        assert_eq!(recv_latest(&rx), None);
    }

    #[test]
    fn test_single_worker_renders_only_the_last_burst_request() {
        let gens = Arc::new(Generations::new());
        let (tx, rx) = mpsc::channel::<(Ticket, u32)>();

        let worker = {
            let gens = Arc::clone(&gens);
            thread::spawn(move || {
                let mut rendered = Vec::new();
                while let Some((ticket, size)) = recv_latest(&rx) {
                    if let Outcome::Current(size) =
                        gens.debounced(ticket, Duration::from_millis(100), || size)
                    {
                        rendered.push(size);
                    }
                }
                rendered
            })
        };

        for size in 0..20 {
            tx.send((gens.issue(), size)).unwrap();
        }
        drop(tx);
        assert_eq!(worker.join().unwrap(), vec![19]);
    }
}
