use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

// how often a waiting unit re-checks its cancel flag:
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Bounds how many units progress at once.
/// Waiting units are admitted strictly in the order they took a ticket.
#[derive(Debug)]
pub struct Admission {
    limit: Option<usize>,
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct State {
    active: usize,
    next_ticket: u64,
    queue: VecDeque<u64>,
}

impl Admission {
    /// `None` admits every unit immediately.
    pub fn new(limit: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            limit,
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        })
    }

    /// Take a place in line. Call this from the submitting thread,
    /// so that admission order matches submission order.
    pub fn ticket(self: &Arc<Self>) -> Ticket {
        let mut state = self.state.lock();
        let id = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(id);
        Ticket {
            admission: Arc::clone(self),
            id,
            waiting: true,
        }
    }

    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn has_room(&self, state: &State) -> bool {
        match self.limit {
            Some(limit) => state.active < limit,
            None => true,
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.active -= 1;
        self.cond.notify_all();
    }

    fn leave_queue(&self, id: u64) {
        let mut state = self.state.lock();
        state.queue.retain(|t| *t != id);
        self.cond.notify_all();
    }
}

/// A place in the admission line.
#[derive(Debug)]
pub struct Ticket {
    admission: Arc<Admission>,
    id: u64,
    waiting: bool,
}

impl Ticket {
    /// Block until it's this ticket's turn and there is room.
    /// Returns `None` if `cancel` is set first.
    pub fn wait(mut self, cancel: &AtomicBool) -> Option<Permit> {
        let admission = Arc::clone(&self.admission);
        let mut state = admission.state.lock();
        loop {
            if cancel.load(Ordering::SeqCst) {
                // drop(self) takes us out of the queue:
                drop(state);
                return None;
            }
            if state.queue.front() == Some(&self.id) && admission.has_room(&state) {
                state.queue.pop_front();
                state.active += 1;
                self.waiting = false;
                // the next ticket may be able to go too:
                admission.cond.notify_all();
                return Some(Permit {
                    admission: Arc::clone(&admission),
                });
            }
            admission.cond.wait_for(&mut state, CANCEL_POLL);
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.waiting {
            self.admission.leave_queue(self.id);
        }
    }
}

/// Held while a unit is admitted; gives the slot back when dropped.
#[derive(Debug)]
pub struct Permit {
    admission: Arc<Admission>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.admission.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_unbounded() {
        let admission = Admission::new(None);
        let never = AtomicBool::new(false);
        let a = admission.ticket().wait(&never);
        let b = admission.ticket().wait(&never);
        assert!(a.is_some() && b.is_some());
        assert_eq!(2, admission.active());
        drop(a);
        assert_eq!(1, admission.active());
    }

    #[test]
    fn test_fifo() -> anyhow::Result<()> {
        let admission = Admission::new(Some(1));
        let never = Arc::new(AtomicBool::new(false));
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = admission.ticket().wait(&never);
        assert!(first.is_some());

        let mut handles = Vec::new();
        for i in 0..4 {
            // tickets are taken here, in order, before any thread runs:
            let ticket = admission.ticket();
            let never = Arc::clone(&never);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let permit = ticket.wait(&never);
                order.lock().push(i);
                thread::sleep(Duration::from_millis(5));
                drop(permit);
            }));
        }
        assert_eq!(4, admission.waiting());
        drop(first);
        for h in handles {
            h.join().map_err(|_| anyhow::anyhow!("thread panicked"))?;
        }
        assert_eq!(vec![0, 1, 2, 3], *order.lock());
        assert_eq!(0, admission.active());
        Ok(())
    }

    #[test]
    fn test_cancel_while_waiting() {
        let admission = Admission::new(Some(1));
        let never = AtomicBool::new(false);
        let cancelled = AtomicBool::new(true);
        let held = admission.ticket().wait(&never);
        assert!(held.is_some());
        let behind = admission.ticket();
        let last = admission.ticket();
        assert!(behind.wait(&cancelled).is_none());
        drop(held);
        // the cancelled ticket no longer blocks the line:
        assert!(last.wait(&never).is_some());
    }
}
