use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use util::HashMap;
use workflow::LinkId;

// how often a waiting unit re-checks its cancel flag:
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// A unit suspended at a choice link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChoice {
    pub unit: Uuid,
    pub unit_name: String,
    pub link: LinkId,
    pub link_name: String,
    /// (name, description), in the order the workflow lists them
    pub options: Vec<(String, String)>,
}

/// Reply to an externally submitted choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Accepted,
    /// that unit isn't waiting at that link (anymore)
    NotAwaiting,
    /// someone else answered first
    AlreadyAnswered,
    UnknownOption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("No choice was made before the timeout")]
    Timeout,
    #[error("Cancelled while waiting for a choice")]
    Cancelled,
}

#[derive(Debug)]
struct Slot {
    pending: PendingChoice,
    answer: Option<usize>,
}

/// Where units wait for choices and where choices are delivered.
#[derive(Debug, Default)]
pub struct ChoiceBoard {
    slots: Mutex<HashMap<Uuid, Slot>>,
    cond: Condvar,
}

impl ChoiceBoard {
    pub(crate) fn open(&self, pending: PendingChoice) {
        let mut slots = self.slots.lock();
        log::info!("{}: awaiting choice at \"{}\"", pending.unit_name, pending.link_name);
        slots.insert(pending.unit, Slot { pending, answer: None });
        self.cond.notify_all();
    }

    /// Block until the choice for `unit` arrives. The slot is closed
    /// whichever way this returns.
    pub(crate) fn wait(
        &self,
        unit: Uuid,
        timeout: Option<Duration>,
        cancel: &AtomicBool,
    ) -> Result<usize, WaitError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slots = self.slots.lock();
        loop {
            if let Some(idx) = slots.get(&unit).and_then(|s| s.answer) {
                slots.remove(&unit);
                return Ok(idx);
            }
            if cancel.load(Ordering::SeqCst) {
                slots.remove(&unit);
                self.cond.notify_all();
                return Err(WaitError::Cancelled);
            }
            let mut wait_for = CANCEL_POLL;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    slots.remove(&unit);
                    self.cond.notify_all();
                    return Err(WaitError::Timeout);
                }
                wait_for = wait_for.min(deadline - now);
            }
            self.cond.wait_for(&mut slots, wait_for);
        }
    }

    /// Choices that are still waiting for an answer.
    pub fn pending(&self) -> Vec<PendingChoice> {
        let slots = self.slots.lock();
        let mut pending: Vec<_> = slots
            .values()
            .filter(|s| s.answer.is_none())
            .map(|s| s.pending.clone())
            .collect();
        pending.sort_by(|a, b| a.unit_name.cmp(&b.unit_name).then(a.unit.cmp(&b.unit)));
        pending
    }

    /// Options on offer, if `unit` is waiting at `link`.
    pub fn available_choices(&self, link: LinkId, unit: Uuid) -> Option<Vec<(String, String)>> {
        let slots = self.slots.lock();
        slots
            .get(&unit)
            .filter(|s| s.pending.link == link && s.answer.is_none())
            .map(|s| s.pending.options.clone())
    }

    pub fn submit(&self, link: LinkId, unit: Uuid, option: &str) -> Ack {
        let mut slots = self.slots.lock();
        let slot = match slots.get_mut(&unit) {
            Some(slot) if slot.pending.link == link => slot,
            _ => return Ack::NotAwaiting,
        };
        if slot.answer.is_some() {
            return Ack::AlreadyAnswered;
        }
        match slot.pending.options.iter().position(|(name, _)| name == option) {
            Some(idx) => {
                log::info!("{}: chose \"{option}\" at \"{}\"", slot.pending.unit_name, slot.pending.link_name);
                slot.answer = Some(idx);
                self.cond.notify_all();
                Ack::Accepted
            }
            None => Ack::UnknownOption,
        }
    }

    /// Sleep until something on the board changes, or `timeout` passes.
    pub fn wait_for_change(&self, timeout: Duration) {
        let mut slots = self.slots.lock();
        self.cond.wait_for(&mut slots, timeout);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn pending(unit: Uuid, link: LinkId) -> PendingChoice {
        PendingChoice {
            unit,
            unit_name: "unit".to_owned(),
            link,
            link_name: "bind_choice".to_owned(),
            options: vec![
                ("yes".to_owned(), "Yes".to_owned()),
                ("no".to_owned(), "No".to_owned()),
            ],
        }
    }

    #[test]
    fn test_submit_from_another_thread() -> anyhow::Result<()> {
        let board = Arc::new(ChoiceBoard::default());
        let unit = Uuid::new_v4();
        let link = LinkId::from(3usize);
        board.open(pending(unit, link));
        assert_eq!(1, board.pending().len());
        assert_eq!(2, board.available_choices(link, unit).map(|o| o.len()).unwrap_or(0));
        assert_eq!(None, board.available_choices(LinkId::from(4usize), unit));

        let answerer = {
            let board = Arc::clone(&board);
            thread::spawn(move || {
                assert_eq!(Ack::UnknownOption, board.submit(link, unit, "maybe"));
                assert_eq!(Ack::NotAwaiting, board.submit(LinkId::from(4usize), unit, "no"));
                assert_eq!(Ack::Accepted, board.submit(link, unit, "no"));
                // the waiter may already have taken the answer and closed the slot:
                assert!(matches!(
                    board.submit(link, unit, "yes"),
                    Ack::AlreadyAnswered | Ack::NotAwaiting
                ));
            })
        };
        let never = AtomicBool::new(false);
        let idx = board.wait(unit, Some(Duration::from_secs(10)), &never)?;
        answerer.join().map_err(|_| anyhow::anyhow!("answer thread panicked"))?;
        assert_eq!(1, idx);
        assert!(board.pending().is_empty());
        assert_eq!(Ack::NotAwaiting, board.submit(link, unit, "no"));
        Ok(())
    }

    #[test]
    fn test_timeout() {
        let board = ChoiceBoard::default();
        let unit = Uuid::new_v4();
        board.open(pending(unit, LinkId::from(0usize)));
        let never = AtomicBool::new(false);
        let result = board.wait(unit, Some(Duration::from_millis(20)), &never);
        assert_eq!(Err(WaitError::Timeout), result);
        assert!(board.pending().is_empty());
    }

    #[test]
    fn test_cancel() {
        let board = ChoiceBoard::default();
        let unit = Uuid::new_v4();
        board.open(pending(unit, LinkId::from(0usize)));
        let cancelled = AtomicBool::new(true);
        assert_eq!(Err(WaitError::Cancelled), board.wait(unit, None, &cancelled));
    }
}
