use std::cell::RefCell;

use anyhow::Result;
use colored::Colorize;

use util::Timer;

use crate::choice::PendingChoice;
use crate::engine::{Outcome, UnitReport};
use crate::settings::Settings;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Input closed while waiting for a choice")]
    InputClosed,
}

/// All interactions with the text UI should go through this struct.
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
    /// keeps track of time for each step
    timer: Timer,
    /// buffer to hold strings internally when getting input
    strbuf: RefCell<String>,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            timer: Timer::now(),
            // Refcell so we can call prompt_choice() w/o needing a unique reference:
            strbuf: RefCell::new(String::with_capacity(16)),
        }
    }

    /// Ask the user to pick one of the options, by number or by name.
    pub fn prompt_choice(&self, pending: &PendingChoice) -> Result<String> {
        eprintln!(
            "\n{} {} at {}:",
            "CHOICE".yellow(),
            pending.unit_name.bold(),
            pending.link_name
        );
        for (i, (name, description)) in pending.options.iter().enumerate() {
            eprintln!("  {}) {} {}", i + 1, name, description.dimmed());
        }

        let mut strbuf = self.strbuf.borrow_mut();
        loop {
            eprint!("Choose 1-{}: ", pending.options.len());
            strbuf.clear();
            if std::io::stdin().read_line(&mut strbuf)? == 0 {
                return Err(Error::InputClosed.into());
            }
            if let Some(name) = pick(&pending.options, strbuf.trim()) {
                return Ok(name.to_owned());
            }
            eprintln!("{}", "Not a valid option.".red());
        }
    }

    pub fn start_timer(&mut self) {
        if self.verbose {
            self.timer.reset();
        }
    }

    pub fn print_elapsed(&self, what: &str) {
        if self.verbose {
            let elapsed = self.timer.log_elapsed(what);
            eprintln!("{what} took {elapsed:?}");
        }
    }

    pub fn verbose_msg(&self, msg: &str) {
        if self.verbose {
            eprintln!("{}", msg);
        }
    }

    pub fn verbose_progress(&self, msg: &str) {
        if self.verbose {
            eprint!("{}... ", msg.magenta());
        }
    }

    pub fn verbose_progress_debug<T: std::fmt::Debug>(&self, msg: &str, arg: T) {
        if self.verbose {
            eprint!("{} {:?}... ", msg.magenta(), arg);
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }

    /// One line per unit at the end of a run.
    pub fn print_report(&self, report: &UnitReport) {
        let status = match &report.outcome {
            Outcome::Completed => "COMPLETED".green(),
            Outcome::Failed(_) => "FAILED".red(),
            Outcome::Cancelled => "CANCELLED".yellow(),
            Outcome::Halted(_) => "HALTED".red(),
        };
        eprintln!("{status} {} ({}) at {}", report.name, report.uuid, report.link);
        match &report.outcome {
            Outcome::Failed(e) => eprintln!("    {e}"),
            Outcome::Halted(why) => eprintln!("    {why}"),
            _ => (),
        }
        if self.verbose {
            eprintln!("    {} transitions", report.transitions);
        }
    }
}

/// Match input against a 1-based option number or an option name.
fn pick<'a>(options: &'a [(String, String)], input: &str) -> Option<&'a str> {
    if let Ok(n) = input.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| options.get(i))
            .map(|(name, _)| name.as_str());
    }
    options
        .iter()
        .find(|(name, _)| name == input)
        .map(|(name, _)| name.as_str())
}

#[cfg(test)]
mod test {
    use super::pick;

    #[test]
    fn test_pick() {
        let options = vec![
            ("yes".to_owned(), "Yes".to_owned()),
            ("no".to_owned(), "No".to_owned()),
        ];
        assert_eq!(Some("no"), pick(&options, "2"));
        assert_eq!(Some("yes"), pick(&options, "yes"));
        assert_eq!(None, pick(&options, "0"));
        assert_eq!(None, pick(&options, "3"));
        assert_eq!(None, pick(&options, "maybe"));
    }
}
