//! Line commands for a running session.

use std::io::BufRead;
use std::thread::{self, JoinHandle};

use crate::orchestrator::ScrapeControl;

/// Feeds `resume`, `pause`, `stop` and `status` lines from `input` to the
/// session until the input ends.
///
/// Runs on a detached OS thread, so a read that never returns cannot hold up
/// runtime shutdown or process exit.
pub fn spawn_console<R>(input: R, control: ScrapeControl) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else { break };
            if let Some(reply) = apply(&control, &line) {
                println!("{}", reply);
            }
        }
    })
}

/// Runs one command, returning the text to show the user, if any.
pub fn apply(control: &ScrapeControl, line: &str) -> Option<String> {
    match line.trim().to_lowercase().as_str() {
        "r" | "resume" => (!control.resume()).then(|| "Not waiting on a CAPTCHA".to_string()),
        "p" | "pause" => (!control.trip_captcha()).then(|| "Pausing needs --captcha".to_string()),
        "s" | "stop" | "q" | "quit" => {
            control.stop();
            None
        }
        "status" | "" => {
            let state = control.status();
            Some(format!(
                "page {} | found {} | downloaded {} | failed {}{}",
                state.page_index,
                state.items_found,
                state.items_downloaded,
                state.items_failed,
                if state.paused { " | waiting for resume" } else { "" }
            ))
        }
        other => Some(format!(
            "Unknown command {:?} (resume, pause, stop, status)",
            other
        )),
    }
}
