// This file is part of BLSAgg.
//
// BLSAgg is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// BLSAgg is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with BLSAgg.
// If not, see https://www.gnu.org/licenses/.

use std::time::Duration;

use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::debug;

/// Debounced submission trigger.
///
/// Three logical states:
///
/// - **idle** — no eligible work, no deadline armed.
/// - **active** — eligible work exists; the deadline is the instant of the
///   *first* `notify_active` plus the maximum aggregation delay. Repeated
///   `notify_active` calls do not push the deadline out.
/// - firing — transient; a unit is delivered on the firing channel and the
///   timer returns to idle.
///
/// Firings are consumed by a single submission loop, so the callback runs at
/// most once per firing and never concurrently with itself. The firing
/// channel has capacity one: a trigger that lands while a firing is already
/// pending coalesces into it.
#[derive(Debug)]
pub struct SubmissionTimer {
    commands: mpsc::UnboundedSender<TimerCommand>,
}

#[derive(Debug)]
enum TimerCommand {
    NotifyActive,
    Clear,
    Trigger,
    Shutdown,
}

impl SubmissionTimer {
    /// Spawn the timer task. Returns the command handle and the channel
    /// firings are delivered on.
    pub fn spawn(max_delay: Duration) -> (Self, mpsc::Receiver<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (firings, firing_rx) = mpsc::channel(1);
        tokio::spawn(run(command_rx, firings, max_delay));
        (Self { commands }, firing_rx)
    }

    /// Eligible work exists; arm the deadline if not already armed.
    pub fn notify_active(&self) {
        let _ = self.commands.send(TimerCommand::NotifyActive);
    }

    /// No eligible work; disarm and forget the first-activity instant.
    pub fn clear(&self) {
        let _ = self.commands.send(TimerCommand::Clear);
    }

    /// Fire immediately, regardless of the deadline.
    pub fn trigger(&self) {
        let _ = self.commands.send(TimerCommand::Trigger);
    }

    /// Stop the timer task. The firing channel closes once the task exits,
    /// which ends the submission loop draining it.
    pub fn shutdown(&self) {
        let _ = self.commands.send(TimerCommand::Shutdown);
    }
}

async fn run(
    mut commands: mpsc::UnboundedReceiver<TimerCommand>,
    firings: mpsc::Sender<()>,
    max_delay: Duration,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(TimerCommand::Shutdown) => break,
                Some(TimerCommand::NotifyActive) => {
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + max_delay);
                    }
                }
                Some(TimerCommand::Clear) => deadline = None,
                Some(TimerCommand::Trigger) => {
                    fire(&firings);
                    deadline = None;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                fire(&firings);
                deadline = None;
            }
        }
    }
    debug!("Submission timer stopped");
}

fn fire(firings: &mpsc::Sender<()>) {
    // a pending firing absorbs this one
    let _ = firings.try_send(());
}
