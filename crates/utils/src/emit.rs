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

//! Utilities for collecting events from runtime components.

use std::fmt::Display;

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{info, warn};

/// Capacity of the event channels. Events are at most a few kilobytes, so
/// buffering this many is cheap.
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Receive events from a broadcast channel and call the handler for each.
pub fn receive_events<T>(
    description: &'static str,
    mut rx: broadcast::Receiver<T>,
    handler: impl Fn(T) + Send + 'static,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => handler(event),
                Err(RecvError::Closed) => {
                    info!("Event stream for {description} closed. Logging complete");
                    break;
                }
                Err(RecvError::Lagged(count)) => {
                    warn!("Event stream for {description} lagged. Missed {count} messages.")
                }
            }
        }
    })
}

/// Log every event passing the filter at INFO level.
pub fn receive_and_log_events_with_filter<T>(
    rx: broadcast::Receiver<T>,
    filter: impl (Fn(&T) -> bool) + Send + 'static,
) -> JoinHandle<()>
where
    T: Clone + Display + Send + 'static,
{
    receive_events("logging", rx, move |event| {
        if filter(&event) {
            info!("{}", event);
        }
    })
}
