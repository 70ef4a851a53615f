//! The outer scheduler loop.
//!
//! Between frames the loop yields to the reactor so I/O callbacks (event
//! sources feeding the bounded channel) can enqueue work; when both the
//! queue and the channel are idle it parks on the channel. A shutdown signal
//! or channel closure ends the loop after a final snapshot.

use core_events::Event;
use tokio::sync::{mpsc, watch};

use crate::space::Space;

impl Space {
    pub async fn run(
        &mut self,
        mut feed: mpsc::Receiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        loop {
            while let Ok(event) = feed.try_recv() {
                self.enqueue(event);
            }
            if *shutdown.borrow() {
                break;
            }
            if self.has_pending_events() {
                self.process_frame().await?;
                // One reactor turn between frames.
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = feed.recv() => {
                    match received {
                        Some(event) => self.enqueue(event),
                        None => break,
                    }
                }
            }
        }
        self.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::ElementRef;

    #[tokio::test]
    async fn run_drains_queued_events_and_stops_on_shutdown() {
        let (tx, rx) = mpsc::channel::<Event>(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut space = Space::new("space");
        tx.send(Event::new(
            "probe:hit",
            ElementRef::new("space"),
            serde_json::Value::Null,
        ))
        .await
        .unwrap();

        let driver = async {
            // Give the loop a few turns, then signal shutdown.
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            stop_tx.send(true).unwrap();
        };
        let (run_result, ()) = tokio::join!(space.run(rx, stop_rx), driver);
        run_result.unwrap();
        assert_eq!(space.metrics().frames_processed, 1);
        assert_eq!(space.veil().current_sequence(), 1);
    }

    #[tokio::test]
    async fn run_exits_when_the_feed_closes() {
        let (tx, rx) = mpsc::channel::<Event>(8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        drop(tx);
        let mut space = Space::new("space");
        space.run(rx, stop_rx).await.unwrap();
        assert_eq!(space.metrics().frames_processed, 0);
    }
}
