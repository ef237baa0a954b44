use crate::prelude::*;

/// Emits a poll tick every `poll_interval`. The coordinator consumes
/// ticks one at a time, so a slow poll simply delays the next one
/// instead of overlapping it.
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.poll_interval());

        loop {
            interval.tick().await;

            if self
                .channels
                .to_coordinator
                .send(coordinator::ChannelData::PollNow)
                .is_err()
            {
                // coordinator gone, nothing left to schedule for
                break;
            }
        }

        Ok(())
    }
}
