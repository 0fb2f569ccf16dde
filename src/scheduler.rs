use log::{debug, error, info};
use std::time::Duration;
use crate::board::{BoardPublisher, PublishError};
use crate::discord::MessageChannel;
use crate::poll::PollCycle;
use crate::query::ServerQuery;
use crate::storage::roster::Roster;

/// Everything a running board needs, built once at startup.
pub struct AppContext<Q, C> {
    pub roster: Roster,
    pub poll: PollCycle<Q>,
    pub publisher: BoardPublisher<C>,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Publishing,
    Sleeping,
}

pub struct Scheduler<Q, C> {
    context: AppContext<Q, C>,
    state: SchedulerState,
    completed_cycles: u64,
}

impl<Q: ServerQuery, C: MessageChannel> Scheduler<Q, C> {
    pub fn new(context: AppContext<Q, C>) -> Self {
        Self { context, state: SchedulerState::Idle, completed_cycles: 0 }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles
    }

    pub fn roster(&self) -> &Roster {
        &self.context.roster
    }

    /// Polls and publishes until publishing fails, then returns that failure.
    ///
    /// Per-server query failures never end the loop.
    pub async fn run_forever(&mut self) -> PublishError {
        info!(
            "Updating {} servers every {:?}",
            self.context.roster.len(),
            self.context.interval
        );

        loop {
            self.transition(SchedulerState::Polling);
            let summary = self.context.poll.run(&mut self.context.roster).await;

            self.transition(SchedulerState::Publishing);
            if let Err(e) = self.context.publisher.publish(&summary).await {
                error!("Stopping updates after {} cycles: {}", self.completed_cycles, e);
                self.transition(SchedulerState::Idle);
                return e;
            }
            self.completed_cycles += 1;

            self.transition(SchedulerState::Sleeping);
            tokio::time::sleep(self.context.interval).await;
        }
    }

    fn transition(&mut self, next: SchedulerState) {
        debug!("Scheduler {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
