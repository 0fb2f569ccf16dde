use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use crate::models::server::{ServerRecord, ServerStatus};
use crate::query::{QueryError, ServerQuery};
use crate::storage::roster::Roster;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryLine {
    pub heading: String,
    pub body: String,
}

impl From<&ServerRecord> for SummaryLine {
    fn from(record: &ServerRecord) -> Self {
        Self { heading: record.heading(), body: record.body() }
    }
}

/// Status of every configured server at one point in time, in roster order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSummary {
    pub generated_at: DateTime<Utc>,
    pub lines: Vec<SummaryLine>,
}

impl AggregateSummary {
    pub fn from_roster(roster: &Roster, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            lines: roster.servers().iter().map(SummaryLine::from).collect(),
        }
    }
}

/// Queries every server once and folds the answers into the roster.
pub struct PollCycle<Q> {
    client: Arc<Q>,
    permits: Arc<Semaphore>,
}

impl<Q: ServerQuery> PollCycle<Q> {
    pub fn new(client: Q, max_concurrent_queries: usize) -> Self {
        Self {
            client: Arc::new(client),
            permits: Arc::new(Semaphore::new(max_concurrent_queries.max(1))),
        }
    }

    pub async fn run(&self, roster: &mut Roster) -> AggregateSummary {
        let mut results = self.query_all(roster).await;

        let mut answered = 0;
        for (index, server) in roster.servers_mut().iter_mut().enumerate() {
            match results[index].take() {
                Some(Ok(status)) => {
                    answered += 1;
                    server.apply_success(&status);
                }
                Some(Err(e)) => {
                    warn!("Query to {} failed: {}", server.connection(), e);
                    server.apply_failure();
                }
                None => server.apply_failure(),
            }
        }

        info!("Polled {} servers, {} answered", roster.len(), answered);
        AggregateSummary::from_roster(roster, Utc::now())
    }

    async fn query_all(&self, roster: &Roster) -> Vec<Option<Result<ServerStatus, QueryError>>> {
        let mut tasks = JoinSet::new();

        for (index, server) in roster.servers().iter().enumerate() {
            let client = Arc::clone(&self.client);
            let permits = Arc::clone(&self.permits);
            let connection = server.connection().to_string();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                debug!("Querying {}", connection);
                (index, client.query(&connection).await)
            });
        }

        let mut results: Vec<Option<Result<ServerStatus, QueryError>>> =
            (0..roster.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!("Query task did not finish: {}", e),
            }
        }
        results
    }
}
