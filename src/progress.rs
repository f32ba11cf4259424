//! Progress fan-out to job observers.
//!
//! The channel owns both maps: job id → subscriber senders, and subscriber
//! id → job id. It holds job identifiers only, never job state; callers
//! pass the current frame at subscription time. Slow subscribers are given
//! a bounded send deadline and evicted on expiry, which protects the job
//! writer from a stalled socket.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::jobs::{JobRecord, JobState};

const SUBSCRIBER_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressFrame {
    pub state: JobState,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ProgressFrame {
    pub fn from_job(job: &JobRecord) -> Self {
        Self {
            state: job.state,
            progress: job.progress,
            timestamp: job.updated_at,
            result: if job.state == JobState::Completed {
                job.result.clone()
            } else {
                None
            },
        }
    }

    pub fn snapshot(state: JobState, progress: u8) -> Self {
        Self {
            state,
            progress,
            timestamp: Utc::now(),
            result: None,
        }
    }
}

pub struct Subscription {
    pub id: Uuid,
    pub job_id: String,
    pub receiver: mpsc::Receiver<ProgressFrame>,
}

pub struct ProgressChannel {
    by_job: DashMap<String, HashMap<Uuid, mpsc::Sender<ProgressFrame>>>,
    by_subscriber: DashMap<Uuid, String>,
    send_deadline: Duration,
}

impl ProgressChannel {
    pub fn new(send_deadline: Duration) -> Self {
        Self {
            by_job: DashMap::new(),
            by_subscriber: DashMap::new(),
            send_deadline,
        }
    }

    /// Register an observer for a job. The current state is delivered as
    /// the first frame.
    pub fn subscribe(&self, job_id: &str, current: ProgressFrame) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        // The channel is freshly created; this send cannot fail.
        let _ = tx.try_send(current);

        self.by_job
            .entry(job_id.to_string())
            .or_default()
            .insert(id, tx);
        self.by_subscriber.insert(id, job_id.to_string());
        tracing::debug!(job_id, subscriber = %id, "progress subscription added");

        Subscription {
            id,
            job_id: job_id.to_string(),
            receiver: rx,
        }
    }

    pub fn unsubscribe(&self, subscriber: Uuid) {
        if let Some((_, job_id)) = self.by_subscriber.remove(&subscriber) {
            if let Some(mut senders) = self.by_job.get_mut(&job_id) {
                senders.remove(&subscriber);
                let drained = senders.is_empty();
                drop(senders);
                if drained {
                    self.by_job.remove_if(&job_id, |_, s| s.is_empty());
                }
            }
            tracing::debug!(job_id, subscriber = %subscriber, "progress subscription removed");
        }
    }

    /// Fan a frame out to every observer of `job_id`. Returns how many
    /// observers received it; observers that miss the send deadline are
    /// evicted.
    pub async fn publish(&self, job_id: &str, frame: ProgressFrame) -> usize {
        let senders: Vec<(Uuid, mpsc::Sender<ProgressFrame>)> = match self.by_job.get(job_id) {
            Some(map) => map.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut evict = Vec::new();
        for (id, tx) in senders {
            let send = tokio::time::timeout(self.send_deadline, tx.send(frame.clone())).await;
            match send {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) | Err(_) => {
                    tracing::warn!(job_id, subscriber = %id, "evicting slow or gone subscriber");
                    evict.push(id);
                }
            }
        }
        for id in evict {
            self.unsubscribe(id);
        }
        delivered
    }

    pub fn watcher_count(&self, job_id: &str) -> usize {
        self.by_job.get(job_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.by_subscriber.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ProgressChannel {
        ProgressChannel::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn subscriber_receives_current_state_first() {
        let channel = channel();
        let mut sub = channel.subscribe("job-1", ProgressFrame::snapshot(JobState::Processing, 40));
        let first = sub.receiver.recv().await.unwrap();
        assert_eq!(first.state, JobState::Processing);
        assert_eq!(first.progress, 40);
    }

    #[tokio::test]
    async fn frames_preserve_publish_order() {
        let channel = channel();
        let mut sub = channel.subscribe("job-1", ProgressFrame::snapshot(JobState::Queued, 0));
        let _ = sub.receiver.recv().await;

        for progress in [20, 40, 60] {
            channel
                .publish(
                    "job-1",
                    ProgressFrame::snapshot(JobState::Processing, progress),
                )
                .await;
        }
        assert_eq!(sub.receiver.recv().await.unwrap().progress, 20);
        assert_eq!(sub.receiver.recv().await.unwrap().progress, 40);
        assert_eq!(sub.receiver.recv().await.unwrap().progress, 60);
    }

    #[tokio::test]
    async fn publish_fans_out_to_all_watchers() {
        let channel = channel();
        let mut a = channel.subscribe("job-1", ProgressFrame::snapshot(JobState::Queued, 0));
        let mut b = channel.subscribe("job-1", ProgressFrame::snapshot(JobState::Queued, 0));
        let _ = a.receiver.recv().await;
        let _ = b.receiver.recv().await;

        let delivered = channel
            .publish("job-1", ProgressFrame::snapshot(JobState::Processing, 20))
            .await;
        assert_eq!(delivered, 2);
        assert_eq!(a.receiver.recv().await.unwrap().progress, 20);
        assert_eq!(b.receiver.recv().await.unwrap().progress, 20);
    }

    #[tokio::test]
    async fn dropped_receiver_is_evicted_on_publish() {
        let channel = channel();
        let sub = channel.subscribe("job-1", ProgressFrame::snapshot(JobState::Queued, 0));
        assert_eq!(channel.watcher_count("job-1"), 1);
        drop(sub);

        let delivered = channel
            .publish("job-1", ProgressFrame::snapshot(JobState::Processing, 20))
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(channel.watcher_count("job-1"), 0);
        assert_eq!(channel.connection_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_both_map_entries() {
        let channel = channel();
        let sub = channel.subscribe("job-1", ProgressFrame::snapshot(JobState::Queued, 0));
        channel.unsubscribe(sub.id);
        assert_eq!(channel.watcher_count("job-1"), 0);
        assert_eq!(channel.connection_count(), 0);
    }

    #[tokio::test]
    async fn publish_to_unwatched_job_is_a_noop() {
        let channel = channel();
        assert_eq!(
            channel
                .publish("missing", ProgressFrame::snapshot(JobState::Queued, 0))
                .await,
            0
        );
    }
}
