//! Message persistence over the shared store.
//!
//! Per queue: the full message at `dlq:message:{queue}:{id}`, insertion
//! order in `dlq:queue:{queue}`, the retry schedule in `dlq:retry:{queue}`,
//! and one membership set per status at `dlq:status:{queue}:{status}`.

use crate::message::{DlqMessage, MessageStatus};
use gatehouse_core::store::StoreError;
use gatehouse_core::{keys, KvStoreExt, SharedStore};
use std::collections::HashMap;
use std::time::Duration;

pub struct MessageStore {
    store: SharedStore,
    /// TTL on primary entries; double the logical message TTL so expired
    /// messages remain inspectable until final cleanup deletes them.
    entry_ttl: Duration,
}

impl MessageStore {
    pub fn new(store: SharedStore, message_ttl: Duration) -> Self {
        Self {
            store,
            entry_ttl: message_ttl * 2,
        }
    }

    /// Persist a new message and index it.
    pub async fn insert(&self, message: &DlqMessage) -> Result<(), StoreError> {
        let queue = &message.queue_name;
        self.store
            .set_json(
                &keys::dlq_message(queue, &message.id),
                message,
                Some(self.entry_ttl),
            )
            .await?;
        self.store
            .zadd(
                &keys::dlq_queue(queue),
                &message.id,
                message.created_at_ms as f64,
            )
            .await?;
        self.store
            .sadd(
                &keys::dlq_status(queue, message.status.as_str()),
                &message.id,
            )
            .await?;
        if let Some(retry_at) = message.next_retry_at_ms {
            self.store
                .zadd(&keys::dlq_retry(queue), &message.id, retry_at as f64)
                .await?;
        }
        Ok(())
    }

    pub async fn get(&self, queue: &str, id: &str) -> Result<Option<DlqMessage>, StoreError> {
        self.store.get_json(&keys::dlq_message(queue, id)).await
    }

    /// Persist message changes, keeping the status and retry indexes in
    /// step.
    pub async fn update(&self, message: &DlqMessage) -> Result<bool, StoreError> {
        let queue = &message.queue_name;
        let Some(previous) = self.get(queue, &message.id).await? else {
            return Ok(false);
        };

        self.store
            .set_json(
                &keys::dlq_message(queue, &message.id),
                message,
                Some(self.entry_ttl),
            )
            .await?;

        if previous.status != message.status {
            self.store
                .srem(
                    &keys::dlq_status(queue, previous.status.as_str()),
                    &message.id,
                )
                .await?;
            self.store
                .sadd(
                    &keys::dlq_status(queue, message.status.as_str()),
                    &message.id,
                )
                .await?;
        }

        match message.next_retry_at_ms {
            Some(retry_at) => {
                self.store
                    .zadd(&keys::dlq_retry(queue), &message.id, retry_at as f64)
                    .await?;
            }
            None => {
                self.store.zrem(&keys::dlq_retry(queue), &message.id).await?;
            }
        }
        Ok(true)
    }

    /// Remove a message and all of its index entries.
    pub async fn remove(&self, queue: &str, id: &str) -> Result<bool, StoreError> {
        let Some(message) = self.get(queue, id).await? else {
            return Ok(false);
        };
        self.store
            .delete(&[keys::dlq_message(queue, id)])
            .await?;
        self.store.zrem(&keys::dlq_queue(queue), id).await?;
        self.store.zrem(&keys::dlq_retry(queue), id).await?;
        self.store
            .srem(&keys::dlq_status(queue, message.status.as_str()), id)
            .await?;
        Ok(true)
    }

    /// Messages whose `next_retry_at` has passed and that are not already
    /// being processed.
    pub async fn ready_for_retry(
        &self,
        queue: &str,
        now_ms: u64,
        limit: usize,
    ) -> Result<Vec<DlqMessage>, StoreError> {
        let ids = self
            .store
            .zrange_by_score(&keys::dlq_retry(queue), 0.0, now_ms as f64, Some(limit))
            .await?;
        let mut ready = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = self.get(queue, &id).await? {
                if message.status != MessageStatus::Processing {
                    ready.push(message);
                }
            } else {
                // Entry expired out from under the index.
                self.store.zrem(&keys::dlq_retry(queue), &id).await?;
            }
        }
        Ok(ready)
    }

    /// Live messages whose TTL deadline has passed.
    pub async fn expired(
        &self,
        queue: &str,
        now_ms: u64,
        limit: usize,
    ) -> Result<Vec<DlqMessage>, StoreError> {
        let mut out = Vec::new();
        for status in [MessageStatus::Pending, MessageStatus::Failed] {
            for message in self.list(queue, Some(status), limit, 0).await? {
                if message.is_expired(now_ms) {
                    out.push(message);
                    if out.len() == limit {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    /// List messages, optionally restricted to one status.
    pub async fn list(
        &self,
        queue: &str,
        status: Option<MessageStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqMessage>, StoreError> {
        let ids = match status {
            Some(status) => {
                let members = self
                    .store
                    .smembers(&keys::dlq_status(queue, status.as_str()))
                    .await?;
                members
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .collect::<Vec<_>>()
            }
            None => {
                let stop = (offset + limit) as i64 - 1;
                self.store
                    .zrange(&keys::dlq_queue(queue), offset as i64, stop)
                    .await?
            }
        };

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = self.get(queue, &id).await? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    pub async fn count_by_status(
        &self,
        queue: &str,
    ) -> Result<HashMap<MessageStatus, u64>, StoreError> {
        let mut counts = HashMap::new();
        for status in MessageStatus::ALL {
            let count = self
                .store
                .scard(&keys::dlq_status(queue, status.as_str()))
                .await?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    /// Delete messages inserted before `cutoff_ms`. Returns how many went.
    pub async fn cleanup_older_than(
        &self,
        queue: &str,
        cutoff_ms: u64,
    ) -> Result<u64, StoreError> {
        let ids = self
            .store
            .zrange_by_score(&keys::dlq_queue(queue), 0.0, cutoff_ms as f64, None)
            .await?;
        let mut removed = 0;
        for id in ids {
            if self.remove(queue, &id).await? {
                removed += 1;
            } else {
                self.store.zrem(&keys::dlq_queue(queue), &id).await?;
            }
        }
        Ok(removed)
    }
}
