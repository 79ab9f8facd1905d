//! 线程日志存储：thread_id → 消息日志
//!
//! 进程级映射。每个线程一把 tokio Mutex：同一 thread_id 的请求串行执行，不同线程互不阻塞。
//! 保留策略：单线程消息上限（ConversationMemory 剪枝）+ 空闲 TTL 淘汰。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::memory::{ConversationMemory, Message};

/// 保留策略
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// 单线程最多保留的消息条数
    pub max_messages: usize,
    /// 线程空闲超过该秒数后可被淘汰
    pub idle_ttl_secs: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_messages: 200,
            idle_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// 单个线程的日志
#[derive(Debug)]
pub struct ThreadLog {
    pub thread_id: String,
    pub memory: ConversationMemory,
    last_active: DateTime<Utc>,
}

impl ThreadLog {
    fn new(thread_id: &str, max_messages: usize) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            memory: ConversationMemory::new(max_messages),
            last_active: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }
}

/// 线程日志存储
#[derive(Debug)]
pub struct ThreadStore {
    threads: RwLock<HashMap<String, Arc<Mutex<ThreadLog>>>>,
    retention: RetentionPolicy,
}

impl ThreadStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// 取得线程日志的独占访问；首次使用时创建。持有期间同一线程的其它请求会等待
    pub async fn checkout(&self, thread_id: &str) -> OwnedMutexGuard<ThreadLog> {
        let entry = {
            let mut threads = self.threads.write().await;
            threads
                .entry(thread_id.to_string())
                .or_insert_with(|| {
                    tracing::debug!(thread_id, "creating thread log");
                    Arc::new(Mutex::new(ThreadLog::new(
                        thread_id,
                        self.retention.max_messages,
                    )))
                })
                .clone()
        };
        let mut guard = entry.lock_owned().await;
        guard.touch();
        guard
    }

    /// 线程历史快照；线程不存在时返回 None
    pub async fn history(&self, thread_id: &str) -> Option<Vec<Message>> {
        let entry = self.threads.read().await.get(thread_id).cloned()?;
        let log = entry.lock().await;
        Some(log.memory.messages().to_vec())
    }

    /// 淘汰空闲超过 TTL 的线程，正在使用（被 checkout 或持有引用）的线程跳过；返回淘汰数量
    pub async fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(self.retention.idle_ttl_secs);
        let mut threads = self.threads.write().await;
        let before = threads.len();
        threads.retain(|_, entry| {
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            match entry.try_lock() {
                Ok(log) => now - log.last_active() < ttl,
                Err(_) => true,
            }
        });
        let evicted = before - threads.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = threads.len(), "evicted idle threads");
        }
        evicted
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

impl Default for ThreadStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_checkout_creates_and_persists_log() {
        let store = ThreadStore::default();
        {
            let mut log = store.checkout("t1").await;
            log.memory.begin_turn(Message::user("hello"));
        }
        let history = store.history("t1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hello");
        assert!(store.history("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_same_thread_is_serialized() {
        let store = Arc::new(ThreadStore::default());
        let guard = store.checkout("t1").await;

        let store2 = store.clone();
        let waiter = tokio::spawn(async move {
            let mut log = store2.checkout("t1").await;
            log.memory.begin_turn(Message::user("second"));
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // 其它线程不受影响
        let other = tokio::time::timeout(Duration::from_millis(200), store.checkout("t2")).await;
        assert!(other.is_ok());
        drop(other);

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(store.history("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_evict_expired_skips_threads_in_use() {
        let store = ThreadStore::new(RetentionPolicy {
            max_messages: 10,
            idle_ttl_secs: 0,
        });
        drop(store.checkout("idle").await);
        let busy = store.checkout("busy").await;

        let evicted = store.evict_expired().await;
        assert_eq!(evicted, 1);
        assert_eq!(store.thread_count().await, 1);
        assert!(store.history("idle").await.is_none());
        drop(busy);
    }

    #[tokio::test]
    async fn test_fresh_threads_survive_eviction() {
        let store = ThreadStore::default();
        drop(store.checkout("a").await);
        assert_eq!(store.evict_expired().await, 0);
        assert_eq!(store.thread_count().await, 1);
    }
}
