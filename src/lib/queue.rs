use std::collections::VecDeque;

use tokio::sync::Mutex;

/// FIFO queue shared between request handlers (producers) and a processing
/// loop (consumer).
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn enqueue(&self, item: T) {
        self.items.lock().await.push_back(item);
    }

    pub async fn dequeue(&self) -> Option<T> {
        self.items.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
