//! Debounced note persistence.
//!
//! Each document gets one tokio task fed through an mpsc channel. A snapshot
//! is written only after the document has been quiet for the debounce
//! interval; snapshots arriving inside the window replace the pending one
//! and restart the timer. A worker that finishes a write with nothing
//! queued exits; the next snapshot for that document starts a new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::blocks::Block;
use crate::error::AppResult;

/// Destination for settled snapshots. Called on the blocking pool.
pub trait NotesSink: Send + Sync + 'static {
    fn save(&self, paper_id: u64, blocks: Vec<Block>) -> AppResult<()>;
}

struct Worker {
    id: u64,
    tx: mpsc::UnboundedSender<Vec<Block>>,
    handle: JoinHandle<()>,
}

type Workers = Arc<Mutex<HashMap<u64, Worker>>>;

fn lock(workers: &Workers) -> MutexGuard<'_, HashMap<u64, Worker>> {
    workers.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Autosaver {
    debounce: Duration,
    sink: Arc<dyn NotesSink>,
    workers: Workers,
    next_worker: AtomicU64,
}

impl Autosaver {
    pub fn new(sink: Arc<dyn NotesSink>, debounce: Duration) -> Self {
        Self {
            debounce,
            sink,
            workers: Arc::new(Mutex::new(HashMap::new())),
            next_worker: AtomicU64::new(0),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Documents with a snapshot waiting or being written.
    pub fn active_documents(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Queue a snapshot of `paper_id`'s blocks. Must be called from within
    /// a tokio runtime.
    pub fn schedule(&self, paper_id: u64, blocks: Vec<Block>) {
        let mut workers = lock(&self.workers);

        let blocks = match workers.get(&paper_id) {
            Some(worker) => match worker.tx.send(blocks) {
                Ok(()) => return,
                // worker is gone; start a fresh one with the same snapshot
                Err(mpsc::error::SendError(blocks)) => blocks,
            },
            None => blocks,
        };

        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // a fresh unbounded channel with a live receiver cannot reject
        let _ = tx.send(blocks);
        let handle = tokio::spawn(debounce_loop(
            DebounceTask {
                paper_id,
                worker_id: id,
                debounce: self.debounce,
                sink: Arc::clone(&self.sink),
                workers: Arc::clone(&self.workers),
            },
            rx,
        ));
        workers.insert(paper_id, Worker { id, tx, handle });
    }

    /// Write every pending snapshot now and stop all workers.
    pub async fn flush(&self) {
        let drained: Vec<(u64, Worker)> = lock(&self.workers).drain().collect();

        for (paper_id, worker) in drained {
            drop(worker.tx);
            if let Err(e) = worker.handle.await {
                tracing::error!(paper_id, error = %e, "Autosave worker panicked");
            }
        }
    }
}

struct DebounceTask {
    paper_id: u64,
    worker_id: u64,
    debounce: Duration,
    sink: Arc<dyn NotesSink>,
    workers: Workers,
}

impl DebounceTask {
    /// Called after a write. Returns the next snapshot if one arrived in the
    /// meantime, otherwise unregisters this worker. Both happen under the
    /// registry lock, which `schedule` holds while sending.
    fn next_or_retire(&self, rx: &mut mpsc::UnboundedReceiver<Vec<Block>>) -> Option<Vec<Block>> {
        let mut workers = lock(&self.workers);
        if let Ok(next) = rx.try_recv() {
            return Some(next);
        }
        if workers.get(&self.paper_id).map(|w| w.id) == Some(self.worker_id) {
            workers.remove(&self.paper_id);
        }
        None
    }
}

async fn debounce_loop(task: DebounceTask, mut rx: mpsc::UnboundedReceiver<Vec<Block>>) {
    let Some(mut latest) = rx.recv().await else {
        return;
    };
    loop {
        let mut closed = false;
        loop {
            match tokio::time::timeout(task.debounce, rx.recv()).await {
                Ok(Some(newer)) => latest = newer,
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        write_snapshot(task.paper_id, latest, &task.sink).await;
        if closed {
            return;
        }
        match task.next_or_retire(&mut rx) {
            Some(next) => latest = next,
            None => return,
        }
    }
}

async fn write_snapshot(paper_id: u64, blocks: Vec<Block>, sink: &Arc<dyn NotesSink>) {
    let count = blocks.len();
    let sink = Arc::clone(sink);
    match tokio::task::spawn_blocking(move || sink.save(paper_id, blocks)).await {
        Ok(Ok(())) => tracing::debug!(paper_id, blocks = count, "Autosaved notes"),
        Ok(Err(e)) => tracing::warn!(paper_id, error = %e, "Autosave failed"),
        Err(e) => tracing::error!(paper_id, error = %e, "Autosave task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{BlockContent, BlockKind};

    #[derive(Default)]
    struct RecordingSink {
        saves: Mutex<Vec<(u64, Vec<Block>)>>,
    }

    impl NotesSink for RecordingSink {
        fn save(&self, paper_id: u64, blocks: Vec<Block>) -> AppResult<()> {
            self.saves.lock().unwrap().push((paper_id, blocks));
            Ok(())
        }
    }

    fn snapshot(s: &str) -> Vec<Block> {
        vec![Block::with_content(BlockContent::Text {
            content: s.to_string(),
        })]
    }

    fn saved_texts(sink: &RecordingSink) -> Vec<(u64, String)> {
        sink.saves
            .lock()
            .unwrap()
            .iter()
            .map(|(id, blocks)| {
                (
                    *id,
                    blocks[0].content.text().unwrap_or("").to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_burst_of_changes_saves_latest_once() {
        let sink = Arc::new(RecordingSink::default());
        let saver = Autosaver::new(sink.clone(), Duration::from_millis(80));

        saver.schedule(1, snapshot("a"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        saver.schedule(1, snapshot("ab"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        saver.schedule(1, snapshot("abc"));

        assert!(saved_texts(&sink).is_empty());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(saved_texts(&sink), vec![(1, "abc".to_string())]);
    }

    #[tokio::test]
    async fn test_separate_documents_save_independently() {
        let sink = Arc::new(RecordingSink::default());
        let saver = Autosaver::new(sink.clone(), Duration::from_millis(30));

        saver.schedule(1, snapshot("one"));
        saver.schedule(2, snapshot("two"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut saved = saved_texts(&sink);
        saved.sort();
        assert_eq!(
            saved,
            vec![(1, "one".to_string()), (2, "two".to_string())]
        );
    }

    #[tokio::test]
    async fn test_later_edits_after_idle_save_again() {
        let sink = Arc::new(RecordingSink::default());
        let saver = Autosaver::new(sink.clone(), Duration::from_millis(30));

        saver.schedule(5, snapshot("first"));
        tokio::time::sleep(Duration::from_millis(250)).await;
        saver.schedule(5, snapshot("second"));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(
            saved_texts(&sink),
            vec![(5, "first".to_string()), (5, "second".to_string())]
        );
    }

    #[tokio::test]
    async fn test_idle_workers_are_retired() {
        let sink = Arc::new(RecordingSink::default());
        let saver = Autosaver::new(sink.clone(), Duration::from_millis(20));

        for id in 0..10 {
            saver.schedule(id, snapshot("draft"));
        }
        assert_eq!(saver.active_documents(), 10);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(saved_texts(&sink).len(), 10);
        assert_eq!(saver.active_documents(), 0);

        saver.schedule(4, snapshot("again"));
        assert_eq!(saver.active_documents(), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(saved_texts(&sink).len(), 11);
        assert_eq!(saver.active_documents(), 0);
    }

    #[tokio::test]
    async fn test_flush_writes_pending_snapshot_immediately() {
        let sink = Arc::new(RecordingSink::default());
        let saver = Autosaver::new(sink.clone(), Duration::from_secs(60));

        saver.schedule(3, vec![Block::new(BlockKind::Todo)]);
        saver.flush().await;

        let saves = sink.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1[0].kind(), BlockKind::Todo);
    }
}
