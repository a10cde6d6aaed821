// THEORY:
// The parallel pipeline overlaps the stateless part of per-frame work with
// the stateful part. Preparing a frame (luminance and skin-tone planes) needs
// nothing but the frame, so it fans out over a pool of blocking workers.
// Everything after that (background model, classifier, tracker) depends on
// the previous frame and must see frames strictly in order.
//
// Key principles:
// 1.  **Bounded queues**: frames flow through bounded channels, so a fast
//     producer cannot run arbitrarily far ahead of the tracker.
// 2.  **Sequence numbers**: each frame is numbered on arrival. Prepared frames
//     come back in whatever order the workers finish, wait in a pending map,
//     and are released to the session only when their number is next.
// 3.  **Single owner**: the `AnalysisSession` lives on the consuming task
//     alone. Workers never see run state.
// 4.  **Frame-granular cancellation**: the flag is checked before each frame
//     is committed; everything before it stays committed and queryable.

use crate::config::AnalysisConfig;
use crate::core_modules::detector::PreparedFrame;
use crate::error::AnalysisError;
use crate::frame::Frame;
use crate::pipeline::{AnalysisResult, AnalysisSession, CancelFlag};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type PreparedResult = (u64, Result<PreparedFrame, String>);

/// A fixed set of workers fed round-robin by a dispatcher. The pool shuts
/// down once every clone of its task sender is dropped, and aborts its tasks
/// when dropped itself.
pub struct WorkerPool {
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        queue_depth: usize,
    ) -> (Self, mpsc::Sender<(u64, Frame)>, mpsc::Receiver<PreparedResult>) {
        let worker_count = worker_count.max(1);
        let queue_depth = queue_depth.max(1);
        let (task_sender, mut task_receiver) = mpsc::channel::<(u64, Frame)>(queue_depth);
        let (result_sender, result_receiver) = mpsc::channel::<PreparedResult>(queue_depth);
        let mut tasks = Vec::with_capacity(worker_count + 1);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::channel::<(u64, Frame)>(1))
            .unzip();

        // Dispatcher
        tasks.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if worker_senders[worker_idx].send(task).await.is_err() {
                    break;
                }
                worker_idx = (worker_idx + 1) % worker_senders.len();
            }
        }));

        // Workers
        for mut worker_receiver in worker_receivers {
            let result_sender = result_sender.clone();
            tasks.push(tokio::spawn(async move {
                while let Some((sequence, frame)) = worker_receiver.recv().await {
                    let prepared =
                        tokio::task::spawn_blocking(move || PreparedFrame::from_frame(&frame))
                            .await
                            .map_err(|e| e.to_string());
                    if result_sender.send((sequence, prepared)).await.is_err() {
                        break;
                    }
                }
            }));
        }

        (Self { tasks }, task_sender, result_receiver)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct ParallelPipeline {
    config: AnalysisConfig,
    workers: usize,
    queue_depth: usize,
}

impl ParallelPipeline {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        let workers = num_cpus::get().max(1);
        Ok(Self {
            config,
            workers,
            queue_depth: workers * 2,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self.queue_depth = self.workers * 2;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Analyzes a stream of frames. Same contract as [`crate::pipeline::analyze`].
    pub async fn run<S>(
        &self,
        frames: S,
        cancel: CancelFlag,
    ) -> Result<AnalysisResult, AnalysisError>
    where
        S: Stream<Item = Frame> + Send + 'static,
    {
        let mut session = AnalysisSession::new(self.config.clone())?;
        let (pool, task_sender, mut results) = WorkerPool::new(self.workers, self.queue_depth);
        info!(workers = self.workers, "parallel analysis started");

        // Producer: numbers frames in arrival order. Dropping its sender at the
        // end of the stream drains the pool and closes `results`.
        let producer = tokio::spawn(async move {
            let mut frames = Box::pin(frames);
            let mut sequence = 0u64;
            while let Some(frame) = frames.next().await {
                if task_sender.send((sequence, frame)).await.is_err() {
                    break;
                }
                sequence += 1;
            }
        });

        let mut pending: HashMap<u64, PreparedFrame> = HashMap::new();
        let mut next_expected = 0u64;
        let mut stopped = false;

        while !stopped {
            let Some((sequence, prepared)) = results.recv().await else {
                break;
            };
            let prepared = match prepared {
                Ok(prepared) => prepared,
                Err(reason) => {
                    producer.abort();
                    return Err(AnalysisError::Worker(reason));
                }
            };
            pending.insert(sequence, prepared);

            while let Some(prepared) = pending.remove(&next_expected) {
                if cancel.is_cancelled() {
                    session.cancel_at(prepared.frame.index);
                    stopped = true;
                    break;
                }
                if let Err(source) = session.push_prepared(&prepared) {
                    let frame = source.frame_index();
                    warn!(frame, error = %source, "frame rejected, aborting run");
                    producer.abort();
                    return Err(AnalysisError::Aborted {
                        source,
                        partial: Box::new(session.finish()),
                    });
                }
                debug!(sequence = next_expected, "frame committed");
                next_expected += 1;
            }
        }

        producer.abort();
        drop(pool);
        Ok(session.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_at_least_one() {
        let pipeline = ParallelPipeline::new(AnalysisConfig::default()).unwrap();
        assert!(pipeline.workers() >= 1);
        assert_eq!(pipeline.with_workers(0).workers(), 1);
    }

    #[tokio::test]
    async fn worker_pool_prepares_every_frame() {
        let (_pool, sender, mut results) = WorkerPool::new(3, 4);
        tokio::spawn(async move {
            for i in 0..6u64 {
                let frame = Frame::solid(i, i as f64, 4, 4, [255, 255, 255, 255]).unwrap();
                if sender.send((i, frame)).await.is_err() {
                    break;
                }
            }
        });
        let mut seen = Vec::new();
        while seen.len() < 6 {
            let (sequence, prepared) = results.recv().await.unwrap();
            assert_eq!(prepared.unwrap().luma.len(), 16);
            seen.push(sequence);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }
}
