//! Background write worker.
//!
//! Every write of a dataset, across all file sets, runs on one dedicated thread
//! in submission order. Producers enqueue and return immediately.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   unbounded channel    ┌─────────────────┐
//! │  put_image  │ ──Task::Run(job)────▶  │ Background      │
//! │  (caller)   │ ──Task::Barrier(tx)─▶  │ write thread    │
//! │             │ ◀────error slot─────   │ (TIFF append)   │
//! └─────────────┘   Arc<Mutex<Option>>   └─────────────────┘
//! ```
//!
//! # Error Handling
//!
//! A failed job does not stop the thread. The first failure is parked in an
//! error slot and handed to whichever caller next submits a job, waits on a
//! barrier, or shuts the worker down.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;

use super::error::StorageError;

/// Unit of work executed on the write thread
pub type Job = Box<dyn FnOnce() -> Result<(), StorageError> + Send + 'static>;

enum Task {
    Run(Job),
    Barrier(Sender<()>),
}

/// Single-threaded FIFO executor for dataset writes
pub struct WriteWorker {
    /// Channel sender (None after shutdown)
    sender: Option<Sender<Task>>,
    /// Background thread handle (None after shutdown)
    handle: Option<JoinHandle<usize>>,
    /// First unreported failure
    first_error: Arc<Mutex<Option<String>>>,
}

impl WriteWorker {
    /// Spawn the write thread.
    ///
    /// The thread is named `"mptiff-writer"`.
    pub fn spawn() -> Result<Self, StorageError> {
        let (sender, receiver) = unbounded::<Task>();
        let first_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let first_error_clone = Arc::clone(&first_error);

        let handle = thread::Builder::new()
            .name("mptiff-writer".to_string())
            .spawn(move || {
                let mut completed = 0usize;
                for task in receiver {
                    match task {
                        Task::Run(job) => {
                            if let Err(e) = job() {
                                log::error!("Background write failed: {}", e);
                                let mut slot = first_error_clone.lock();
                                if slot.is_none() {
                                    *slot = Some(e.to_string());
                                }
                            }
                            completed += 1;
                        }
                        Task::Barrier(done) => {
                            // The waiter may have given up; nothing to report then.
                            let _ = done.send(());
                        }
                    }
                }
                completed
            })
            .map_err(|e| {
                StorageError::BackgroundWriterError(format!("Failed to spawn writer thread: {}", e))
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            first_error,
        })
    }

    /// Report and clear a parked failure.
    pub fn check_error(&self) -> Result<(), StorageError> {
        match self.first_error.lock().take() {
            Some(err) => Err(StorageError::BackgroundWriterError(err)),
            None => Ok(()),
        }
    }

    /// Enqueue a job. Fails fast with a parked error from an earlier job.
    pub fn submit(&self, job: Job) -> Result<(), StorageError> {
        self.check_error()?;
        let sender = self.sender.as_ref().ok_or(StorageError::ReadOnly)?;
        sender.send(Task::Run(job)).map_err(|_| {
            StorageError::BackgroundWriterError(
                "Background writer thread exited unexpectedly".to_string(),
            )
        })
    }

    /// Block until every job submitted before this call has run.
    pub fn barrier(&self) -> Result<(), StorageError> {
        let sender = self.sender.as_ref().ok_or(StorageError::ReadOnly)?;
        let (done_tx, done_rx) = bounded(1);
        sender.send(Task::Barrier(done_tx)).map_err(|_| {
            StorageError::BackgroundWriterError(
                "Background writer thread exited unexpectedly".to_string(),
            )
        })?;
        done_rx.recv().map_err(|_| {
            StorageError::BackgroundWriterError("Barrier dropped by writer thread".to_string())
        })?;
        self.check_error()
    }

    /// Drain the queue, stop the thread, and report any parked failure.
    ///
    /// Returns the number of jobs the thread ran. Calling it again returns 0.
    pub fn shutdown(&mut self) -> Result<usize, StorageError> {
        self.sender.take();
        let Some(handle) = self.handle.take() else {
            return Ok(0);
        };
        let completed = handle.join().map_err(|_| StorageError::ThreadPanicked)?;
        self.check_error()?;
        Ok(completed)
    }

    /// Whether the worker still accepts jobs
    pub fn is_running(&self) -> bool {
        self.sender.is_some()
    }
}

impl Drop for WriteWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.sender.take();
            if let Some(handle) = self.handle.take() {
                log::warn!("WriteWorker dropped without shutdown(); draining queued writes");
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jobs_run_in_order() {
        let mut worker = WriteWorker::spawn().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let log = Arc::clone(&log);
            worker
                .submit(Box::new(move || {
                    log.lock().push(i);
                    Ok(())
                }))
                .unwrap();
        }
        worker.barrier().unwrap();
        assert_eq!(*log.lock(), (0..50).collect::<Vec<_>>());
        assert_eq!(worker.shutdown().unwrap(), 50);
    }

    #[test]
    fn test_error_surfaces_once_on_next_submit() {
        let worker = WriteWorker::spawn().unwrap();
        worker
            .submit(Box::new(|| Err(StorageError::InvalidImage("boom".to_string()))))
            .unwrap();
        assert!(matches!(
            worker.barrier(),
            Err(StorageError::BackgroundWriterError(msg)) if msg.contains("boom")
        ));
        // Reported once; the thread keeps serving.
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        worker
            .submit(Box::new(move || {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        worker.barrier().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_drains_and_refuses() {
        let mut worker = WriteWorker::spawn().unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let ran = Arc::clone(&ran);
            worker
                .submit(Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }
        worker.shutdown().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert!(!worker.is_running());
        assert!(matches!(
            worker.submit(Box::new(|| Ok(()))),
            Err(StorageError::ReadOnly)
        ));
        assert_eq!(worker.shutdown().unwrap(), 0);
    }
}
