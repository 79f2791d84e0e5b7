//! Background propagation worker.
//!
//! A dedicated thread owns its own copy of the element sets and its own
//! propagation library. The UI thread talks to it only through typed
//! messages; coordinate buffers are moved back, never shared.

use std::sync::mpsc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::propagation::{LibraryLoader, PreparedBatch, PropagationLibrary};
use crate::tle::ElementSetCollection;

pub enum WorkerRequest {
    SetElements(ElementSetCollection),
    Update { request_id: u64, timestamp: DateTime<Utc> },
}

#[derive(Debug, PartialEq)]
pub enum WorkerReply {
    Ready {
        generation: u64,
        library_supported: bool,
        count: usize,
    },
    Positions {
        generation: u64,
        request_id: u64,
        buffer: Vec<f32>,
        failures: usize,
    },
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("could not start worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker disconnected")]
    Disconnected,
}

pub struct PropagationWorker {
    requests: mpsc::Sender<WorkerRequest>,
    replies: mpsc::Receiver<WorkerReply>,
    _thread: JoinHandle<()>,
}

impl PropagationWorker {
    /// Starts the worker thread. The library is loaded inside the thread
    /// on the first `SetElements`, and its availability reported in the
    /// `Ready` reply.
    pub fn spawn(loader: LibraryLoader) -> Result<Self, WorkerError> {
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("propagation-worker".to_string())
            .spawn(move || run_worker(loader, request_rx, reply_tx))?;
        Ok(Self { requests: request_tx, replies: reply_rx, _thread: thread })
    }

    pub fn set_elements(&self, collection: ElementSetCollection) -> Result<(), WorkerError> {
        self.send(WorkerRequest::SetElements(collection))
    }

    pub fn request_update(&self, request_id: u64, timestamp: DateTime<Utc>) -> Result<(), WorkerError> {
        self.send(WorkerRequest::Update { request_id, timestamp })
    }

    fn send(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.requests.send(request).map_err(|_| WorkerError::Disconnected)
    }

    /// Non-blocking; `Ok(None)` when nothing is waiting.
    pub fn try_recv(&self) -> Result<Option<WorkerReply>, WorkerError> {
        match self.replies.try_recv() {
            Ok(reply) => Ok(Some(reply)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    #[cfg(test)]
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<WorkerReply>, WorkerError> {
        match self.replies.recv_timeout(timeout) {
            Ok(reply) => Ok(Some(reply)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Closes the request channel; the thread exits once it notices.
    /// Replies still in flight are dropped with the receiver.
    pub fn terminate(self) {
        log::debug!("terminating propagation worker");
    }
}

fn run_worker(
    loader: LibraryLoader,
    requests: mpsc::Receiver<WorkerRequest>,
    replies: mpsc::Sender<WorkerReply>,
) {
    let mut library: Option<Box<dyn PropagationLibrary>> = None;
    let mut load_attempted = false;
    let mut batch: Option<(u64, PreparedBatch)> = None;

    for request in requests.iter() {
        let reply = match request {
            WorkerRequest::SetElements(collection) => {
                if !load_attempted {
                    load_attempted = true;
                    library = match loader() {
                        Ok(lib) => Some(lib),
                        Err(e) => {
                            log::warn!("worker: {}", e);
                            None
                        }
                    };
                }
                let generation = collection.generation();
                batch = library
                    .as_deref()
                    .map(|lib| (generation, PreparedBatch::prepare(lib, collection.entries())));
                WorkerReply::Ready {
                    generation,
                    library_supported: library.is_some(),
                    count: collection.len(),
                }
            }
            WorkerRequest::Update { request_id, timestamp } => match (library.as_deref(), &batch) {
                (Some(lib), Some((generation, batch))) => {
                    let out = batch.compute(lib, timestamp);
                    WorkerReply::Positions {
                        generation: *generation,
                        request_id,
                        buffer: out.buffer,
                        failures: out.failures,
                    }
                }
                (None, _) if load_attempted => WorkerReply::Ready {
                    generation: batch.as_ref().map_or(0, |(g, _)| *g),
                    library_supported: false,
                    count: 0,
                },
                _ => {
                    log::debug!("worker: update {} before any element sets", request_id);
                    continue;
                }
            },
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::propagation::tests::{iss, iss_epoch};
    use crate::propagation::{sgp4_loader, PropagationError, Sgp4Library};
    use crate::tle::ElementSetEntry;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(10);

    fn collection(generation: u64) -> ElementSetCollection {
        ElementSetCollection::new(
            generation,
            vec![iss(), ElementSetEntry::placeholder("SYNTH-0"), iss()],
        )
    }

    #[test]
    fn acknowledges_elements_with_count() {
        let worker = PropagationWorker::spawn(sgp4_loader()).unwrap();
        worker.set_elements(collection(3)).unwrap();
        let reply = worker.recv_timeout(WAIT).unwrap();
        assert_eq!(
            reply,
            Some(WorkerReply::Ready { generation: 3, library_supported: true, count: 3 })
        );
    }

    #[test]
    fn worker_matches_main_thread_bit_for_bit() {
        let worker = PropagationWorker::spawn(sgp4_loader()).unwrap();
        let c = collection(1);
        worker.set_elements(c.clone()).unwrap();
        worker.request_update(7, iss_epoch()).unwrap();
        let _ready = worker.recv_timeout(WAIT).unwrap();

        let Some(WorkerReply::Positions { request_id, buffer, failures, generation }) =
            worker.recv_timeout(WAIT).unwrap()
        else {
            panic!("expected positions");
        };
        assert_eq!((request_id, generation, failures), (7, 1, 1));

        let local = PreparedBatch::prepare(&Sgp4Library, c.entries()).compute(&Sgp4Library, iss_epoch());
        assert_eq!(buffer.len(), 9);
        let same_bits = buffer.iter().zip(&local.buffer).all(|(a, b)| a.to_bits() == b.to_bits());
        assert!(same_bits, "{buffer:?} vs {:?}", local.buffer);
        assert_eq!(&buffer[3..6], &[0.0; 3]);
    }

    #[test]
    fn reports_unsupported_library() {
        let loader: crate::propagation::LibraryLoader =
            Arc::new(|| Err(PropagationError::LibraryUnavailable("no sgp4 here".to_string())));
        let worker = PropagationWorker::spawn(loader).unwrap();
        worker.set_elements(collection(2)).unwrap();
        worker.request_update(1, iss_epoch()).unwrap();
        assert_eq!(
            worker.recv_timeout(WAIT).unwrap(),
            Some(WorkerReply::Ready { generation: 2, library_supported: false, count: 3 })
        );
        assert_eq!(
            worker.recv_timeout(WAIT).unwrap(),
            Some(WorkerReply::Ready { generation: 0, library_supported: false, count: 0 })
        );
    }

    #[test]
    fn update_before_elements_is_ignored() {
        let worker = PropagationWorker::spawn(sgp4_loader()).unwrap();
        worker.request_update(1, iss_epoch()).unwrap();
        worker.set_elements(collection(5)).unwrap();
        let reply = worker.recv_timeout(WAIT).unwrap();
        assert!(matches!(reply, Some(WorkerReply::Ready { generation: 5, .. })));
    }

    #[test]
    fn empty_poll_is_not_an_error() {
        let worker = PropagationWorker::spawn(sgp4_loader()).unwrap();
        assert!(matches!(worker.try_recv(), Ok(None)));
        worker.terminate();
    }
}
