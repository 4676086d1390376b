//! Serialization engine: a single FIFO queue fed by many TCP connections
//! and drained by exactly one worker that owns the RTU transport, so at
//! most one transaction is ever in flight on the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::protocol::synthesize_write_echo;
use crate::request::Request;
use crate::transport::RtuTransport;

pub struct SerializationEngine {
    sender: mpsc::Sender<Request>,
    accepting: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    queue_bound: usize,
}

impl SerializationEngine {
    /// Spawns the single worker task and returns a handle plus its
    /// `JoinHandle`, which the caller should await during graceful
    /// shutdown.
    pub fn spawn(transport: Box<dyn RtuTransport>, queue_bound: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_bound);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accepting = Arc::new(AtomicBool::new(true));

        let worker = tokio::spawn(Self::run(rx, shutdown_rx, transport));

        (
            Self {
                sender: tx,
                accepting,
                shutdown: shutdown_tx,
                queue_bound,
            },
            worker,
        )
    }

    /// Places `request` at the tail of the queue. Fails fast with
    /// `Backpressure` if the queue is full, or `ShuttingDown` if the
    /// engine has stopped accepting new work.
    pub fn submit(&self, request: Request) -> Result<()> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(GatewayError::ShuttingDown);
        }
        self.sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => GatewayError::Backpressure {
                bound: self.queue_bound,
            },
            mpsc::error::TrySendError::Closed(_) => GatewayError::ShuttingDown,
        })
    }

    /// Stops accepting new submissions and signals the worker to drain
    /// outstanding requests with `ShuttingDown` rather than transacting
    /// them, then close the transport.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        let _ = self.shutdown.send(true);
    }

    async fn run(
        mut rx: mpsc::Receiver<Request>,
        mut shutdown_rx: watch::Receiver<bool>,
        mut transport: Box<dyn RtuTransport>,
    ) {
        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_ok() && *shutdown_rx.borrow() {
                        break;
                    }
                }
                maybe_request = rx.recv() => {
                    match maybe_request {
                        Some(mut request) => {
                            request.mark_dequeued();
                            Self::process(transport.as_mut(), request).await;
                        }
                        None => return,
                    }
                }
            }
        }

        rx.close();
        while let Ok(request) = rx.try_recv() {
            if request.complete(Err(GatewayError::ShuttingDown)).is_err() {
                debug!("shutdown drain found an already-abandoned request");
            }
        }
    }

    async fn process(transport: &mut dyn RtuTransport, request: Request) {
        if let Some(dequeued_ns) = request.timestamps.dequeued_ns {
            let queued_us = dequeued_ns.saturating_sub(request.timestamps.enqueued_ns) / 1_000;
            debug!(unit_id = request.unit_id, queued_us, "dequeued request for transaction");
        }

        let outcome = match transport.transact(request.unit_id, &request.parsed.raw_pdu).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Ok(synthesize_write_echo(&request.parsed)),
            Err(e) => Err(e),
        };

        if request.complete(outcome).is_err() {
            debug!("completion receiver dropped, response abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_pdu;
    use crate::types::SessionState;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    struct FakeTransport {
        calls: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
        response: Vec<u8>,
    }

    #[async_trait]
    impl RtuTransport for FakeTransport {
        async fn ensure_open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn transact(&mut self, unit_id: u8, pdu: &[u8]) -> Result<Option<Vec<u8>>> {
            self.calls.lock().unwrap().push((unit_id, pdu.to_vec()));
            if unit_id == 0 {
                Ok(None)
            } else {
                Ok(Some(self.response.clone()))
            }
        }

        fn state(&self) -> SessionState {
            SessionState::Open
        }
    }

    fn make_request(unit_id: u8, pdu: &[u8]) -> (Request, oneshot::Receiver<crate::request::ResponseOutcome>) {
        let parsed = decode_pdu(pdu).unwrap();
        let (tx, rx) = oneshot::channel();
        (Request::new(unit_id, parsed, tx), rx)
    }

    #[tokio::test]
    async fn completes_request_with_transport_response() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = Box::new(FakeTransport {
            calls: calls.clone(),
            response: vec![0x03, 0x02, 0x00, 0x0A],
        });
        let (engine, worker) = SerializationEngine::spawn(transport, 16);

        let (request, rx) = make_request(17, &[0x03, 0x00, 0x14, 0x00, 0x01]);
        engine.submit(request).unwrap();

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap(), vec![0x03, 0x02, 0x00, 0x0A]);
        assert_eq!(calls.lock().unwrap().len(), 1);

        engine.shutdown();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn broadcast_completes_with_synthesized_echo() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = Box::new(FakeTransport {
            calls,
            response: vec![],
        });
        let (engine, worker) = SerializationEngine::spawn(transport, 16);

        let (request, rx) = make_request(0, &[0x0F, 0x03, 0xE9, 0x00, 0x08, 0x01, 0xFF]);
        engine.submit(request).unwrap();

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap(), vec![0x0F, 0x03, 0xE9, 0x00, 0x08]);

        engine.shutdown();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn requests_are_served_in_fifo_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = Box::new(FakeTransport {
            calls: calls.clone(),
            response: vec![0x03, 0x00],
        });
        let (engine, worker) = SerializationEngine::spawn(transport, 16);

        let (req_a, rx_a) = make_request(1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        let (req_b, rx_b) = make_request(2, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        engine.submit(req_a).unwrap();
        engine.submit(req_b).unwrap();

        rx_a.await.unwrap().unwrap();
        rx_b.await.unwrap().unwrap();

        let seen = calls.lock().unwrap();
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[1].0, 2);

        engine.shutdown();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn shutdown_drains_with_shutting_down_error() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = Box::new(FakeTransport {
            calls,
            response: vec![0x03, 0x00],
        });
        let (engine, worker) = SerializationEngine::spawn(transport, 16);

        engine.shutdown();
        let (request, rx) = make_request(1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        assert!(engine.submit(request).is_err());
        drop(rx);

        let _ = worker.await;
    }
}
