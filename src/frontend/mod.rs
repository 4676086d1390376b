//! TCP frontend: terminates Modbus TCP, decodes MBAP+PDU frames, bridges
//! each decoded request to the serialization engine, and encodes the
//! response back onto the originating socket.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::dedup::WriteDedupCache;
use crate::engine::SerializationEngine;
use crate::error::GatewayError;
use crate::protocol::{self, decode_pdu, encode_exception, synthesize_write_echo, try_parse_mbap};
use crate::request::Request;

/// Shared state every connection task needs: the engine to submit work to,
/// the dedup cache to consult before enqueuing writes, and the end-to-end
/// deadline each request gets before the TCP handler abandons its wait.
pub struct FrontendContext {
    pub engine: Arc<SerializationEngine>,
    pub dedup: Arc<WriteDedupCache>,
    pub gateway_timeout: Duration,
}

/// Accepts connections on `listener` until `shutdown` fires, spawning one
/// task per connection so cross-connection concurrency is unbounded while
/// a single connection still processes its own requests in arrival order.
pub async fn serve(listener: TcpListener, ctx: Arc<FrontendContext>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_ok() && *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "tcp client connected");
                        let ctx = ctx.clone();
                        let conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, ctx, conn_shutdown).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
    info!("tcp frontend stopped accepting connections");
}

async fn handle_connection(mut socket: TcpStream, ctx: Arc<FrontendContext>, mut shutdown: watch::Receiver<bool>) {
    let mut buf = BytesMut::with_capacity(512);
    let mut chunk = [0u8; 512];

    loop {
        match try_parse_mbap(&buf) {
            Ok(Some((frame, consumed))) => {
                let transaction_id = frame.transaction_id;
                let unit_id = frame.unit_id;
                let pdu = frame.pdu.to_vec();
                buf.advance(consumed);

                let response_pdu = process_frame(&ctx, unit_id, &pdu).await;
                let response = protocol::encode_response(transaction_id, unit_id, &response_pdu);
                if let Err(e) = socket.write_all(&response).await {
                    debug!(error = %e, "failed to write response, closing connection");
                    return;
                }
                continue;
            }
            Ok(None) => {} // need more bytes
            Err(e) => {
                debug!(error = %e, "malformed mbap frame, closing connection");
                return;
            }
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_ok() && *shutdown.borrow() {
                    return;
                }
            }
            read = socket.read(&mut chunk) => {
                match read {
                    Ok(0) => return, // client disconnected
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "read error, closing connection");
                        return;
                    }
                }
            }
        }
    }
}

/// Decodes, dedups, dispatches and awaits one PDU, always producing a
/// response PDU — a success payload or an exception, never a dropped
/// connection (other than on I/O errors or true client disconnect).
async fn process_frame(ctx: &FrontendContext, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let parsed = match decode_pdu(pdu) {
        Ok(parsed) => parsed,
        Err(e) => {
            let function_code = pdu.first().copied().unwrap_or(0);
            return encode_exception(function_code, e.modbus_exception_code());
        }
    };

    if unit_id == 0 && parsed.write_values.is_none() {
        return encode_exception(
            parsed.function_code,
            GatewayError::IllegalDataValue {
                reason: "reads are not valid against the broadcast unit".into(),
            }
            .modbus_exception_code(),
        );
    }

    if let Some(values) = &parsed.write_values {
        if ctx.dedup.should_skip(unit_id, parsed.address, parsed.kind, values).await {
            return synthesize_write_echo(&parsed);
        }
    }

    let (tx, rx) = oneshot::channel();
    let function_code = parsed.function_code;
    let write_values = parsed.write_values.clone();
    let address = parsed.address;
    let kind = parsed.kind;
    let request = Request::new(unit_id, parsed, tx);

    if let Err(e) = ctx.engine.submit(request) {
        return encode_exception(function_code, e.modbus_exception_code());
    }

    match tokio::time::timeout(ctx.gateway_timeout, rx).await {
        Ok(Ok(Ok(payload))) => {
            if let Some(values) = write_values {
                ctx.dedup.record_success(unit_id, address, kind, values).await;
            }
            payload
        }
        Ok(Ok(Err(e))) => encode_exception(function_code, e.modbus_exception_code()),
        Ok(Err(_)) => encode_exception(function_code, 0x0B),
        Err(_) => {
            // Deadline hit before the worker signalled completion. The
            // worker is not notified: it cannot safely abort mid-frame.
            // `rx` is dropped here, so whenever the worker does finish it
            // finds the receiver gone and discards the result.
            encode_exception(
                function_code,
                GatewayError::GatewayTimeout {
                    deadline_ms: ctx.gateway_timeout.as_millis() as u64,
                }
                .modbus_exception_code(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::transport::RtuTransport;
    use crate::types::SessionState;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoTransport;

    #[async_trait]
    impl RtuTransport for EchoTransport {
        async fn ensure_open(&mut self) -> crate::error::Result<()> {
            Ok(())
        }

        async fn transact(&mut self, unit_id: u8, pdu: &[u8]) -> crate::error::Result<Option<Vec<u8>>> {
            if unit_id == 0 {
                Ok(None)
            } else {
                Ok(Some(pdu.to_vec()))
            }
        }

        fn state(&self) -> SessionState {
            SessionState::Open
        }
    }

    fn test_ctx() -> Arc<FrontendContext> {
        let (engine, _worker) = SerializationEngine::spawn(Box::new(EchoTransport), 16);
        let clock = Arc::new(FakeClock::new(0));
        Arc::new(FrontendContext {
            engine: Arc::new(engine),
            dedup: Arc::new(WriteDedupCache::new(200, 4096, clock)),
            gateway_timeout: Duration::from_millis(500),
        })
    }

    #[tokio::test]
    async fn read_request_round_trips_through_echo_transport() {
        let ctx = test_ctx();
        let pdu = [0x03, 0x00, 0x14, 0x00, 0x01];
        let response = process_frame(&ctx, 17, &pdu).await;
        assert_eq!(response, pdu.to_vec());
    }

    #[tokio::test]
    async fn read_against_broadcast_unit_is_rejected() {
        let ctx = test_ctx();
        let pdu = [0x03, 0x00, 0x14, 0x00, 0x01];
        let response = process_frame(&ctx, 0, &pdu).await;
        assert_eq!(response[0], 0x03 | 0x80);
        assert_eq!(response[1], 0x03);
    }

    #[tokio::test]
    async fn broadcast_write_completes_without_a_bus_reply() {
        let ctx = test_ctx();
        let pdu = [0x0F, 0x03, 0xE9, 0x00, 0x08, 0x01, 0xFF];
        let response = process_frame(&ctx, 0, &pdu).await;
        assert_eq!(response, vec![0x0F, 0x03, 0xE9, 0x00, 0x08]);
    }

    #[tokio::test]
    async fn repeat_write_within_ttl_is_served_from_dedup_cache() {
        let ctx = test_ctx();
        let pdu = [0x05, 0x03, 0xE9, 0xFF, 0x00];

        let first = process_frame(&ctx, 17, &pdu).await;
        let second = process_frame(&ctx, 17, &pdu).await;
        assert_eq!(first, second);
        assert_eq!(first, pdu.to_vec());
    }

    #[tokio::test]
    async fn unsupported_function_code_yields_illegal_function_exception() {
        let ctx = test_ctx();
        let pdu = [0x07];
        let response = process_frame(&ctx, 17, &pdu).await;
        assert_eq!(response, vec![0x07 | 0x80, 0x01]);
    }
}
