//! Async RTU serial transport over `tokio_serial`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::protocol::{append_crc, verify_and_strip_crc};
use crate::types::{SerialParity, SessionState};

use super::RtuTransport;

const RTU_BITS_PER_CHAR: u32 = 11;

#[derive(Debug, Clone)]
pub struct SerialTransportConfig {
    pub port_path: String,
    pub baud_rate: u32,
    pub byte_size: u8,
    pub parity: SerialParity,
    pub stop_bits: u8,
    pub response_timeout: Duration,
    pub turnaround: Duration,
    pub open_retry_attempts: u32,
    pub open_retry_delay: Duration,
    pub reconnect_delay: Duration,
}

impl From<&GatewayConfig> for SerialTransportConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            port_path: config.serial_port.clone(),
            baud_rate: config.serial_baud,
            byte_size: config.serial_bytesize,
            parity: config.parsed_parity().unwrap_or(SerialParity::None),
            stop_bits: config.serial_stopbits,
            response_timeout: Duration::from_millis(config.serial_timeout_ms),
            turnaround: Duration::from_millis(config.rtu_turnaround_ms),
            open_retry_attempts: config.reconnect_max_attempts,
            open_retry_delay: Duration::from_millis(config.serial_open_retry_delay_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }
}

/// Inter-character and inter-frame quiet-time thresholds, per Modbus RTU
/// framing: 1.5 character times signals a broken frame, 3.5 signals the
/// end of one. Fixed at 750us/1750us above 19200 baud.
fn frame_timing(baud_rate: u32) -> (Duration, Duration) {
    if baud_rate <= 19_200 {
        let sec_per_char = RTU_BITS_PER_CHAR as f64 / baud_rate as f64;
        (
            Duration::from_secs_f64(sec_per_char * 1.5),
            Duration::from_secs_f64(sec_per_char * 3.5),
        )
    } else {
        (Duration::from_micros(750), Duration::from_micros(1750))
    }
}

pub struct SerialTransport {
    config: SerialTransportConfig,
    port: Option<tokio_serial::SerialStream>,
    state: SessionState,
    t1_5: Duration,
    t3_5: Duration,
    last_transaction_end: Option<Instant>,
}

impl SerialTransport {
    pub fn new(config: SerialTransportConfig) -> Self {
        let (t1_5, t3_5) = frame_timing(config.baud_rate);
        Self {
            config,
            port: None,
            state: SessionState::Closed,
            t1_5,
            t3_5,
            last_transaction_end: None,
        }
    }

    async fn open_port(&self) -> Result<tokio_serial::SerialStream> {
        let parity = match self.config.parity {
            SerialParity::None => tokio_serial::Parity::None,
            SerialParity::Even => tokio_serial::Parity::Even,
            SerialParity::Odd => tokio_serial::Parity::Odd,
        };
        let stop_bits = match self.config.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };
        let data_bits = match self.config.byte_size {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        tokio_serial::new(&self.config.port_path, self.config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.config.response_timeout)
            .open_native_async()
            .map_err(|e| GatewayError::RtuIoError {
                unit_id: 0,
                reason: format!("open {}: {e}", self.config.port_path),
            })
    }

    async fn pace_turnaround(&mut self) {
        if let Some(last_end) = self.last_transaction_end {
            let elapsed = last_end.elapsed();
            if elapsed < self.config.turnaround {
                tokio::time::sleep(self.config.turnaround - elapsed).await;
            }
        }
    }

    fn mark_degraded(&mut self, reason: &str) {
        warn!(reason, "rtu session degraded, forcing reopen on next transaction");
        self.state = SessionState::Degraded;
        self.port = None;
    }

    async fn read_frame(port: &mut tokio_serial::SerialStream, t1_5: Duration, t3_5: Duration) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(256);
        let mut chunk = [0u8; 256];
        let mut last_byte_at: Option<Instant> = None;
        let silence = tokio::time::sleep(t3_5);
        tokio::pin!(silence);

        loop {
            tokio::select! {
                res = port.read(&mut chunk) => {
                    let n = res?;
                    if n == 0 {
                        return Ok(buf);
                    }
                    let now = Instant::now();
                    if let Some(last) = last_byte_at {
                        if now.duration_since(last) > t1_5 {
                            return Err(std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                "inter-character gap exceeded 1.5 char times",
                            ));
                        }
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    last_byte_at = Some(now);
                    silence.as_mut().reset(now + t3_5);
                }
                _ = &mut silence => {
                    return Ok(buf);
                }
            }
        }
    }
}

#[async_trait]
impl RtuTransport for SerialTransport {
    async fn ensure_open(&mut self) -> Result<()> {
        if self.state == SessionState::Open {
            return Ok(());
        }
        if self.state == SessionState::Degraded {
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
        self.state = SessionState::Connecting;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.open_port().await {
                Ok(port) => {
                    debug!(port = %self.config.port_path, "rtu serial port opened");
                    self.port = Some(port);
                    self.state = SessionState::Open;
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.open_retry_attempts {
                        self.state = SessionState::Degraded;
                        return Err(GatewayError::RtuUnavailable { reason: e.to_string() });
                    }
                    tokio::time::sleep(self.config.open_retry_delay).await;
                }
            }
        }
    }

    async fn transact(&mut self, unit_id: u8, pdu: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open().await?;
        self.pace_turnaround().await;

        let mut frame = Vec::with_capacity(pdu.len() + 3);
        frame.push(unit_id);
        frame.extend_from_slice(pdu);
        append_crc(&mut frame);

        let port = self.port.as_mut().ok_or_else(|| GatewayError::RtuUnavailable {
            reason: "serial port not open".into(),
        })?;

        debug!(unit_id, frame = %hex::encode(&frame), "writing rtu frame");
        if let Err(e) = port.write_all(&frame).await {
            self.mark_degraded(&e.to_string());
            return Err(GatewayError::RtuIoError {
                unit_id,
                reason: e.to_string(),
            });
        }

        if unit_id == 0 {
            // Broadcast: no response expected. Any framing noise on the
            // line afterward is not attributed to this transaction.
            self.last_transaction_end = Some(Instant::now());
            return Ok(None);
        }

        let read = tokio::time::timeout(
            self.config.response_timeout,
            Self::read_frame(port, self.t1_5, self.t3_5),
        )
        .await;
        self.last_transaction_end = Some(Instant::now());

        let raw = match read {
            Err(_) => {
                self.mark_degraded("response timeout");
                return Err(GatewayError::RtuIoError {
                    unit_id,
                    reason: "response timeout".into(),
                });
            }
            Ok(Err(e)) => {
                self.mark_degraded(&e.to_string());
                return Err(GatewayError::RtuIoError {
                    unit_id,
                    reason: e.to_string(),
                });
            }
            Ok(Ok(bytes)) => bytes,
        };

        if raw.len() < 4 {
            self.mark_degraded("short frame");
            return Err(GatewayError::RtuIoError {
                unit_id,
                reason: format!("short frame: {} bytes", raw.len()),
            });
        }

        let payload = match verify_and_strip_crc(&raw) {
            Ok(payload) => payload,
            Err((expected, actual)) => {
                self.mark_degraded("crc mismatch");
                return Err(GatewayError::CrcError { expected, actual });
            }
        };

        if payload[0] != unit_id {
            self.mark_degraded("unit id mismatch");
            return Err(GatewayError::RtuIoError {
                unit_id,
                reason: format!("unit id mismatch: expected {unit_id}, got {}", payload[0]),
            });
        }

        let function_code = payload[1];
        if function_code & 0x80 != 0 {
            let exception_code = *payload.get(2).unwrap_or(&0);
            return Err(GatewayError::ModbusException {
                function_code: function_code & 0x7F,
                exception_code,
            });
        }

        Ok(Some(payload[1..].to_vec()))
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timing_uses_char_time_at_low_baud() {
        let (t1_5, t3_5) = frame_timing(9600);
        assert!(t1_5.as_micros() > 0);
        assert!(t3_5 > t1_5);
    }

    #[test]
    fn frame_timing_is_fixed_above_19200_baud() {
        let (t1_5, t3_5) = frame_timing(115_200);
        assert_eq!(t1_5, Duration::from_micros(750));
        assert_eq!(t3_5, Duration::from_micros(1750));
    }

    #[test]
    fn new_transport_starts_closed() {
        let config = SerialTransportConfig {
            port_path: "/dev/null".into(),
            baud_rate: 9600,
            byte_size: 8,
            parity: SerialParity::None,
            stop_bits: 1,
            response_timeout: Duration::from_millis(500),
            turnaround: Duration::from_millis(10),
            open_retry_attempts: 3,
            open_retry_delay: Duration::from_millis(100),
            reconnect_delay: Duration::from_millis(500),
        };
        let transport = SerialTransport::new(config);
        assert_eq!(transport.state(), SessionState::Closed);
    }
}
