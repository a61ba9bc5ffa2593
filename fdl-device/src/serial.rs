// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial port transport (UART, USB CDC or a pty).

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use serialport::SerialPort;

use fdl_common::transport::{Transport, TransportError};

/// Largest single read handed to the engine.
pub const MAX_PACKET_SIZE: usize = 512;

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port_name: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            .timeout(Duration::from_millis(100))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;
        debug!("serial: opened {} at {} baud", port_name, baud);
        Ok(Self { port })
    }

    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_else(|| "?".to_string())
    }
}

fn map_io(e: std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
        ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof | ErrorKind::NotConnected => {
            TransportError::Closed
        }
        _ => TransportError::Io(e.to_string()),
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError> {
        self.port
            .set_timeout(Duration::from_millis(timeout_ms as u64))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => match map_io(e) {
                TransportError::Timeout => Ok(0),
                other => Err(other),
            },
        }
    }

    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, TransportError> {
        self.port
            .set_timeout(Duration::from_millis(timeout_ms as u64))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.port.write_all(buf).map_err(map_io)?;
        self.port.flush().map_err(map_io)?;
        Ok(buf.len())
    }

    fn max_packet_size(&self) -> usize {
        MAX_PACKET_SIZE
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        self.port.set_baud_rate(baud).map_err(|e| {
            warn!("serial: cannot switch to {} baud: {}", baud, e);
            TransportError::Io(e.to_string())
        })?;
        debug!("serial: now at {} baud", baud);
        Ok(())
    }
}
