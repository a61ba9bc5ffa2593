// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial link to an FDL target.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, trace};
use serialport::SerialPort;

use fdl_common::config::{DataMode, FdlConfig};
use fdl_common::packet::{Codec, FrameDecoder, Response};
use fdl_common::protocol::{Command, ProtocolStage, ResponseTag};

/// Default timeout for serial operations in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Byte pipe under a [`Link`].
pub trait Port: Read + Write {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
    fn timeout(&self) -> Duration;
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;
}

impl Port for Box<dyn SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        SerialPort::set_timeout(self.as_mut(), timeout)
            .map_err(|e| anyhow!("Failed to set timeout: {}", e))
    }

    fn timeout(&self) -> Duration {
        SerialPort::timeout(self.as_ref())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        SerialPort::set_baud_rate(self.as_mut(), baud)
            .with_context(|| format!("Failed to switch to {} baud", baud))
    }
}

/// Framed request/response exchange with the target.
pub struct Link<P> {
    port: P,
    stage: ProtocolStage,
    data_mode: DataMode,
    codec: Codec,
    decoder: FrameDecoder,
}

/// Open `port_name` at `baud`.
pub fn open_serial(port_name: &str, baud: u32) -> Result<Box<dyn SerialPort>> {
    serialport::new(port_name, baud)
        .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
        .open()
        .with_context(|| format!("Failed to open serial port {}", port_name))
}

impl<P: Port> Link<P> {
    pub fn new(port: P, stage: ProtocolStage, data_mode: DataMode) -> Self {
        let config = FdlConfig {
            stage,
            data_mode,
            ..FdlConfig::default()
        };
        let codec = config.codec();
        Self {
            port,
            stage,
            data_mode,
            codec,
            decoder: codec.decoder(),
        }
    }

    pub fn stage(&self) -> ProtocolStage {
        self.stage
    }

    pub fn data_mode(&self) -> DataMode {
        self.data_mode
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    #[cfg(test)]
    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.port.set_baud_rate(baud)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all(bytes)
            .map_err(|e| anyhow!("Failed to write to serial port: {}", e))?;
        self.port.flush()?;
        Ok(())
    }

    pub fn send(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let frame = self
            .codec
            .encode_command(command, payload)
            .with_context(|| format!("Failed to encode {}", command.name()))?;
        trace!("tx {} ({} bytes)", command.name(), frame.len());
        self.write_all(&frame)
    }

    pub fn send_handshake(&mut self) -> Result<()> {
        let bytes = self.codec.encode_handshake();
        self.write_all(&bytes)
    }

    /// Bytes announced by a raw-mode MID_DATA.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("tx raw block ({} bytes)", bytes.len());
        self.write_all(bytes)
    }

    /// Wait for the next response frame.
    pub fn receive(&mut self) -> Result<Response> {
        self.decoder.reset();
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(1) => {}
                Ok(_) => bail!("Link closed while waiting for response"),
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    bail!("Timeout waiting for response");
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => bail!("Serial read error: {}", e),
            }
            match self.decoder.push(byte[0]) {
                None => {}
                Some(Ok(packet)) => {
                    let bytecode = packet.bytecode;
                    let response = Response::from_packet(packet)
                        .ok_or_else(|| anyhow!("Unknown response tag {:#06x}", bytecode))?;
                    trace!("rx {:?} ({} bytes)", response.tag, response.payload.len());
                    return Ok(response);
                }
                Some(Err(e)) => bail!("Bad response frame: {}", e),
            }
        }
    }

    pub fn request(&mut self, command: Command, payload: &[u8]) -> Result<Response> {
        self.send(command, payload)?;
        self.receive()
    }

    /// Send `command` and fail unless the reply carries `tag`.
    pub fn expect(&mut self, command: Command, payload: &[u8], tag: ResponseTag) -> Result<Response> {
        let response = self.request(command, payload)?;
        check(command.name(), &response, tag)?;
        Ok(response)
    }

    /// Like [`Link::expect`] with a longer timeout, for erase and repartition.
    pub fn expect_slow(
        &mut self,
        command: Command,
        payload: &[u8],
        tag: ResponseTag,
        timeout_ms: u64,
    ) -> Result<Response> {
        let old_timeout = self.port.timeout();
        self.port.set_timeout(Duration::from_millis(timeout_ms))?;
        let result = self.expect(command, payload, tag);
        let _ = self.port.set_timeout(old_timeout);
        result
    }
}

/// Fail with the tag's description unless `response` carries `tag`.
pub fn check(what: &str, response: &Response, tag: ResponseTag) -> Result<()> {
    if response.tag == tag {
        return Ok(());
    }
    debug!("{}: got {:?}, wanted {:?}", what, response.tag, tag);
    match response.as_text().filter(|t| !t.is_empty()) {
        Some(text) => bail!("{} failed: {} ({})", what, response.tag.description(), text),
        None => bail!("{} failed: {}", what, response.tag.description()),
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Replays scripted target bytes and records what the host wrote.
    #[derive(Default)]
    pub struct MockPort {
        pub input: VecDeque<u8>,
        pub output: Vec<u8>,
        pub baud: Option<u32>,
        timeout: Duration,
    }

    impl MockPort {
        pub fn reply(&mut self, codec: Codec, response: &Response) {
            self.input.extend(codec.encode_response(response).unwrap());
        }

        /// Commands the host sent, in order.
        pub fn sent(&self, codec: Codec) -> Vec<(Command, Vec<u8>)> {
            let mut decoder = codec.decoder();
            self.output
                .iter()
                .filter_map(|&b| decoder.push(b))
                .map(|frame| {
                    let frame = frame.unwrap();
                    (frame.command().unwrap(), frame.payload)
                })
                .collect()
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.input.len());
            if n == 0 {
                return Err(io::Error::new(ErrorKind::TimedOut, "no more input"));
            }
            for (dst, src) in buf.iter_mut().zip(self.input.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
            self.baud = Some(baud);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockPort;
    use super::*;

    fn link() -> Link<MockPort> {
        Link::new(MockPort::default(), ProtocolStage::Fdl2, DataMode::Packet)
    }

    #[test]
    fn test_expect_accepts_matching_tag() {
        let mut link = link();
        let codec = link.codec();
        link.port.reply(codec, &Response::okay());
        let response = link.expect(Command::Connect, &[], ResponseTag::Ack).unwrap();
        assert_eq!(response.as_text(), Some("okay"));
        assert_eq!(link.port().sent(codec), [(Command::Connect, vec![])]);
    }

    #[test]
    fn test_expect_reports_failure_tag() {
        let mut link = link();
        let codec = link.codec();
        link.port.reply(codec, &Response::empty(ResponseTag::InvalidPartition));
        let err = link
            .expect(Command::Erase, &[], ResponseTag::Ack)
            .unwrap_err()
            .to_string();
        assert_eq!(err, "ERASE failed: invalid partition ID");
    }

    #[test]
    fn test_noise_before_frame_is_skipped() {
        let mut link = link();
        let codec = link.codec();
        link.port.input.extend([0x00, 0x42, 0x13]);
        link.port.reply(codec, &Response::okay());
        assert!(link.receive().unwrap().is_ack());
    }

    #[test]
    fn test_timeout_without_reply() {
        let mut link = link();
        let err = link.request(Command::Connect, &[]).unwrap_err().to_string();
        assert_eq!(err, "Timeout waiting for response");
    }
}
