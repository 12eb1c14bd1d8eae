// src/communication/serial.rs - SerialChannel over a real port using serial2-tokio
use super::SerialChannel;
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Longest run of bytes without a newline kept while waiting for one.
/// GRBL lines are well under this; anything longer is line noise, usually
/// from a baud rate mismatch.
const MAX_PENDING: usize = 1024;

/// Serial port connection to the GRBL controller.
pub struct SerialPortChannel {
    port: Option<SerialPort>,
    name: String,
    /// Bytes received but not yet returned as a complete line.
    pending: Vec<u8>,
}

impl SerialPortChannel {
    pub fn open(port_name: &str, baud_rate: u32) -> io::Result<Self> {
        tracing::info!("Opening serial port {} at {} baud", port_name, baud_rate);
        let port = SerialPort::open(port_name, baud_rate)?;
        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
            pending: Vec::new(),
        })
    }

    pub fn available_ports() -> Vec<String> {
        match SerialPort::available_ports() {
            Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate serial ports: {}", e);
                vec![]
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn port(&mut self) -> io::Result<&mut SerialPort> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        let text = String::from_utf8_lossy(&line);
        Some(text.trim_end_matches(['\r', '\n']).to_string())
    }

    fn buffer(&mut self, data: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(data);
        if self.pending.len() > MAX_PENDING && !self.pending.contains(&b'\n') {
            let discarded = self.pending.len();
            self.pending.clear();
            tracing::warn!("Discarded {} bytes without a line break from {}", discarded, self.name);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no line break within {} bytes; check the baud rate", MAX_PENDING),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SerialChannel for SerialPortChannel {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        AsyncWriteExt::write_all(&mut *port, data).await?;
        AsyncWriteExt::flush(&mut *port).await
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            // Partial lines stay in `pending`, so dropping this future only
            // loses the read that had not completed yet.
            let n = AsyncReadExt::read(self.port()?, &mut chunk).await?;
            if n == 0 {
                tracing::info!("Serial connection closed by remote");
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed"));
            }
            tracing::trace!("Read {} bytes from serial", n);
            self.buffer(&chunk[..n])?;
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::info!("Closing serial port {}", self.name);
            AsyncWriteExt::flush(&mut port).await?;
        }
        self.pending.clear();
        Ok(())
    }
}

impl std::fmt::Debug for SerialPortChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortChannel")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .finish()
    }
}
