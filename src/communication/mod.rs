//! Line-oriented serial transport between the host and GRBL.
pub mod mock;
pub mod serial;

pub use mock::MockChannel;
pub use serial::SerialPortChannel;

use async_trait::async_trait;

/// A byte channel to the controller that can be read one line at a time.
///
/// Implementations are not expected to be shared; the driver owns one
/// behind a lock and never has two exchanges in flight.
#[async_trait]
pub trait SerialChannel: Send {
    /// Write all of `data`. No terminator is appended.
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Next line without its `\n`/`\r\n` terminator.
    ///
    /// Must be cancellation safe: if the future is dropped mid-line, the
    /// bytes already received are returned by the next call.
    /// End of stream is reported as `ErrorKind::UnexpectedEof`.
    async fn read_line(&mut self) -> std::io::Result<String>;

    async fn close(&mut self) -> std::io::Result<()>;
}
