//! TCP transport implementation

use super::Transport;
use crate::error::{Error, Result};
use crate::net;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// TCP transport for the control and stream sockets
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to `host:port`.
    ///
    /// Resolution failure or an empty candidate set is
    /// [`Error::NetworkUnavailable`]; a refused/timed-out connect is
    /// [`Error::ConnectionFailed`]. The read timeout is kept short so
    /// session loops can poll their shutdown flags.
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::NetworkUnavailable(format!("cannot resolve {}: {}", host, e)))?
            .collect();
        let addr = net::select_remote_candidate(host, &candidates)?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(|e| {
            Error::ConnectionFailed(format!("connect to {} failed: {}", addr, e))
        })?;
        stream
            .set_read_timeout(Some(read_timeout))
            .map_err(Error::Io)?;
        // Control requests are small and latency-sensitive
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY: {}", e);
        }

        log::info!("Connected to {}", addr);
        Ok(TcpTransport { stream })
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.stream.read(buffer) {
            // A TCP read of zero bytes is the remote end closing
            Ok(0) => Err(Error::ConnectionClosed("eof".to_string())),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                Err(Error::ConnectionClosed(format!("reset: {}", e)))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self.stream.write(data) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::BrokenPipe
                    || e.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                Err(Error::ConnectionClosed(format!("write failed: {}", e)))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already gone is fine; shutdown is idempotent for callers
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
