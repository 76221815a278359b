//! Readiness notification for the process supervisor.
//!
//! Under systemd (`Type=notify`) the unit is considered started only after the
//! process sends `READY=1` to the socket named by `$NOTIFY_SOCKET`.

use crate::error::Result;
use std::env;
use tracing::{debug, info};

pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// Tells an external supervisor that the process is ready
pub trait ReadyNotifier: Send + Sync {
    /// Returns `Ok(true)` if a notification was delivered.
    fn notify_ready(&self) -> Result<bool>;
}

/// systemd `sd_notify` protocol over a unix datagram socket
#[derive(Debug, Clone, Default)]
pub struct SystemdNotifier {
    socket: Option<String>,
}

impl SystemdNotifier {
    /// Use the socket named by `$NOTIFY_SOCKET`, if any
    pub fn from_env() -> Self {
        Self {
            socket: env::var(NOTIFY_SOCKET_ENV)
                .ok()
                .filter(|socket| !socket.is_empty()),
        }
    }

    pub fn with_socket<S: Into<String>>(socket: S) -> Self {
        Self {
            socket: Some(socket.into()),
        }
    }

    #[cfg(unix)]
    fn send(socket: &str, message: &str) -> Result<()> {
        use std::os::unix::net::UnixDatagram;

        let datagram = UnixDatagram::unbound()?;
        if let Some(name) = socket.strip_prefix('@') {
            send_abstract(&datagram, name, message)?;
        } else {
            datagram.send_to(message.as_bytes(), socket)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn send(_socket: &str, _message: &str) -> Result<()> {
        Err(crate::error::ClusterError::system(
            "sd_notify is only supported on unix platforms",
        ))
    }
}

impl ReadyNotifier for SystemdNotifier {
    fn notify_ready(&self) -> Result<bool> {
        let Some(socket) = self.socket.as_deref() else {
            debug!("{} not set, skipping readiness notification", NOTIFY_SOCKET_ENV);
            return Ok(false);
        };

        Self::send(socket, "READY=1")?;
        info!("Sent readiness notification to {}", socket);
        Ok(true)
    }
}

#[cfg(target_os = "linux")]
fn send_abstract(
    datagram: &std::os::unix::net::UnixDatagram,
    name: &str,
    message: &str,
) -> std::io::Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    datagram.send_to_addr(message.as_bytes(), &addr)?;
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn send_abstract(
    _datagram: &std::os::unix::net::UnixDatagram,
    _name: &str,
    _message: &str,
) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "abstract notify sockets are only supported on linux",
    ))
}

/// Notifier for runs without a supervisor
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ReadyNotifier for NoopNotifier {
    fn notify_ready(&self) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixDatagram;

    #[test]
    fn test_notifier_without_socket_is_a_no_op() {
        let notifier = SystemdNotifier::default();
        assert!(!notifier.notify_ready().unwrap());
        assert!(!NoopNotifier.notify_ready().unwrap());
    }

    #[test]
    fn test_ready_message_reaches_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&path).unwrap();

        let notifier = SystemdNotifier::with_socket(path.to_string_lossy());
        assert!(notifier.notify_ready().unwrap());

        let mut buf = [0u8; 64];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"READY=1");
    }

    #[test]
    fn test_missing_socket_is_an_error() {
        let notifier = SystemdNotifier::with_socket("/nonexistent/notify.sock");
        assert!(notifier.notify_ready().is_err());
    }
}
