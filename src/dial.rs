//! Dial layer: a process-wide registry of named dial functions plus a
//! default TCP dialer, grounded on `examples/original_source/driver.go`'s
//! `RegisterDialContext`/`dials` map (`sync.RWMutex`-guarded in the
//! original, `std::sync::RwLock` here).

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use crate::error::{Error, Result};

/// Anything a connection can be opened over. `TcpStream` implements this
/// directly; a custom dialer can return a Unix socket, a proxied tunnel,
/// or an in-memory pipe for tests.
pub trait Transport: std::io::Read + std::io::Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()>;
    fn set_write_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }
}

pub trait Dialer: Send + Sync {
    fn dial(&self, address: &str, connect_timeout: Option<Duration>) -> Result<Box<dyn Transport>>;
}

struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, address: &str, connect_timeout: Option<Duration>) -> Result<Box<dyn Transport>> {
        let stream = match connect_timeout {
            Some(timeout) => {
                let mut addrs = std::net::ToSocketAddrs::to_socket_addrs(address)
                    .map_err(Error::Io)?;
                let addr = addrs
                    .next()
                    .ok_or_else(|| Error::Protocol(format!("no address found for {address}")))?;
                TcpStream::connect_timeout(&addr, timeout).map_err(Error::Io)?
            }
            None => TcpStream::connect(address).map_err(Error::Io)?,
        };
        stream.set_nodelay(true).map_err(Error::Io)?;
        Ok(Box::new(stream))
    }
}

#[derive(Default)]
pub struct DialerRegistry {
    named: RwLock<HashMap<String, Arc<dyn Dialer>>>,
}

impl DialerRegistry {
    pub fn new() -> Self {
        Self {
            named: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) a named dial function, callable later by
    /// setting `Config::dialer_name`.
    pub fn register(&self, name: impl Into<String>, dialer: Arc<dyn Dialer>) {
        let mut guard = self.named.write().expect("dialer registry lock poisoned");
        guard.insert(name.into(), dialer);
    }

    pub fn deregister(&self, name: &str) {
        let mut guard = self.named.write().expect("dialer registry lock poisoned");
        guard.remove(name);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Dialer>> {
        let guard = self.named.read().expect("dialer registry lock poisoned");
        guard
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Dsn(format!("no dialer registered under '{name}'")))
    }

    pub fn default_dialer(&self) -> Arc<dyn Dialer> {
        Arc::new(TcpDialer)
    }
}

/// The process-wide registry every `Config` consults unless it names a
/// private one.
pub fn global_registry() -> &'static DialerRegistry {
    static REGISTRY: OnceLock<DialerRegistry> = OnceLock::new();
    REGISTRY.get_or_init(DialerRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FakeTransport(Cursor<Vec<u8>>);

    impl std::io::Read for FakeTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl std::io::Write for FakeTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Transport for FakeTransport {
        fn set_read_timeout(&self, _timeout: Option<Duration>) -> std::io::Result<()> {
            Ok(())
        }
        fn set_write_timeout(&self, _timeout: Option<Duration>) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FakeDialer;

    impl Dialer for FakeDialer {
        fn dial(&self, _address: &str, _connect_timeout: Option<Duration>) -> Result<Box<dyn Transport>> {
            Ok(Box::new(FakeTransport(Cursor::new(Vec::new()))))
        }
    }

    #[test]
    fn unregistered_dialer_name_is_an_error() {
        let registry = DialerRegistry::new();
        assert!(registry.get("does-not-exist").is_err());
    }

    #[test]
    fn register_then_get_round_trips() {
        let registry = DialerRegistry::new();
        registry.register("fake", Arc::new(FakeDialer));
        assert!(registry.get("fake").is_ok());
        registry.deregister("fake");
        assert!(registry.get("fake").is_err());
    }
}
