//! The concrete check kinds: binary-on-PATH, file contents, and the
//! two-sided TCP port availability pair.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{Check, ClosableCheck};

const ECHO_PROBE: &str = "ECHO\n";

/// Verifies that an executable is available on the PATH.
#[derive(Debug)]
pub struct BinaryDependencyCheck {
    pub binary: String,
}

impl Check for BinaryDependencyCheck {
    fn name(&self) -> String {
        format!("{} exists", self.binary)
    }

    fn check(&self) -> Result<()> {
        let found = Command::new("which")
            .arg(&self.binary)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !found {
            bail!("install {:?}, as it was not found on the system", self.binary);
        }
        Ok(())
    }
}

/// Verifies that a file exists and its contents match a regular expression.
#[derive(Debug)]
pub struct FileContentCheck {
    pub file: PathBuf,
    pub search_string: String,
}

impl Check for FileContentCheck {
    fn name(&self) -> String {
        format!(
            "contents of {:?} match {:?}",
            self.file.display().to_string(),
            self.search_string
        )
    }

    fn check(&self) -> Result<()> {
        if !self.file.exists() {
            bail!(
                "attempted to validate file {:?}, but it doesn't exist",
                self.file.display().to_string()
            );
        }
        let re = Regex::new(&self.search_string)
            .with_context(|| format!("invalid search string {:?}", self.search_string))?;
        let contents = std::fs::read_to_string(&self.file)
            .with_context(|| format!("error reading {}", self.file.display()))?;
        if !re.is_match(&contents) {
            bail!(
                "searched {:?} with the expression {:?}, but no matches were found",
                self.file.display().to_string(),
                self.search_string
            );
        }
        Ok(())
    }
}

/// Binds the given port and echoes incoming bytes back until closed.
/// The listener stays open so the client side can verify reachability;
/// ownership ends when `close()` is called.
#[derive(Debug)]
pub struct TcpPortServerCheck {
    pub port: u16,
    shutdown: Arc<AtomicBool>,
}

impl TcpPortServerCheck {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Check for TcpPortServerCheck {
    fn name(&self) -> String {
        format!("TCP port {} bindable", self.port)
    }

    fn check(&self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).with_context(|| {
            format!(
                "attempted to bind port {} but failed; it may be in use by another process",
                self.port
            )
        })?;
        listener
            .set_nonblocking(true)
            .context("error configuring listener")?;
        let shutdown = Arc::clone(&self.shutdown);
        thread::spawn(move || {
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                match listener.accept() {
                    Ok((stream, _)) => {
                        thread::spawn(move || echo_until_closed(stream));
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(50));
                    }
                    Err(_) => return,
                }
            }
        });
        Ok(())
    }
}

impl ClosableCheck for TcpPortServerCheck {
    fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn echo_until_closed(mut stream: TcpStream) {
    if stream.set_nonblocking(false).is_err() {
        return;
    }
    let mut reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(_) => return,
    };
    let _ = io::copy(&mut reader, &mut stream);
}

/// Dials the port on a remote host, sends a probe, and verifies the echo.
#[derive(Debug)]
pub struct TcpPortClientCheck {
    pub port: u16,
    pub ip: String,
}

impl Check for TcpPortClientCheck {
    fn name(&self) -> String {
        format!("TCP port {} accessible", self.port)
    }

    fn check(&self) -> Result<()> {
        let addr = format!("{}:{}", self.ip, self.port);
        let mut stream = TcpStream::connect(&addr).with_context(|| {
            format!(
                "port {} on host {:?} is unreachable; a firewall may be blocking access, \
                 or nothing is listening on the other end",
                self.port, self.ip
            )
        })?;
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .context("error configuring connection")?;
        stream
            .write_all(ECHO_PROBE.as_bytes())
            .context("error writing probe")?;
        let mut response = String::new();
        BufReader::new(&stream)
            .read_line(&mut response)
            .context("error reading echo response")?;
        if response != ECHO_PROBE {
            bail!(
                "port {} on host {:?} did not send the expected response; response was {:?}",
                self.port,
                self.ip,
                response
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn binary_check_finds_sh() {
        let check = BinaryDependencyCheck { binary: "sh".into() };
        assert!(check.check().is_ok());
    }

    #[test]
    fn binary_check_rejects_missing_binary() {
        let check = BinaryDependencyCheck {
            binary: "definitely-not-a-real-binary".into(),
        };
        assert!(check.check().is_err());
    }

    #[test]
    fn file_content_check_matches_regex() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "net.ipv4.ip_forward = 1").unwrap();
        let check = FileContentCheck {
            file: file.path().to_path_buf(),
            search_string: r"ip_forward\s*=\s*1".into(),
        };
        assert!(check.check().is_ok());
    }

    #[test]
    fn file_content_check_fails_on_missing_file() {
        let check = FileContentCheck {
            file: PathBuf::from("/nonexistent/sysctl.conf"),
            search_string: ".*".into(),
        };
        assert!(check.check().is_err());
    }

    #[test]
    fn tcp_pair_echoes_and_fails_after_close() {
        let port = free_port();
        let server = TcpPortServerCheck::new(port);
        server.check().expect("server side should bind");

        let client = TcpPortClientCheck {
            port,
            ip: "127.0.0.1".into(),
        };
        // Server may need a moment to enter its accept loop
        let mut attempts = 0;
        loop {
            match client.check() {
                Ok(()) => break,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(50));
                }
                Err(err) => panic!("echo check never succeeded: {err:#}"),
            }
        }

        server.close().unwrap();
        // The accept loop polls every 50ms; give it time to drop the listener
        thread::sleep(Duration::from_millis(300));
        assert!(client.check().is_err());
    }
}
