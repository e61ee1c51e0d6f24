//! Pre-flight detection of processes already listening on the proxy ports.

use std::fmt;
use std::process::Command;

use crate::errors::{Error, Result};

/// A process found listening on a checked port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub process: String,
    pub pid: Option<u32>,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "{} (PID {})", self.process, pid),
            None => write!(f, "{}", self.process),
        }
    }
}

/// Return the process listening on the given TCP port, or `None` if the
/// port is free. Uses the OS socket enumeration (`lsof`) restricted to
/// LISTEN-state sockets: an enumeration without that filter also reports
/// outbound connections whose ephemeral source port happens to match,
/// which would be a false conflict.
pub fn check_port(port: u16) -> Result<Option<PortInfo>> {
    if port == 0 {
        return Err(Error::config("invalid port number: 0"));
    }

    let output = Command::new("lsof")
        .args(["-i", &format!(":{}", port), "-sTCP:LISTEN", "-P", "-n"])
        .output()
        .map_err(|e| Error::internal(format!("running lsof: {}", e)))?;

    if !output.status.success() {
        // lsof exits 1 when nothing matched, i.e. the port is free.
        if output.status.code() == Some(1) {
            return Ok(None);
        }
        return Err(Error::internal(format!("running lsof: {}", output.status)));
    }

    Ok(parse_lsof_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Extract process name and PID from lsof output. Only `(LISTEN)` lines
/// count.
fn parse_lsof_output(output: &str) -> Option<PortInfo> {
    let mut lines = output.trim().lines();
    let _header = lines.next()?;

    // Columns: COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME
    for line in lines {
        if !line.contains("(LISTEN)") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let process = fields.next()?.to_string();
        let pid = fields.next().and_then(|p| p.parse().ok());
        return Some(PortInfo { process, pid });
    }
    None
}
