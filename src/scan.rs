use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::protocol::{BasicInfo, CellVoltages, Command};
use crate::session::{Session, Transport, DEFAULT_COMMAND_TIMEOUT};

/// One decoded snapshot of a device.
#[derive(Debug, Clone)]
pub struct Telemetry {
    /// Transport address the snapshot was read from.
    pub address: String,
    pub basic: BasicInfo,
    /// Per-cell voltages in V; empty when the cell query failed.
    pub cells: Vec<f32>,
    pub captured_at: Instant,
}

/// Polls a set of devices one at a time and keeps the latest known-good
/// snapshot per device.
///
/// A failed poll never evicts an earlier snapshot; consumers always see the
/// last data that actually decoded.
pub struct Scanner<T: Transport> {
    transport: T,
    timeout: Duration,
    latest: HashMap<String, Telemetry>,
}

impl<T: Transport> Scanner<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            latest: HashMap::new(),
        }
    }

    /// Per-command deadline used for every exchange.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Latest known-good snapshot per device address.
    pub fn latest(&self) -> &HashMap<String, Telemetry> {
        &self.latest
    }

    /// Polls one device: open a link, run the queries, close the link.
    ///
    /// The link is handed back to the transport on every path, including
    /// failures mid-exchange.
    pub async fn scan_device(&mut self, address: &str) -> Result<Telemetry, Error> {
        let link = match self.transport.open(address).await {
            Ok(link) => link,
            Err(err) => {
                log::warn!("Failed to open link to {address}: {err}");
                return Err(Error::LinkUnavailable);
            }
        };

        let mut session = Session::new(link).await;
        let result = self.query(&mut session, address).await;
        self.transport.close(session.into_link()).await;

        let telemetry = result?;
        self.latest.insert(address.to_string(), telemetry.clone());
        Ok(telemetry)
    }

    /// Basic info is mandatory; cell voltages only enrich the snapshot.
    async fn query(
        &self,
        session: &mut Session<T::Link>,
        address: &str,
    ) -> Result<Telemetry, Error> {
        let rx_buffer = session.run_command(Command::BasicInfo, self.timeout).await?;
        let basic = BasicInfo::decode(&rx_buffer)?;

        let cells = match session.run_command(Command::CellVoltages, self.timeout).await {
            Ok(rx_buffer) => match CellVoltages::decode(&rx_buffer) {
                Ok(cells) => cells,
                Err(err) => {
                    log::warn!("Cell voltage decode failed for {address}: {err}");
                    Vec::new()
                }
            },
            Err(err) => {
                log::warn!("Cell voltage query failed for {address}: {err}");
                Vec::new()
            }
        };

        Ok(Telemetry {
            address: address.to_string(),
            basic,
            cells,
            captured_at: Instant::now(),
        })
    }
}
