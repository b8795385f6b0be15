use crate::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const FRAME_START: u8 = 0xDD;
pub const FRAME_READ: u8 = 0xA5;
pub const FRAME_WRITE: u8 = 0x5A;
pub const FRAME_END: u8 = 0x77;

/// Fixed per-frame overhead: start marker, command echo, two length bytes,
/// two checksum bytes and the end marker.
pub const FRAME_OVERHEAD: usize = 7;

/// Hardware ceiling for the number of cells a pack reports.
pub const MAX_CELLS: usize = 32;

/// Protocol commands never exceed this size on the wire.
pub const MAX_COMMAND_LENGTH: usize = 20;

/// Read commands understood by the BMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    BasicInfo = 0x03,
    CellVoltages = 0x04,
    HardwareVersion = 0x05,
}

/// Builds the 7-byte command frame for a read command.
///
/// Zero-length command frames carry the 16-bit two's complement of the
/// command byte itself as checksum, not a sum over the frame bytes.
pub fn create_command(command: Command) -> Vec<u8> {
    let cmd = command as u8;
    let checksum = (0x10000u32 - u32::from(cmd)) as u16;
    vec![
        FRAME_START,
        FRAME_READ,
        cmd,
        0x00,
        (checksum >> 8) as u8,
        checksum as u8,
        FRAME_END,
    ]
}

/// Sum over all bytes except the two checksum bytes and the end marker,
/// then the 16-bit two's complement.
pub(crate) fn calc_checksum(buffer: &[u8]) -> u16 {
    let mut sum: u16 = 0;
    for b in &buffer[..buffer.len() - 3] {
        sum = sum.wrapping_add(u16::from(*b));
    }
    (!sum).wrapping_add(1)
}

fn validate_checksum(buffer: &[u8]) -> std::result::Result<(), Error> {
    let calculated = calc_checksum(buffer);
    let received = u16::from_be_bytes([buffer[buffer.len() - 3], buffer[buffer.len() - 2]]);
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} buffer={buffer:02X?}"
        );
        return Err(Error::MalformedFrame("checksum mismatch"));
    }
    Ok(())
}

/// Checks the frame envelope and returns the declared payload length.
fn validate_frame(buffer: &[u8], echo: Command) -> std::result::Result<usize, Error> {
    if buffer.len() < FRAME_OVERHEAD {
        log::warn!("Frame too short - received={}", buffer.len());
        return Err(Error::MalformedFrame("frame shorter than 7 bytes"));
    }
    if buffer[0] != FRAME_START {
        return Err(Error::MalformedFrame("missing start marker"));
    }
    if buffer[buffer.len() - 1] != FRAME_END {
        return Err(Error::MalformedFrame("missing end marker"));
    }
    if buffer[1] != echo as u8 {
        log::warn!(
            "Command echo mismatch - expected={:02X} received={:02X}",
            echo as u8,
            buffer[1]
        );
        return Err(Error::MalformedFrame("command echo mismatch"));
    }
    let declared = usize::from(u16::from_be_bytes([buffer[2], buffer[3]]));
    if buffer.len() < declared + FRAME_OVERHEAD {
        log::warn!(
            "Declared length inconsistent - declared={} received={}",
            declared,
            buffer.len()
        );
        return Err(Error::MalformedFrame("declared length exceeds frame"));
    }
    validate_checksum(buffer)?;
    Ok(declared)
}

/// Charge/discharge FET state decoded from the status byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SwitchStatus {
    pub charge_enabled: bool,
    pub discharge_enabled: bool,
}

impl SwitchStatus {
    fn from_status_byte(byte: u8) -> Self {
        Self {
            charge_enabled: byte & 0x01 != 0,
            discharge_enabled: byte & 0x02 != 0,
        }
    }
}

/// Pack-level readings from the basic info response.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BasicInfo {
    /// Pack voltage in V.
    pub voltage: f32,
    /// Pack current in A, negative while discharging.
    pub current: f32,
    /// Remaining capacity in Ah.
    pub remaining_ah: f32,
    /// Nominal capacity in Ah.
    pub nominal_ah: f32,
    /// Power in W, derived from voltage and current.
    pub watts: f32,
    /// State of charge in percent, 0 when the nominal capacity is unknown.
    pub soc_percent: f32,
    /// Temperature in °C, 0 when the device omits the field.
    pub temperature: f32,
    pub switches: SwitchStatus,
}

impl BasicInfo {
    pub fn request() -> Vec<u8> {
        create_command(Command::BasicInfo)
    }

    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Self, Error> {
        let declared = validate_frame(rx_buffer, Command::BasicInfo)?;
        if declared < 8 {
            log::warn!("Basic info payload too short - declared={declared}");
            return Err(Error::MalformedFrame("basic info payload too short"));
        }

        let voltage = u16::from_be_bytes([rx_buffer[4], rx_buffer[5]]) as f32 / 100.0;
        let current = i16::from_be_bytes([rx_buffer[6], rx_buffer[7]]) as f32 / 100.0;
        let remaining_ah = u16::from_be_bytes([rx_buffer[8], rx_buffer[9]]) as f32 / 100.0;
        let nominal_ah = u16::from_be_bytes([rx_buffer[10], rx_buffer[11]]) as f32 / 100.0;
        let watts = voltage * current;
        let soc_percent = if nominal_ah > 0.0 {
            100.0 * remaining_ah / nominal_ah
        } else {
            0.0
        };

        // Payload lengths vary between firmware revisions. The switch and
        // temperature fields sit at fixed absolute offsets and degrade to
        // defaults when the payload ends before them.
        let len = rx_buffer.len();
        let switches = if 24 < len - 3 {
            SwitchStatus::from_status_byte(rx_buffer[24])
        } else {
            log::debug!("Switch status absent, using defaults - frame length={len}");
            SwitchStatus::default()
        };
        let temperature = if 27 + 1 < len - 3 {
            // Raw value is in deci-Kelvin.
            (f32::from(u16::from_be_bytes([rx_buffer[27], rx_buffer[28]])) - 2731.0) * 0.1
        } else {
            log::debug!("Temperature absent, using default - frame length={len}");
            0.0
        };

        Ok(Self {
            voltage,
            current,
            remaining_ah,
            nominal_ah,
            watts,
            soc_percent,
            temperature,
            switches,
        })
    }
}

pub struct CellVoltages;

impl CellVoltages {
    pub fn request() -> Vec<u8> {
        create_command(Command::CellVoltages)
    }

    /// Decodes per-cell voltages in V, in wire order. Cells beyond the
    /// hardware ceiling of 32 are truncated, not an error.
    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Vec<f32>, Error> {
        let declared = validate_frame(rx_buffer, Command::CellVoltages)?;
        let n_cells = (declared / 2).min(MAX_CELLS);
        let mut result = Vec::with_capacity(n_cells);
        for i in 0..n_cells {
            let offset = 4 + 2 * i;
            let volt = u16::from_be_bytes([rx_buffer[offset], rx_buffer[offset + 1]]) as f32 / 1000.0;
            log::trace!("Cell #{} volt={}", i + 1, volt);
            result.push(volt);
        }
        Ok(result)
    }
}
