// SPDX-License-Identifier: GPL-3.0-only
//! DDC/CI (Display Data Channel Command Interface) protocol implementation
//!
//! DDC/CI is a standard protocol for controlling monitors over the I2C bus
//! carried by the video cable. Frames look like
//!
//! ```text
//! request: 51 80|len opcode args.. chk   (chk = 6E ^ all bytes)
//! reply:   6E 80|len opcode args.. chk   (chk = 50 ^ all bytes)
//! ```
//!
//! Brightness is VCP feature 0x10. Its raw value is scaled against the
//! maximum the display reports in every "get VCP feature" reply.

use std::time::Duration;

use crate::error::{BrightnessError, Result};
use crate::monitor::{DeviceAddress, TransportKind};
use crate::transport::DdcBus;

use super::{DisplayProtocol, ProbeInfo, check_range, with_retry};

/// VCP (Virtual Control Panel) code for brightness
pub const BRIGHTNESS_CODE: u8 = 0x10;

/// Source address the host uses in requests
const HOST_ADDRESS: u8 = 0x51;
/// Display write address (0x37 << 1), seeds the request checksum
const DISPLAY_ADDRESS: u8 = 0x6E;
/// Virtual host address, seeds the reply checksum
const REPLY_CHECKSUM_SEED: u8 = 0x50;
const LENGTH_FLAG: u8 = 0x80;

const GET_VCP: u8 = 0x01;
const GET_VCP_REPLY: u8 = 0x02;
const SET_VCP: u8 = 0x03;
const CAPABILITIES: u8 = 0xF3;
const CAPABILITIES_REPLY: u8 = 0xE3;

/// Source, length, 8 payload bytes, checksum
const VCP_REPLY_LEN: usize = 11;
/// Largest capabilities fragment: source, length, 35 payload bytes, checksum
const CAPABILITIES_REPLY_LEN: usize = 38;
/// Fragments fetched before the capabilities string is considered runaway
const CAPABILITIES_FRAGMENT_LIMIT: usize = 40;

/// A request frame sent from host to display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdcRequest {
    GetVcp(u8),
    SetVcp(u8, u16),
    /// Capabilities fragment starting at the given offset
    Capabilities(u16),
}

impl DdcRequest {
    pub fn encode(&self) -> Vec<u8> {
        let body: Vec<u8> = match *self {
            DdcRequest::GetVcp(code) => vec![GET_VCP, code],
            DdcRequest::SetVcp(code, value) => {
                let [hi, lo] = value.to_be_bytes();
                vec![SET_VCP, code, hi, lo]
            }
            DdcRequest::Capabilities(offset) => {
                let [hi, lo] = offset.to_be_bytes();
                vec![CAPABILITIES, hi, lo]
            }
        };

        let mut frame = Vec::with_capacity(body.len() + 3);
        frame.push(HOST_ADDRESS);
        frame.push(LENGTH_FLAG | body.len() as u8);
        frame.extend_from_slice(&body);
        frame.push(checksum(DISPLAY_ADDRESS, &frame));
        frame
    }
}

/// XOR checksum over `bytes`, seeded with the addressing byte
pub fn checksum(seed: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(seed, |acc, b| acc ^ b)
}

/// Decoded "get VCP feature" reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VcpValue {
    pub current: u16,
    pub maximum: u16,
}

/// Validate framing and checksum of a reply, returning its payload
fn reply_payload(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < 3 {
        return Err(BrightnessError::Protocol(format!("short reply ({} bytes)", buf.len())));
    }
    if buf[1] & LENGTH_FLAG == 0 {
        return Err(BrightnessError::Protocol(format!("bad length byte {:#04x}", buf[1])));
    }

    let len = (buf[1] & !LENGTH_FLAG) as usize;
    if len == 0 {
        // Null message: the display is busy
        return Err(BrightnessError::Nak("display not ready".to_string()));
    }
    if buf.len() < len + 3 {
        return Err(BrightnessError::Protocol(format!(
            "reply truncated: need {} bytes, got {}",
            len + 3,
            buf.len()
        )));
    }

    let expected = checksum(REPLY_CHECKSUM_SEED, &buf[..len + 2]);
    if expected != buf[len + 2] {
        return Err(BrightnessError::Nak(format!(
            "checksum mismatch: expected {:#04x}, got {:#04x}",
            expected,
            buf[len + 2]
        )));
    }

    Ok(&buf[2..len + 2])
}

pub fn decode_vcp_reply(buf: &[u8], code: u8) -> Result<VcpValue> {
    let payload = reply_payload(buf)?;
    if payload.len() != 8 || payload[0] != GET_VCP_REPLY {
        return Err(BrightnessError::Protocol(format!(
            "unexpected reply opcode {:#04x} (len {})",
            payload[0],
            payload.len()
        )));
    }

    match payload[1] {
        0 => {}
        1 => {
            return Err(BrightnessError::Unsupported(format!(
                "VCP feature {:#04x}",
                code
            )));
        }
        other => {
            return Err(BrightnessError::Protocol(format!("result code {}", other)));
        }
    }

    if payload[2] != code {
        return Err(BrightnessError::Protocol(format!(
            "reply for feature {:#04x}, expected {:#04x}",
            payload[2], code
        )));
    }

    Ok(VcpValue {
        maximum: u16::from_be_bytes([payload[4], payload[5]]),
        current: u16::from_be_bytes([payload[6], payload[7]]),
    })
}

/// Decode one capabilities fragment into (offset, data)
pub fn decode_capabilities_fragment(buf: &[u8]) -> Result<(u16, Vec<u8>)> {
    let payload = reply_payload(buf)?;
    if payload.len() < 3 || payload[0] != CAPABILITIES_REPLY {
        return Err(BrightnessError::Protocol(format!(
            "unexpected capabilities reply opcode {:#04x}",
            payload[0]
        )));
    }

    let offset = u16::from_be_bytes([payload[1], payload[2]]);
    Ok((offset, payload[3..].to_vec()))
}

/// Model name from an MCCS capabilities string
pub fn parse_model(caps: &str) -> Option<String> {
    match mccs_caps::parse_capabilities(caps.trim_end_matches('\0')) {
        Ok(parsed) => parsed
            .model
            .map(|model| model.trim().to_string())
            .filter(|model| !model.is_empty()),
        Err(e) => {
            debug!("Unparsable capabilities string: {}", e);
            None
        }
    }
}

fn value_to_percent(value: u16, maximum: u16) -> u16 {
    let percent = (value as u32 * 100 + maximum as u32 / 2) / maximum as u32;
    percent.min(100) as u16
}

fn percent_to_value(percent: u16, maximum: u16) -> u16 {
    ((percent as u32 * maximum as u32 + 50) / 100) as u16
}

/// DDC/CI display on one I2C bus
pub struct DdcCiDisplay<B: DdcBus> {
    bus: B,
    name: Option<String>,
    /// Last maximum reported for the brightness feature
    max_value: Option<u16>,
    retry_delay: Duration,
}

impl<B: DdcBus> DdcCiDisplay<B> {
    pub fn new(bus: B, retry_delay: Duration) -> Self {
        Self {
            bus,
            name: None,
            max_value: None,
            retry_delay,
        }
    }

    fn read_vcp(&mut self, code: u8) -> Result<VcpValue> {
        self.bus.write(&DdcRequest::GetVcp(code).encode())?;
        let mut buf = [0u8; VCP_REPLY_LEN];
        let n = self.bus.read(&mut buf)?;
        decode_vcp_reply(&buf[..n], code)
    }

    fn write_vcp(&mut self, code: u8, value: u16) -> Result<()> {
        self.bus.write(&DdcRequest::SetVcp(code, value).encode())?;
        Ok(())
    }

    /// Read the full capabilities string, fragment by fragment
    pub fn read_capabilities(&mut self) -> Result<String> {
        let mut caps = Vec::new();
        let mut offset: u16 = 0;

        for _ in 0..CAPABILITIES_FRAGMENT_LIMIT {
            self.bus.write(&DdcRequest::Capabilities(offset).encode())?;
            let mut buf = [0u8; CAPABILITIES_REPLY_LEN];
            let n = self.bus.read(&mut buf)?;
            let (reply_offset, data) = decode_capabilities_fragment(&buf[..n])?;

            if reply_offset != offset {
                return Err(BrightnessError::Protocol(format!(
                    "capabilities fragment at offset {}, expected {}",
                    reply_offset, offset
                )));
            }
            if data.is_empty() {
                let caps = String::from_utf8_lossy(&caps).into_owned();
                trace!("i2c-{} capabilities: {}", self.bus.bus(), caps);
                return Ok(caps);
            }

            offset += data.len() as u16;
            caps.extend_from_slice(&data);
        }

        Err(BrightnessError::Protocol(
            "capabilities string incomplete or too long".to_string(),
        ))
    }

    fn read_brightness_raw(&mut self) -> Result<VcpValue> {
        let delay = self.retry_delay;
        let value = with_retry(delay, || self.read_vcp(BRIGHTNESS_CODE))?;
        if value.maximum == 0 {
            return Err(BrightnessError::Unsupported(
                "display reports a zero brightness maximum".to_string(),
            ));
        }
        self.max_value = Some(value.maximum);
        Ok(value)
    }
}

impl<B: DdcBus> DisplayProtocol for DdcCiDisplay<B> {
    fn transport(&self) -> TransportKind {
        TransportKind::DdcCi
    }

    fn address(&self) -> DeviceAddress {
        DeviceAddress::I2c { bus: self.bus.bus() }
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn probe(&mut self) -> Result<ProbeInfo> {
        let delay = self.retry_delay;
        match with_retry(delay, || self.read_capabilities()) {
            Ok(caps) => {
                self.name = parse_model(&caps);
                if self.name.is_none() {
                    debug!("i2c-{}: capabilities carry no model name", self.bus.bus());
                }
            }
            Err(e) => {
                debug!("i2c-{}: capabilities query failed: {}", self.bus.bus(), e);
            }
        }

        let brightness = self.get_brightness()?;
        Ok(ProbeInfo {
            name: self.name.clone(),
            brightness,
        })
    }

    fn get_brightness(&mut self) -> Result<u16> {
        let value = self.read_brightness_raw()?;
        Ok(value_to_percent(value.current, value.maximum))
    }

    fn set_brightness(&mut self, value: u16) -> Result<()> {
        let value = check_range(value)?;
        let maximum = match self.max_value {
            Some(max) => max,
            None => self.read_brightness_raw()?.maximum,
        };

        let raw = percent_to_value(value, maximum);
        let delay = self.retry_delay;
        with_retry(delay, || self.write_vcp(BRIGHTNESS_CODE, raw))?;

        debug!(
            "Set i2c-{} brightness to {}% (raw {}/{})",
            self.bus.bus(),
            value,
            raw,
            maximum
        );
        Ok(())
    }
}

impl<B: DdcBus> std::fmt::Debug for DdcCiDisplay<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DdcCiDisplay(bus: {}, name: {:?})",
            self.bus.bus(),
            self.name
        )
    }
}
