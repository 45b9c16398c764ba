//! Binary layout of the exchange daemon's shared structures.
//!
//! Sizes and offsets follow the daemon's C structures as laid out by the
//! 64-bit Linux ABI. All fields are read in native byte order at explicit
//! offsets; nothing is reinterpreted as a Rust struct.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// `struct pbx_msg`
pub const MSG_SIZE: usize = 268;
/// `struct pbx_sys`, which follows the registration records.
pub const SYS_SIZE: usize = 432;
/// `struct pbx_reg`
pub const REG_SIZE: usize = 312;
/// `struct pbx_call`
pub const CALL_SIZE: usize = 288;

/// Message queue protocol version.
pub const PBX_VERSION: u8 = 1;
/// `PBX_RELOAD` request type.
pub const PBX_RELOAD: u32 = 3;

/// Byte offsets inside one registration record.
mod offsets {
    /// `u32`, updated atomically by the daemon.
    pub const COUNT: usize = 0;
    /// `sockaddr_storage`, 128 bytes.
    pub const ADDRESS: usize = 24;
    pub const AGENT: usize = 152;
    pub const AGENT_LEN: usize = 32;
    pub const TOKEN: usize = 256;
    pub const TOKEN_LEN: usize = 40;
    /// `u16`
    pub const LINES: usize = 296;
    /// `enum {GONE, HERE, AWAY, DND}`
    pub const PRESENCE: usize = 300;
}

// Linux address family numbers.
const AF_INET: u16 = 2;
const AF_INET6: u16 = 10;

/// Decoded registration record for one extension slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySlot {
    pub count: u32,
    pub lines: u16,
    pub presence: u32,
    pub agent: String,
    pub token: String,
    pub address: Option<IpAddr>,
}

impl RegistrySlot {
    /// Decode one record; `None` unless exactly [`REG_SIZE`] bytes are given.
    pub fn parse(record: &[u8]) -> Option<Self> {
        if record.len() != REG_SIZE {
            return None;
        }
        Some(Self {
            count: read_u32(record, offsets::COUNT),
            lines: read_u16(record, offsets::LINES),
            presence: read_u32(record, offsets::PRESENCE),
            agent: read_cstr(&record[offsets::AGENT..offsets::AGENT + offsets::AGENT_LEN]),
            token: read_cstr(&record[offsets::TOKEN..offsets::TOKEN + offsets::TOKEN_LEN]),
            address: read_address(&record[offsets::ADDRESS..]),
        })
    }

    /// Presence label as the daemon reports it. Call activity overrides the
    /// user-set state.
    pub fn presence_label(&self) -> &'static str {
        if self.count >= u32::from(self.lines) {
            return "busy";
        }
        if self.count > 0 {
            return "call";
        }
        match self.presence {
            0 => "gone",
            2 => "away",
            3 => "dnd",
            _ => "here",
        }
    }

    /// Numeric host of the registered address, `unknown` for other families.
    pub fn host(&self) -> String {
        match self.address {
            Some(addr) => addr.to_string(),
            None => "unknown".to_string(),
        }
    }
}

/// Byte image of a `PBX_RELOAD` queue message.
pub fn reload_message() -> [u8; MSG_SIZE] {
    let mut msg = [0u8; MSG_SIZE];
    msg[0..4].copy_from_slice(&PBX_RELOAD.to_ne_bytes());
    msg[4] = PBX_VERSION;
    msg
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn read_address(sa: &[u8]) -> Option<IpAddr> {
    match read_u16(sa, 0) {
        AF_INET => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&sa[4..8]);
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        AF_INET6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&sa[8..24]);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
