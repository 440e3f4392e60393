//! Minimal mDNS responder
//!
//! Announces the update endpoint as `<hostname>.local` and as an
//! `_http._tcp` service instance while the node waits in update mode. Only
//! questions are answered; there is no probing and no unsolicited
//! announcement.

use core::fmt::Write as _;

use heapless::String;
use thiserror_no_std::Error;

pub const MDNS_PORT: u16 = 5353;
pub const MDNS_GROUP: [u8; 4] = [224, 0, 0, 251];
/// TTL of every record we publish.
pub const RECORD_TTL_SECS: u32 = 120;
pub const SERVICE_NAME: &str = "_http._tcp.local";

const HEADER_LEN: usize = 12;
const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_JUMPS: usize = 16;
const RESPONSE_FLAGS: u16 = 0x8400;
const CACHE_FLUSH: u16 = 0x8000;
const UNICAST_RESPONSE: u16 = 0x8000;
const CLASS_IN: u16 = 1;

const TYPE_A: u16 = 1;
const TYPE_PTR: u16 = 12;
const TYPE_TXT: u16 = 16;
const TYPE_SRV: u16 = 33;
const TYPE_ANY: u16 = 255;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdnsError {
    #[error("hostname is not a valid DNS label")]
    InvalidHostname,
    #[error("packet truncated")]
    Truncated,
    #[error("malformed name in packet")]
    BadName,
    #[error("response does not fit the output buffer")]
    BufferTooSmall,
}

/// Records selected for a response.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Selection {
    a: bool,
    ptr: bool,
    srv: bool,
    txt: bool,
}

impl Selection {
    fn is_empty(&self) -> bool {
        !(self.a || self.ptr || self.srv || self.txt)
    }

    fn count(&self) -> u16 {
        u16::from(self.a) + u16::from(self.ptr) + u16::from(self.srv) + u16::from(self.txt)
    }
}

pub struct MdnsResponder {
    host_name: String<{ MAX_LABEL_LEN + 6 }>,
    instance_name: String<{ MAX_LABEL_LEN + 18 }>,
    address: [u8; 4],
    port: u16,
}

impl MdnsResponder {
    /// `hostname` is a single label, e.g. `bb-webupdate`.
    pub fn new(hostname: &str, address: [u8; 4], port: u16) -> Result<Self, MdnsError> {
        let valid = !hostname.is_empty()
            && hostname.len() <= MAX_LABEL_LEN
            && hostname.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
        if !valid {
            return Err(MdnsError::InvalidHostname);
        }

        let mut host_name = String::new();
        let mut instance_name = String::new();
        write!(host_name, "{hostname}.local").map_err(|_| MdnsError::InvalidHostname)?;
        write!(instance_name, "{hostname}.{SERVICE_NAME}")
            .map_err(|_| MdnsError::InvalidHostname)?;

        Ok(Self {
            host_name,
            instance_name,
            address,
            port,
        })
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Build the answer to `query` into `out`.
    ///
    /// Returns the response length, or `None` when nothing in the packet is
    /// for us (including packets that are themselves responses).
    pub fn respond(&self, query: &[u8], out: &mut [u8]) -> Result<Option<usize>, MdnsError> {
        let header = query.get(..HEADER_LEN).ok_or(MdnsError::Truncated)?;
        let flags = u16::from_be_bytes([header[2], header[3]]);
        if flags & 0x8000 != 0 {
            return Ok(None);
        }
        let questions = u16::from_be_bytes([header[4], header[5]]);

        let mut answers = Selection::default();
        let mut pos = HEADER_LEN;
        let mut name: String<MAX_NAME_LEN> = String::new();
        for _ in 0..questions {
            name.clear();
            pos = read_name(query, pos, &mut name)?;
            let fields = query.get(pos..pos + 4).ok_or(MdnsError::Truncated)?;
            let qtype = u16::from_be_bytes([fields[0], fields[1]]);
            let qclass = u16::from_be_bytes([fields[2], fields[3]]) & !UNICAST_RESPONSE;
            pos += 4;

            if qclass != CLASS_IN && qclass != TYPE_ANY {
                continue;
            }
            let wants = |t: u16| qtype == t || qtype == TYPE_ANY;
            if name.eq_ignore_ascii_case(&self.host_name) {
                answers.a |= wants(TYPE_A);
            } else if name.eq_ignore_ascii_case(SERVICE_NAME) {
                answers.ptr |= wants(TYPE_PTR);
            } else if name.eq_ignore_ascii_case(&self.instance_name) {
                answers.srv |= wants(TYPE_SRV);
                answers.txt |= wants(TYPE_TXT);
            }
        }

        if answers.is_empty() {
            return Ok(None);
        }

        // A service browse gets everything needed to connect in one packet
        let additional = if answers.ptr {
            Selection {
                a: !answers.a,
                ptr: false,
                srv: !answers.srv,
                txt: !answers.txt,
            }
        } else {
            Selection::default()
        };

        let mut writer = Writer::new(out);
        writer.u16(0)?;
        writer.u16(RESPONSE_FLAGS)?;
        writer.u16(0)?;
        writer.u16(answers.count())?;
        writer.u16(0)?;
        writer.u16(additional.count())?;
        self.write_records(&mut writer, answers)?;
        self.write_records(&mut writer, additional)?;

        Ok(Some(writer.pos))
    }

    fn write_records(&self, w: &mut Writer<'_>, records: Selection) -> Result<(), MdnsError> {
        if records.ptr {
            w.record_head(SERVICE_NAME, TYPE_PTR, CLASS_IN)?;
            let len_at = w.placeholder()?;
            w.name(&self.instance_name)?;
            w.patch_len(len_at)?;
        }
        if records.srv {
            w.record_head(&self.instance_name, TYPE_SRV, CLASS_IN | CACHE_FLUSH)?;
            let len_at = w.placeholder()?;
            w.u16(0)?;
            w.u16(0)?;
            w.u16(self.port)?;
            w.name(&self.host_name)?;
            w.patch_len(len_at)?;
        }
        if records.txt {
            w.record_head(&self.instance_name, TYPE_TXT, CLASS_IN | CACHE_FLUSH)?;
            // One empty string
            w.u16(1)?;
            w.u8(0)?;
        }
        if records.a {
            w.record_head(&self.host_name, TYPE_A, CLASS_IN | CACHE_FLUSH)?;
            w.u16(4)?;
            w.bytes(&self.address)?;
        }
        Ok(())
    }
}

/// Decode the (possibly compressed) name at `pos` into dotted form.
/// Returns the position just past the name in the original stream.
fn read_name(
    packet: &[u8],
    mut pos: usize,
    out: &mut String<MAX_NAME_LEN>,
) -> Result<usize, MdnsError> {
    let mut resume = None;
    let mut jumps = 0;
    loop {
        let len = *packet.get(pos).ok_or(MdnsError::Truncated)?;
        match len & 0xC0 {
            0x00 if len == 0 => return Ok(resume.unwrap_or(pos + 1)),
            0x00 => {
                let label = packet
                    .get(pos + 1..pos + 1 + len as usize)
                    .ok_or(MdnsError::Truncated)?;
                if !out.is_empty() {
                    out.push('.').map_err(|_| MdnsError::BadName)?;
                }
                for &b in label {
                    if !b.is_ascii() {
                        return Err(MdnsError::BadName);
                    }
                    out.push(char::from(b)).map_err(|_| MdnsError::BadName)?;
                }
                pos += 1 + len as usize;
            }
            0xC0 => {
                let low = *packet.get(pos + 1).ok_or(MdnsError::Truncated)?;
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(MdnsError::BadName);
                }
                resume.get_or_insert(pos + 2);
                pos = (usize::from(len & 0x3F) << 8) | usize::from(low);
            }
            _ => return Err(MdnsError::BadName),
        }
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, data: &[u8]) -> Result<(), MdnsError> {
        let end = self.pos + data.len();
        self.buf
            .get_mut(self.pos..end)
            .ok_or(MdnsError::BufferTooSmall)?
            .copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    fn u8(&mut self, value: u8) -> Result<(), MdnsError> {
        self.bytes(&[value])
    }

    fn u16(&mut self, value: u16) -> Result<(), MdnsError> {
        self.bytes(&value.to_be_bytes())
    }

    fn u32(&mut self, value: u32) -> Result<(), MdnsError> {
        self.bytes(&value.to_be_bytes())
    }

    /// Uncompressed name from its dotted form.
    fn name(&mut self, dotted: &str) -> Result<(), MdnsError> {
        for label in dotted.split('.') {
            let len = u8::try_from(label.len()).map_err(|_| MdnsError::BadName)?;
            self.u8(len)?;
            self.bytes(label.as_bytes())?;
        }
        self.u8(0)
    }

    fn record_head(&mut self, name: &str, rtype: u16, class: u16) -> Result<(), MdnsError> {
        self.name(name)?;
        self.u16(rtype)?;
        self.u16(class)?;
        self.u32(RECORD_TTL_SECS)
    }

    fn placeholder(&mut self) -> Result<usize, MdnsError> {
        let at = self.pos;
        self.u16(0)?;
        Ok(at)
    }

    /// Fill in an rdlength reserved by [`Writer::placeholder`].
    fn patch_len(&mut self, at: usize) -> Result<(), MdnsError> {
        let len = u16::try_from(self.pos - at - 2).map_err(|_| MdnsError::BufferTooSmall)?;
        self.buf[at..at + 2].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }
}
