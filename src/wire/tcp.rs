use byteorder::{ByteOrder, NetworkEndian};
use core::{cmp, fmt, i32, ops};

use super::ip::checksum;
use super::{Error, Result};
use crate::phy::ChecksumCapabilities;
use crate::wire::{IpAddress, IpProtocol};

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2^32. Sequence numbers do not
/// have a discernible sign, and subtraction of one sequence number from another instead results
/// in a signed difference, mirroring the wraparound-aware comparison used by RFC 793 ยง3.3.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeqNumber(pub i32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 as u32)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs as i32))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs as i32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        self.0 = self.0.wrapping_add(rhs as i32);
    }
}

impl ops::Sub<SeqNumber> for SeqNumber {
    type Output = usize;

    fn sub(self, rhs: SeqNumber) -> usize {
        let result = self.0.wrapping_sub(rhs.0);
        assert!(result >= 0, "attempt to subtract with underflow");
        result as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        self.0.wrapping_sub(other.0).partial_cmp(&0)
    }
}

impl SeqNumber {
    /// Compare two sequence numbers as defined by RFC 1982: a number `a` is "before" `b`
    /// when `0 < b - a < 2^31`, wrapping-aware.
    pub fn sub_abs(self, other: SeqNumber) -> usize {
        (self.0.wrapping_sub(other.0)).unsigned_abs() as usize
    }
}

enum_with_unknown! {
    /// TCP control flags (RFC 793's SYN/FIN/RST bits collapsed into one value, since a
    /// well-formed segment carries at most one of them on top of the unconditional ACK bit).
    pub enum Control(u8) {
        None = 0x00,
        Syn  = 0x01,
        Fin  = 0x02,
        Rst  = 0x03,
    }
}

impl Control {
    /// Return the length occupied by this flag in the sequence space, 1 for SYN/FIN, 0 otherwise.
    pub const fn len(self) -> usize {
        match self {
            Control::Syn | Control::Fin => 1,
            _ => 0,
        }
    }
}

mod field {
    use crate::wire::field::*;

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ_NUM: Field = 4..8;
    pub const ACK_NUM: Field = 8..12;
    pub const FLAGS: Field = 12..14;
    pub const WINDOW: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT: Field = 18..20;

    pub const OPTIONS: Rest = 20..;
}

pub const HEADER_LEN: usize = field::URGENT.end;

const FLG_FIN: u16 = 0x001;
const FLG_SYN: u16 = 0x002;
const FLG_RST: u16 = 0x004;
const FLG_PSH: u16 = 0x008;
const FLG_ACK: u16 = 0x010;
const FLG_URG: u16 = 0x020;

/// TCP option kinds.
const OPT_END: u8 = 0;
const OPT_NOP: u8 = 1;
const OPT_MSS: u8 = 2;
const OPT_WS: u8 = 3;

/// A TCP option, parsed from or to be emitted into the variable-length options area.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption {
    EndOfList,
    NoOperation,
    MaxSegmentSize(u16),
    WindowScale(u8),
    Unknown { kind: u8, data_len: u8 },
}

impl<'a> TcpOption {
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption)> {
        let (length, option);
        match *buffer.first().ok_or(Error)? {
            OPT_END => {
                length = 1;
                option = TcpOption::EndOfList;
            }
            OPT_NOP => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            kind => {
                length = *buffer.get(1).ok_or(Error)? as usize;
                let contents = buffer.get(2..length).ok_or(Error)?;
                match (kind, length) {
                    (OPT_END, _) | (OPT_NOP, _) => unreachable!(),
                    (OPT_MSS, 4) => option = TcpOption::MaxSegmentSize(NetworkEndian::read_u16(contents)),
                    (OPT_WS, 3) => option = TcpOption::WindowScale(contents[0]),
                    (_, _) => {
                        option = TcpOption::Unknown {
                            kind,
                            data_len: (length - 2) as u8,
                        }
                    }
                }
            }
        }
        Ok((&buffer[length..], option))
    }

    pub fn buffer_len(&self) -> usize {
        match *self {
            TcpOption::EndOfList | TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::Unknown { data_len, .. } => 2 + data_len as usize,
        }
    }

    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length;
        match *self {
            TcpOption::EndOfList => {
                length = 1;
                buffer[0] = OPT_END;
            }
            TcpOption::NoOperation => {
                length = 1;
                buffer[0] = OPT_NOP;
            }
            TcpOption::MaxSegmentSize(value) => {
                length = 4;
                buffer[0] = OPT_MSS;
                buffer[1] = length as u8;
                NetworkEndian::write_u16(&mut buffer[2..4], value);
            }
            TcpOption::WindowScale(value) => {
                length = 3;
                buffer[0] = OPT_WS;
                buffer[1] = length as u8;
                buffer[2] = value;
            }
            TcpOption::Unknown { kind, data_len } => {
                length = 2 + data_len as usize;
                buffer[0] = kind;
                buffer[1] = length as u8;
            }
        }
        &mut buffer[length..]
    }
}

/// A read/write wrapper around a Transmission Control Protocol segment buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

#[allow(clippy::len_without_is_empty)]
impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with TCP packet structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            Err(Error)
        } else {
            let header_len = self.header_len() as usize;
            if len < header_len || header_len < HEADER_LEN {
                Err(Error)
            } else {
                Ok(())
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.buffer.as_ref()[field::SEQ_NUM]))
    }

    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.buffer.as_ref()[field::ACK_NUM]))
    }

    fn flags(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS])
    }

    pub fn header_len(&self) -> u8 {
        ((self.flags() >> 12) * 4) as u8
    }

    pub fn fin(&self) -> bool {
        self.flags() & FLG_FIN != 0
    }

    pub fn syn(&self) -> bool {
        self.flags() & FLG_SYN != 0
    }

    pub fn rst(&self) -> bool {
        self.flags() & FLG_RST != 0
    }

    pub fn psh(&self) -> bool {
        self.flags() & FLG_PSH != 0
    }

    pub fn ack(&self) -> bool {
        self.flags() & FLG_ACK != 0
    }

    pub fn urg(&self) -> bool {
        self.flags() & FLG_URG != 0
    }

    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::WINDOW])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::URGENT])
    }

    /// Return the length of the segment, in terms of sequence space, including the
    /// one octet each occupied by the SYN and FIN flags.
    pub fn segment_len(&self) -> usize {
        let control_len = if self.syn() { 1 } else { 0 } + if self.fin() { 1 } else { 0 };
        self.payload().len() + control_len
    }

    pub fn verify_checksum(&self, src_addr: &IpAddress, dst_addr: &IpAddress) -> bool {
        let data = self.buffer.as_ref();
        checksum::combine(&[
            checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Tcp, data.len() as u32),
            checksum::data(data),
        ]) == !0
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer.as_ref()[self.header_len() as usize..]
    }

    pub fn options(&self) -> &'a [u8] {
        &self.buffer.as_ref()[field::OPTIONS.start..self.header_len() as usize]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], value)
    }

    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], value)
    }

    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.buffer.as_mut()[field::SEQ_NUM], value.0)
    }

    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.buffer.as_mut()[field::ACK_NUM], value.0)
    }

    fn set_flags(&mut self, value: u16) {
        let header_len_bits = (self.header_len() as u16 / 4) << 12;
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::FLAGS], header_len_bits | value)
    }

    pub fn set_header_len(&mut self, value: u8) {
        let flags = self.flags() & 0x0fff;
        NetworkEndian::write_u16(
            &mut self.buffer.as_mut()[field::FLAGS],
            ((value as u16 / 4) << 12) | flags,
        )
    }

    pub fn set_control(&mut self, control: Control, ack_present: bool) {
        let flags = self.flags() & !(FLG_FIN | FLG_SYN | FLG_RST | FLG_ACK);
        let control_bits = match control {
            Control::None => 0,
            Control::Syn => FLG_SYN,
            Control::Fin => FLG_FIN,
            Control::Rst => FLG_RST,
            Control::Unknown(_) => 0,
        };
        self.set_flags(flags | control_bits | if ack_present { FLG_ACK } else { 0 });
    }

    pub fn set_psh(&mut self, value: bool) {
        let flags = self.flags();
        self.set_flags(if value { flags | FLG_PSH } else { flags & !FLG_PSH });
    }

    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::WINDOW], value)
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value)
    }

    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::URGENT], value)
    }

    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        &mut self.buffer.as_mut()[field::OPTIONS.start..header_len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        &mut self.buffer.as_mut()[header_len..]
    }

    pub fn fill_checksum(&mut self, src_addr: &IpAddress, dst_addr: &IpAddress) {
        self.set_checksum(0);
        let checksum = {
            let data = self.buffer.as_ref();
            !checksum::combine(&[
                checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Tcp, data.len() as u32),
                checksum::data(data),
            ])
        };
        self.set_checksum(if checksum == 0 { 0xffff } else { checksum })
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

/// A high-level representation of a Transmission Control Protocol segment header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub control: Control,
    pub seq_number: SeqNumber,
    pub ack_number: Option<SeqNumber>,
    pub window_len: u16,
    pub window_scale: Option<u8>,
    pub max_seg_size: Option<u16>,
    pub payload: &'a [u8],
}

impl<'a> Repr<'a> {
    /// Parse a TCP segment and return a high-level representation.
    pub fn parse<T: AsRef<[u8]> + ?Sized>(
        packet: &Packet<&'a T>,
        src_addr: &IpAddress,
        dst_addr: &IpAddress,
        checksum_caps: &ChecksumCapabilities,
    ) -> Result<Repr<'a>> {
        packet.check_len()?;
        if packet.dst_port() == 0 {
            return Err(Error);
        }
        if checksum_caps.tcp.rx() && !packet.verify_checksum(src_addr, dst_addr) {
            return Err(Error);
        }

        let control = match (packet.syn(), packet.fin(), packet.rst()) {
            (false, false, false) => Control::None,
            (true, false, false) => Control::Syn,
            (false, true, false) => Control::Fin,
            (false, false, true) => Control::Rst,
            _ => return Err(Error),
        };
        let ack_number = if packet.ack() {
            Some(packet.ack_number())
        } else {
            None
        };

        let mut max_seg_size = None;
        let mut window_scale = None;
        let mut options = packet.options();
        while !options.is_empty() {
            let (next_options, option) = TcpOption::parse(options)?;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => (),
                TcpOption::MaxSegmentSize(value) => max_seg_size = Some(value),
                TcpOption::WindowScale(value) => window_scale = Some(value),
                TcpOption::Unknown { .. } => (),
            }
            options = next_options;
        }

        Ok(Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            control,
            seq_number: packet.seq_number(),
            ack_number,
            window_len: packet.window_len(),
            window_scale,
            max_seg_size,
            payload: packet.payload(),
        })
    }

    /// Return the length of the header that will be emitted from this high-level representation,
    /// including options but excluding the payload.
    pub fn header_len(&self) -> usize {
        let mut length = field::OPTIONS.start;
        if self.max_seg_size.is_some() {
            length += 4;
        }
        if self.window_scale.is_some() {
            length += 3;
        }
        // Round up to a multiple of 4, as required by the data offset field.
        (length + 3) / 4 * 4
    }

    pub fn buffer_len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    /// Return the length of the segment in sequence-space octets (SYN/FIN each count for 1).
    pub fn segment_len(&self) -> usize {
        self.payload.len() + self.control.len()
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]> + ?Sized>(
        &self,
        packet: &mut Packet<&mut T>,
        src_addr: &IpAddress,
        dst_addr: &IpAddress,
        checksum_caps: &ChecksumCapabilities,
    ) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or(SeqNumber(0)));
        packet.set_header_len(self.header_len() as u8);
        packet.set_control(self.control, self.ack_number.is_some());
        packet.set_window_len(self.window_len);
        packet.set_urgent_at(0);

        {
            let mut options = packet.options_mut();
            if let Some(value) = self.max_seg_size {
                options = TcpOption::MaxSegmentSize(value).emit(options);
            }
            if let Some(value) = self.window_scale {
                options = TcpOption::WindowScale(value).emit(options);
            }
            if !options.is_empty() {
                TcpOption::EndOfList.emit(options);
            }
        }

        packet.payload_mut().copy_from_slice(self.payload);

        if checksum_caps.tcp.tx() {
            packet.fill_checksum(src_addr, dst_addr);
        } else {
            packet.set_checksum(0);
        }
    }
}

impl<'a> fmt::Display for Repr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP src={} dst={}", self.src_port, self.dst_port)?;
        match self.control {
            Control::Syn => write!(f, " syn")?,
            Control::Fin => write!(f, " fin")?,
            Control::Rst => write!(f, " rst")?,
            Control::None => (),
            Control::Unknown(_) => (),
        }
        write!(f, " seq={}", self.seq_number)?;
        if let Some(ack) = self.ack_number {
            write!(f, " ack={ack}")?;
        }
        write!(f, " win={} len={}", self.window_len, self.payload.len())
    }
}

impl<T: AsRef<[u8]>> fmt::Display for Packet<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TCP src={} dst={} seq={}",
            self.src_port(),
            self.dst_port(),
            self.seq_number()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC_ADDR: IpAddress = IpAddress::v4(192, 168, 1, 1);
    const DST_ADDR: IpAddress = IpAddress::v4(192, 168, 1, 2);

    #[test]
    fn parse_then_emit_round_trips_with_options() {
        let repr = Repr {
            src_port: 48896,
            dst_port: 80,
            control: Control::Syn,
            seq_number: SeqNumber(1000),
            ack_number: None,
            window_len: 5840,
            window_scale: Some(7),
            max_seg_size: Some(1460),
            payload: &[],
        };
        let mut buf = vec![0u8; repr.buffer_len()];
        let mut packet = Packet::new_unchecked(&mut buf[..]);
        repr.emit(&mut packet, &SRC_ADDR, &DST_ADDR, &ChecksumCapabilities::default());

        let packet = Packet::new_checked(&buf[..]).unwrap();
        assert!(packet.verify_checksum(&SRC_ADDR, &DST_ADDR));
        let parsed = Repr::parse(&packet, &SRC_ADDR, &DST_ADDR, &ChecksumCapabilities::default()).unwrap();
        assert_eq!(parsed, repr);
    }

    #[test]
    fn seq_number_wraparound_comparison() {
        let a = SeqNumber(i32::MAX);
        let b = a + 10;
        assert!(b > a);
    }
}
