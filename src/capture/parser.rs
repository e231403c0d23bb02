use std::fmt;
use std::io::{self, Cursor, Read};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{create_reader, PcapBlockOwned, PcapError};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use pnet::packet::Packet;
use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Bytes read up front so format detection always sees a complete header.
const HEAD_SIZE: usize = 4096;
const BLOCK_BUFFER_SIZE: usize = 256 * 1024;

const NANOSECOND_MAGIC_LE: u32 = 0xa1b2_3c4d;
const NANOSECOND_MAGIC_BE: u32 = 0x4d3c_b2a1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Tcp => write!(f, "TCP"),
            TransportProtocol::Udp => write!(f, "UDP"),
        }
    }
}

/// One frame's transport-layer essentials. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub protocol: TransportProtocol,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub src_mac: Option<MacAddr>,
    pub dst_mac: Option<MacAddr>,
    pub source_file: Arc<Path>,
    pub timestamp: SystemTime,
}

impl PacketRecord {
    pub fn new(protocol: TransportProtocol, src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            protocol,
            src_addr: src.ip(),
            dst_addr: dst.ip(),
            src_port: src.port(),
            dst_port: dst.port(),
            src_mac: None,
            dst_mac: None,
            source_file: Arc::from(Path::new("")),
            timestamp: UNIX_EPOCH,
        }
    }

    pub fn with_macs(mut self, src: MacAddr, dst: MacAddr) -> Self {
        self.src_mac = Some(src);
        self.dst_mac = Some(dst);
        self
    }

    pub fn with_source(mut self, source_file: Arc<Path>, timestamp: SystemTime) -> Self {
        self.source_file = source_file;
        self.timestamp = timestamp;
        self
    }
}

impl fmt::Display for PacketRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {} --> {}",
            self.protocol,
            SocketAddr::new(self.src_addr, self.src_port),
            SocketAddr::new(self.dst_addr, self.dst_port)
        )
    }
}

pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<PacketRecord, ParseError>> + 'a>;

/// External packet-decoding collaborator.
///
/// The returned sequence is finite and can be walked once. Malformed or
/// uninteresting frames are omitted; an `Err` item ends the sequence.
pub trait PacketParser: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse<'a>(
        &self,
        stream: &'a mut (dyn Read + Send),
        source: &Path,
    ) -> Result<RecordStream<'a>, ParseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ParserBackend {
    /// pcap/pcapng, decoded according to the declared link type
    #[default]
    Pcap,
    /// pcap/pcapng whose frames are all bare IP datagrams
    RawIp,
}

impl ParserBackend {
    pub fn parser(self) -> Arc<dyn PacketParser> {
        Arc::new(PcapParser::new(self))
    }
}

impl fmt::Display for ParserBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserBackend::Pcap => write!(f, "pcap"),
            ParserBackend::RawIp => write!(f, "raw-ip"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkLayer {
    Null,
    Ethernet,
    RawIp,
    LinuxSll,
    Unsupported(i32),
}

impl LinkLayer {
    fn from_linktype(code: i32) -> Self {
        match code {
            0 => LinkLayer::Null,
            1 => LinkLayer::Ethernet,
            // DLT_RAW differs between platforms; 228/229 are the v4/v6-only variants
            12 | 14 | 101 | 228 | 229 => LinkLayer::RawIp,
            113 => LinkLayer::LinuxSll,
            other => LinkLayer::Unsupported(other),
        }
    }
}

/// Reads legacy pcap and pcapng streams via `pcap-parser` and decodes
/// frames with `pnet`.
pub struct PcapParser {
    backend: ParserBackend,
}

impl PcapParser {
    pub fn new(backend: ParserBackend) -> Self {
        Self { backend }
    }
}

impl PacketParser for PcapParser {
    fn name(&self) -> &'static str {
        match self.backend {
            ParserBackend::Pcap => "pcap",
            ParserBackend::RawIp => "raw-ip",
        }
    }

    fn parse<'a>(
        &self,
        stream: &'a mut (dyn Read + Send),
        source: &Path,
    ) -> Result<RecordStream<'a>, ParseError> {
        let mut head = Vec::with_capacity(HEAD_SIZE);
        Read::take(&mut *stream, HEAD_SIZE as u64)
            .read_to_end(&mut head)
            .map_err(|e| ParseError::Read(e.to_string()))?;
        if head.is_empty() {
            return Err(ParseError::Unrecognized("empty stream".to_string()));
        }

        let exhausted = Arc::new(AtomicBool::new(false));
        let probe = EofProbe {
            inner: Cursor::new(head).chain(stream),
            exhausted: Arc::clone(&exhausted),
        };
        let reader = create_reader(BLOCK_BUFFER_SIZE, probe)
            .map_err(|e| ParseError::Unrecognized(e.to_string()))?;

        Ok(Box::new(PcapRecords {
            reader,
            exhausted,
            links: LinkState {
                forced_raw: self.backend == ParserBackend::RawIp,
                interfaces: Vec::new(),
                nanosecond: false,
            },
            source: Arc::from(source),
            done: false,
        }))
    }
}

/// Remembers whether the wrapped reader has reported end of stream, so an
/// empty block buffer is not mistaken for the end of the capture.
struct EofProbe<R> {
    inner: R,
    exhausted: Arc<AtomicBool>,
}

impl<R: Read> Read for EofProbe<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.exhausted.store(true, Ordering::Relaxed);
        }
        Ok(n)
    }
}

struct LinkState {
    forced_raw: bool,
    interfaces: Vec<LinkLayer>,
    nanosecond: bool,
}

impl LinkState {
    fn decode_block(&mut self, block: PcapBlockOwned<'_>, source: &Arc<Path>) -> Option<PacketRecord> {
        match block {
            PcapBlockOwned::LegacyHeader(header) => {
                self.interfaces = vec![LinkLayer::from_linktype(header.network.0)];
                self.nanosecond = matches!(
                    header.magic_number,
                    NANOSECOND_MAGIC_LE | NANOSECOND_MAGIC_BE
                );
                None
            }
            PcapBlockOwned::Legacy(frame) => {
                let fraction = if self.nanosecond {
                    Duration::from_nanos(u64::from(frame.ts_usec))
                } else {
                    Duration::from_micros(u64::from(frame.ts_usec))
                };
                let ts = UNIX_EPOCH + Duration::from_secs(u64::from(frame.ts_sec)) + fraction;
                self.record(0, frame.data, ts, source)
            }
            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                self.interfaces.clear();
                None
            }
            PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                self.interfaces.push(LinkLayer::from_linktype(idb.linktype.0));
                None
            }
            PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                // if_tsresol is not consulted; microseconds is the pcapng default
                let micros = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                let ts = UNIX_EPOCH + Duration::from_micros(micros);
                let len = (epb.caplen as usize).min(epb.data.len());
                self.record(epb.if_id as usize, &epb.data[..len], ts, source)
            }
            PcapBlockOwned::NG(Block::SimplePacket(spb)) => self.record(0, spb.data, UNIX_EPOCH, source),
            _ => None,
        }
    }

    fn record(
        &self,
        interface: usize,
        data: &[u8],
        timestamp: SystemTime,
        source: &Arc<Path>,
    ) -> Option<PacketRecord> {
        let link = if self.forced_raw {
            LinkLayer::RawIp
        } else {
            *self.interfaces.get(interface)?
        };
        decode_frame(link, data).map(|record| record.with_source(Arc::clone(source), timestamp))
    }
}

struct PcapRecords<'a> {
    reader: Box<dyn PcapReaderIterator + 'a>,
    exhausted: Arc<AtomicBool>,
    links: LinkState,
    source: Arc<Path>,
    done: bool,
}

impl Iterator for PcapRecords<'_> {
    type Item = Result<PacketRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let record = self.links.decode_block(block, &self.source);
                    self.reader.consume(offset);
                    if let Some(record) = record {
                        return Some(Ok(record));
                    }
                }
                Err(PcapError::Eof) if self.exhausted.load(Ordering::Relaxed) => {
                    self.done = true;
                    return None;
                }
                Err(PcapError::Eof) | Err(PcapError::Incomplete(_)) => {
                    let was_exhausted = self.exhausted.load(Ordering::Relaxed);
                    if let Err(e) = self.reader.refill() {
                        self.done = true;
                        return Some(Err(ParseError::Read(e.to_string())));
                    }
                    if was_exhausted {
                        debug!("{}: truncated trailing frame ignored", self.source.display());
                        self.done = true;
                        return None;
                    }
                }
                Err(PcapError::UnexpectedEof) => {
                    debug!("{}: truncated trailing frame ignored", self.source.display());
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(ParseError::Malformed(e.to_string())));
                }
            }
        }
    }
}

fn decode_frame(link: LinkLayer, data: &[u8]) -> Option<PacketRecord> {
    match link {
        LinkLayer::Ethernet => decode_ethernet(data),
        LinkLayer::RawIp => decode_ip(data),
        LinkLayer::LinuxSll => {
            // 16 byte cooked header, protocol in the last two bytes
            let ethertype = u16::from_be_bytes([*data.get(14)?, *data.get(15)?]);
            decode_ethertype(EtherType::new(ethertype), data.get(16..)?)
        }
        // 4 byte address family in host byte order; sniff the IP version instead
        LinkLayer::Null => decode_ip(data.get(4..)?),
        LinkLayer::Unsupported(_) => None,
    }
}

fn decode_ethernet(data: &[u8]) -> Option<PacketRecord> {
    let ethernet = EthernetPacket::new(data)?;
    let record = match ethernet.get_ethertype() {
        EtherTypes::Vlan => {
            let vlan = VlanPacket::new(ethernet.payload())?;
            decode_ethertype(vlan.get_ethertype(), vlan.payload())
        }
        ethertype => decode_ethertype(ethertype, ethernet.payload()),
    }?;
    Some(record.with_macs(ethernet.get_source(), ethernet.get_destination()))
}

fn decode_ethertype(ethertype: EtherType, payload: &[u8]) -> Option<PacketRecord> {
    match ethertype {
        EtherTypes::Ipv4 => decode_ipv4(payload),
        EtherTypes::Ipv6 => decode_ipv6(payload),
        _ => None,
    }
}

fn decode_ip(data: &[u8]) -> Option<PacketRecord> {
    match data.first()? >> 4 {
        4 => decode_ipv4(data),
        6 => decode_ipv6(data),
        _ => None,
    }
}

fn decode_ipv4(data: &[u8]) -> Option<PacketRecord> {
    let ipv4 = Ipv4Packet::new(data)?;
    if ipv4.get_version() != 4 || ipv4.get_header_length() < 5 {
        return None;
    }
    // later fragments carry no transport header
    if ipv4.get_fragment_offset() != 0 {
        return None;
    }
    decode_transport(
        ipv4.get_next_level_protocol(),
        IpAddr::V4(ipv4.get_source()),
        IpAddr::V4(ipv4.get_destination()),
        ipv4.payload(),
    )
}

fn decode_ipv6(data: &[u8]) -> Option<PacketRecord> {
    let ipv6 = Ipv6Packet::new(data)?;
    if ipv6.get_version() != 6 {
        return None;
    }
    decode_transport(
        ipv6.get_next_header(),
        IpAddr::V6(ipv6.get_source()),
        IpAddr::V6(ipv6.get_destination()),
        ipv6.payload(),
    )
}

fn decode_transport(
    protocol: IpNextHeaderProtocol,
    src: IpAddr,
    dst: IpAddr,
    payload: &[u8],
) -> Option<PacketRecord> {
    match protocol {
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(payload)?;
            Some(PacketRecord::new(
                TransportProtocol::Tcp,
                SocketAddr::new(src, tcp.get_source()),
                SocketAddr::new(dst, tcp.get_destination()),
            ))
        }
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(payload)?;
            Some(PacketRecord::new(
                TransportProtocol::Udp,
                SocketAddr::new(src, udp.get_source()),
                SocketAddr::new(dst, udp.get_destination()),
            ))
        }
        _ => None,
    }
}
