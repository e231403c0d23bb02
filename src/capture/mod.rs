pub mod archive;
pub mod discovery;
pub mod parser;

pub use archive::{ArchiveUnwrapper, Compression, DecodedStream};
pub use discovery::{CaptureFile, FileDiscoverer};
pub use parser::{PacketParser, PacketRecord, ParserBackend, PcapParser, RecordStream, TransportProtocol};
