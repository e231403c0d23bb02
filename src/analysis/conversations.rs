use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use crate::analysis::{lock, Analyser, Partial, ReportRow};
use crate::capture::PacketRecord;

pub const CSV: &str = "conversations.csv";

/// Counts records per directed (source, destination) pair. `A -> B` and
/// `B -> A` are separate conversations.
pub struct ConversationCounter {
    conversations: Mutex<HashMap<IpAddr, HashMap<IpAddr, u64>>>,
}

impl ConversationCounter {
    pub fn new() -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn count(&self, src: &IpAddr, dst: &IpAddr) -> Option<u64> {
        lock(&self.conversations)
            .get(src)
            .and_then(|peers| peers.get(dst))
            .copied()
    }

    pub fn len(&self) -> usize {
        lock(&self.conversations).values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConversationCounter {
    fn default() -> Self {
        Self::new()
    }
}

struct ConversationPartial<'a> {
    owner: &'a ConversationCounter,
    pairs: HashMap<(IpAddr, IpAddr), u64>,
}

impl Partial for ConversationPartial<'_> {
    fn observe(&mut self, record: &PacketRecord) {
        self.pairs
            .entry((record.src_addr, record.dst_addr))
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn commit(self: Box<Self>) {
        let owner = self.owner;
        let mut conversations = lock(&owner.conversations);
        for ((src, dst), count) in self.pairs {
            *conversations.entry(src).or_default().entry(dst).or_insert(0) += count;
        }
    }
}

impl Analyser for ConversationCounter {
    fn name(&self) -> &'static str {
        "conversations"
    }

    fn report_name(&self) -> &'static str {
        CSV
    }

    fn partial(&self) -> Box<dyn Partial + '_> {
        Box::new(ConversationPartial {
            owner: self,
            pairs: HashMap::new(),
        })
    }

    fn snapshot(&self) -> Vec<ReportRow> {
        let conversations = lock(&self.conversations);
        let mut rows = Vec::with_capacity(conversations.values().map(HashMap::len).sum());
        for (src, peers) in conversations.iter() {
            for (dst, count) in peers {
                rows.push(vec![src.to_string(), dst.to_string(), count.to_string()]);
            }
        }
        rows
    }
}
