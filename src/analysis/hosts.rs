use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use crate::analysis::{lock, Analyser, Partial, ReportRow};
use crate::capture::PacketRecord;

pub const CSV: &str = "hostcounter.csv";

/// Counts how often each host appears, as source or as destination.
pub struct HostCounter {
    hosts: Mutex<HashMap<IpAddr, u64>>,
}

impl HostCounter {
    pub fn new() -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn count(&self, host: &IpAddr) -> Option<u64> {
        lock(&self.hosts).get(host).copied()
    }

    /// Sum of all counters: twice the number of committed records.
    pub fn total(&self) -> u64 {
        lock(&self.hosts).values().sum()
    }
}

impl Default for HostCounter {
    fn default() -> Self {
        Self::new()
    }
}

struct HostPartial<'a> {
    owner: &'a HostCounter,
    hosts: HashMap<IpAddr, u64>,
}

impl HostPartial<'_> {
    fn bump(&mut self, host: IpAddr) {
        self.hosts.entry(host).and_modify(|count| *count += 1).or_insert(1);
    }
}

impl Partial for HostPartial<'_> {
    fn observe(&mut self, record: &PacketRecord) {
        self.bump(record.src_addr);
        self.bump(record.dst_addr);
    }

    fn commit(self: Box<Self>) {
        let owner = self.owner;
        let mut hosts = lock(&owner.hosts);
        for (host, count) in self.hosts {
            *hosts.entry(host).or_insert(0) += count;
        }
    }
}

impl Analyser for HostCounter {
    fn name(&self) -> &'static str {
        "hosts"
    }

    fn report_name(&self) -> &'static str {
        CSV
    }

    fn partial(&self) -> Box<dyn Partial + '_> {
        Box::new(HostPartial {
            owner: self,
            hosts: HashMap::new(),
        })
    }

    fn snapshot(&self) -> Vec<ReportRow> {
        lock(&self.hosts)
            .iter()
            .map(|(host, count)| vec![host.to_string(), count.to_string()])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TransportProtocol;

    fn record(src: &str, dst: &str) -> PacketRecord {
        PacketRecord::new(
            TransportProtocol::Udp,
            format!("{}:5000", src).parse().unwrap(),
            format!("{}:53", dst).parse().unwrap(),
        )
    }

    fn ip(addr: &str) -> IpAddr {
        addr.parse().unwrap()
    }

    fn feed(counter: &HostCounter, records: &[PacketRecord]) {
        let mut partial = counter.partial();
        for record in records {
            partial.observe(record);
        }
        partial.commit();
    }

    #[test]
    fn test_first_sight_counts_once() {
        let counter = HostCounter::new();
        feed(&counter, &[record("10.0.0.1", "10.0.0.2")]);

        let mut rows = counter.snapshot();
        rows.sort();
        assert_eq!(
            rows,
            vec![
                vec!["10.0.0.1".to_string(), "1".to_string()],
                vec!["10.0.0.2".to_string(), "1".to_string()],
            ]
        );
    }

    #[test]
    fn test_source_and_destination_share_a_counter() {
        let counter = HostCounter::new();
        feed(&counter, &[record("10.0.0.1", "10.0.0.2")]);
        feed(&counter, &[record("10.0.0.2", "10.0.0.3")]);

        assert_eq!(counter.count(&ip("10.0.0.1")), Some(1));
        assert_eq!(counter.count(&ip("10.0.0.2")), Some(2));
        assert_eq!(counter.count(&ip("10.0.0.3")), Some(1));
        assert_eq!(counter.count(&ip("10.0.0.4")), None);
        assert_eq!(counter.total(), 4);
    }

    #[test]
    fn test_self_addressed_record_touches_two_slots() {
        let counter = HostCounter::new();
        feed(&counter, &[record("127.0.0.1", "127.0.0.1")]);
        assert_eq!(counter.count(&ip("127.0.0.1")), Some(2));
        assert_eq!(counter.total(), 2);
    }

    #[test]
    fn test_uncommitted_partial_is_discarded() {
        let counter = HostCounter::new();
        let mut partial = counter.partial();
        partial.observe(&record("10.0.0.1", "10.0.0.2"));
        drop(partial);

        assert_eq!(counter.total(), 0);
        assert!(counter.snapshot().is_empty());
    }
}
