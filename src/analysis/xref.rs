//! Paired forward/backward cross-reference indices.
//!
//! `fromto` is keyed by (source, destination) and `tofrom` by
//! (destination, source). Both carry the source instruction's flags. Every
//! mutation goes through this type so the two maps always mirror each
//! other.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};

use super::unit::{AddrLink, CodeFlags};
use crate::Address;

#[derive(Debug, Clone, Default)]
pub struct CrossRefs {
    fromto: BTreeMap<AddrLink, CodeFlags>,
    tofrom: BTreeMap<AddrLink, CodeFlags>,
}

impl CrossRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.fromto.clear();
        self.tofrom.clear();
    }

    pub fn len(&self) -> usize {
        self.fromto.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fromto.is_empty()
    }

    /// Record an edge `from -> to` carrying the source's flags.
    pub fn insert(&mut self, from: Address, to: Address, flags: CodeFlags) {
        let link = AddrLink::new(from, to);
        self.fromto.insert(link, flags);
        self.tofrom.insert(link.reversed(), flags);
    }

    /// Remove the edge `from -> to`, returning its flags.
    pub fn remove(&mut self, from: Address, to: Address) -> Option<CodeFlags> {
        let link = AddrLink::new(from, to);
        let flags = self.fromto.remove(&link);
        let mirror = self.tofrom.remove(&link.reversed());
        debug_assert_eq!(flags, mirror, "cross-reference mirror out of sync for {}", link);
        flags.or(mirror)
    }

    pub fn get(&self, from: Address, to: Address) -> Option<CodeFlags> {
        self.fromto.get(&AddrLink::new(from, to)).copied()
    }

    /// Remove every edge whose source lies in `[start, end)`.
    pub fn remove_from_range(&mut self, start: Address, end: Address) -> Vec<AddrLink> {
        let links: Vec<AddrLink> = self.from_range(start, end).map(|(link, _)| link).collect();
        for link in &links {
            self.remove(link.a, link.b);
        }
        links
    }

    /// Remove every edge whose destination lies in `[start, end)` and return
    /// them as (destination, source) links.
    pub fn remove_to_range(&mut self, start: Address, end: Address) -> Vec<AddrLink> {
        let links: Vec<AddrLink> = self.to_range(start, end).map(|(link, _)| link).collect();
        for link in &links {
            self.remove(link.b, link.a);
        }
        links
    }

    /// Edges with source in `[start, end)`, keyed (source, destination).
    pub fn from_range(&self, start: Address, end: Address) -> impl Iterator<Item = (AddrLink, CodeFlags)> + '_ {
        self.fromto
            .range(AddrLink::lower(start)..AddrLink::lower(end))
            .map(|(&link, &flags)| (link, flags))
    }

    /// Edges with destination in `[start, end)`, keyed (destination, source).
    pub fn to_range(&self, start: Address, end: Address) -> impl Iterator<Item = (AddrLink, CodeFlags)> + '_ {
        self.tofrom
            .range(AddrLink::lower(start)..AddrLink::lower(end))
            .map(|(&link, &flags)| (link, flags))
    }

    /// All edges keyed (source, destination), in order.
    pub fn fromto(&self) -> impl Iterator<Item = (AddrLink, CodeFlags)> + '_ {
        self.fromto.iter().map(|(&link, &flags)| (link, flags))
    }

    /// All edges keyed (destination, source), in order.
    pub fn tofrom(&self) -> impl Iterator<Item = (AddrLink, CodeFlags)> + '_ {
        self.tofrom.iter().map(|(&link, &flags)| (link, flags))
    }

    /// First (destination, source) link strictly after `link`.
    pub fn next_tofrom_after(&self, link: Option<AddrLink>) -> Option<(AddrLink, CodeFlags)> {
        let lower = match link {
            Some(link) => Excluded(link),
            None => Unbounded,
        };
        self.tofrom
            .range((lower, Unbounded))
            .next()
            .map(|(&link, &flags)| (link, flags))
    }

    /// Last (destination, source) link strictly before `AddrLink::lower(addr)`.
    pub fn tofrom_before(&self, addr: Address) -> impl Iterator<Item = (AddrLink, CodeFlags)> + '_ {
        self.tofrom
            .range((Unbounded, Excluded(AddrLink::lower(addr))))
            .rev()
            .map(|(&link, &flags)| (link, flags))
    }

    /// Edges ending exactly at `addr`, keyed (destination, source).
    pub fn to_addr(&self, addr: Address) -> impl Iterator<Item = (AddrLink, CodeFlags)> + '_ {
        self.tofrom
            .range((Included(AddrLink::lower(addr)), Included(AddrLink::new(addr, Address::MAX))))
            .map(|(&link, &flags)| (link, flags))
    }

    /// Check that both indices mirror each other exactly.
    pub fn is_mirrored(&self) -> bool {
        self.fromto.len() == self.tofrom.len()
            && self
                .fromto
                .iter()
                .all(|(link, flags)| self.tofrom.get(&link.reversed()) == Some(flags))
    }
}
