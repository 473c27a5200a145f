//! decides which session an inbound packet belongs to.
//!
//! Two lookup axes: the RTP source id and the remote socket address.  RTCP
//! CNAMEs tie the source and repair streams of one sender together even
//! when their packets arrive out of order, so the router also tracks which
//! ssrcs each CNAME has claimed.  A session holds at most two ssrcs (source
//! plus repair); a third claim evicts the oldest binding, and a CNAME
//! disagreement halts the older session.
use std::collections::HashMap;
use std::net::SocketAddr;

use log::{debug, warn};

/// what the group should do after a CNAME binding
#[derive(Debug, Clone, PartialEq)]
pub enum CnameAction {
    /// nothing visible yet (binding remembered for later)
    None,
    /// record the cname on this session
    SetCname(u64),
    /// the ssrc was adopted into this existing session
    Unified { handle: u64 },
    /// two names collided: halt this session
    Conflict { halt: u64 },
}

#[derive(Default)]
pub struct SessionRouter {
    by_source: HashMap<u32, u64>,
    by_addr: HashMap<SocketAddr, u64>,
    by_cname: HashMap<String, u64>,
    cname_of: HashMap<u64, String>,
    ssrcs_of: HashMap<u64, Vec<u32>>,
    /// cnames seen before any session existed for their ssrc
    pending_cname: HashMap<u32, String>,
    conflicts: usize,
}

impl SessionRouter {
    pub fn new() -> SessionRouter {
        SessionRouter::default()
    }
    pub fn conflicts(&self) -> usize {
        self.conflicts
    }
    pub fn find_by_source(&self, source_id: u32) -> Option<u64> {
        self.by_source.get(&source_id).copied()
    }
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<u64> {
        self.by_addr.get(&addr).copied()
    }

    /// register a freshly created session
    pub fn insert_session(&mut self, handle: u64, source_id: u32, addr: Option<SocketAddr>) -> () {
        self.by_source.insert(source_id, handle);
        if let Some(addr) = addr {
            self.by_addr.insert(addr, handle);
        }
        self.ssrcs_of.insert(handle, vec![source_id]);
    }

    /// bind another ssrc (the repair stream) to an existing session
    pub fn adopt_source(&mut self, handle: u64, source_id: u32) -> () {
        let ssrcs = self.ssrcs_of.entry(handle).or_default();
        if ssrcs.contains(&source_id) {
            return;
        }
        if ssrcs.len() >= 2 {
            // a sender has one source and one repair stream; a third ssrc
            // on the same identity evicts the oldest binding
            let evicted = ssrcs.remove(0);
            self.by_source.remove(&evicted);
            self.conflicts += 1;
            warn!(
                "router: evicting ssrc {:#010x} from session {}, too many bindings",
                evicted, handle
            );
        }
        ssrcs.push(source_id);
        self.by_source.insert(source_id, handle);
    }

    /// forget everything about a session
    pub fn remove_session(&mut self, handle: u64) -> () {
        self.by_source.retain(|_, h| *h != handle);
        self.by_addr.retain(|_, h| *h != handle);
        if let Some(cname) = self.cname_of.remove(&handle) {
            self.by_cname.remove(&cname);
        }
        self.ssrcs_of.remove(&handle);
    }

    /// cname stored before this ssrc had a session
    pub fn take_pending_cname(&mut self, source_id: u32) -> Option<String> {
        self.pending_cname.remove(&source_id)
    }

    /// an SDES CNAME arrived for an ssrc
    pub fn bind_cname(&mut self, source_id: u32, cname: &str) -> CnameAction {
        match self.find_by_source(source_id) {
            Some(handle) => {
                match self.cname_of.get(&handle) {
                    Some(existing) if existing != cname => {
                        // same transport identity, different name: the old
                        // session cannot be trusted anymore
                        self.conflicts += 1;
                        warn!(
                            "router: cname conflict on session {} ({} vs {})",
                            handle, existing, cname
                        );
                        return CnameAction::Conflict { halt: handle };
                    }
                    Some(_) => return CnameAction::None,
                    None => {}
                }
                self.cname_of.insert(handle, String::from(cname));
                self.by_cname.insert(String::from(cname), handle);
                // ssrcs whose SDES got here first now have a home
                let waiting: Vec<u32> = self
                    .pending_cname
                    .iter()
                    .filter(|(_, c)| c.as_str() == cname)
                    .map(|(s, _)| *s)
                    .collect();
                for ssrc in waiting {
                    self.pending_cname.remove(&ssrc);
                    self.adopt_source(handle, ssrc);
                }
                CnameAction::SetCname(handle)
            }
            None => match self.by_cname.get(cname).copied() {
                Some(handle) => {
                    debug!(
                        "router: cname {} unifies ssrc {:#010x} into session {}",
                        cname, source_id, handle
                    );
                    self.adopt_source(handle, source_id);
                    CnameAction::Unified { handle: handle }
                }
                None => {
                    self.pending_cname.insert(source_id, String::from(cname));
                    CnameAction::None
                }
            },
        }
    }
}
