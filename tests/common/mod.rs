//! Common test utilities for redzone tests

#![allow(dead_code)] // Each test binary uses a different subset

use async_trait::async_trait;
use redzone::{
    dns::{
        DNSPacket,
        enums::{DNSResourceType, ResponseCode},
        resource::{DNSResource, DNSResourceData},
    },
    error::{StoreError, UpstreamError},
    handler::{Fallthrough, RequestHandler, Zones},
    resolver::Resolver,
    store::{LocalStore, RecordStore},
    upstream::Upstream,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Create a basic test DNS query packet
pub fn create_test_query(domain: &str, qtype: DNSResourceType) -> DNSPacket {
    create_test_query_with_id(1234, domain, qtype)
}

/// Create a test DNS query packet with specific ID
pub fn create_test_query_with_id(id: u16, domain: &str, qtype: DNSResourceType) -> DNSPacket {
    DNSPacket::query(id, domain, qtype)
}

/// Create a test DNS query packet with specific opcode
pub fn create_test_query_with_opcode(
    id: u16,
    opcode: u8,
    domain: &str,
    qtype: DNSResourceType,
) -> DNSPacket {
    let mut packet = create_test_query_with_id(id, domain, qtype);
    packet.header.opcode = opcode;
    packet
}

pub fn a_record(owner: &str, ttl: u32, ip: &str) -> DNSResource {
    DNSResource::new(owner, ttl, DNSResourceData::A(ip.parse().unwrap()))
}

pub fn cname_record(owner: &str, ttl: u32, target: &str) -> DNSResource {
    DNSResource::new(owner, ttl, DNSResourceData::CNAME(target.to_string()))
}

/// Count the CNAME records in an answer
pub fn cname_count(records: &[DNSResource]) -> usize {
    records
        .iter()
        .filter(|r| r.rtype == DNSResourceType::CNAME)
        .count()
}

/// LocalStore seeded with `(key, field, json)` triples
pub fn seeded_store(entries: &[(&str, &str, &str)]) -> Arc<LocalStore> {
    let store = LocalStore::new();
    for (key, field, value) in entries {
        store.insert(*key, *field, *value);
    }
    Arc::new(store)
}

/// Store wrapper that records every `(key, field)` read and can fail
/// selected keys with a backend error.
pub struct RecordingStore {
    inner: Arc<LocalStore>,
    failing_keys: HashSet<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<LocalStore>) -> Self {
        Self {
            inner,
            failing_keys: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fields_read(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, field)| field).collect()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push((key.to_string(), field.to_string()));
        if self.failing_keys.contains(key) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.get(key, field).await
    }
}

/// Scripted upstream resolver. Names without a script fail with an IO error.
#[derive(Default)]
pub struct MockUpstream {
    answers: HashMap<(String, DNSResourceType), (Vec<DNSResource>, bool)>,
    calls: Mutex<Vec<(String, DNSResourceType)>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(
        mut self,
        name: &str,
        qtype: DNSResourceType,
        records: Vec<DNSResource>,
        truncated: bool,
    ) -> Self {
        self.answers
            .insert((name.to_lowercase(), qtype), (records, truncated));
        self
    }

    pub fn calls(&self) -> Vec<(String, DNSResourceType)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn exchange(&self, query: &DNSPacket) -> Result<DNSPacket, UpstreamError> {
        let question = query
            .questions
            .first()
            .ok_or_else(|| UpstreamError::Io("query without question".to_string()))?;
        let name = question.name();
        self.calls.lock().unwrap().push((name.clone(), question.qtype));

        let (records, truncated) = self
            .answers
            .get(&(name.to_lowercase(), question.qtype))
            .cloned()
            .ok_or_else(|| UpstreamError::Io(format!("no scripted answer for {}", name)))?;

        let mut response = query.reply(ResponseCode::NoError);
        response.header.ra = true;
        response.header.tc = truncated;
        response.answers = records;
        Ok(response)
    }
}

pub fn create_resolver(store: Arc<dyn RecordStore>, upstream: Arc<dyn Upstream>) -> Resolver {
    Resolver::new(store, upstream, "")
}

pub fn create_handler(
    store: Arc<dyn RecordStore>,
    upstream: Arc<dyn Upstream>,
    zones: &[&str],
    fallthrough: Fallthrough,
) -> RequestHandler {
    let resolver = Arc::new(create_resolver(store, upstream));
    RequestHandler::new(resolver, Zones::new(zones), fallthrough)
}
