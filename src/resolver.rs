use crate::dns::enums::DNSResourceType;
use crate::dns::resource::DNSResource;
use crate::error::{ResolveError, Result};
use crate::record::{HostItem, RecordSet, SoaItem, fqdn, soa_serial};
use crate::store::RecordStore;
use crate::store::keys::{derive_key, is_wildcard, wildcard_of};
use crate::upstream::Upstream;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, trace};

/// Zone name that contains every other name
pub const ROOT_ZONE: &str = ".";

/// Stop following CNAME items once one answer already holds more than this
/// many CNAME records
const MAX_CHAIN_LEN: usize = 7;

/// Records produced for one query, plus whether any delegated part came back truncated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answer {
    pub records: Vec<DNSResource>,
    pub truncated: bool,
}

impl Answer {
    fn complete(records: Vec<DNSResource>) -> Self {
        Self {
            records,
            truncated: false,
        }
    }
}

/// Resolution engine over a record store, with an upstream delegate for
/// names outside the zone.
pub struct Resolver {
    store: Arc<dyn RecordStore>,
    upstream: Arc<dyn Upstream>,
    key_prefix: String,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        upstream: Arc<dyn Upstream>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            upstream,
            key_prefix: key_prefix.into(),
        }
    }

    /// Types the engine can answer
    pub fn supports(qtype: DNSResourceType) -> bool {
        matches!(
            qtype,
            DNSResourceType::A
                | DNSResourceType::AAAA
                | DNSResourceType::TXT
                | DNSResourceType::NS
                | DNSResourceType::MX
                | DNSResourceType::SRV
                | DNSResourceType::CNAME
                | DNSResourceType::PTR
                | DNSResourceType::CAA
                | DNSResourceType::SOA
        )
    }

    /// Store key for `name`. Keys are always derived from the lower-cased name.
    pub fn key_for(&self, name: &str) -> String {
        derive_key(&name.to_ascii_lowercase(), &self.key_prefix)
    }

    /// Resolve `name`/`qtype` inside `zone`. Owner names keep the spelling of
    /// `name`.
    pub async fn resolve(&self, zone: &str, name: &str, qtype: DNSResourceType) -> Result<Answer> {
        trace!("Resolving {} {} in zone {}", name, qtype, zone);
        match qtype {
            DNSResourceType::A
            | DNSResourceType::AAAA
            | DNSResourceType::TXT
            | DNSResourceType::NS
            | DNSResourceType::MX
            | DNSResourceType::SRV => self.chase(zone, name, qtype, Vec::new(), 0).await,
            DNSResourceType::CNAME => self.cname(name).await.map(Answer::complete),
            DNSResourceType::PTR | DNSResourceType::CAA => {
                self.direct(name, qtype).await.map(Answer::complete)
            }
            DNSResourceType::SOA => self.soa(zone, name).await.map(Answer::complete),
            other => Err(ResolveError::Decode(format!(
                "unsupported query type {}",
                other
            ))),
        }
    }

    /// CNAME records stored for `name`, falling back to the wildcard key.
    /// Never chases the targets.
    pub async fn cname(&self, name: &str) -> Result<Vec<DNSResource>> {
        let mut last = ResolveError::NotFound;
        for key in candidate_keys(&self.key_for(name)) {
            match self.fetch_cnames(&key).await {
                Ok(items) => return Ok(items.iter().map(|i| i.to_cname(name)).collect()),
                Err(e) if e.is_not_found() => last = e,
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    /// Exact-key lookup with no CNAME or wildcard fallback
    pub async fn direct(&self, name: &str, qtype: DNSResourceType) -> Result<Vec<DNSResource>> {
        let set = self.fetch(&self.key_for(name), qtype).await?;
        Ok(set.into_resources(name))
    }

    /// SOA stored at `name`, or one synthesized for `zone` when none is stored
    /// and `zone` is not the root.
    pub async fn soa(&self, zone: &str, name: &str) -> Result<Vec<DNSResource>> {
        match self.fetch(&self.key_for(name), DNSResourceType::SOA).await {
            Ok(set) => Ok(set.into_resources(name)),
            Err(ResolveError::NotFound) if zone != ROOT_ZONE => {
                debug!("No SOA stored for {}, synthesizing one for {}", name, zone);
                Ok(vec![SoaItem::synthesized(zone).to_soa(zone, soa_serial())])
            }
            Err(e) => Err(e),
        }
    }

    /// Direct lookup for `qtype`, then the exact-key CNAME probe, first at
    /// the name's key and once more at its wildcard key. A CNAME found by
    /// the probe is chased item by item.
    ///
    /// `emitted` counts CNAME records already placed in the top-level answer
    /// outside this branch, so the cap holds across sibling items.
    fn chase<'a>(
        &'a self,
        zone: &'a str,
        name: &'a str,
        qtype: DNSResourceType,
        chain: Vec<DNSResource>,
        emitted: usize,
    ) -> BoxFuture<'a, Result<Answer>> {
        async move {
            let exact_key = self.key_for(name);

            let mut cnames = None;
            for key in candidate_keys(&exact_key) {
                match self.fetch(&key, qtype).await {
                    Ok(set) => return Ok(Answer::complete(set.into_resources(name))),
                    Err(e) if !e.is_not_found() => return Err(e),
                    Err(_) => {}
                }

                match self.fetch_cnames(&exact_key).await {
                    Ok(items) => {
                        cnames = Some(items);
                        break;
                    }
                    Err(e) if e.is_not_found() => {
                        trace!("No {} or CNAME at {}", qtype, key);
                    }
                    Err(e) => return Err(e),
                }
            }

            let Some(cnames) = cnames else {
                debug!("{} {} not found", name, qtype);
                return Err(ResolveError::NotFound);
            };

            let mut answer = Answer::default();
            for item in cnames {
                let used = emitted + chain.len() + cname_count(&answer.records);
                if used > MAX_CHAIN_LEN {
                    debug!("CNAME budget for {} reached {} records, stopping", name, used);
                    break;
                }

                let target = item.target();
                let cname = item.to_cname(name);
                if in_chain(&chain, &target) {
                    debug!("CNAME loop at {} -> {}, skipping", name, target);
                    continue;
                }

                if zone == ROOT_ZONE || is_subdomain(zone, &target) {
                    let mut next_chain = chain.clone();
                    next_chain.push(cname.clone());
                    let sibling_cnames = emitted + cname_count(&answer.records);
                    match self.chase(zone, &target, qtype, next_chain, sibling_cnames).await {
                        Ok(next) => {
                            answer.truncated |= next.truncated;
                            if !next.records.is_empty() {
                                answer.records.push(cname);
                                answer.records.extend(next.records);
                            }
                            continue;
                        }
                        Err(e) if !e.is_not_found() && zone != ROOT_ZONE => {
                            debug!("Skipping CNAME target {}: {}", target, e);
                            continue;
                        }
                        Err(e) => {
                            debug!("CNAME target {} unresolved locally ({}), delegating", target, e);
                        }
                    }
                }

                match self.upstream.lookup(&target, qtype).await {
                    Ok(delegated) => {
                        answer.truncated |= delegated.truncated;
                        answer.records.push(cname);
                        answer.records.extend(delegated.records);
                    }
                    Err(e) => {
                        debug!("Upstream lookup of {} {} failed: {}", target, qtype, e);
                    }
                }
            }

            Ok(answer)
        }
        .boxed()
    }

    async fn fetch_raw(&self, key: &str, rtype: DNSResourceType) -> Result<String> {
        self.store
            .get(key, rtype.as_str())
            .await?
            .ok_or(ResolveError::NotFound)
    }

    async fn fetch(&self, key: &str, rtype: DNSResourceType) -> Result<RecordSet> {
        let raw = self.fetch_raw(key, rtype).await?;
        RecordSet::decode(&raw, rtype)
    }

    async fn fetch_cnames(&self, key: &str) -> Result<Vec<HostItem>> {
        let raw = self.fetch_raw(key, DNSResourceType::CNAME).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// The exact key, then its wildcard form unless the key already is one
fn candidate_keys(key: &str) -> Vec<String> {
    if is_wildcard(key) {
        vec![key.to_string()]
    } else {
        vec![key.to_string(), wildcard_of(key)]
    }
}

fn cname_count(records: &[DNSResource]) -> usize {
    records
        .iter()
        .filter(|r| r.rtype == DNSResourceType::CNAME)
        .count()
}

fn in_chain(chain: &[DNSResource], target: &str) -> bool {
    chain
        .iter()
        .filter_map(DNSResource::cname_target)
        .any(|t| t.eq_ignore_ascii_case(target))
}

/// Whether `name` is `parent` or lies below it. Case-insensitive; either
/// argument may omit the trailing dot.
pub fn is_subdomain(parent: &str, name: &str) -> bool {
    let parent = fqdn(&parent.to_ascii_lowercase());
    let name = fqdn(&name.to_ascii_lowercase());
    if parent == ROOT_ZONE {
        return true;
    }
    name == parent || name.ends_with(&format!(".{}", parent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resource::DNSResourceData;

    #[test]
    fn test_is_subdomain() {
        assert!(is_subdomain("example.com.", "example.com."));
        assert!(is_subdomain("example.com.", "www.example.com."));
        assert!(is_subdomain("example.com", "A.B.Example.COM."));
        assert!(is_subdomain(".", "anything.org."));
        assert!(!is_subdomain("example.com.", "badexample.com."));
        assert!(!is_subdomain("example.com.", "outside.org."));
        assert!(!is_subdomain("www.example.com.", "example.com."));
    }

    #[test]
    fn test_candidate_keys() {
        assert_eq!(
            candidate_keys("com:example:www"),
            vec!["com:example:www".to_string(), "com:example:*".to_string()]
        );
        assert_eq!(candidate_keys("com:example:*"), vec!["com:example:*".to_string()]);
    }

    #[test]
    fn test_in_chain_ignores_case() {
        let chain = vec![DNSResource::new(
            "www.example.com.",
            60,
            DNSResourceData::CNAME("CDN.example.com.".to_string()),
        )];
        assert!(in_chain(&chain, "cdn.example.com."));
        assert!(!in_chain(&chain, "www.example.com."));
    }

    #[test]
    fn test_supported_types() {
        assert!(Resolver::supports(DNSResourceType::SRV));
        assert!(Resolver::supports(DNSResourceType::SOA));
        assert!(!Resolver::supports(DNSResourceType::ANY));
        assert!(!Resolver::supports(DNSResourceType::Unknown(65)));
    }
}
