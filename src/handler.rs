//! Answer assembly
//!
//! Maps resolution outcomes onto DNS responses. Queries outside the served
//! zones, and NotFound answers inside fallthrough zones, are handed back to
//! the caller as [`HandlerOutcome::Next`].

use crate::dns::{DNSPacket, enums::ResponseCode};
use crate::record::fqdn;
use crate::resolver::{ROOT_ZONE, Resolver, is_subdomain};
use std::sync::Arc;
use tracing::{debug, warn};

/// Opcode of a standard query
const OPCODE_QUERY: u8 = 0;

/// Authoritative zones, stored as lower-case FQDNs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zones(Vec<String>);

impl Zones {
    pub fn new<I, S>(zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(zones.into_iter().map(|z| normalize_zone(z.as_ref())).collect())
    }

    /// Longest zone containing `name`
    pub fn matches(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .filter(|zone| is_subdomain(zone, name))
            .max_by_key(|zone| if zone.as_str() == ROOT_ZONE { 0 } else { zone.len() })
            .map(String::as_str)
    }
}

/// Lower-case FQDN form of a zone name, `.` for the root
pub fn normalize_zone(zone: &str) -> String {
    let zone = zone.trim().to_ascii_lowercase();
    if zone.is_empty() || zone == ROOT_ZONE {
        ROOT_ZONE.to_string()
    } else {
        fqdn(zone.trim_start_matches('.'))
    }
}

/// Which NotFound answers are passed on instead of answered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Fallthrough {
    #[default]
    Disabled,
    /// Every name falls through
    All,
    Zones(Zones),
}

impl Fallthrough {
    pub fn through(&self, name: &str) -> bool {
        match self {
            Fallthrough::Disabled => false,
            Fallthrough::All => true,
            Fallthrough::Zones(zones) => zones.matches(name).is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Response to send to the client
    Answer(DNSPacket),
    /// Not ours to answer; pass the query on
    Next,
}

pub struct RequestHandler {
    resolver: Arc<Resolver>,
    zones: Zones,
    fallthrough: Fallthrough,
}

impl RequestHandler {
    pub fn new(resolver: Arc<Resolver>, zones: Zones, fallthrough: Fallthrough) -> Self {
        Self {
            resolver,
            zones,
            fallthrough,
        }
    }

    pub async fn handle(&self, query: &DNSPacket) -> HandlerOutcome {
        if query.header.opcode != OPCODE_QUERY {
            debug!("Rejecting opcode {} for id={}", query.header.opcode, query.header.id);
            return HandlerOutcome::Answer(query.reply(ResponseCode::NotImplemented));
        }

        let Some(question) = query.questions.first() else {
            debug!("Query id={} has no question", query.header.id);
            return HandlerOutcome::Answer(query.reply(ResponseCode::FormatError));
        };

        let qname = question.name();
        let Some(zone) = self.zones.matches(&qname) else {
            debug!("{} is outside the served zones", qname);
            return HandlerOutcome::Next;
        };

        if !Resolver::supports(question.qtype) {
            debug!("Query type {} not implemented", question.qtype);
            return HandlerOutcome::Answer(
                self.negative_answer(query, zone, ResponseCode::NotImplemented)
                    .await,
            );
        }

        let answer = match self.resolver.resolve(zone, &qname, question.qtype).await {
            Ok(answer) => answer,
            Err(e) if e.is_not_found() => {
                if self.fallthrough.through(&qname) {
                    debug!("{} {} not found, falling through", qname, question.qtype);
                    return HandlerOutcome::Next;
                }
                return HandlerOutcome::Answer(
                    self.negative_answer(query, zone, ResponseCode::NameError)
                        .await,
                );
            }
            Err(e) => {
                warn!("Failed to resolve {} {}: {}", qname, question.qtype, e);
                return HandlerOutcome::Answer(
                    self.negative_answer(query, zone, ResponseCode::ServerFailure)
                        .await,
                );
            }
        };

        if answer.records.is_empty() {
            return HandlerOutcome::Answer(
                self.negative_answer(query, zone, ResponseCode::NoError)
                    .await,
            );
        }

        debug!(
            "Answering {} {} with {} records (truncated={})",
            qname,
            question.qtype,
            answer.records.len(),
            answer.truncated
        );
        let mut response = query.reply(ResponseCode::NoError);
        response.header.aa = true;
        response.header.tc = answer.truncated;
        response.answers = answer.records;
        HandlerOutcome::Answer(response)
    }

    /// Authoritative response without answers, carrying the zone's SOA in
    /// the authority section when one can be produced.
    async fn negative_answer(
        &self,
        query: &DNSPacket,
        zone: &str,
        rcode: ResponseCode,
    ) -> DNSPacket {
        let mut response = query.reply(rcode);
        response.header.aa = true;
        match self.resolver.soa(zone, zone).await {
            Ok(soa) => response.authorities = soa,
            Err(e) => debug!("No SOA for zone {}: {}", zone, e),
        }
        response
    }
}

/// Response for a query nobody answered
pub fn refused(query: &DNSPacket) -> DNSPacket {
    query.reply(ResponseCode::Refused)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_normalization() {
        assert_eq!(normalize_zone("Example.COM"), "example.com.");
        assert_eq!(normalize_zone("example.com."), "example.com.");
        assert_eq!(normalize_zone("."), ".");
        assert_eq!(normalize_zone(""), ".");
    }

    #[test]
    fn test_longest_zone_wins() {
        let zones = Zones::new([".", "example.com", "sub.example.com."]);
        assert_eq!(zones.matches("a.sub.example.com."), Some("sub.example.com."));
        assert_eq!(zones.matches("www.example.com."), Some("example.com."));
        assert_eq!(zones.matches("other.org."), Some("."));
    }

    #[test]
    fn test_no_zone_match() {
        let zones = Zones::new(["example.com."]);
        assert_eq!(zones.matches("example.org."), None);
        assert_eq!(zones.matches("notexample.com."), None);
    }

    #[test]
    fn test_fallthrough() {
        assert!(!Fallthrough::Disabled.through("a.example.com."));
        assert!(Fallthrough::All.through("a.example.com."));
        let ft = Fallthrough::Zones(Zones::new(["example.com."]));
        assert!(ft.through("a.example.com."));
        assert!(!ft.through("a.example.org."));
    }
}
