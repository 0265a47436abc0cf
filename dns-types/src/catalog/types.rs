//! The in-memory zone catalog: an ordered list of zones, each holding
//! an ordered list of records, searched in catalog order at lookup
//! time.  See the `resolver` crate's `try_resolve` for how a question
//! turns into a response.

use crate::protocol::types::{DomainName, Question, RecordClass, RecordType, RecordTypeWithData};

/// A single record in a zone.  Distinct from a `ResourceRecord`: the
/// owner name is relative to the zone's origin (`@` for the apex)
/// rather than already fully qualified, matching how the catalog file
/// format expresses it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ZoneRecord {
    /// The owner name, relative to the zone origin.  `@` denotes the
    /// zone apex itself.
    pub domain_name: String,
    pub ttl: u32,
    pub class: RecordClass,
    pub rtype_with_data: RecordTypeWithData,
}

impl ZoneRecord {
    /// The fully-qualified owner name of this record, given the zone
    /// it belongs to.
    pub fn fqdn(&self, origin: &DomainName) -> Option<DomainName> {
        if self.domain_name == "@" {
            Some(origin.clone())
        } else {
            DomainName::from_dotted_string(&format!(
                "{}.{}",
                self.domain_name,
                origin.to_dotted_string()
            ))
        }
    }
}

/// A zone: an origin and the records defined within it, in file
/// order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Zone {
    pub origin: DomainName,
    pub records: Vec<ZoneRecord>,
}

/// The full set of zones this server is authoritative for.  Built
/// once at startup and never mutated afterwards.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Catalog {
    pub zones: Vec<Zone>,
}

impl Catalog {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self { zones }
    }

    /// Find the record (and the zone it came from) answering `question`,
    /// per the catalog-order lookup algorithm: the first zone whose
    /// origin is a suffix of the qname, then the first record within
    /// it whose FQDN/TYPE/CLASS all match.
    pub fn try_lookup(&self, question: &Question) -> Option<(&ZoneRecord, &Zone)> {
        let qname = question.name.normalized();

        for zone in &self.zones {
            let origin = zone.origin.normalized();
            if !is_suffix(&qname, &origin) {
                continue;
            }

            for record in &zone.records {
                let Some(fqdn) = record.fqdn(&zone.origin) else {
                    continue;
                };
                if fqdn.normalized() == qname
                    && record.rtype_with_data.rtype() == question.qtype
                    && record.class == question.qclass
                {
                    return Some((record, zone));
                }
            }

            // catalog order: the first suffix-matching zone wins,
            // whether or not it actually contains the record.
            return None;
        }

        None
    }

    /// Look up an A record for `name` within whichever zone's origin
    /// is a suffix of it.  Used to synthesise glue records.
    pub fn try_lookup_a(&self, name: &DomainName) -> Option<&ZoneRecord> {
        let normalized = name.normalized();

        for zone in &self.zones {
            let origin = zone.origin.normalized();
            if !is_suffix(&normalized, &origin) {
                continue;
            }

            return zone.records.iter().find(|record| {
                record
                    .fqdn(&zone.origin)
                    .map(|fqdn| fqdn.normalized() == normalized)
                    .unwrap_or(false)
                    && matches!(record.rtype_with_data, RecordTypeWithData::A { .. })
                    && record.class == RecordClass::IN
            });
        }

        None
    }
}

fn is_suffix(qname: &str, origin: &str) -> bool {
    if origin.is_empty() {
        return true; // the root zone matches everything
    }
    qname == origin || qname.ends_with(&format!(".{origin}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::domain;

    fn a_zone_record(name: &str, address: std::net::Ipv4Addr) -> ZoneRecord {
        ZoneRecord {
            domain_name: name.to_string(),
            ttl: 3600,
            class: RecordClass::IN,
            rtype_with_data: RecordTypeWithData::A { address },
        }
    }

    #[test]
    fn try_lookup_finds_apex_record() {
        let catalog = Catalog::new(vec![Zone {
            origin: domain("example.com."),
            records: vec![a_zone_record("www", "192.0.2.1".parse().unwrap())],
        }]);

        let question = Question {
            name: domain("www.example.com."),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        };

        let (record, zone) = catalog.try_lookup(&question).unwrap();
        assert_eq!("www", record.domain_name);
        assert_eq!(domain("example.com."), zone.origin);
    }

    #[test]
    fn try_lookup_misses_outside_zone() {
        let catalog = Catalog::new(vec![Zone {
            origin: domain("example.com."),
            records: vec![a_zone_record("www", "192.0.2.1".parse().unwrap())],
        }]);

        let question = Question {
            name: domain("www.example.org."),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        };

        assert!(catalog.try_lookup(&question).is_none());
    }

    #[test]
    fn first_matching_zone_wins() {
        let catalog = Catalog::new(vec![
            Zone {
                origin: domain("example.com."),
                records: vec![],
            },
            Zone {
                origin: domain("example.com."),
                records: vec![a_zone_record("www", "192.0.2.1".parse().unwrap())],
            },
        ]);

        let question = Question {
            name: domain("www.example.com."),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        };

        // the first zone matches the suffix but has no record, and
        // catalog order means we don't fall through to the second.
        assert!(catalog.try_lookup(&question).is_none());
    }
}
