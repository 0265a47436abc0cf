//! Resolving a question against the local catalog: the authoritative
//! half of the server, as opposed to `forwarding`'s upstream half.

use dns_types::catalog::types::{Catalog, ZoneRecord};
use dns_types::protocol::types::{
    Message, Rcode, RecordClass, RecordTypeWithData, ResourceRecord,
};

/// Attempt to answer `message`'s question from `catalog`.
///
/// On a hit, mutates `message` in place into a response (QR=1, AA=1,
/// RA=1, RCODE=NOERROR, answers and additionals filled in, count
/// fields updated) and returns `true`. On a miss, `message` is left
/// untouched and this returns `false`, signalling the caller to fall
/// through to forwarding.
///
/// Setting RA=1 here is a known quirk carried over unchanged: RA
/// normally means "this server will perform recursion for you", not
/// "I have an authoritative answer", but this system uses it to mean
/// the latter.
pub fn try_resolve(catalog: &Catalog, message: &mut Message) -> bool {
    let Some(question) = message.question().cloned() else {
        return false;
    };

    if !matches!(question.qclass, RecordClass::IN) {
        return false;
    }

    let Some((record, _zone)) = catalog.try_lookup(&question) else {
        tracing::debug!(qname = %question.name.to_dotted_string(), qtype = %question.qtype, "no catalog match");
        return false;
    };

    let answer = ResourceRecord {
        name: question.name.clone(),
        rtype_with_data: record.rtype_with_data.clone(),
        rclass: record.class,
        ttl: record.ttl,
    };

    let mut additional = Vec::new();
    if let Some(glue_name) = record.rtype_with_data.requires_glue() {
        if let Some(glue) = glue_record(catalog, glue_name) {
            additional.push(glue);
        } else {
            tracing::warn!(target = %glue_name.to_dotted_string(), "no glue record available");
        }
    }

    message.header.is_response = true;
    message.header.is_authoritative = true;
    message.header.recursion_available = true;
    message.header.rcode = Rcode::NoError;
    message.set_answers(vec![answer], additional);

    true
}

fn glue_record(
    catalog: &Catalog,
    target: &dns_types::protocol::types::DomainName,
) -> Option<ResourceRecord> {
    let record: &ZoneRecord = catalog.try_lookup_a(target)?;
    let RecordTypeWithData::A { address } = record.rtype_with_data else {
        return None;
    };

    Some(ResourceRecord {
        name: target.clone(),
        rtype_with_data: RecordTypeWithData::A { address },
        rclass: RecordClass::IN,
        ttl: record.ttl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_types::catalog::types::Zone;
    use dns_types::protocol::types::test_util::domain;
    use dns_types::protocol::types::{Question, RecordType};
    use std::net::Ipv4Addr;

    fn a_zone_record(name: &str, address: Ipv4Addr) -> ZoneRecord {
        ZoneRecord {
            domain_name: name.to_string(),
            ttl: 3600,
            class: RecordClass::IN,
            rtype_with_data: RecordTypeWithData::A { address },
        }
    }

    fn ns_zone_record(name: &str, nsdname: &str) -> ZoneRecord {
        ZoneRecord {
            domain_name: name.to_string(),
            ttl: 86400,
            class: RecordClass::IN,
            rtype_with_data: RecordTypeWithData::NS {
                nsdname: domain(nsdname),
            },
        }
    }

    #[test]
    fn resolves_authoritative_a() {
        let catalog = Catalog::new(vec![Zone {
            origin: domain("example.com."),
            records: vec![a_zone_record("www", Ipv4Addr::new(192, 0, 2, 1))],
        }]);

        let mut message = Message::from_question(
            0x1234,
            Question {
                name: domain("www.example.com."),
                qtype: RecordType::A,
                qclass: RecordClass::IN,
            },
        );

        assert!(try_resolve(&catalog, &mut message));
        assert!(message.header.is_response);
        assert!(message.header.is_authoritative);
        assert!(message.header.recursion_available);
        assert!(matches!(message.header.rcode, Rcode::NoError));
        assert_eq!(1, message.answers.len());
        assert!(message.counts_are_consistent());
    }

    #[test]
    fn synthesises_glue_for_ns() {
        let catalog = Catalog::new(vec![Zone {
            origin: domain("example.com."),
            records: vec![
                ns_zone_record("@", "ns1.example.com."),
                a_zone_record("ns1", Ipv4Addr::new(192, 0, 2, 53)),
            ],
        }]);

        let mut message = Message::from_question(
            1,
            Question {
                name: domain("example.com."),
                qtype: RecordType::NS,
                qclass: RecordClass::IN,
            },
        );

        assert!(try_resolve(&catalog, &mut message));
        assert_eq!(1, message.answers.len());
        assert_eq!(1, message.additional.len());
        assert!(message.counts_are_consistent());
    }

    #[test]
    fn missing_glue_does_not_fail_the_answer() {
        let catalog = Catalog::new(vec![Zone {
            origin: domain("example.com."),
            records: vec![ns_zone_record("@", "ns1.elsewhere.com.")],
        }]);

        let mut message = Message::from_question(
            1,
            Question {
                name: domain("example.com."),
                qtype: RecordType::NS,
                qclass: RecordClass::IN,
            },
        );

        assert!(try_resolve(&catalog, &mut message));
        assert_eq!(1, message.answers.len());
        assert!(message.additional.is_empty());
    }

    #[test]
    fn returns_false_on_miss() {
        let catalog = Catalog::new(vec![]);
        let mut message = Message::from_question(
            1,
            Question {
                name: domain("example.com."),
                qtype: RecordType::A,
                qclass: RecordClass::IN,
            },
        );

        assert!(!try_resolve(&catalog, &mut message));
        assert!(!message.header.is_response);
    }

    #[test]
    fn rejects_non_in_qclass() {
        let catalog = Catalog::new(vec![Zone {
            origin: domain("example.com."),
            records: vec![a_zone_record("www", Ipv4Addr::new(192, 0, 2, 1))],
        }]);

        let mut message = Message::from_question(
            1,
            Question {
                name: domain("www.example.com."),
                qtype: RecordType::A,
                qclass: RecordClass::CH,
            },
        );

        assert!(!try_resolve(&catalog, &mut message));
    }
}
