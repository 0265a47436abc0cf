use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::net::Ipv4Addr;

use dns_types::protocol::types::*;

#[allow(non_snake_case)]
fn bench__question(c: &mut Criterion) {
    let message = Message::from_question(
        1234,
        Question {
            name: domain("www.example.com."),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        },
    );

    c.bench_function("serialise/question", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.into_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.into_octets().unwrap();
    c.bench_function("deserialise/question", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

#[allow(non_snake_case)]
fn bench__answer__small(c: &mut Criterion) {
    let mut message = Message::from_question(
        1234,
        Question {
            name: domain("www.example.com."),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        },
    )
    .make_response();

    message.set_answers(
        vec![a_record("www.example.com.", Ipv4Addr::new(1, 1, 1, 1))],
        Vec::new(),
    );

    c.bench_function("serialise/answer/small", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.into_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.into_octets().unwrap();
    c.bench_function("deserialise/answer/small", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

#[allow(non_snake_case)]
fn bench__answer__big(c: &mut Criterion) {
    let mut message = Message::from_question(
        1234,
        Question {
            name: domain("www.example.com."),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        },
    )
    .make_response();

    let count = 128;
    let mut answers = Vec::new();
    let mut authority = Vec::new();
    let mut additional = Vec::new();

    for i in 0..count {
        answers.push(cname_record(
            "www.example.com.",
            &format!("www.cname-target-{i:?}.example.com."),
        ));
    }
    for i in 0..count {
        authority.push(ns_record(
            &format!("cname-target-{i:?}.example.com."),
            &format!("ns-{i:?}.example.com."),
        ));
    }
    for i in 0..count {
        additional.push(a_record(
            &format!("ns-{i:?}.example.com."),
            Ipv4Addr::new(1, 1, 1, 1),
        ));
    }

    message.header.nscount = authority.len() as u16;
    message.authority = authority;
    message.set_answers(answers, additional);

    c.bench_function("serialise/answer/big", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.into_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.into_octets().unwrap();
    c.bench_function("deserialise/answer/big", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

// TODO: reduce duplication with protocol::types::test_util
fn domain(name: &str) -> DomainName {
    DomainName::from_dotted_string(name).unwrap()
}

fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
    ResourceRecord {
        name: domain(name),
        rtype_with_data: RecordTypeWithData::A { address },
        rclass: RecordClass::IN,
        ttl: 300,
    }
}

fn cname_record(name: &str, target_name: &str) -> ResourceRecord {
    ResourceRecord {
        name: domain(name),
        rtype_with_data: RecordTypeWithData::CNAME {
            cname: domain(target_name),
        },
        rclass: RecordClass::IN,
        ttl: 300,
    }
}

fn ns_record(superdomain_name: &str, nameserver_name: &str) -> ResourceRecord {
    ResourceRecord {
        name: domain(superdomain_name),
        rtype_with_data: RecordTypeWithData::NS {
            nsdname: domain(nameserver_name),
        },
        rclass: RecordClass::IN,
        ttl: 300,
    }
}

criterion_group!(
    benches,
    bench__question,
    bench__answer__small,
    bench__answer__big,
);
criterion_main!(benches);
