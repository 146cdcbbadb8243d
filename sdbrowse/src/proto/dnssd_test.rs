use super::*;
use crate::message::resource::ResourceHeader;
use sansio::Protocol;
use shared::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

const PEER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

fn example_type() -> ServiceType {
    ServiceType::new("_example._tcp").unwrap()
}

fn record(name: &str, ttl: u32, body: Box<dyn crate::message::resource::ResourceBody>) -> Resource {
    Resource {
        header: ResourceHeader {
            name: Name::new(name).unwrap(),
            class: DNSCLASS_INET,
            ttl,
            ..Default::default()
        },
        body: Some(body),
    }
}

fn ptr(target: &str, ttl: u32) -> Resource {
    record(
        "_example._tcp.local.",
        ttl,
        Box::new(PtrResource {
            ptr: Name::new(target).unwrap(),
        }),
    )
}

fn srv(name: &str, port: u16, target: &str) -> Resource {
    record(
        name,
        120,
        Box::new(SrvResource {
            priority: 0,
            weight: 0,
            port,
            target: Name::new(target).unwrap(),
        }),
    )
}

fn txt(name: &str, entries: &[&str]) -> Resource {
    record(
        name,
        4500,
        Box::new(TxtResource {
            txt: entries.iter().map(|e| e.as_bytes().to_vec()).collect(),
        }),
    )
}

fn a(name: &str, ip: Ipv4Addr) -> Resource {
    record(name, 120, Box::new(AResource { a: ip.octets() }))
}

fn packet(response: bool, answers: Vec<Resource>, additionals: Vec<Resource>, now: Instant) -> TaggedBytesMut {
    let mut msg = Message {
        header: Header {
            response,
            authoritative: response,
            ..Default::default()
        },
        answers,
        additionals,
        ..Default::default()
    };
    let raw = msg.pack().unwrap();
    TransportMessage {
        now,
        transport: TransportContext {
            local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), MDNS_PORT),
            peer_addr: SocketAddr::new(IpAddr::V4(PEER), MDNS_PORT),
            interface: 2,
        },
        message: BytesMut::from(&raw[..]),
    }
}

fn response(answers: Vec<Resource>, additionals: Vec<Resource>, now: Instant) -> TaggedBytesMut {
    packet(true, answers, additionals, now)
}

fn events(engine: &mut DnsSd) -> Vec<DnsSdEvent> {
    std::iter::from_fn(|| engine.poll_event()).collect()
}

fn questions(packet: &TaggedBytesMut) -> Vec<(String, DnsType)> {
    let mut msg = Message::default();
    msg.unpack(&packet.message[..]).unwrap();
    msg.questions
        .into_iter()
        .map(|q| (q.name.data, q.typ))
        .collect()
}

fn device_a() -> ServiceInstance {
    ServiceInstance {
        interface: IfIndex(2),
        protocol: IpProtocol::Inet,
        name: "device-a".to_owned(),
        service_type: example_type(),
        domain: "local".to_owned(),
    }
}

#[test]
fn test_browse_queues_ptr_question() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();

    let id = engine.browse(&example_type(), now).unwrap();
    assert!(engine.is_browsing(id));

    let packet = engine.poll_write().expect("PTR question should be queued");
    assert_eq!(packet.transport.peer_addr, MDNS_DEST_ADDR);
    assert_eq!(
        questions(&packet),
        vec![("_example._tcp.local.".to_owned(), DnsType::Ptr)]
    );
    assert!(engine.poll_write().is_none());

    assert_eq!(
        events(&mut engine),
        vec![DnsSdEvent::Milestone(id, Milestone::CacheExhausted)]
    );
}

#[test]
fn test_ptr_answer_adds_instance_once() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();
    let id = engine.browse(&example_type(), now).unwrap();
    events(&mut engine);

    let answer = || vec![ptr("device-a._example._tcp.local.", 4500)];
    engine.handle_read(response(answer(), vec![], now)).unwrap();
    assert_eq!(
        events(&mut engine),
        vec![DnsSdEvent::InstanceAdded(
            id,
            device_a(),
            LookupFlags::MULTICAST
        )]
    );

    engine.handle_read(response(answer(), vec![], now)).unwrap();
    assert!(events(&mut engine).is_empty());
    assert_eq!(engine.known_instance_count(id), 1);
}

#[test]
fn test_goodbye_removes_instance() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();
    let id = engine.browse(&example_type(), now).unwrap();
    engine
        .handle_read(response(vec![ptr("device-a._example._tcp.local.", 4500)], vec![], now))
        .unwrap();
    events(&mut engine);

    engine
        .handle_read(response(vec![ptr("device-a._example._tcp.local.", 0)], vec![], now))
        .unwrap();
    assert_eq!(
        events(&mut engine),
        vec![DnsSdEvent::InstanceRemoved(
            id,
            device_a(),
            LookupFlags::MULTICAST
        )]
    );
    assert_eq!(engine.known_instance_count(id), 0);

    // A second goodbye for an unknown instance is silent.
    engine
        .handle_read(response(vec![ptr("device-a._example._tcp.local.", 0)], vec![], now))
        .unwrap();
    assert!(events(&mut engine).is_empty());
}

#[test]
fn test_expired_instance_is_removed() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();
    let id = engine.browse(&example_type(), now).unwrap();
    engine
        .handle_read(response(vec![ptr("device-a._example._tcp.local.", 10)], vec![], now))
        .unwrap();
    events(&mut engine);

    engine.handle_timeout(now + Duration::from_secs(5)).unwrap();
    assert!(
        !events(&mut engine)
            .iter()
            .any(|e| matches!(e, DnsSdEvent::InstanceRemoved(..)))
    );

    engine.handle_timeout(now + Duration::from_secs(11)).unwrap();
    assert!(
        events(&mut engine)
            .contains(&DnsSdEvent::InstanceRemoved(id, device_a(), LookupFlags::MULTICAST))
    );
}

#[test]
fn test_all_for_now_reported_once() {
    let mut engine = DnsSd::new(
        DnsSdConfig::default().with_all_for_now_delay(Duration::from_millis(500)),
    );
    let now = Instant::now();
    let id = engine.browse(&example_type(), now).unwrap();
    events(&mut engine);

    engine.handle_timeout(now + Duration::from_millis(100)).unwrap();
    assert!(events(&mut engine).is_empty());

    engine.handle_timeout(now + Duration::from_millis(600)).unwrap();
    assert_eq!(
        events(&mut engine),
        vec![DnsSdEvent::Milestone(id, Milestone::AllForNow)]
    );

    engine.handle_timeout(now + Duration::from_millis(900)).unwrap();
    assert!(events(&mut engine).is_empty());
}

#[test]
fn test_browse_retry_interval_doubles() {
    let mut engine = DnsSd::new(
        DnsSdConfig::default()
            .with_query_interval(Duration::from_millis(100))
            .with_max_query_interval(Duration::from_millis(300))
            .with_all_for_now_delay(Duration::from_secs(60)),
    );
    let now = Instant::now();
    engine.browse(&example_type(), now).unwrap();
    assert!(engine.poll_write().is_some());
    assert_eq!(engine.poll_timeout(), Some(now + Duration::from_millis(100)));

    let t1 = now + Duration::from_millis(100);
    engine.handle_timeout(t1).unwrap();
    assert!(engine.poll_write().is_some());
    assert_eq!(engine.poll_timeout(), Some(t1 + Duration::from_millis(200)));

    let t2 = t1 + Duration::from_millis(200);
    engine.handle_timeout(t2).unwrap();
    assert!(engine.poll_write().is_some());
    // Capped by the maximum interval.
    assert_eq!(engine.poll_timeout(), Some(t2 + Duration::from_millis(300)));
}

#[test]
fn test_resolve_from_cached_additionals() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();
    engine.browse(&example_type(), now).unwrap();
    engine.poll_write();

    let fullname = "device-a._example._tcp.local.";
    engine
        .handle_read(response(
            vec![ptr(fullname, 4500)],
            vec![
                srv(fullname, 7000, "device-a.local."),
                txt(fullname, &["v=1"]),
                a("device-a.local.", PEER),
            ],
            now,
        ))
        .unwrap();
    events(&mut engine);

    let id = engine.resolve(&device_a(), IpProtocol::Unspec, now).unwrap();
    assert!(!engine.is_resolving(id));
    assert!(engine.poll_write().is_none());
    assert_eq!(
        events(&mut engine),
        vec![DnsSdEvent::Resolved(
            id,
            ResolutionResult {
                instance: device_a(),
                host_name: "device-a.local".to_owned(),
                address: IpAddr::V4(PEER),
                port: 7000,
                txt: TxtRecord(vec!["v=1".to_owned()]),
                flags: LookupFlags::MULTICAST | LookupFlags::CACHED,
            }
        )]
    );
}

#[test]
fn test_resolve_asks_for_target_address() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();
    let fullname = "device-a._example._tcp.local.";

    let id = engine.resolve(&device_a(), IpProtocol::Inet, now).unwrap();
    assert!(engine.is_resolving(id));
    let packet = engine.poll_write().unwrap();
    assert_eq!(
        questions(&packet),
        vec![
            (fullname.to_owned(), DnsType::Srv),
            (fullname.to_owned(), DnsType::Txt),
        ]
    );

    engine
        .handle_read(response(
            vec![srv(fullname, 7000, "device-a.local."), txt(fullname, &["v=1"])],
            vec![],
            now,
        ))
        .unwrap();
    assert!(events(&mut engine).is_empty());
    let packet = engine.poll_write().expect("address question should follow the SRV answer");
    assert_eq!(
        questions(&packet),
        vec![("device-a.local.".to_owned(), DnsType::A)]
    );

    engine
        .handle_read(response(vec![a("device-a.local.", PEER)], vec![], now))
        .unwrap();
    let events = events(&mut engine);
    assert_eq!(events.len(), 1);
    match &events[0] {
        DnsSdEvent::Resolved(resolved, result) => {
            assert_eq!(*resolved, id);
            assert_eq!(result.port, 7000);
            assert_eq!(result.address, IpAddr::V4(PEER));
            assert!(!result.flags.contains(LookupFlags::CACHED));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!engine.is_resolving(id));
    assert_eq!(engine.pending_resolve_count(), 0);
}

#[test]
fn test_resolve_timeout() {
    let mut engine = DnsSd::new(
        DnsSdConfig::default().with_resolve_timeout(Duration::from_secs(2)),
    );
    let now = Instant::now();
    let id = engine.resolve(&device_a(), IpProtocol::Unspec, now).unwrap();
    engine.poll_write();

    engine.handle_timeout(now + Duration::from_secs(1)).unwrap();
    assert!(engine.is_resolving(id));
    assert!(events(&mut engine).is_empty());
    // The retry repeats the unanswered questions.
    assert_eq!(questions(&engine.poll_write().unwrap()).len(), 2);

    engine.handle_timeout(now + Duration::from_secs(2)).unwrap();
    assert_eq!(
        events(&mut engine),
        vec![DnsSdEvent::ResolveFailed(
            id,
            RESOLVE_TIMEOUT_REASON.to_owned()
        )]
    );
    assert!(!engine.is_resolving(id));

    engine.handle_timeout(now + Duration::from_secs(10)).unwrap();
    assert!(events(&mut engine).is_empty());
}

#[test]
fn test_own_announcements() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    engine.set_local_addresses(vec![IpAddr::V4(PEER)]);
    let now = Instant::now();
    let id = engine.browse(&example_type(), now).unwrap();
    events(&mut engine);

    engine
        .handle_read(response(vec![ptr("device-a._example._tcp.local.", 4500)], vec![], now))
        .unwrap();
    match events(&mut engine).as_slice() {
        [DnsSdEvent::InstanceAdded(browse, _, flags)] => {
            assert_eq!(*browse, id);
            assert!(flags.contains(LookupFlags::OUR_OWN | LookupFlags::LOCAL));
        }
        other => panic!("unexpected events {other:?}"),
    }

    let mut ignoring = DnsSd::new(DnsSdConfig::default());
    ignoring.set_local_addresses(vec![IpAddr::V4(PEER)]);
    ignoring.set_ignore_own(true);
    let id = ignoring.browse(&example_type(), now).unwrap();
    events(&mut ignoring);
    ignoring
        .handle_read(response(vec![ptr("device-a._example._tcp.local.", 4500)], vec![], now))
        .unwrap();
    assert!(events(&mut ignoring).is_empty());
    assert_eq!(ignoring.known_instance_count(id), 0);
}

#[test]
fn test_queries_and_other_types_are_ignored() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();
    let id = engine.browse(&example_type(), now).unwrap();
    events(&mut engine);

    // A query carrying a known answer is not a response.
    engine
        .handle_read(packet(false, vec![ptr("device-a._example._tcp.local.", 4500)], vec![], now))
        .unwrap();
    // A PTR target of another service type.
    engine
        .handle_read(response(vec![ptr("printer._ipp._tcp.local.", 4500)], vec![], now))
        .unwrap();
    // Garbage is logged and dropped.
    let mut garbage = response(vec![], vec![], now);
    garbage.message = BytesMut::from(&[0u8, 1, 2][..]);
    engine.handle_read(garbage).unwrap();

    assert!(events(&mut engine).is_empty());
    assert_eq!(engine.known_instance_count(id), 0);
}

#[test]
fn test_second_browse_reports_cached_instances() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();
    let first = engine.browse(&example_type(), now).unwrap();
    engine
        .handle_read(response(vec![ptr("device-a._example._tcp.local.", 4500)], vec![], now))
        .unwrap();
    engine.cancel_browse(first).unwrap();
    events(&mut engine);

    let second = engine.browse(&example_type(), now).unwrap();
    let events = events(&mut engine);
    assert_eq!(events.len(), 2);
    match &events[0] {
        DnsSdEvent::InstanceAdded(browse, instance, flags) => {
            assert_eq!(*browse, second);
            assert_eq!(instance.name, "device-a");
            assert!(flags.contains(LookupFlags::CACHED | LookupFlags::MULTICAST));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        events[1],
        DnsSdEvent::Milestone(second, Milestone::CacheExhausted)
    );
}

#[test]
fn test_cancel_browse() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();
    let id = engine.browse(&example_type(), now).unwrap();

    engine.cancel_browse(id).unwrap();
    assert!(!engine.is_browsing(id));
    // Queued milestones of a cancelled browse are dropped too.
    assert!(events(&mut engine).is_empty());
    assert_eq!(engine.cancel_browse(id), Err(Error::ErrUnknownBrowse));

    engine
        .handle_read(response(vec![ptr("device-a._example._tcp.local.", 4500)], vec![], now))
        .unwrap();
    assert!(events(&mut engine).is_empty());
    assert!(engine.poll_timeout().is_none());
}

#[test]
fn test_unsolicited_records_are_not_cached() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();

    for round in 0..200u32 {
        let flood = (0..50u8)
            .map(|i| {
                record(
                    &format!("host-{i}.local."),
                    u32::MAX,
                    Box::new(AResource {
                        a: [10, 1, (round % 250) as u8, i],
                    }),
                )
            })
            .collect();
        engine.handle_read(response(flood, vec![], now)).unwrap();
    }
    assert_eq!(engine.cached_record_count(), 0);

    // Once browsing, the PTR answer and the records it points at are kept.
    engine.browse(&example_type(), now).unwrap();
    let fullname = "device-a._example._tcp.local.";
    engine
        .handle_read(response(
            vec![ptr(fullname, 4500)],
            vec![
                srv(fullname, 7000, "device-a.local."),
                txt(fullname, &["v=1"]),
                a("device-a.local.", PEER),
                a("stranger.local.", PEER),
            ],
            now,
        ))
        .unwrap();
    assert_eq!(engine.cached_record_count(), 4);
}

#[test]
fn test_cache_and_known_instances_are_bounded() {
    let mut engine = DnsSd::new(DnsSdConfig::default().with_max_cache_entries(10));
    let now = Instant::now();
    let id = engine.browse(&example_type(), now).unwrap();
    events(&mut engine);

    for i in 0..30u32 {
        engine
            .handle_read(response(
                vec![ptr(&format!("device-{i}._example._tcp.local."), 100 + i)],
                vec![],
                now,
            ))
            .unwrap();
    }
    assert_eq!(engine.cached_record_count(), 10);
    assert_eq!(engine.known_instance_count(id), 10);
    let added = events(&mut engine)
        .into_iter()
        .filter(|event| matches!(event, DnsSdEvent::InstanceAdded(..)))
        .count();
    assert_eq!(added, 10);

    // The records closest to expiry were evicted; the latest ones are kept.
    let second = engine.browse(&example_type(), now).unwrap();
    let cached: Vec<String> = events(&mut engine)
        .into_iter()
        .filter_map(|event| match event {
            DnsSdEvent::InstanceAdded(browse, instance, _) if browse == second => {
                Some(instance.name)
            }
            _ => None,
        })
        .collect();
    assert_eq!(cached.len(), 10);
    assert!(cached.iter().all(|name| {
        let n: u32 = name.trim_start_matches("device-").parse().unwrap();
        n >= 20
    }));
}

#[test]
fn test_huge_timeout_stays_pending() {
    let mut engine = DnsSd::new(
        DnsSdConfig::default().with_resolve_timeout(Duration::from_secs(u64::MAX)),
    );
    let now = Instant::now();
    let id = engine.resolve(&device_a(), IpProtocol::Unspec, now).unwrap();
    assert!(engine.is_resolving(id));

    engine
        .handle_timeout(now + Duration::from_secs(24 * 60 * 60))
        .unwrap();
    assert!(engine.is_resolving(id));
    assert!(events(&mut engine).is_empty());
}

#[test]
fn test_retry_interval_saturates() {
    let mut engine = DnsSd::new(
        DnsSdConfig::default()
            .with_max_query_interval(Duration::MAX)
            .with_all_for_now_delay(Duration::MAX),
    );
    let now = Instant::now();
    engine.browse(&example_type(), now).unwrap();

    let mut last = now;
    for _ in 0..64 {
        let next = engine.poll_timeout().unwrap();
        assert!(next > last);
        engine.handle_timeout(next).unwrap();
        last = next;
    }
    assert!(engine.poll_timeout().unwrap() > last);
}

#[test]
fn test_close() {
    let mut engine = DnsSd::new(DnsSdConfig::default());
    let now = Instant::now();
    engine.browse(&example_type(), now).unwrap();
    engine.resolve(&device_a(), IpProtocol::Unspec, now).unwrap();

    engine.close().unwrap();
    assert!(engine.poll_write().is_none());
    assert!(engine.poll_event().is_none());
    assert!(engine.poll_timeout().is_none());
    assert_eq!(engine.pending_resolve_count(), 0);

    assert_eq!(
        engine.handle_read(response(vec![], vec![], now)),
        Err(Error::ErrConnectionClosed)
    );
    assert_eq!(engine.handle_timeout(now), Err(Error::ErrConnectionClosed));
    assert_eq!(
        engine.browse(&example_type(), now),
        Err(Error::ErrConnectionClosed)
    );
}
