use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use rcm_packet::{
    decode_packet, MessageKind, Packet, Status, DEFAULT_MAX_PAYLOAD, DEFAULT_POOL_ID,
};
use rcm_server::{FxnDesc, PoolParams, RcmClient, RcmError, RcmServer, ServerParams};
use rcm_transport::{LocalTransport, MessageTransport, TransportError};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

fn read_i32(payload: &[u8]) -> i32 {
    i32::from_le_bytes(payload[..4].try_into().expect("payload holds an i32"))
}

fn write_i32(payload: &mut BytesMut, value: i32) {
    payload.clear();
    payload.extend_from_slice(&value.to_le_bytes());
}

fn inc(payload: &mut BytesMut) -> i32 {
    let value = read_i32(payload) + 1;
    write_i32(payload, value);
    value
}

fn int_payload(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// A latch that blocks functions until the test opens it.
#[derive(Clone, Default)]
struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
    entered: Arc<AtomicBool>,
}

impl Gate {
    fn wait(&self) {
        self.entered.store(true, Ordering::SeqCst);
        let (open, cond) = &*self.inner;
        let mut open = open.lock().expect("gate lock");
        while !*open {
            open = cond.wait(open).expect("gate wait");
        }
    }

    fn open(&self) {
        let (open, cond) = &*self.inner;
        *open.lock().expect("gate lock") = true;
        cond.notify_all();
    }

    fn wait_entered(&self) {
        let start = Instant::now();
        while !self.entered.load(Ordering::SeqCst) {
            assert!(start.elapsed() < REPLY_TIMEOUT, "function never started");
            thread::sleep(Duration::from_millis(2));
        }
    }
}

struct Fixture {
    transport: Arc<LocalTransport>,
    server: RcmServer,
    client: RcmClient,
}

fn fixture(name: &str, params: ServerParams) -> Fixture {
    let transport = Arc::new(LocalTransport::new());
    let shared: Arc<dyn MessageTransport> = transport.clone();
    let mut server = RcmServer::create(shared.clone(), name, params).expect("server should create");
    server.start().expect("server should start");
    let client = RcmClient::connect(shared, name, &format!("{name}-client"))
        .expect("client should connect")
        .with_reply_timeout(REPLY_TIMEOUT);
    Fixture {
        transport,
        server,
        client,
    }
}

#[test]
fn exec_on_inline_default_pool_runs_function() {
    let params = ServerParams::default().with_pool(PoolParams::new("workers", 2));
    let fx = fixture("scenario-a", params);

    let dispatcher_thread = Arc::new(Mutex::new(None));
    let seen = dispatcher_thread.clone();
    fx.server
        .add_symbol("inc", move |payload| {
            *seen.lock().expect("lock") = thread::current().name().map(str::to_string);
            inc(payload)
        })
        .expect("symbol should register");

    let index = fx.client.symbol_index("inc").expect("inc should resolve");
    let reply = fx
        .client
        .exec(
            Packet::exec(index)
                .with_pool(DEFAULT_POOL_ID)
                .with_payload(&int_payload(5)),
        )
        .expect("reply should arrive");

    assert_eq!(reply.status, Status::Success);
    assert_eq!(read_i32(&reply.payload), 6);
    assert_eq!(reply.result, 6);
    assert_eq!(
        dispatcher_thread.lock().expect("lock").as_deref(),
        Some("rcm-scenario-a-dispatch"),
        "default pool without threads runs on the dispatcher"
    );
}

#[test]
fn job_messages_start_in_submission_order() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let log = starts.clone();
    let params = ServerParams::default()
        .with_pool(PoolParams::new("trio", 3))
        .with_fxn(FxnDesc::new("nap", move |payload| {
            let seq = read_i32(payload);
            log.lock().expect("lock").push(seq);
            // Later messages sleep less, so any reordering would show.
            thread::sleep(Duration::from_millis(5 * (5 - seq as u64)));
            seq
        }));
    let fx = fixture("scenario-b", params);

    let pool = fx.server.pool_id("trio").expect("trio pool exists");
    let nap = fx.client.symbol_index("nap").expect("nap resolves");
    let job = fx.client.acquire_job_id().expect("job id");

    let ids: Vec<u16> = (0..5)
        .map(|seq| {
            fx.client
                .send(
                    Packet::exec(nap)
                        .with_pool(pool)
                        .with_job(job)
                        .with_payload(&int_payload(seq)),
                )
                .expect("send")
        })
        .collect();

    for id in ids {
        let reply = fx.client.wait_for(id).expect("reply");
        assert_eq!(reply.status, Status::Success);
    }
    assert_eq!(*starts.lock().expect("lock"), vec![0, 1, 2, 3, 4]);
    fx.client.release_job_id(job).expect("release");
}

#[test]
fn concurrent_jobs_keep_their_own_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let record = log.clone();
    let params = ServerParams::default()
        .with_pool(PoolParams::new("wide", 4))
        .with_fxn(FxnDesc::new("record", move |payload| {
            let tag = read_i32(payload);
            record.lock().expect("lock").push(tag);
            if tag % 3 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            0
        }));
    let fx = fixture("jobs-isolated", params);

    let pool = fx.server.pool_id("wide").expect("pool");
    let record_index = fx.client.symbol_index("record").expect("record");
    let job_a = fx.client.acquire_job_id().expect("job a");
    let job_b = fx.client.acquire_job_id().expect("job b");
    assert_ne!(job_a, job_b);

    // Tags: job A uses 0..20, job B uses 100..120.
    let mut ids = Vec::new();
    for seq in 0..20 {
        for (job, base) in [(job_a, 0), (job_b, 100)] {
            ids.push(
                fx.client
                    .send(
                        Packet::exec(record_index)
                            .with_pool(pool)
                            .with_job(job)
                            .with_payload(&int_payload(base + seq)),
                    )
                    .expect("send"),
            );
        }
    }
    for id in ids {
        assert_eq!(fx.client.wait_for(id).expect("reply").status, Status::Success);
    }

    let log = log.lock().expect("lock");
    let a: Vec<i32> = log.iter().copied().filter(|tag| *tag < 100).collect();
    let b: Vec<i32> = log.iter().copied().filter(|tag| *tag >= 100).collect();
    assert_eq!(a, (0..20).collect::<Vec<_>>());
    assert_eq!(b, (100..120).collect::<Vec<_>>());
}

#[test]
fn unknown_pool_gets_pool_not_found() {
    let fx = fixture("scenario-d", ServerParams::default().with_fxn(FxnDesc::new("inc", inc)));
    let index = fx.client.symbol_index("inc").expect("inc");

    for pool_id in [0x8007, 0x0001] {
        let reply = fx
            .client
            .exec(Packet::exec(index).with_pool(pool_id).with_payload(&int_payload(1)))
            .expect("reply");
        assert_eq!(reply.status, Status::PoolNotFound);
        assert_eq!(read_i32(&reply.payload), 1, "function must not run");
    }

    // The server keeps serving.
    let reply = fx
        .client
        .exec(Packet::exec(index).with_payload(&int_payload(1)))
        .expect("reply");
    assert_eq!(reply.status, Status::Success);
}

#[test]
fn releasing_job_returns_queued_messages_unprocessed() {
    let gate = Gate::default();
    let blocker = gate.clone();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let params = ServerParams::default()
        .with_pool(PoolParams::new("solo", 1))
        .with_fxn(FxnDesc::new("block", move |_| {
            blocker.wait();
            0
        }))
        .with_fxn(FxnDesc::new("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        }));
    let fx = fixture("scenario-e", params);

    let pool = fx.server.pool_id("solo").expect("pool");
    let block = fx.client.symbol_index("block").expect("block");
    let count = fx.client.symbol_index("count").expect("count");
    let job = fx.client.acquire_job_id().expect("job");

    let first = fx
        .client
        .send(Packet::exec(block).with_pool(pool).with_job(job))
        .expect("send");
    gate.wait_entered();

    let queued: Vec<u16> = (0..3)
        .map(|_| {
            fx.client
                .send(Packet::exec(count).with_pool(pool).with_job(job))
                .expect("send")
        })
        .collect();

    fx.client.release_job_id(job).expect("release");
    for id in &queued {
        let reply = fx.client.wait_for(*id).expect("reply");
        assert_eq!(reply.status, Status::Unprocessed);
    }

    gate.open();
    assert_eq!(fx.client.wait_for(first).expect("reply").status, Status::Success);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(fx.server.leased_jobs(), 0);
}

#[test]
fn job_ids_are_unique_while_leased() {
    let fx = fixture("job-ids", ServerParams::default());

    let mut leased = Vec::new();
    for _ in 0..50 {
        let id = fx.client.acquire_job_id().expect("acquire");
        assert_ne!(id, 0);
        assert!(!leased.contains(&id));
        leased.push(id);
    }
    assert_eq!(fx.server.leased_jobs(), 50);

    for id in &leased {
        fx.client.release_job_id(*id).expect("release");
    }
    assert_eq!(fx.server.leased_jobs(), 0);
    assert!(matches!(
        fx.client.release_job_id(leased[0]),
        Err(RcmError::JobIdNotFound(_))
    ));
}

#[test]
fn message_for_unleased_job_is_rejected() {
    let fx = fixture("no-job", ServerParams::default().with_fxn(FxnDesc::new("inc", inc)));
    let index = fx.client.symbol_index("inc").expect("inc");

    let reply = fx
        .client
        .exec(Packet::exec(index).with_job(77).with_payload(&int_payload(0)))
        .expect("reply");
    assert_eq!(reply.status, Status::JobIdNotFound);
}

#[test]
fn execution_failures_map_to_statuses() {
    let params = ServerParams::default()
        .with_pool(PoolParams::new("pair", 2))
        .with_fxn(FxnDesc::new("fail", |_| -3))
        .with_fxn(FxnDesc::new("boom", |_| panic!("boom")));
    let fx = fixture("failures", params);
    let pool = fx.server.pool_id("pair").expect("pool");

    let fail = fx.client.symbol_index("fail").expect("fail");
    let reply = fx.client.exec(Packet::exec(fail).with_pool(pool)).expect("reply");
    assert_eq!(reply.status, Status::MessageFunctionError);
    assert_eq!(reply.result, -3);

    let boom = fx.client.symbol_index("boom").expect("boom");
    let reply = fx.client.exec(Packet::exec(boom).with_pool(pool)).expect("reply");
    assert_eq!(reply.status, Status::Error);

    let reply = fx
        .client
        .exec(Packet::exec(0x0001_1005).with_pool(pool))
        .expect("reply");
    assert_eq!(reply.status, Status::InvalidFunction);

    // Both workers survived the panic.
    for _ in 0..4 {
        let reply = fx.client.exec(Packet::exec(fail).with_pool(pool)).expect("reply");
        assert_eq!(reply.status, Status::MessageFunctionError);
    }
}

#[test]
fn removed_symbol_index_stops_resolving() {
    let fx = fixture("removal", ServerParams::default());
    let first = fx.server.add_symbol("foo", inc).expect("add");
    assert_eq!(fx.client.symbol_index("foo").expect("lookup"), first);

    fx.server.remove_symbol("foo").expect("remove");
    let second = fx.server.add_symbol("foo", inc).expect("re-add");
    assert_ne!(first, second);

    let stale = fx
        .client
        .exec(Packet::exec(first).with_payload(&int_payload(1)))
        .expect("reply");
    assert_eq!(stale.status, Status::InvalidFunction);

    let fresh = fx
        .client
        .exec(Packet::exec(second).with_payload(&int_payload(1)))
        .expect("reply");
    assert_eq!(fresh.status, Status::Success);
    assert_eq!(read_i32(&fresh.payload), 2);
}

#[test]
fn admin_requests_report_status() {
    let fx = fixture("admin", ServerParams::default());

    assert!(matches!(
        fx.client.symbol_index("missing"),
        Err(RcmError::SymbolNotFound(_))
    ));

    let reply = fx
        .client
        .exec(Packet::new(MessageKind::SymAdd).with_payload(b"remote"))
        .expect("reply");
    assert_eq!(reply.status, Status::InvalidMessageType);
}

#[test]
fn successful_cmd_is_freed_without_reply() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let params = ServerParams::default()
        .with_fxn(FxnDesc::new("tick", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        }))
        .with_fxn(FxnDesc::new("fail", |_| -1));
    let fx = fixture("cmd", params);
    let tick = fx.client.symbol_index("tick").expect("tick");
    let fail = fx.client.symbol_index("fail").expect("fail");
    let before = fx.transport.stats();

    fx.client.send(Packet::cmd(tick)).expect("send cmd");
    // The default pool runs in-line, so the exec below is handled after
    // the cmd has completed.
    let reply = fx.client.exec(Packet::exec(tick)).expect("reply");
    assert_eq!(reply.status, Status::Success);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    let after = fx.transport.stats();
    assert_eq!(after.allocated - before.allocated, 2);
    assert_eq!(after.freed - before.freed, 2, "cmd freed by server, exec reply by client");

    let failed = fx.client.exec(Packet::cmd(fail)).expect("failed cmd replies");
    assert_eq!(failed.status, Status::MessageFunctionError);
}

#[test]
fn messages_before_start_come_back_unprocessed() {
    let transport: Arc<dyn MessageTransport> = Arc::new(LocalTransport::new());
    let server = RcmServer::create(
        transport.clone(),
        "never-started",
        ServerParams::default().with_fxn(FxnDesc::new("inc", inc)),
    )
    .expect("create");
    let client = RcmClient::connect(transport, "never-started", "waiting")
        .expect("connect")
        .with_reply_timeout(Duration::from_millis(50));

    let ids: Vec<u16> = (0..3)
        .map(|_| client.send(Packet::exec(0x8000_0000)).expect("send"))
        .collect();
    assert!(matches!(
        client.wait_for(ids[0]),
        Err(RcmError::Transport(TransportError::Timeout(_)))
    ));

    server.delete().expect("delete");
    for id in ids {
        assert_eq!(client.wait_for(id).expect("reply").status, Status::Unprocessed);
    }
}

#[test]
fn teardown_mid_flight_replies_to_every_message() {
    let gate = Gate::default();
    let blocker = gate.clone();
    let params = ServerParams::default()
        .with_pool(PoolParams::new("solo", 1))
        .with_fxn(FxnDesc::new("block", move |_| {
            blocker.wait();
            0
        }))
        .with_fxn(FxnDesc::new("noop", |_| 0));
    let fx = fixture("teardown", params);
    let Fixture { server, client, .. } = fx;

    let pool = server.pool_id("solo").expect("pool");
    let block = client.symbol_index("block").expect("block");
    let noop = client.symbol_index("noop").expect("noop");
    let job = client.acquire_job_id().expect("job");

    let first = client
        .send(Packet::exec(block).with_pool(pool).with_job(job))
        .expect("send");
    gate.wait_entered();
    let mut rest: Vec<u16> = (0..2)
        .map(|_| {
            client
                .send(Packet::exec(noop).with_pool(pool).with_job(job))
                .expect("send")
        })
        .collect();
    rest.extend((0..2).map(|_| client.send(Packet::exec(noop).with_pool(pool)).expect("send")));

    let opener = {
        let gate = gate.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            gate.open();
        })
    };
    server.delete().expect("delete");
    opener.join().expect("opener");

    assert_eq!(client.wait_for(first).expect("reply").status, Status::Success);
    for id in rest {
        let status = client.wait_for(id).expect("reply").status;
        assert!(
            matches!(status, Status::Unprocessed | Status::Success),
            "unexpected status {status}"
        );
    }
}

#[test]
fn threads_sharing_a_client_each_get_their_replies() {
    let params = ServerParams::default()
        .with_pool(PoolParams::new("pair", 2))
        .with_fxn(FxnDesc::new("nap", |payload| {
            let ms = read_i32(payload);
            thread::sleep(Duration::from_millis(ms as u64));
            ms
        }));
    let mut fx = fixture("shared-client", params);
    fx.client = fx.client.with_reply_timeout(Duration::from_secs(2));

    let pool = fx.server.pool_id("pair").expect("pair pool");
    let nap = fx.client.symbol_index("nap").expect("nap resolves");
    let client = &fx.client;

    thread::scope(|scope| {
        for ms in [30, 5] {
            scope.spawn(move || {
                for round in 0..40 {
                    let reply = client
                        .exec(Packet::exec(nap).with_pool(pool).with_payload(&int_payload(ms)))
                        .unwrap_or_else(|err| panic!("{ms}ms round {round}: {err}"));
                    assert_eq!(reply.status, Status::Success);
                    assert_eq!(reply.result, ms, "reply belongs to another thread");
                }
            });
        }
    });
}

#[test]
fn undecodable_message_gets_error_reply() {
    let fx = fixture("garbage", ServerParams::default());
    let reply_queue = fx.transport.create_queue("garbage-raw").expect("reply queue");

    let mut body = [0u8; 24];
    body[..2].copy_from_slice(b"RC");
    body[2] = 0xEE;
    body[4..6].copy_from_slice(&0x1234u16.to_le_bytes());
    let mut msg = fx.transport.alloc(body.len());
    msg.set_reply_queue(reply_queue);
    msg.body_mut().extend_from_slice(&body);
    fx.transport.put(fx.server.queue(), msg).expect("put");

    let msg = fx
        .transport
        .get(reply_queue, Some(REPLY_TIMEOUT))
        .expect("error reply should arrive");
    let reply = decode_packet(msg.body(), DEFAULT_MAX_PAYLOAD).expect("reply decodes");
    fx.transport.free(msg);

    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.msg_id, 0x1234);
    assert!(reply.payload.is_empty());
}
