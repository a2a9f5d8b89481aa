use std::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, MockDriver};
use fibrelink::core::EndpointId;
use fibrelink::endpoint::{Access, Handler, Member};
use fibrelink::framing::Deframer;
use fibrelink::registry::{EndpointRef, Registry};
use fibrelink::rpc::{CallError, Caller, Dispatcher, RequestTable};
use fibrelink::sink::{MemorySink, Sink};
use futures_executor::LocalPool;
use futures_task::LocalSpawn;

const TIMEOUT: Duration = Duration::from_millis(100);
const ATTEMPTS: usize = 3;

type Table = RequestTable<CriticalSectionRawMutex, 4, 32>;
type TestCaller = Caller<'static, CriticalSectionRawMutex, 4, 32>;
type CallResult = Result<Vec<u8>, CallError>;

struct Echo;

impl Handler for Echo {
    fn handle(&self, request: &[u8], response: &mut dyn Sink) {
        response.push_bytes(request);
    }
}

static ECHO: Echo = Echo;
static MEMBERS: [Member<'static>; 1] = [Member::Property {
    name: "serial_number",
    ty: "uint64",
    access: Access::Read,
    handler: &ECHO,
}];

/// Collects everything the caller transmits, like a byte stream would
struct WireSink(&'static RefCell<Vec<u8>>);

impl Sink for WireSink {
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.0.borrow_mut().extend_from_slice(bytes);
    }

    fn free(&self) -> usize {
        usize::MAX
    }
}

async fn run_call(
    caller: TestCaller,
    endpoint_ref: EndpointRef,
    request: Vec<u8>,
    wire: &'static RefCell<Vec<u8>>,
    result: &'static RefCell<Option<CallResult>>,
) {
    let mut response = [0u8; 32];
    let mut sink = WireSink(wire);
    let outcome = caller
        .call(endpoint_ref, &request, &mut response, &mut sink)
        .await
        .map(|len| response[..len].to_vec());
    *result.borrow_mut() = Some(outcome);
}

fn decode(stream: &[u8]) -> Vec<Vec<u8>> {
    let mut deframer = Deframer::new();
    let mut packets = Vec::new();
    deframer.process_bytes(stream, &mut |payload| packets.push(payload.to_vec()));
    packets
}

/// Runs every caller-transmitted packet through the responder dispatcher and
/// feeds the produced acknowledgments back in.
fn pump(dispatcher: &mut Dispatcher<'_, 64>, wire: &RefCell<Vec<u8>>) {
    let bytes: Vec<u8> = wire.borrow_mut().drain(..).collect();
    let mut replies = Vec::new();
    for payload in decode(&bytes) {
        let mut buf = [0u8; 256];
        let mut sink = MemorySink::new(&mut buf);
        dispatcher.process_packet(&payload, &mut sink);
        let written = sink.written();
        replies.extend_from_slice(&buf[..written]);
    }
    for payload in decode(&replies) {
        let mut buf = [0u8; 256];
        let mut sink = MemorySink::new(&mut buf);
        dispatcher.process_packet(&payload, &mut sink);
        assert_eq!(sink.written(), 0, "an ack must not produce output");
    }
}

fn descriptor_ref() -> EndpointRef {
    EndpointRef {
        endpoint_id: EndpointId::DESCRIPTOR,
        schema_crc: 0,
    }
}

// One test drives all scenarios: the mock time driver is process-global.
#[test]
fn test_caller_timeout_and_retry() {
    let mut executor = LocalPool::new();
    let spawner = executor.spawner();
    let time = MockDriver::get();

    let registry: Registry<4> = Registry::new(&MEMBERS).unwrap();

    // An ack arriving promptly resolves the call on the first attempt.
    {
        let table: &'static Table = Box::leak(Box::new(Table::new()));
        let wire = Box::leak(Box::new(RefCell::new(Vec::new())));
        let result = Box::leak(Box::new(RefCell::new(None)));
        let mut dispatcher: Dispatcher<64> = Dispatcher::new(&registry).with_requests(table);

        let caller = Caller::new(table, TIMEOUT, ATTEMPTS);
        let request = 0u32.to_le_bytes().to_vec();
        spawner
            .spawn_local_obj(
                Box::new(run_call(caller, descriptor_ref(), request, wire, result)).into(),
            )
            .unwrap();

        executor.run_until_stalled();
        assert_eq!(decode(&wire.borrow()).len(), 1);

        pump(&mut dispatcher, wire);
        executor.run_until_stalled();

        let document = result.borrow_mut().take().unwrap().unwrap();
        // the schema document is longer than one 32-byte page
        assert_eq!(document.len(), 32);
        assert_eq!(&document[..2], b"[{");
    }

    // A lost first attempt is re-sent identically and the late ack resolves it.
    {
        let table: &'static Table = Box::leak(Box::new(Table::new()));
        let wire = Box::leak(Box::new(RefCell::new(Vec::new())));
        let result = Box::leak(Box::new(RefCell::new(None)));
        let mut dispatcher: Dispatcher<64> = Dispatcher::new(&registry).with_requests(table);

        let caller = Caller::new(table, TIMEOUT, ATTEMPTS);
        spawner
            .spawn_local_obj(
                Box::new(run_call(
                    caller,
                    descriptor_ref(),
                    0u32.to_le_bytes().to_vec(),
                    wire,
                    result,
                ))
                .into(),
            )
            .unwrap();

        executor.run_until_stalled();
        time.advance(TIMEOUT);
        executor.run_until_stalled();

        let attempts = decode(&wire.borrow());
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0], attempts[1]);

        pump(&mut dispatcher, wire);
        executor.run_until_stalled();
        assert!(result.borrow_mut().take().unwrap().is_ok());
    }

    // With no responder at all, the call fails after the last attempt.
    {
        let table: &'static Table = Box::leak(Box::new(Table::new()));
        let wire = Box::leak(Box::new(RefCell::new(Vec::new())));
        let result = Box::leak(Box::new(RefCell::new(None)));

        let caller = Caller::new(table, TIMEOUT, ATTEMPTS);
        spawner
            .spawn_local_obj(
                Box::new(run_call(
                    caller,
                    descriptor_ref(),
                    0u32.to_le_bytes().to_vec(),
                    wire,
                    result,
                ))
                .into(),
            )
            .unwrap();

        executor.run_until_stalled();
        for _ in 0..ATTEMPTS {
            time.advance(TIMEOUT);
            executor.run_until_stalled();
        }

        assert_eq!(decode(&wire.borrow()).len(), ATTEMPTS);
        assert_eq!(result.borrow_mut().take().unwrap(), Err(CallError::Timeout));
    }
}
