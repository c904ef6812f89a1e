//! SDK components stay quiet unless their verbosity is raised
//!
//! One test per binary: the `log` backend is process-global.

use std::sync::Mutex;

use ember_sdk::bus::mock::MockBus;
use ember_sdk::platform::{install, SinkLogger};
use ember_sdk::prelude::*;
use log::LevelFilter;

static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());
static LOGGER: SinkLogger = SinkLogger::new(capture, LevelFilter::Trace);

fn capture(line: &str) {
    LINES.lock().unwrap().push(line.to_string());
}

fn logged(needle: &str) -> bool {
    LINES.lock().unwrap().iter().any(|l| l.contains(needle))
}

fn relay() -> Box<dyn PipeSegment> {
    Box::new(Relay::new())
}

#[test]
fn test_logging_follows_instance_verbosity() {
    install(&LOGGER).unwrap();

    let clock = ManualClock::new();
    let mut kernel = Kernel::new(clock, KernelConfig::default());

    let quiet = BusAdapter::new(0, MockBus::new(), AdapterConfig::default());
    let (service, _bus) = BusService::new(quiet, 10);
    kernel.attach_subscribed(Box::new(service)).unwrap();
    assert!(!logged("polling every"));

    let loud = BusAdapter::new(1, MockBus::new(), AdapterConfig::default());
    let (service, _bus) = BusService::new(loud, 20);
    kernel
        .attach_subscribed(Box::new(service.with_verbosity(LevelFilter::Debug)))
        .unwrap();
    assert!(logged("polling every 20 ms"));
    assert!(!logged("polling every 10 ms"));

    let signature = Signature::new("chat", b"HELO", relay);
    let mut pipe = Pipeline::default();
    let quiet = pipe
        .add(Box::new(ProtocolDetect::new().with_signature(signature)))
        .unwrap();
    pipe.from_counterparty(quiet, Buffer::Creator(b"HELO"));
    assert!(!logged("detected protocol"));

    let loud = pipe
        .add(Box::new(
            ProtocolDetect::new()
                .with_signature(signature)
                .with_verbosity(LevelFilter::Debug),
        ))
        .unwrap();
    pipe.from_counterparty(loud, Buffer::Creator(b"HELO"));
    assert!(logged("detected protocol chat"));
}
