use std::hint::black_box;
use std::rc::Rc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hba_mock::MockFpga;
use hba_platform::Broadcaster;
use hba_transport::*;

const TIMEOUT: Duration = Duration::from_millis(100);

fn bench_read_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_exchange");

    for count in [1usize, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let fpga = MockFpga::new();
            let mut engine = ProtocolEngine::with_link(Box::new(fpga.link()), TIMEOUT);
            let core = CoreId::new(3).unwrap();

            b.iter(|| {
                let mut packet = Packet::read(core, 0x10, count).unwrap();
                let len = packet.len();
                let n = engine.exchange(len, packet.buffer_mut()).unwrap();
                fpga.clear_history();
                black_box(n)
            });
        });
    }
    group.finish();
}

fn bench_write_exchange(c: &mut Criterion) {
    let fpga = MockFpga::new();
    let mut engine = ProtocolEngine::with_link(Box::new(fpga.link()), TIMEOUT);
    let core = CoreId::new(5).unwrap();
    let data = [0x11, 0x22, 0x33, 0x44];

    c.bench_function("write_exchange_4", |b| {
        b.iter(|| {
            let mut packet = Packet::write(core, 0, black_box(&data)).unwrap();
            let len = packet.len();
            let n = engine.exchange(len, packet.buffer_mut()).unwrap();
            fpga.clear_history();
            n
        });
    });
}

fn bench_interrupt_service(c: &mut Criterion) {
    let fpga = MockFpga::new();
    let config = TransportConfig {
        interrupt_pin: Some(17),
        ..TransportConfig::default()
    };
    let transport = SerialFpga::new(config, Box::new(fpga.connector()), Rc::new(Broadcaster::new()));
    for core in [2u8, 7, 12] {
        let fpga = fpga.clone();
        transport
            .register_interrupt_handler(core, Rc::new(move |_: &dyn FpgaBus| fpga.clear_interrupts()))
            .unwrap();
    }

    c.bench_function("service_three_pending", |b| {
        b.iter(|| {
            fpga.raise_interrupt(2);
            fpga.raise_interrupt(7);
            fpga.raise_interrupt(12);
            let outcome = transport.service_interrupts();
            fpga.clear_history();
            black_box(outcome)
        });
    });
}

criterion_group!(benches, bench_read_exchange, bench_write_exchange, bench_interrupt_service);
criterion_main!(benches);
