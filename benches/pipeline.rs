use std::io;

use criterion::{Criterion, criterion_group, criterion_main};
use penstock::{Channel, Chunk, ClientHandler, client};

/// Accepts every byte instantly, like a socket that is always writable.
struct Sink;

impl io::Read for Sink {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::WouldBlock.into())
    }
}

impl io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for Sink {
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Discard {
    fill: [u8; 4096],
}

impl ClientHandler for Discard {
    fn buffer(&mut self) -> &mut [u8] {
        &mut self.fill
    }

    fn read(&mut self, _len: usize) {}
}

fn bench_send_drain(c: &mut Criterion) {
    let (mut sender, mut endpoint) = client(Discard { fill: [0; 4096] })
        .write_buffer_capacity(64 * 1024)
        .build();
    let mut sink = Sink;

    let payload = Chunk::from(vec![0u8; 128]);
    c.bench_function("send_drain_128b", |b| {
        b.iter(|| {
            sender.send(payload.clone()).unwrap();
            endpoint.on_writable(&mut sink).unwrap();
        })
    });

    let payload = Chunk::from(vec![0u8; 16 * 1024]);
    c.bench_function("send_drain_16k", |b| {
        b.iter(|| {
            sender.send(payload.clone()).unwrap();
            endpoint.on_writable(&mut sink).unwrap();
        })
    });
}

criterion_group!(benches, bench_send_drain);
criterion_main!(benches);
