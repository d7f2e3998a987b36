use bugscan::payload::{PayloadTemplate, PayloadVars};
use bugscan::probe::direct::HttpHead;
use bugscan::probe::{RelayConfig, ResponseHead};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn render_default_payload(template: &PayloadTemplate) -> String {
    template.render(&PayloadVars {
        method: "GET",
        path: "/",
        protocol: "HTTP/1.1",
        scheme: "",
        host: "target.example",
        bug: "bug.example",
    })
}

fn criterion_benchmark(c: &mut Criterion) {
    let template = PayloadTemplate::default();
    c.bench_function("render default payload", |b| {
        b.iter(|| render_default_payload(black_box(&template)));
    });

    let relay = RelayConfig::new("target.example").with_path("[scheme][bug]/ws");
    c.bench_function("relay payload with path template", |b| {
        b.iter(|| relay.payload_for(black_box("bug.example")));
    });

    let response = b"HTTP/1.1 301 Moved Permanently\r\nDate: Thu, 01 Jan 2026 00:00:00 GMT\r\n\
Content-Type: text/html\r\nServer: cloudflare\r\nLocation: https://a.example/\r\n\r\n<html></html>";
    c.bench_function("parse direct response head", |b| {
        b.iter(|| HttpHead::parse(black_box(response)));
    });

    let lines = [
        "HTTP/1.1 302 Found",
        "Content-Type: text/html",
        "Location: http://portal.example/",
        "Server: captive",
        "Connection: close",
    ];
    c.bench_function("collect relay response head", |b| {
        b.iter(|| ResponseHead::from_lines(black_box(lines)).summary());
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
