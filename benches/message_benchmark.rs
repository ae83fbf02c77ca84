use criterion::{black_box, criterion_group, criterion_main, Criterion};
use peercall::message::{Candidate, SessionDescription, SignalMessage};

fn sample_sdp() -> String {
    let mut sdp = String::from("v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n");
    for kind in ["audio", "video"] {
        sdp.push_str(&format!(
            "m={} 9 UDP/TLS/RTP/SAVPF 96 111\r\nc=IN IP4 0.0.0.0\r\na=mid:0\r\na=sendrecv\r\n",
            kind
        ));
        for i in 0..20 {
            sdp.push_str(&format!("a=rtcp-fb:96 nack {}\r\n", i));
        }
    }
    sdp
}

fn sample_candidate() -> Candidate {
    Candidate {
        candidate: "candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx raddr 0.0.0.0 rport 0 generation 0".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: Some("EsAw".to_string()),
    }
}

fn bench_encode_offer(c: &mut Criterion) {
    let message = SignalMessage::description(SessionDescription::offer(sample_sdp()));
    c.bench_function("encode_offer", |b| {
        b.iter(|| black_box(message.encode().unwrap()))
    });
}

fn bench_decode_offer(c: &mut Criterion) {
    let text = SignalMessage::description(SessionDescription::offer(sample_sdp()))
        .encode()
        .unwrap();
    c.bench_function("decode_offer", |b| {
        b.iter(|| black_box(SignalMessage::decode(black_box(&text)).unwrap()))
    });
}

fn bench_decode_candidate(c: &mut Criterion) {
    let text = SignalMessage::candidate(sample_candidate()).encode().unwrap();
    c.bench_function("decode_candidate", |b| {
        b.iter(|| black_box(SignalMessage::decode(black_box(&text)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_encode_offer,
    bench_decode_offer,
    bench_decode_candidate
);
criterion_main!(benches);
