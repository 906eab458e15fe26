use codeshare_collab::runner::eval::evaluate;
use codeshare_collab::storage::templates::default_template;
use codeshare_collab::{
    DrawOp, Event, EventBus, EventPayload, Language, LanguageRunner, Point, Runner, User,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::time::Duration;
use uuid::Uuid;

fn bench_javascript_runner(c: &mut Criterion) {
    let runner = Runner::for_language(&Language::JavaScript);
    let source = "console.log(\"line\");\nconsole.log(2 * 21);\n".repeat(50);

    c.bench_function("javascript_runner_100_logs", |b| {
        b.iter(|| black_box(runner.run(black_box(&source))))
    });
}

fn bench_every_template(c: &mut Criterion) {
    let cases: Vec<(Runner, String)> = [
        Language::JavaScript,
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::Ruby,
        Language::Go,
    ]
    .iter()
    .map(|lang| (Runner::for_language(lang), default_template(lang)))
    .collect();

    c.bench_function("run_all_templates", |b| {
        b.iter(|| {
            for (runner, source) in &cases {
                black_box(runner.run(source));
            }
        })
    });
}

fn bench_evaluate(c: &mut Criterion) {
    c.bench_function("evaluate_arithmetic", |b| {
        b.iter(|| black_box(evaluate(black_box("1234 * 5678"))))
    });
}

fn bench_event_encode(c: &mut Criterion) {
    let users: Vec<User> = (0..20).map(|i| User::new(format!("user-{i}"))).collect();
    let event = Event::new(
        users[0].id,
        EventPayload::UserJoin {
            user: None,
            users,
        },
    );

    c.bench_function("roster_event_encode_20_users", |b| {
        b.iter(|| black_box(event.encode().unwrap()))
    });
}

fn bench_event_decode(c: &mut Criterion) {
    let event = Event::new(
        Uuid::new_v4(),
        EventPayload::CodeChange {
            code: default_template(&Language::JavaScript),
        },
    );
    let encoded = event.encode().unwrap();

    c.bench_function("code_change_decode", |b| {
        b.iter(|| black_box(Event::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_bus_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = EventBus::new(Duration::ZERO);
    let subs: Vec<_> = (0..100).map(|_| bus.subscribe("room", |_| {})).collect();
    let sender = Uuid::new_v4();

    c.bench_function("bus_publish_100_subscribers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let op = DrawOp::stroke(Point::new(0.0, 0.0), Point::new(1.0, 1.0), "#000000");
                black_box(bus.publish("room", sender, EventPayload::Draw(op)));
            })
        })
    });

    drop(subs);
}

criterion_group!(
    runners,
    bench_javascript_runner,
    bench_every_template,
    bench_evaluate
);
criterion_group!(protocol, bench_event_encode, bench_event_decode);
criterion_group!(bus, bench_bus_fan_out);
criterion_main!(runners, protocol, bus);
