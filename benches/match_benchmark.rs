use criterion::{black_box, criterion_group, criterion_main, Criterion};

use browscap::{normalize, CacheStore, Compiler, Matcher};

const DEFINITIONS: &str = include_str!("../tests/fixtures/browscap_sample.ini");

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/37.0.2062.120 Safari/537.36",
    "Mozilla/5.0 (Android 4.4; Mobile; rv:31.0) Gecko/31.0 Firefox/31.0",
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
    "curl/7.38.0",
];

/// Sample definitions plus `extra` synthetic wildcard entries.
fn definitions(extra: usize) -> String {
    let mut text = DEFINITIONS.to_string();
    for i in 0..extra {
        text.push_str(&format!(
            "\n[Mozilla/5.0 (*SyntheticOS {i}*) Gecko/* Synthetic/{i}.*]\nParent=DefaultProperties\nBrowser=Synthetic {i}\n"
        ));
    }
    text
}

fn bench_compile(c: &mut Criterion) {
    let text = normalize(&definitions(500));
    let compiler = Compiler::default();

    c.bench_function("compile_500_entries", |b| {
        b.iter(|| compiler.compile(black_box(&text)).unwrap());
    });
}

fn bench_match(c: &mut Criterion) {
    let compilation = Compiler::default().compile(&normalize(&definitions(500))).unwrap();
    let matcher = Matcher::new(compilation.database);

    c.bench_function("match_agent", |b| {
        b.iter(|| {
            for user_agent in USER_AGENTS {
                black_box(matcher.match_agent(black_box(user_agent)));
            }
        });
    });
}

fn bench_load_artifact(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), "browscap.cache", "browscap.ini").unwrap();
    let compilation = Compiler::default().compile(&normalize(&definitions(500))).unwrap();
    let metadata = browscap::ArtifactMetadata::new(compilation.database.len(), 0, 0, false);
    store.save(&compilation.database, &metadata).unwrap();

    c.bench_function("load_artifact", |b| {
        b.iter(|| store.load().unwrap());
    });
}

criterion_group!(benches, bench_compile, bench_match, bench_load_artifact);
criterion_main!(benches);
