//! Benchmark: parse once, then time full generation passes (allocate, identify, fill,
//! serialize) for a flat layout, a template-heavy layout and a digest-heavy layout.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fuzzdsl::{parse, Generator, GeneratorConfig};

const FLAT: &str = r#"
block<4> magic = "FUZZ";
block<2> version = 1;
varblock<16, 256> payload;
block<4> crc = crc32(payload);
"#;

const TEMPLATES: &str = r#"
template Entry {
  block<1> tag;
  block<2> len = size(body);
  varblock<0, 32> body;
  block<4> crc = crc32(body);
}
block<2> entries = count(list);
compound list { Entry<8, 32>; }
"#;

const DIGESTS: &str = r#"
varblock<64, 1024> data;
auto md = md5(data);
auto s1 = sha1(data);
auto s256 = sha256(data, s1);
auto s512 = sha512(data);
"#;

fn bench_layout(c: &mut Criterion, name: &str, source: &str) {
    let program = parse(source).expect("bench script parses");
    let mut generator = Generator::new(program, &GeneratorConfig::default().with_seed(1));
    c.bench_function(name, |b| {
        b.iter(|| black_box(generator.next_artifact().expect("pass succeeds")))
    });
}

fn bench_generate(c: &mut Criterion) {
    bench_layout(c, "generate_flat", FLAT);
    bench_layout(c, "generate_templates", TEMPLATES);
    bench_layout(c, "generate_digests", DIGESTS);
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_templates", |b| {
        b.iter(|| black_box(parse(black_box(TEMPLATES)).expect("parses")))
    });
}

criterion_group!(benches, bench_generate, bench_parse);
criterion_main!(benches);
