//! Parser fuzz target: feed arbitrary bytes to the script parser, and run one
//! generation pass on whatever parses. Neither step may panic.
//! Build with: cargo fuzz run parser_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use rand::SeedableRng;

    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let Ok(mut program) = fuzzdsl::parse(s) else {
        return;
    };
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
    let Ok(mut root) = program.root_field(&mut rng) else {
        return;
    };
    // Allocation stops at MAX_UNITS; keep the fill pass cheaper than that.
    if root.size() > 1 << 16 {
        return;
    }
    let _ = program.fill(&mut root, &mut rng);
    let _ = root.to_bytes();
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
