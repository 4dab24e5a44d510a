#![no_main]

use libfuzzer_sys::fuzz_target;
use td_core::tdq;

// Any query that parses must print to text that parses back to the same tree.
fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(query) = tdq::parse(input) else {
        return;
    };
    let printed = query.to_string();
    let reparsed = tdq::parse(&printed)
        .unwrap_or_else(|err| panic!("printed query {printed:?} failed to parse: {err}"));
    assert_eq!(reparsed, query, "round trip changed {input:?}");
});
