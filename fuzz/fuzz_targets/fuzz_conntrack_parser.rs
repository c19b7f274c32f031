#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::conntrack::parser::parse_event_line;

// `conntrack -E -o id` output lines. The parser must reject or skip
// anything malformed without panicking; each line is parsed on its own.
fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    for line in text.lines().take(256) {
        if let Ok(Some(event)) = parse_event_line(line) {
            let _ = format!("{event:?}");
        }
    }
});
