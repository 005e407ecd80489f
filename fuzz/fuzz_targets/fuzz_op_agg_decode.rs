//! Fuzz target: aggregator item framing
//!
//! Walks arbitrary bytes with `decode_msg` and checks that every item it
//! yields lies inside the input and re-encodes to the bytes it came from.
//!
//! cargo fuzz run fuzz_op_agg_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use mesh_access::agg::{decode_msg, encode_msg, encoded_len};

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    while !cursor.is_empty() {
        let offset = data.len() - cursor.len();
        let Ok(item) = decode_msg(&mut cursor) else {
            break;
        };
        let consumed = data.len() - cursor.len() - offset;
        assert!(consumed >= item.len() + 1, "header not accounted for");

        // Canonical encodings re-encode identically.
        let mut out = vec![0u8; encoded_len(item.len())];
        let n = encode_msg(item, &mut out).expect("decoded item must re-encode");
        if n == consumed {
            assert_eq!(&out[..], &data[offset..offset + consumed]);
        }
    }
});
