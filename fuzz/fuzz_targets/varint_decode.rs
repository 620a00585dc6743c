#![no_main]

use caskdb::record;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some((value, _)) = record::decode_varint(data) {
        let mut buf = Vec::new();
        record::encode_varint(&mut buf, value);
        assert_eq!(record::decode_varint(&buf), Some((value, buf.len())));
    }
});
